//! Addon implementations shipped with ktf

mod manifest;

pub use manifest::{ManifestAddon, ManifestAddonBuilder};
