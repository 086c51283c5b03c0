//! Common building blocks for ktf: errors, cancellation, retry, manifests, logging

#![deny(missing_docs)]

pub mod context;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod telemetry;

pub use context::{Context, ContextError};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "ktf";

/// Label key marking namespaces generated for a test
pub const TEST_NAMESPACE_LABEL: &str = "ktf.io/test";

/// Label key marking objects managed by ktf
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_KTF: &str = "ktf";
