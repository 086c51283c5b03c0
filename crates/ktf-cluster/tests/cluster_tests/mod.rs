//! Integration tests for cluster orchestration
//!
//! Tests are organized by the story they tell:
//!
//! - `lifecycle`: deploying manifest addons with dependencies onto an
//!   existing cluster and waiting for them to become ready
//!
//! - `teardown`: creating test namespaces and objects, then removing them
//!   with the Cleaner

mod helpers;
mod lifecycle;
mod teardown;
