pub mod config;
pub mod yaml_include;

/// Common utilities shared across the expense fraud scoring workspace
///
/// This crate provides functionality used by both the `scoring` engine and the
/// deployable `expense` application:
///
/// - Layered YAML configuration with `!include` support
/// - Shared test utilities

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{generate_unique_id, get_test_database_url};
