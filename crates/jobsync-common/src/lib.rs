//! Common types for jobsync: errors, kube client construction, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace frameworks and their secrets live in unless configured otherwise
pub const DEFAULT_NAMESPACE: &str = "default";

/// API group/version served by the framework controller
pub const FRAMEWORK_API_VERSION: &str = "frameworkcontroller.microsoft.com/v1";

/// Kind of the workload object
pub const FRAMEWORK_KIND: &str = "Framework";

/// Plural resource name of the workload object
pub const FRAMEWORK_PLURAL: &str = "frameworks";
