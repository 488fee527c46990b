//! Common types for Strata: CRDs, errors, annotations, and parameter handling

#![deny(missing_docs)]

pub mod annotations;
pub mod crd;
pub mod digest;
pub mod error;
pub mod params;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Strata CRDs
pub const API_GROUP: &str = "strata.dev";

/// Finalizer held while a remote counterpart may still exist
pub const FINALIZER: &str = "strata.dev/finalizer";

/// Finalizer placed on credentials secrets while a workspace uses them
pub const SECRET_FINALIZER: &str = "strata.dev/credentials-in-use";

/// Label written onto remote records carrying the owner token (resource UID)
pub const OWNER_LABEL: &str = "strata.dev/owner";

/// Label on ServiceInstance resources naming the workspace they live in
pub const WORKSPACE_LABEL: &str = "strata.dev/workspace";

/// Label on ServiceBinding resources naming the instance they bind
pub const INSTANCE_LABEL: &str = "strata.dev/instance";

/// Annotation written onto remote records mirroring the local generation
pub const GENERATION_ANNOTATION: &str = "strata.dev/generation";

/// Annotation written onto remote records carrying the parameter digest
pub const PARAMETER_HASH_ANNOTATION: &str = "strata.dev/parameter-hash";

/// Requeue interval (seconds) for wait states: dependency not ready,
/// remote operation in progress, deletion blocked
pub const REQUEUE_WAIT_SECS: u64 = 10;

/// Requeue interval (seconds) after a status-only write that must itself
/// trigger another reconciliation (first sight, orphan adoption)
pub const REQUEUE_IMMEDIATE_SECS: u64 = 1;

/// Default polling interval (seconds) for a Ready workspace
pub const DEFAULT_WORKSPACE_READY_SECS: u64 = 60;

/// Default polling interval (seconds) for a Ready instance or binding
pub const DEFAULT_READY_INTERVAL_SECS: u64 = 600;
