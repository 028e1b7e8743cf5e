//! The error kinds shared across every hpc-connect crate.
//!
//! These names are deliberately stable: they are meant to be the same
//! vocabulary a cross-language binding would expose.

use std::time::Duration;

use thiserror::Error;

/// The error type returned by job-spec construction, submission adapters,
/// the future/poller engine, and the launcher compiler.
#[derive(Debug, Error)]
pub enum HpcConnectError {
    /// The job specification violated one of its invariants.
    #[error("invalid job specification: {0}")]
    InvalidJobSpec(String),
    /// A scope-invalid or schema-invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// A required scheduler binary was not found on `PATH`.
    #[error("missing required binary `{0}` on PATH")]
    MissingBinary(String),
    /// The scheduler's submit command failed or produced no recognizable
    /// job identifier.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    /// An accounting query (`sacct`/`qstat`) produced no usable result after
    /// retrying.
    #[error("accounting unavailable for job `{jobid}` after {attempts} attempts")]
    AccountingUnavailable {
        /// The job identifier being queried.
        jobid: String,
        /// How many attempts were made before giving up.
        attempts: u32,
    },
    /// A resource-view query required a socket-scoped topology, or asked
    /// for `ranks_per_socket` without `ranks`.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// `Future::result` or `as_completed` exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// Surfaced by a future whose job was cancelled: completion with
    /// returncode 1 and `cancelled() == true`.
    #[error("job was cancelled")]
    JobCancelled,
    /// Wraps an I/O failure from spawning or communicating with a
    /// subprocess.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A `%(key)s` percent-expansion template referenced a key not present
    /// in the resource view being expanded against.
    #[error("undefined template key `{0}`")]
    Template(String),
}

impl From<hpc_connect_resource::ResourceError> for HpcConnectError {
    fn from(error: hpc_connect_resource::ResourceError) -> Self {
        HpcConnectError::InvalidTopology(error.to_string())
    }
}
