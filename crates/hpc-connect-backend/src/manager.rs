//! The `SubmissionManager` trait every backend adapter implements.

use std::sync::Arc;
use std::time::Duration;

use hpc_connect_job::HpcConnectError;
use hpc_connect_job::HpcProcess;
use hpc_connect_job::JobSpec;

/// Converts a job's wall-clock `time_limit` (seconds) into Slurm/PBS's
/// `HH:MM:SS` directive format, padding generously since schedulers kill
/// jobs that run past their declared limit.
///
/// `multiplier` accounts for scheduler overhead: 1.25 for Slurm/PBS queue
/// and epilogue time, 1.0 for Flux, which enforces duration precisely.
pub fn format_time_limit(seconds: f64, multiplier: f64) -> String {
    let total = (seconds * multiplier).ceil() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// An adapter that can submit a [`JobSpec`] to a particular scheduler and
/// hand back a live [`HpcProcess`] handle.
pub trait SubmissionManager: Send + Sync {
    /// Renders the backend's submission script/jobspec and returns an
    /// updated spec whose `commands` point at it.
    fn prepare(&self, spec: &JobSpec) -> Result<JobSpec, HpcConnectError>;

    /// Prepares and submits `spec`, returning a handle to the running job.
    ///
    /// `exclusive` requests exclusive node access where the backend
    /// supports it (Slurm's `--exclusive`, PBS's `-n`).
    fn submit(&self, spec: &JobSpec, exclusive: bool) -> Result<Arc<dyn HpcProcess>, HpcConnectError>;

    /// The default interval between polls for processes from this backend.
    fn default_polling_interval(&self) -> Duration;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_time_limit_with_multiplier() {
        assert_eq!(format_time_limit(3600.0, 1.25), "01:15:00");
        assert_eq!(format_time_limit(90.0, 1.0), "00:01:30");
        assert_eq!(format_time_limit(0.4, 1.0), "00:00:01");
    }
}
