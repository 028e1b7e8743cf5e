//! The Flux submission adapter.
//!
//! Flux's native Rust bindings are not part of this workspace's dependency
//! stack, so this adapter drives Flux the same way the CLI-oriented Slurm
//! and PBS adapters do: `flux submit` to queue a job, `flux jobs` to poll
//! its state, and `flux job cancel` to cancel it.

use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use hpc_connect_job::HpcConnectError;
use hpc_connect_job::HpcProcess;
use hpc_connect_job::JobSpec;
use tracing::debug;
use tracing::trace;
use which::which;

use crate::manager::SubmissionManager;
use crate::manager::format_time_limit;
use crate::script;

/// The `flux submit`/`flux jobs`/`flux job cancel`-backed Flux adapter.
#[derive(Debug)]
pub struct FluxManager {
    /// Extra arguments appended to every `flux submit` invocation.
    pub default_options: Vec<String>,
}

impl FluxManager {
    /// Constructs the adapter, failing if `flux` is not on `PATH`.
    pub fn new(default_options: Vec<String>) -> Result<Self, HpcConnectError> {
        which("flux").map_err(|_| HpcConnectError::MissingBinary("flux".to_string()))?;
        Ok(Self { default_options })
    }
}

impl SubmissionManager for FluxManager {
    fn prepare(&self, spec: &JobSpec) -> Result<JobSpec, HpcConnectError> {
        script::prepare(spec, &[], &[])
    }

    fn submit(&self, spec: &JobSpec, exclusive: bool) -> Result<Arc<dyn HpcProcess>, HpcConnectError> {
        let prepared = self.prepare(spec)?;
        let script_path = prepared.commands.first().expect("prepare sets exactly one command");
        let cpus = prepared.cpus.unwrap_or(1);
        let nodes = prepared.nodes.unwrap_or(1);
        let cpus_per_slot = cpus.div_ceil(nodes).max(1);

        let mut command = Command::new("flux");
        command
            .arg("submit")
            .arg("--job-name")
            .arg(&prepared.name)
            .arg("-N")
            .arg(nodes.to_string())
            .arg("-n")
            .arg(cpus_per_slot.to_string())
            .arg("-t")
            .arg(format_time_limit(prepared.time_limit, 1.0));
        if let Some(gpus) = prepared.gpus {
            command.arg("-g").arg(gpus.to_string());
        }
        if exclusive {
            command.arg("--exclusive");
        }
        command.args(&self.default_options);
        command.arg(script_path);
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        trace!(?command, "spawning flux submit");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let jobid = stdout.trim().lines().last().map(str::to_string);

        let Some(jobid) = jobid.filter(|id| !id.is_empty()) else {
            return Err(HpcConnectError::SubmissionFailed(format!(
                "flux submit produced no job identifier\nstderr: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        };

        debug!("job `{}` queued as Flux job `{jobid}`", prepared.name);

        Ok(Arc::new(FluxProcess {
            jobid,
            submitted: Utc::now(),
            state: Mutex::new(FluxProcessState { started: None, returncode: None }),
        }))
    }

    fn default_polling_interval(&self) -> Duration {
        Duration::from_secs_f64(30.0)
    }
}

/// Splits one `flux jobs -no "{status} {returncode}"` line into its status
/// token and parsed exit code (absent once a job is not yet complete).
fn parse_status_line(line: &str) -> (&str, Option<i32>) {
    let mut fields = line.split_whitespace();
    let status = fields.next().unwrap_or("");
    let code = fields.next().and_then(|field| field.parse().ok());
    (status, code)
}

/// Whether `status` marks a job as no longer runnable, i.e. `poll` should
/// report a returncode. An empty status (job not found yet) is not
/// terminal; Flux may not have indexed the job at the instant of the first
/// poll.
fn status_is_terminal(status: &str) -> bool {
    !matches!(status, "RUN" | "SCHED" | "PEND" | "")
}

/// Mutable state for a [`FluxProcess`], updated only from `poll`/`cancel`.
#[derive(Debug)]
struct FluxProcessState {
    started: Option<DateTime<Utc>>,
    returncode: Option<i32>,
}

/// A live handle to a submitted Flux job.
#[derive(Debug)]
pub struct FluxProcess {
    jobid: String,
    submitted: DateTime<Utc>,
    state: Mutex<FluxProcessState>,
}

impl HpcProcess for FluxProcess {
    fn jobid(&self) -> Option<String> {
        Some(self.jobid.clone())
    }

    fn submitted(&self) -> DateTime<Utc> {
        self.submitted
    }

    fn started(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("flux process state poisoned").started
    }

    fn returncode(&self) -> Option<i32> {
        self.state.lock().expect("flux process state poisoned").returncode
    }

    fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
        if let Some(returncode) = self.returncode() {
            return Ok(Some(returncode));
        }

        let mut command = Command::new("flux");
        command.arg("jobs").arg("-no").arg("{status} {returncode}").arg(&self.jobid);
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        trace!(?command, "spawning flux jobs");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (status, code) = parse_status_line(stdout.lines().next().unwrap_or_default());

        let mut state = self.state.lock().expect("flux process state poisoned");
        if !status_is_terminal(status) {
            if status == "RUN" && state.started.is_none() {
                state.started = Some(Utc::now());
            }
            return Ok(None);
        }

        let code = code.unwrap_or(0);
        if state.started.is_none() {
            state.started = Some(Utc::now());
        }
        state.returncode = Some(code);
        Ok(Some(code))
    }

    fn cancel(&self) -> Result<(), HpcConnectError> {
        let mut command = Command::new("flux");
        command.arg("job").arg("cancel").arg(&self.jobid);
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        // Tolerate the job already being inactive.
        let _ = command.status();
        let mut state = self.state.lock().expect("flux process state poisoned");
        state.returncode.get_or_insert(1);
        Ok(())
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(30.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_states_are_not_terminal() {
        for status in ["RUN", "SCHED", "PEND", ""] {
            assert!(!status_is_terminal(status));
        }
    }

    #[test]
    fn completed_status_carries_an_exit_code() {
        let (status, code) = parse_status_line("CD 0");
        assert_eq!(status, "CD");
        assert_eq!(code, Some(0));
        assert!(status_is_terminal(status));
    }

    #[test]
    fn failed_status_parses_nonzero_code() {
        let (status, code) = parse_status_line("F 137");
        assert_eq!(status, "F");
        assert_eq!(code, Some(137));
        assert!(status_is_terminal(status));
    }

    #[test]
    fn blank_line_parses_as_not_yet_indexed() {
        let (status, code) = parse_status_line("");
        assert_eq!(status, "");
        assert_eq!(code, None);
        assert!(!status_is_terminal(status));
    }
}
