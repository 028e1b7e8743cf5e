//! The PBS submission adapter (`qsub`/`qstat`/`qdel`).

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

/// The `qsub`/`qstat`/`qdel`-backed PBS adapter.
#[derive(Debug)]
pub struct PbsManager {
    /// Extra `#PBS` lines applied to every job, verbatim.
    pub default_options: Vec<String>,
    /// CPUs-per-node used to compute `-l nodes=N:ppn=CPUS_PER_NODE`.
    pub cpus_per_node: u64,
}

impl PbsManager {
    /// Constructs the adapter, failing if `qsub`/`qstat`/`qdel` are not on
    /// `PATH`.
    pub fn new(default_options: Vec<String>, cpus_per_node: u64) -> Result<Self, HpcConnectError> {
        for binary in ["qsub", "qstat", "qdel"] {
            which(binary).map_err(|_| HpcConnectError::MissingBinary(binary.to_string()))?;
        }
        Ok(Self { default_options, cpus_per_node })
    }

    fn directives(&self, spec: &JobSpec) -> Vec<String> {
        let mut directives = vec!["#PBS -V".to_string(), format!("#PBS -N {}", spec.name)];
        let nodes = spec.nodes.unwrap_or(1);
        directives.push(format!("#PBS -l nodes={nodes}:ppn={}", self.cpus_per_node));
        directives.push(format!("#PBS -l walltime={}", format_time_limit(spec.time_limit, 1.25)));

        match (&spec.output, &spec.error) {
            (Some(output), Some(error)) if output == error => {
                directives.push(format!("#PBS -o {}", output.display()));
                directives.push("#PBS -j oe".to_string());
            }
            (output, error) => {
                if let Some(output) = output {
                    directives.push(format!("#PBS -o {}", output.display()));
                }
                if let Some(error) = error {
                    directives.push(format!("#PBS -e {}", error.display()));
                }
            }
        }
        directives
    }
}

impl SubmissionManager for PbsManager {
    fn prepare(&self, spec: &JobSpec) -> Result<JobSpec, HpcConnectError> {
        script::prepare(spec, &self.directives(spec), &self.default_options)
    }

    fn submit(&self, spec: &JobSpec, exclusive: bool) -> Result<Arc<dyn HpcProcess>, HpcConnectError> {
        let prepared = self.prepare(spec)?;
        let script_path = prepared.commands.first().expect("prepare sets exactly one command");

        let mut command = Command::new("qsub");
        if exclusive {
            command.arg("-n");
        }
        command.arg(script_path).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        trace!(?command, "spawning qsub");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let jobid = stdout.split_whitespace().next().map(str::to_string);

        script::write_submission_meta(
            &prepared,
            "qsub.meta.json",
            &["qsub".to_string(), script_path.clone()],
            &format!("{stdout}{stderr}"),
        )?;

        let Some(jobid) = jobid else {
            return Err(HpcConnectError::SubmissionFailed(format!(
                "qsub produced no job identifier\nstdout: {stdout}\nstderr: {stderr}"
            )));
        };

        debug!("job `{}` queued as PBS job `{jobid}`", prepared.name);

        Ok(Arc::new(PbsProcess {
            jobid,
            submitted: Utc::now(),
            state: Mutex::new(PbsProcessState { started: None, returncode: None }),
        }))
    }

    fn default_polling_interval(&self) -> Duration {
        Duration::from_secs_f64(5.0)
    }
}

/// Mutable state for a [`PbsProcess`], updated only from `poll`/`cancel`.
#[derive(Debug)]
struct PbsProcessState {
    started: Option<DateTime<Utc>>,
    returncode: Option<i32>,
}

/// A live handle to a submitted PBS job.
#[derive(Debug)]
pub struct PbsProcess {
    jobid: String,
    submitted: DateTime<Utc>,
    state: Mutex<PbsProcessState>,
}

/// Whether a `qstat` job-id column entry refers to `jobid`, allowing for
/// PBS's `*`-truncated prefix display of long identifiers.
fn matches_jobid(column: &str, jobid: &str) -> bool {
    match column.strip_suffix('*') {
        Some(prefix) => jobid.starts_with(prefix),
        None => column == jobid,
    }
}

impl HpcProcess for PbsProcess {
    fn jobid(&self) -> Option<String> {
        Some(self.jobid.clone())
    }

    fn submitted(&self) -> DateTime<Utc> {
        self.submitted
    }

    fn started(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("pbs process state poisoned").started
    }

    fn returncode(&self) -> Option<i32> {
        self.state.lock().expect("pbs process state poisoned").returncode
    }

    fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
        if let Some(returncode) = self.returncode() {
            return Ok(Some(returncode));
        }

        let mut command = Command::new("qstat");
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        trace!(?command, "spawning qstat");
        let output = command.output()?;
        if !output.status.success() {
            return Err(HpcConnectError::AccountingUnavailable { jobid: self.jobid.clone(), attempts: 1 });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);

        let still_running = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|column| matches_jobid(column, &self.jobid));

        let mut state = self.state.lock().expect("pbs process state poisoned");
        if still_running {
            if state.started.is_none() {
                state.started = Some(Utc::now());
            }
            return Ok(None);
        }

        if state.started.is_none() {
            state.started = Some(Utc::now());
        }
        state.returncode = Some(0);
        Ok(Some(0))
    }

    fn cancel(&self) -> Result<(), HpcConnectError> {
        let mut command = Command::new("qdel");
        command.arg(&self.jobid).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let _ = command.status();
        let mut state = self.state.lock().expect("pbs process state poisoned");
        state.returncode.get_or_insert(1);
        Ok(())
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_jobid() {
        assert!(matches_jobid("12345.host", "12345.host"));
        assert!(!matches_jobid("99999.host", "12345.host"));
    }

    #[test]
    fn matches_truncated_jobid() {
        assert!(matches_jobid("12345*", "12345.very.long.hostname"));
    }
}
