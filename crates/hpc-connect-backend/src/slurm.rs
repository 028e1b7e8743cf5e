//! The Slurm submission adapter (`sbatch`/`sacct`/`scancel`).

use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use hpc_connect_job::HpcConnectError;
use hpc_connect_job::HpcProcess;
use hpc_connect_job::JobSpec;
use regex::Regex;
use tracing::debug;
use tracing::trace;
use which::which;

use crate::manager::SubmissionManager;
use crate::manager::format_time_limit;
use crate::script;

/// How many times `sacct` is retried (at 0.5s intervals) when it returns no
/// rows for an in-flight job.
const ACCOUNTING_RETRIES: u32 = 20;

/// The `sbatch`/`sacct`/`scancel`-backed Slurm adapter.
#[derive(Debug)]
pub struct SlurmManager {
    /// Extra `#SBATCH` lines applied to every job, verbatim.
    pub default_options: Vec<String>,
    /// Optional `--clusters` value threaded through `sacct`/`scancel`.
    pub clusters: Option<String>,
}

impl SlurmManager {
    /// Constructs the adapter, failing if `sbatch`/`sacct`/`scancel` are not
    /// on `PATH`.
    pub fn new(default_options: Vec<String>, clusters: Option<String>) -> Result<Self, HpcConnectError> {
        for binary in ["sbatch", "sacct", "scancel"] {
            which(binary).map_err(|_| HpcConnectError::MissingBinary(binary.to_string()))?;
        }
        Ok(Self { default_options, clusters })
    }

    fn directives(&self, spec: &JobSpec) -> Vec<String> {
        let mut directives = Vec::new();
        if let Some(nodes) = spec.nodes {
            directives.push(format!("#SBATCH --nodes={nodes}"));
        }
        directives.push(format!(
            "#SBATCH --time={}",
            format_time_limit(spec.time_limit, 1.25)
        ));
        directives.push(format!("#SBATCH --job-name={}", spec.name));
        if let Some(output) = &spec.output {
            directives.push(format!("#SBATCH --output={}", output.display()));
        }
        if let Some(error) = &spec.error {
            directives.push(format!("#SBATCH --error={}", error.display()));
        }
        directives
    }
}

impl SubmissionManager for SlurmManager {
    fn prepare(&self, spec: &JobSpec) -> Result<JobSpec, HpcConnectError> {
        script::prepare(spec, &self.directives(spec), &self.default_options)
    }

    fn submit(&self, spec: &JobSpec, exclusive: bool) -> Result<Arc<dyn HpcProcess>, HpcConnectError> {
        let prepared = self.prepare(spec)?;
        let script_path = prepared.commands.first().expect("prepare sets exactly one command");

        let mut args = vec!["sbatch".to_string()];
        if exclusive {
            args.push("--exclusive".to_string());
        }
        if let Some(clusters) = &self.clusters {
            args.push(format!("--clusters={clusters}"));
        }
        args.push(script_path.clone());

        let mut command = Command::new(&args[0]);
        command.args(&args[1..]).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        trace!(?command, "spawning sbatch");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        script::write_submission_meta(&prepared, "submit.meta.json", &args, &format!("{stdout}{stderr}"))?;

        let pattern = Regex::new(r"Submitted batch job (\S+)").expect("valid regex");
        let jobid = pattern.captures(&stdout).map(|caps| caps[1].to_string());

        let Some(jobid) = jobid else {
            return Err(HpcConnectError::SubmissionFailed(format!(
                "sbatch produced no recognizable job identifier\nstdout: {stdout}\nstderr: {stderr}"
            )));
        };

        debug!("job `{}` queued as Slurm job `{jobid}`", prepared.name);

        Ok(Arc::new(SlurmProcess {
            jobid,
            clusters: self.clusters.clone(),
            workspace: prepared.workspace.clone(),
            submitted: Utc::now(),
            state: Mutex::new(SlurmProcessState { started: None, returncode: None }),
        }))
    }

    fn default_polling_interval(&self) -> Duration {
        Duration::from_secs_f64(5.0)
    }
}

/// Mutable state for a [`SlurmProcess`], updated only from `poll`/`cancel`.
#[derive(Debug)]
struct SlurmProcessState {
    started: Option<DateTime<Utc>>,
    returncode: Option<i32>,
}

/// A live handle to a submitted Slurm job.
#[derive(Debug)]
pub struct SlurmProcess {
    jobid: String,
    clusters: Option<String>,
    workspace: PathBuf,
    submitted: DateTime<Utc>,
    state: Mutex<SlurmProcessState>,
}

impl SlurmProcess {
    /// Dumps `sacct -j JID --json` into `<jobid>.acct.json` in the job's
    /// workspace, for diagnosing a job that died with a signal.
    fn dump_accounting(&self) -> Result<(), HpcConnectError> {
        let mut command = Command::new("sacct");
        command.arg("-j").arg(&self.jobid).arg("--json");
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null());
        let output = command.output()?;
        let path = self.workspace.join(format!("{}.acct.json", self.jobid));
        std::fs::write(path, output.stdout)?;
        Ok(())
    }
}

/// One parsed `sacct -P -n` row.
struct AccountingRow {
    state: String,
    exit_code: i32,
    signal: i32,
}

fn parse_accounting_row(line: &str) -> Option<AccountingRow> {
    let mut fields = line.split('|');
    let _jobid = fields.next()?;
    let mut state = fields.next()?.to_string();
    if let Some(stripped) = state.strip_suffix('+') {
        state = stripped.to_string();
    }
    let exit_field = fields.next()?;
    let (exit_code, signal) = match exit_field.split_once(':') {
        Some((code, signal)) => (code.parse().ok()?, signal.parse().ok()?),
        None => (exit_field.parse().ok()?, 0),
    };
    Some(AccountingRow { state, exit_code, signal })
}

impl HpcProcess for SlurmProcess {
    fn jobid(&self) -> Option<String> {
        Some(self.jobid.clone())
    }

    fn submitted(&self) -> DateTime<Utc> {
        self.submitted
    }

    fn started(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("slurm process state poisoned").started
    }

    fn returncode(&self) -> Option<i32> {
        self.state.lock().expect("slurm process state poisoned").returncode
    }

    fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
        if let Some(returncode) = self.returncode() {
            return Ok(Some(returncode));
        }

        let mut output = Vec::new();
        for attempt in 0..ACCOUNTING_RETRIES {
            let mut command = Command::new("sacct");
            command.arg("--noheader").arg("-j").arg(&self.jobid).arg("-p").arg("-b");
            if let Some(clusters) = &self.clusters {
                command.arg(format!("--clusters={clusters}"));
            }
            command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
            let result = command.output()?;
            output = result.stdout;
            if !output.is_empty() {
                break;
            }
            if attempt + 1 == ACCOUNTING_RETRIES {
                return Err(HpcConnectError::AccountingUnavailable {
                    jobid: self.jobid.clone(),
                    attempts: ACCOUNTING_RETRIES,
                });
            }
            thread::sleep(Duration::from_millis(500));
        }

        let text = String::from_utf8_lossy(&output);
        let Some(row) = text.lines().find_map(parse_accounting_row) else {
            return Err(HpcConnectError::AccountingUnavailable {
                jobid: self.jobid.clone(),
                attempts: ACCOUNTING_RETRIES,
            });
        };

        let mut state = self.state.lock().expect("slurm process state poisoned");
        if matches!(row.state.as_str(), "PENDING" | "RUNNING") {
            if row.state == "RUNNING" && state.started.is_none() {
                state.started = Some(Utc::now());
            }
            return Ok(None);
        }

        if state.started.is_none() {
            state.started = Some(Utc::now());
        }
        let code = row.exit_code.max(row.signal);
        state.returncode = Some(code);
        drop(state);

        if row.signal != 0 {
            tracing::error!(jobid = %self.jobid, signal = row.signal, "job failed with signal");
            if let Err(error) = self.dump_accounting() {
                tracing::warn!(jobid = %self.jobid, %error, "failed to dump sacct accounting");
            }
        }

        Ok(Some(code))
    }

    fn cancel(&self) -> Result<(), HpcConnectError> {
        let mut command = Command::new("scancel");
        command.arg(&self.jobid).arg("--clusters=all");
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let _ = command.status();
        let mut state = self.state.lock().expect("slurm process state poisoned");
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
    fn parses_simple_row() {
        let row = parse_accounting_row("123|COMPLETED|0:0|").unwrap();
        assert_eq!(row.state, "COMPLETED");
        assert_eq!(row.exit_code, 0);
        assert_eq!(row.signal, 0);
    }

    #[test]
    fn strips_truncated_array_marker() {
        let row = parse_accounting_row("123_0|RUNNING+|0:0|").unwrap();
        assert_eq!(row.state, "RUNNING");
    }

    #[test]
    fn parses_signal_exit_code() {
        let row = parse_accounting_row("123|FAILED|0:9|").unwrap();
        assert_eq!(row.signal, 9);
    }
}
