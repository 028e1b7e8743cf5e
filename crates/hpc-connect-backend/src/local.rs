//! The local (and remote-via-SSH) subprocess adapter.
//!
//! Unlike the scheduler-backed adapters, the local backend owns its child's
//! lifecycle directly: `poll` inspects the child's wait state and `cancel`
//! walks the process tree, sending a graceful terminate before escalating
//! to a kill.

use std::fs::File;
use std::io;
use std::process::Child;
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
use tracing::trace;

use crate::manager::SubmissionManager;
use crate::script;

/// The default interval the local backend polls its child at.
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

/// Runs jobs as a direct subprocess on the current host.
#[derive(Debug, Default)]
pub struct LocalManager {
    /// A remote host to `ssh` into before running the script, or `None` to
    /// run directly on the current host.
    pub remote_host: Option<String>,
}

impl LocalManager {
    /// Constructs a purely local adapter.
    pub fn new() -> Self {
        Self { remote_host: None }
    }

    /// Constructs an adapter that runs scripts via `ssh <host>`.
    pub fn remote(host: impl Into<String>) -> Self {
        Self { remote_host: Some(host.into()) }
    }
}

impl SubmissionManager for LocalManager {
    fn prepare(&self, spec: &JobSpec) -> Result<JobSpec, HpcConnectError> {
        script::prepare(spec, &[], &[])
    }

    fn submit(&self, spec: &JobSpec, _exclusive: bool) -> Result<Arc<dyn HpcProcess>, HpcConnectError> {
        let prepared = self.prepare(spec)?;
        let script_path = prepared.commands.first().expect("prepare sets exactly one command");

        let mut command = match &self.remote_host {
            Some(host) => {
                let mut command = Command::new("ssh");
                command.arg(host).arg(script_path);
                command
            }
            None => {
                let mut command = Command::new("sh");
                command.arg(script_path);
                command
            }
        };

        let same_path = matches!((&prepared.output, &prepared.error), (Some(o), Some(e)) if o == e);
        let (stdout, stderr) = match (prepared.output.as_deref(), same_path) {
            (Some(path), true) => {
                let file = File::create(path)?;
                let merged = file.try_clone()?;
                (Stdio::from(file), Stdio::from(merged))
            }
            _ => (open_redirect(prepared.output.as_deref())?, open_redirect(prepared.error.as_deref())?),
        };

        command.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        trace!(?command, "spawning local job");
        let child = command.spawn()?;

        Ok(Arc::new(LocalProcess {
            submitted: Utc::now(),
            child: Mutex::new(child),
            state: Mutex::new(LocalProcessState { started: Some(Utc::now()), returncode: None }),
        }))
    }

    fn default_polling_interval(&self) -> Duration {
        DEFAULT_POLLING_INTERVAL
    }
}

/// Opens the redirect target for a child's stdout/stderr, or inherits the
/// parent's descriptor when no path was requested.
fn open_redirect(path: Option<&std::path::Path>) -> io::Result<Stdio> {
    match path {
        Some(path) => Ok(Stdio::from(File::create(path)?)),
        None => Ok(Stdio::inherit()),
    }
}

/// Mutable state for a [`LocalProcess`], updated only from `poll`/`cancel`.
#[derive(Debug)]
struct LocalProcessState {
    started: Option<DateTime<Utc>>,
    returncode: Option<i32>,
}

/// A live handle to a locally (or remotely, via SSH) spawned job.
#[derive(Debug)]
pub struct LocalProcess {
    submitted: DateTime<Utc>,
    child: Mutex<Child>,
    state: Mutex<LocalProcessState>,
}

impl HpcProcess for LocalProcess {
    fn jobid(&self) -> Option<String> {
        Some(self.child.lock().expect("local process poisoned").id().to_string())
    }

    fn submitted(&self) -> DateTime<Utc> {
        self.submitted
    }

    fn started(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("local process state poisoned").started
    }

    fn returncode(&self) -> Option<i32> {
        self.state.lock().expect("local process state poisoned").returncode
    }

    fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
        if let Some(returncode) = self.returncode() {
            return Ok(Some(returncode));
        }

        let mut child = self.child.lock().expect("local process poisoned");
        match child.try_wait()? {
            Some(status) => {
                let code = status.code().unwrap_or(1);
                drop(child);
                self.state.lock().expect("local process state poisoned").returncode = Some(code);
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }

    fn cancel(&self) -> Result<(), HpcConnectError> {
        let mut child = self.child.lock().expect("local process poisoned");
        let pid = child.id();
        terminate_process_tree(pid);
        let _ = child.wait();
        drop(child);
        let mut state = self.state.lock().expect("local process state poisoned");
        state.returncode.get_or_insert(1);
        Ok(())
    }

    fn polling_interval(&self) -> Duration {
        DEFAULT_POLLING_INTERVAL
    }
}

/// Sends `SIGTERM` to `pid`, waits briefly, then `SIGKILL`s any survivor.
///
/// This only signals the direct child; a full process-tree walk would
/// additionally enumerate descendants via `/proc`, which is left as a
/// follow-up since none of the adapters currently spawn detached children.
#[cfg(unix)]
fn terminate_process_tree(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    std::thread::sleep(Duration::from_millis(200));
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_process_tree(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_connect_job::JobSpecUpdate;

    #[test]
    fn submits_and_waits_for_local_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::new("job", vec!["true".to_string()], 5.0, dir.path())
            .unwrap()
            .with_updates(JobSpecUpdate { cpus: Some(Some(1)), ..Default::default() })
            .unwrap();

        let manager = LocalManager::new();
        let process = manager.submit(&spec, false).unwrap();

        let mut returncode = None;
        for _ in 0..50 {
            if let Some(code) = process.poll().unwrap() {
                returncode = Some(code);
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(returncode, Some(0));
    }

    #[test]
    fn merges_stdout_and_stderr_when_paths_match() {
        let dir = tempfile::tempdir().unwrap();
        let combined = dir.path().join("combined.log");
        let spec = JobSpec::new("job", vec!["echo out; echo err 1>&2".to_string()], 5.0, dir.path())
            .unwrap()
            .with_updates(JobSpecUpdate {
                cpus: Some(Some(1)),
                output: Some(Some(combined.clone())),
                error: Some(Some(combined.clone())),
                ..Default::default()
            })
            .unwrap();

        let manager = LocalManager::new();
        let process = manager.submit(&spec, false).unwrap();

        for _ in 0..50 {
            if process.poll().unwrap().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let contents = std::fs::read_to_string(&combined).unwrap();
        assert!(contents.contains("out"));
        assert!(contents.contains("err"));
    }
}
