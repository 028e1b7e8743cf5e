//! The scheduler-agnostic job description.

use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::HpcConnectError;

/// An immutable, scheduler-agnostic job description.
///
/// Constructed once via [`JobSpec::new`], which validates the shape
/// invariants that must hold even for a bare spec (a non-empty command list,
/// and `nodes <= cpus` when both are given). Subsequent changes go through
/// [`JobSpec::with_updates`], which re-validates the same way and returns a
/// new value rather than mutating in place. A spec built this way may still
/// lack resources: that is only an error at submission time, checked by
/// [`JobSpec::validate_for_submission`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// A human-readable job name, passed to the scheduler as `--job-name`
    /// (or equivalent).
    pub name: String,
    /// The ordered shell command(s) that make up the job body.
    pub commands: Vec<String>,
    /// The number of nodes requested, if specified.
    pub nodes: Option<u64>,
    /// The number of CPUs requested, if specified.
    pub cpus: Option<u64>,
    /// The number of GPUs requested, if specified.
    pub gpus: Option<u64>,
    /// The wall-clock time limit, in seconds.
    pub time_limit: f64,
    /// Environment variables to set (`Some(value)`) or explicitly unset
    /// (`None`) in the job's environment.
    pub env: IndexMap<String, Option<String>>,
    /// Where to redirect stdout, if anywhere.
    pub output: Option<PathBuf>,
    /// Where to redirect stderr, if anywhere.
    pub error: Option<PathBuf>,
    /// The filesystem directory generated artifacts (scripts, metadata) are
    /// written into.
    pub workspace: PathBuf,
    /// Raw, backend-specific flags passed through to the submit command
    /// verbatim.
    pub submit_args: Vec<String>,
    /// Backend-specific hints, e.g. `remote.host`.
    pub extensions: IndexMap<String, serde_json::Value>,
}

/// A sparse set of field overrides for [`JobSpec::with_updates`].
///
/// Every field is `Option`; `None` means "leave unchanged". List- and
/// map-valued fields are replaced wholesale, matching the semantics of
/// rebuilding an immutable value rather than merging it.
#[derive(Debug, Clone, Default)]
pub struct JobSpecUpdate {
    /// Overrides [`JobSpec::name`].
    pub name: Option<String>,
    /// Overrides [`JobSpec::commands`].
    pub commands: Option<Vec<String>>,
    /// Overrides [`JobSpec::nodes`].
    pub nodes: Option<Option<u64>>,
    /// Overrides [`JobSpec::cpus`].
    pub cpus: Option<Option<u64>>,
    /// Overrides [`JobSpec::gpus`].
    pub gpus: Option<Option<u64>>,
    /// Overrides [`JobSpec::time_limit`].
    pub time_limit: Option<f64>,
    /// Overrides [`JobSpec::env`].
    pub env: Option<IndexMap<String, Option<String>>>,
    /// Overrides [`JobSpec::output`].
    pub output: Option<Option<PathBuf>>,
    /// Overrides [`JobSpec::error`].
    pub error: Option<Option<PathBuf>>,
    /// Overrides [`JobSpec::workspace`].
    pub workspace: Option<PathBuf>,
    /// Overrides [`JobSpec::submit_args`].
    pub submit_args: Option<Vec<String>>,
    /// Overrides [`JobSpec::extensions`].
    pub extensions: Option<IndexMap<String, serde_json::Value>>,
}

impl JobSpec {
    /// Constructs and validates a new job specification.
    pub fn new(
        name: impl Into<String>,
        commands: Vec<String>,
        time_limit: f64,
        workspace: impl Into<PathBuf>,
    ) -> Result<Self, HpcConnectError> {
        let spec = Self {
            name: name.into(),
            commands,
            nodes: None,
            cpus: None,
            gpus: None,
            time_limit,
            env: IndexMap::new(),
            output: None,
            error: None,
            workspace: workspace.into(),
            submit_args: Vec::new(),
            extensions: IndexMap::new(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Applies a sparse set of overrides, returning a new, re-validated
    /// spec.
    pub fn with_updates(&self, update: JobSpecUpdate) -> Result<JobSpec, HpcConnectError> {
        let spec = JobSpec {
            name: update.name.unwrap_or_else(|| self.name.clone()),
            commands: update.commands.unwrap_or_else(|| self.commands.clone()),
            nodes: update.nodes.unwrap_or(self.nodes),
            cpus: update.cpus.unwrap_or(self.cpus),
            gpus: update.gpus.unwrap_or(self.gpus),
            time_limit: update.time_limit.unwrap_or(self.time_limit),
            env: update.env.unwrap_or_else(|| self.env.clone()),
            output: update.output.unwrap_or_else(|| self.output.clone()),
            error: update.error.unwrap_or_else(|| self.error.clone()),
            workspace: update.workspace.unwrap_or_else(|| self.workspace.clone()),
            submit_args: update.submit_args.unwrap_or_else(|| self.submit_args.clone()),
            extensions: update.extensions.unwrap_or_else(|| self.extensions.clone()),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// The full path to the generated submission script.
    pub fn script_path(&self) -> PathBuf {
        self.workspace.join(format!("{}.sh", self.name))
    }

    /// Checks the invariants that must hold for every spec, resourced or not.
    fn validate(&self) -> Result<(), HpcConnectError> {
        if self.commands.is_empty() {
            return Err(HpcConnectError::InvalidJobSpec(
                "commands must not be empty".to_string(),
            ));
        }
        if let (Some(nodes), Some(cpus)) = (self.nodes, self.cpus) {
            if nodes > cpus {
                return Err(HpcConnectError::InvalidJobSpec(format!(
                    "nodes ({nodes}) must not exceed cpus ({cpus})"
                )));
            }
        }
        Ok(())
    }

    /// Checks the invariant that only matters once a spec is about to be
    /// submitted: at least one of `nodes`/`cpus` must be specified. Deferred
    /// out of [`JobSpec::new`]/[`JobSpec::with_updates`] so a bare spec can
    /// be constructed first and have resources attached via `with_updates`.
    pub fn validate_for_submission(&self) -> Result<(), HpcConnectError> {
        self.validate()?;
        if self.nodes.is_none() && self.cpus.is_none() {
            return Err(HpcConnectError::InvalidJobSpec(
                "at least one of nodes or cpus must be specified".to_string(),
            ));
        }
        Ok(())
    }

    /// An extension value by dotted key, e.g. `"remote.host"`.
    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    /// Convenience accessor for the workspace as a `&Path`.
    pub fn workspace_path(&self) -> &Path {
        &self.workspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_commands() {
        let err = JobSpec::new("job", vec![], 1.0, "/tmp").unwrap_err();
        assert!(matches!(err, HpcConnectError::InvalidJobSpec(_)));
    }

    #[test]
    fn new_allows_a_bare_spec_with_no_resources() {
        let spec = JobSpec::new("job", vec!["ls".to_string()], 1.0, "/tmp").unwrap();
        assert_eq!(spec.nodes, None);
        assert_eq!(spec.cpus, None);
    }

    #[test]
    fn rejects_missing_nodes_and_cpus_at_submission() {
        let spec = JobSpec::new("job", vec!["ls".to_string()], 1.0, "/tmp").unwrap();
        let err = spec.validate_for_submission().unwrap_err();
        assert!(matches!(err, HpcConnectError::InvalidJobSpec(_)));
    }

    #[test]
    fn rejects_nodes_greater_than_cpus() {
        let base = JobSpec {
            name: "job".to_string(),
            commands: vec!["ls".to_string()],
            nodes: Some(4),
            cpus: Some(2),
            gpus: None,
            time_limit: 1.0,
            env: IndexMap::new(),
            output: None,
            error: None,
            workspace: PathBuf::from("/tmp"),
            submit_args: Vec::new(),
            extensions: IndexMap::new(),
        };
        assert!(matches!(base.validate(), Err(HpcConnectError::InvalidJobSpec(_))));
    }

    #[test]
    fn with_updates_revalidates() {
        let spec = JobSpec::new("job", vec!["ls".to_string()], 1.0, "/tmp")
            .map(|s| s.with_updates(JobSpecUpdate { cpus: Some(Some(4)), ..Default::default() }).unwrap())
            .unwrap();
        assert_eq!(spec.cpus, Some(4));

        let err = spec
            .with_updates(JobSpecUpdate { commands: Some(vec![]), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, HpcConnectError::InvalidJobSpec(_)));
    }
}
