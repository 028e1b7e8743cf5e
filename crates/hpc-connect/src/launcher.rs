//! Binds a backend's choice of `mpiexec`/`srun` to the config's
//! `launch:*` section, yielding a ready-to-use compiler.

use hpc_connect_config::Config;
use hpc_connect_config::ConfigValue;
use hpc_connect_job::HpcConnectError;
use hpc_connect_launch::LaunchCommand;
use hpc_connect_resource::ResourceView;
use indexmap::IndexMap;

/// The `launch-multi-prog.conf` filename `srun` MPMD invocations write to
/// the current working directory.
const MULTI_PROG_FILENAME: &str = "launch-multi-prog.conf";

/// A launcher bound to one concrete `exec` (`mpiexec`, `srun`, ...) and the
/// `launch:*` configuration that shapes how argv is compiled.
#[derive(Debug, Clone)]
pub struct LauncherAdapter {
    exec: String,
    mappings: IndexMap<String, String>,
    numproc_flag: String,
    default_options: Vec<String>,
    pre_options: Vec<String>,
    program_opts: Vec<String>,
}

impl LauncherAdapter {
    /// Builds an adapter for `exec`, reading `launch:*` settings from
    /// `config`.
    pub fn new(exec: impl Into<String>, config: &Config) -> Result<Self, HpcConnectError> {
        let config_error = |error: hpc_connect_config::ConfigError| HpcConnectError::Config(error.to_string());

        let mappings = config
            .get("launch:mappings", None, None)
            .map_err(config_error)?
            .and_then(|value| value.as_map().cloned())
            .map(|map| {
                map.into_iter()
                    .filter_map(|(key, value)| value.as_str().map(|value| (key, value.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let numproc_flag = config
            .get("launch:numproc_flag", Some(ConfigValue::from("-n")), None)
            .map_err(config_error)?
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "-n".to_string());

        Ok(Self {
            exec: exec.into(),
            mappings,
            numproc_flag,
            default_options: string_list(config, "launch:default_options")?,
            pre_options: string_list(config, "launch:pre_options")?,
            program_opts: string_list(config, "launch:program_opts")?,
        })
    }

    /// Parses `argv` and sums the requested process count across every
    /// `:`-separated segment (segments with no explicit count count as 1).
    ///
    /// Used to size the [`ResourceView`] passed to [`LauncherAdapter::compile`]
    /// when no job specification is otherwise available (the `hpcc launch`
    /// CLI entry point).
    pub fn total_processes(&self, argv: &[String]) -> u64 {
        hpc_connect_launch::parse(argv, &self.mappings, &self.numproc_flag, |token| which::which(token).is_ok())
            .iter()
            .map(|segment| segment.processes.unwrap_or(1))
            .sum()
    }

    /// Compiles `argv` into a concrete command line against `view`.
    pub fn compile(&self, argv: &[String], view: &ResourceView) -> Result<LaunchCommand, HpcConnectError> {
        hpc_connect_launch::compile(
            &self.exec,
            argv,
            &self.mappings,
            &self.numproc_flag,
            &self.default_options,
            &self.pre_options,
            &self.program_opts,
            view,
            MULTI_PROG_FILENAME,
            |token| which::which(token).is_ok(),
        )
    }
}

/// Reads a `launch:*` list-valued setting into owned strings.
fn string_list(config: &Config, path: &str) -> Result<Vec<String>, HpcConnectError> {
    config
        .get(path, None, None)
        .map_err(|error| HpcConnectError::Config(error.to_string()))
        .map(|value| {
            value
                .and_then(|value| value.as_list().map(<[ConfigValue]>::to_vec))
                .unwrap_or_default()
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
}
