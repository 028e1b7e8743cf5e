//! The pluggable backend registry: a list of `(predicate, factory)` pairs
//! consulted in order, the first match winning.

use std::sync::Arc;

use hpc_connect_backend::FluxManager;
use hpc_connect_backend::LocalManager;
use hpc_connect_backend::PbsManager;
use hpc_connect_backend::SlurmManager;
use hpc_connect_backend::SubmissionManager;
use hpc_connect_config::Config;
use hpc_connect_job::HpcConnectError;

use crate::launcher::LauncherAdapter;

/// A resolved backend: factories for its submission manager and its
/// launcher compiler.
pub trait Backend: Send + Sync {
    /// Builds the adapter that submits jobs to this backend's scheduler.
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError>;

    /// Builds the launcher compiler this backend prefers for `launch`
    /// invocations (`srun` for Slurm by configuration, `mpiexec` otherwise).
    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError>;
}

fn config_string(config: &Config, path: &str, default: &str) -> Result<String, HpcConnectError> {
    config
        .get(path, None, None)
        .map_err(|error| HpcConnectError::Config(error.to_string()))
        .map(|value| value.and_then(|value| value.as_str().map(str::to_string)).unwrap_or_else(|| default.to_string()))
}

/// The `submit:backend = "local"` backend: direct subprocess execution.
struct LocalBackend {
    config: Config,
}

impl Backend for LocalBackend {
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError> {
        Ok(Arc::new(LocalManager::new()))
    }

    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError> {
        let exec = config_string(&self.config, "launch:exec", "mpiexec")?;
        LauncherAdapter::new(exec, &self.config)
    }
}

/// The `submit:backend = "remote"` backend: subprocess execution over SSH.
struct RemoteBackend {
    config: Config,
    host: String,
}

impl Backend for RemoteBackend {
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError> {
        Ok(Arc::new(LocalManager::remote(self.host.clone())))
    }

    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError> {
        let exec = config_string(&self.config, "launch:exec", "mpiexec")?;
        LauncherAdapter::new(exec, &self.config)
    }
}

/// The `submit:backend = "slurm"` backend.
struct SlurmBackend {
    config: Config,
}

impl Backend for SlurmBackend {
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError> {
        let default_options = config_list(&self.config, "submit:default_options")?;
        let clusters = config_string(&self.config, "submit:clusters", "")?;
        let clusters = if clusters.is_empty() { None } else { Some(clusters) };
        Ok(Arc::new(SlurmManager::new(default_options, clusters)?))
    }

    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError> {
        let exec = config_string(&self.config, "launch:exec", "srun")?;
        LauncherAdapter::new(exec, &self.config)
    }
}

/// The `submit:backend = "pbs"` backend.
struct PbsBackend {
    config: Config,
}

impl Backend for PbsBackend {
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError> {
        let default_options = config_list(&self.config, "submit:default_options")?;
        let cpus_per_node = self
            .config
            .resources()
            .map_err(|error| HpcConnectError::Config(error.to_string()))?
            .count_per_node("cpu", Some(1));
        Ok(Arc::new(PbsManager::new(default_options, cpus_per_node)?))
    }

    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError> {
        let exec = config_string(&self.config, "launch:exec", "mpiexec")?;
        LauncherAdapter::new(exec, &self.config)
    }
}

/// The `submit:backend = "flux"` backend.
struct FluxBackend {
    config: Config,
}

impl Backend for FluxBackend {
    fn submission_manager(&self) -> Result<Arc<dyn SubmissionManager>, HpcConnectError> {
        let default_options = config_list(&self.config, "submit:default_options")?;
        Ok(Arc::new(FluxManager::new(default_options)?))
    }

    fn launcher(&self) -> Result<LauncherAdapter, HpcConnectError> {
        let exec = config_string(&self.config, "launch:exec", "mpiexec")?;
        LauncherAdapter::new(exec, &self.config)
    }
}

fn config_list(config: &Config, path: &str) -> Result<Vec<String>, HpcConnectError> {
    config
        .get(path, None, None)
        .map_err(|error| HpcConnectError::Config(error.to_string()))
        .map(|value| {
            value
                .and_then(|value| value.as_list().map(<[hpc_connect_config::ConfigValue]>::to_vec))
                .unwrap_or_default()
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
}

/// A predicate matching a resolved `submit:backend` name.
type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
/// Builds a [`Backend`] from a fully-loaded [`Config`].
type Factory = Box<dyn Fn(Config) -> Box<dyn Backend> + Send + Sync>;

/// A pluggable, ordered registry of backend predicates and factories.
///
/// The first entry whose predicate matches the effective `submit:backend`
/// name wins; entries registered later via [`Registry::register`] are
/// consulted before the five built-ins so callers can override or extend
/// backend selection without forking this crate.
pub struct Registry {
    entries: Vec<(Predicate, Factory)>,
}

impl Registry {
    /// Builds a registry containing only the five built-in backends:
    /// `local`, `slurm`, `pbs`, `flux`, `remote`.
    pub fn with_builtins() -> Self {
        let mut registry = Registry { entries: Vec::new() };
        registry.register(
            |name| name == "remote",
            |config| {
                let host = config
                    .get("submit:remote_host", None, None)
                    .ok()
                    .flatten()
                    .and_then(|value| value.as_str().map(str::to_string))
                    .unwrap_or_default();
                Box::new(RemoteBackend { config, host })
            },
        );
        registry.register(|name| name == "slurm", |config| Box::new(SlurmBackend { config }));
        registry.register(|name| name == "pbs", |config| Box::new(PbsBackend { config }));
        registry.register(|name| name == "flux", |config| Box::new(FluxBackend { config }));
        registry.register(|name| name == "local", |config| Box::new(LocalBackend { config }));
        registry
    }

    /// Registers a new `(predicate, factory)` pair, consulted before any
    /// entry already in the registry.
    pub fn register(
        &mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        factory: impl Fn(Config) -> Box<dyn Backend> + Send + Sync + 'static,
    ) {
        self.entries.insert(0, (Box::new(predicate), Box::new(factory)));
    }

    /// Resolves `config`'s `submit:backend` against the registry, returning
    /// the first matching backend.
    pub fn resolve(&self, config: Config) -> Result<Box<dyn Backend>, HpcConnectError> {
        let name = config_string(&config, "submit:backend", "local")?;
        for (predicate, factory) in &self.entries {
            if predicate(&name) {
                return Ok(factory(config));
            }
        }
        Err(HpcConnectError::Config(format!("no backend registered for `{name}`")))
    }
}

/// Resolves `config` against the built-in registry.
///
/// This is the single entry point most callers need; use [`Registry`]
/// directly to register custom backends first.
pub fn resolve(config: Config) -> Result<Box<dyn Backend>, HpcConnectError> {
    Registry::with_builtins().resolve(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_local_by_default() {
        let config = Config::empty();
        let backend = resolve(config).unwrap();
        assert!(backend.submission_manager().is_ok());
    }

    #[test]
    fn custom_registration_takes_precedence() {
        let mut registry = Registry::with_builtins();
        registry.register(|name| name == "local", |config| Box::new(LocalBackend { config }));
        let config = Config::empty();
        assert!(registry.resolve(config).is_ok());
    }
}
