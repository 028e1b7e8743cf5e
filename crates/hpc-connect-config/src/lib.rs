//! Layered, scoped configuration.
//!
//! A [`Config`] is a stack of [`Scope`]s merged in a fixed precedence order:
//! `defaults < site < global < local < environment < command_line <
//! internal`. Each scope holds the four sections every configuration tree
//! has (`config`, `machine`, `submit`, `launch`) as a [`ConfigValue::Map`].
//! Reads merge across the stack; writes target exactly one named scope and,
//! if that scope is file-backed, persist it back to disk as YAML under the
//! `hpc_connect` top-level key.

pub mod discovery;
pub mod env;
pub mod value;

use std::env as std_env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use hpc_connect_resource::ResourceSpec;
use hpc_connect_resource::ResourceTree;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

pub use value::ConfigValue;

/// The four sections every configuration tree is divided into.
pub const SECTIONS: [&str; 4] = ["config", "machine", "submit", "launch"];

/// Errors produced by the configuration layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A path's first segment was not one of [`SECTIONS`].
    #[error("unknown config section `{0}`, expected one of {SECTIONS:?}")]
    UnknownSection(String),
    /// An empty path was given to `get`/`set`/`add`.
    #[error("config path must not be empty")]
    EmptyPath,
    /// A write was attempted against a scope that is not mutable
    /// (`defaults` or `environment`).
    #[error("scope `{0}` is read-only")]
    ReadOnlyScope(&'static str),
    /// Failed to read a scope file from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to write a scope file to disk.
    #[error("failed to write config file {path}: {source}")]
    Write {
        /// The file that failed to write.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse a scope file as YAML.
    #[error("failed to parse YAML config {path}: {source}")]
    Parse {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_yaml_ng::Error,
    },
    /// `machine:resources` did not deserialize into a resource tree.
    #[error("invalid machine:resources: {0}")]
    InvalidResources(String),
    /// The resource tree itself was invalid.
    #[error(transparent)]
    Resource(#[from] hpc_connect_resource::ResourceError),
}

/// The precedence-ordered scope identifiers, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// Built-in defaults, compiled into the binary.
    Defaults,
    /// `$HPC_CONNECT_SITE_CONFIG` or `<prefix>/etc/hpc_connect/config.yaml`.
    Site,
    /// `$HPC_CONNECT_GLOBAL_CONFIG`, `$XDG_CONFIG_HOME/hpc_connect/config.yaml`,
    /// or `~/.config/hpc_connect.yaml`.
    Global,
    /// `./hpc_connect.yaml`.
    Local,
    /// `HPC_CONNECT_<SECTION>_<KEY>` process environment variables.
    Environment,
    /// `-c section:key:value` pairs supplied on the command line.
    CommandLine,
    /// Programmatic, process-lifetime-only overrides.
    Internal,
}

impl ScopeId {
    /// Every scope, lowest precedence first.
    pub const ORDER: [ScopeId; 7] = [
        ScopeId::Defaults,
        ScopeId::Site,
        ScopeId::Global,
        ScopeId::Local,
        ScopeId::Environment,
        ScopeId::CommandLine,
        ScopeId::Internal,
    ];

    /// The scope's name, as used in diagnostics and `hpcc config show`.
    pub fn name(self) -> &'static str {
        match self {
            ScopeId::Defaults => "defaults",
            ScopeId::Site => "site",
            ScopeId::Global => "global",
            ScopeId::Local => "local",
            ScopeId::Environment => "environment",
            ScopeId::CommandLine => "command_line",
            ScopeId::Internal => "internal",
        }
    }

    /// Whether a write to this scope is permitted (`defaults` and
    /// `environment` are derived, read-only views).
    fn is_mutable(self) -> bool {
        !matches!(self, ScopeId::Defaults | ScopeId::Environment)
    }
}

/// A single layer of configuration.
#[derive(Debug, Clone)]
struct Scope {
    /// The backing file, if any; `None` for derived/in-memory scopes.
    file: Option<PathBuf>,
    /// The four sections, as a `ConfigValue::Map`.
    sections: ConfigValue,
}

impl Scope {
    /// An empty, in-memory scope.
    fn empty() -> Self {
        let mut sections = IndexMap::new();
        for section in SECTIONS {
            sections.insert(section.to_string(), ConfigValue::empty_map());
        }
        Self {
            file: None,
            sections: ConfigValue::Map(sections),
        }
    }

    /// Loads a file-backed scope, tolerating a missing file as empty.
    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let mut scope = Self::empty();
        if path.exists() {
            let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let document: IndexMap<String, ConfigValue> =
                serde_yaml_ng::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            if let Some(body) = document.get("hpc_connect") {
                scope.sections = ConfigValue::merge(&scope.sections, body);
            }
        }
        scope.file = Some(path);
        Ok(scope)
    }

    /// Persists a file-backed scope to disk.
    fn persist(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.file else { return Ok(()) };
        let mut document = IndexMap::new();
        document.insert("hpc_connect".to_string(), self.sections.clone());
        let text = serde_yaml_ng::to_string(&document).expect("ConfigValue always serializes");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })
    }
}

/// Splits a `:`-separated config path and validates the section name.
fn split_path(path: &str) -> Result<Vec<&str>, ConfigError> {
    let segments: Vec<&str> = path.split(':').filter(|s| !s.is_empty()).collect();
    let Some(section) = segments.first() else {
        return Err(ConfigError::EmptyPath);
    };
    if !SECTIONS.contains(section) {
        return Err(ConfigError::UnknownSection((*section).to_string()));
    }
    Ok(segments)
}

/// Resolves the site scope's file path.
fn site_config_path() -> PathBuf {
    std_env::var("HPC_CONNECT_SITE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| install_prefix().join("etc/hpc_connect/config.yaml"))
}

/// Resolves the global scope's file path.
fn global_config_path() -> PathBuf {
    if let Ok(path) = std_env::var("HPC_CONNECT_GLOBAL_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(config_home) = std_env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join("hpc_connect/config.yaml");
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("hpc_connect/config.yaml");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/hpc_connect.yaml")
}

/// Resolves the local scope's file path (always relative to the current
/// working directory).
fn local_config_path() -> PathBuf {
    PathBuf::from("./hpc_connect.yaml")
}

/// Best-effort installation prefix, derived from the running executable's
/// location (`<prefix>/bin/hpcc` -> `<prefix>`), falling back to
/// `/usr/local`.
fn install_prefix() -> PathBuf {
    std_env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("/usr/local"))
}

/// Builds the defaults scope.
fn defaults_scope() -> Scope {
    let mut scope = Scope::empty();
    scope
        .sections
        .set_path(&["launch", "exec"], ConfigValue::from("mpiexec"));
    scope
        .sections
        .set_path(&["launch", "numproc_flag"], ConfigValue::from("-n"));
    scope
        .sections
        .set_path(&["submit", "backend"], ConfigValue::from("local"));
    scope
}

/// Builds the environment scope from the current process environment.
fn environment_scope() -> Scope {
    let mut scope = Scope::empty();
    for (name, value) in std_env::vars() {
        if name == "HPC_CONNECT_BACKEND" {
            scope.sections.set_path(&["submit", "backend"], ConfigValue::from(value.as_str()));
            continue;
        }
        if name == "HPC_CONNECT_DEBUG" {
            let truthy = matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on");
            scope.sections.set_path(&["config", "debug"], ConfigValue::Bool(truthy));
            continue;
        }
        if name == "HPCC_POLL_INTERVAL" {
            if let Ok(seconds) = value.parse::<f64>() {
                scope
                    .sections
                    .set_path(&["submit", "poll_interval"], ConfigValue::Float(seconds));
            }
            continue;
        }
        // Discovery control variables do not map onto a config path.
        if matches!(
            name.as_str(),
            "HPC_CONNECT_SITE_CONFIG" | "HPC_CONNECT_GLOBAL_CONFIG" | "HPC_CONNECT_HOSTFILE"
        ) {
            continue;
        }
        if let Some(entry) = env::parse_env_var(&name, &value) {
            scope
                .sections
                .set_path(&[&entry.section, &entry.key], entry.value);
        }
    }
    scope
}

/// A fully assembled, layered configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scopes, indexed by [`ScopeId`], always present in [`ScopeId::ORDER`].
    scopes: IndexMap<&'static str, Scope>,
}

impl Config {
    /// Assembles a configuration from the standard scope locations and the
    /// current process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut scopes = IndexMap::new();
        scopes.insert(ScopeId::Defaults.name(), defaults_scope());
        scopes.insert(ScopeId::Site.name(), Scope::from_file(site_config_path())?);
        scopes.insert(ScopeId::Global.name(), Scope::from_file(global_config_path())?);
        scopes.insert(ScopeId::Local.name(), Scope::from_file(local_config_path())?);
        scopes.insert(ScopeId::Environment.name(), environment_scope());
        scopes.insert(ScopeId::CommandLine.name(), Scope::empty());
        scopes.insert(ScopeId::Internal.name(), Scope::empty());
        Ok(Self { scopes })
    }

    /// An empty configuration with only built-in defaults, useful for tests.
    pub fn empty() -> Self {
        let mut scopes = IndexMap::new();
        for id in ScopeId::ORDER {
            scopes.insert(
                id.name(),
                if id == ScopeId::Defaults { defaults_scope() } else { Scope::empty() },
            );
        }
        Self { scopes }
    }

    /// Applies `-c section:key:...:value` command-line overrides as a
    /// synthetic `command_line` scope.
    pub fn apply_cli_overrides(&mut self, overrides: &[(String, ConfigValue)]) -> Result<(), ConfigError> {
        for (path, value) in overrides {
            let segments = split_path(path)?;
            let scope = self.scopes.get_mut(ScopeId::CommandLine.name()).expect("scope present");
            scope.sections.set_path(&segments, value.clone());
        }
        Ok(())
    }

    /// The cumulative merge of every scope up to and including `upto`
    /// (lowest precedence first); `upto = Internal` merges everything.
    fn effective(&self, upto: ScopeId) -> ConfigValue {
        let mut merged = ConfigValue::empty_map();
        for id in ScopeId::ORDER {
            let scope = &self.scopes[id.name()];
            merged = ConfigValue::merge(&merged, &scope.sections);
            if id == upto {
                break;
            }
        }
        merged
    }

    /// Reads a value at `path`, scanning every scope (highest precedence
    /// wins) unless `scope` restricts the view to a cumulative merge up to
    /// that scope.
    pub fn get(&self, path: &str, default: Option<ConfigValue>, scope: Option<ScopeId>) -> Result<Option<ConfigValue>, ConfigError> {
        let segments = split_path(path)?;
        let merged = self.effective(scope.unwrap_or(ScopeId::Internal));
        Ok(merged.get_path(&segments).cloned().or(default))
    }

    /// Writes `value` at `path` into exactly one named scope, persisting it
    /// if that scope is file-backed.
    pub fn set(&mut self, path: &str, value: ConfigValue, scope: ScopeId) -> Result<(), ConfigError> {
        if !scope.is_mutable() {
            return Err(ConfigError::ReadOnlyScope(scope.name()));
        }
        let segments = split_path(path)?;
        let entry = self.scopes.get_mut(scope.name()).expect("scope present");
        entry.sections.set_path(&segments, value);
        entry.persist()
    }

    /// Appends `value` at `path` in `scope`: extends lists, deep-merges
    /// maps, replaces scalars. Persists if the scope is file-backed.
    pub fn add(&mut self, path: &str, value: ConfigValue, scope: ScopeId) -> Result<(), ConfigError> {
        if !scope.is_mutable() {
            return Err(ConfigError::ReadOnlyScope(scope.name()));
        }
        let segments = split_path(path)?;
        let entry = self.scopes.get_mut(scope.name()).expect("scope present");
        entry.sections.add_path(&segments, value);
        entry.persist()
    }

    /// Every scope's own (unmerged) section contents, in precedence order;
    /// used by `hpcc config show` without a `--scope` filter.
    pub fn scopes(&self) -> impl Iterator<Item = (&'static str, &ConfigValue)> {
        ScopeId::ORDER.into_iter().map(|id| (id.name(), &self.scopes[id.name()].sections))
    }

    /// The full, merged effective configuration.
    pub fn effective_config(&self) -> ConfigValue {
        self.effective(ScopeId::Internal)
    }

    /// Reads `path` as a `bool`, coercing strings, with a default when
    /// unset or uncoercible.
    pub fn get_bool(&self, path: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.get(path, None, None)?.and_then(|value| value.as_bool()).unwrap_or(default))
    }

    /// Reads `path` as an `i64`, coercing strings, with a default when
    /// unset or uncoercible.
    pub fn get_int(&self, path: &str, default: i64) -> Result<i64, ConfigError> {
        Ok(self.get(path, None, None)?.and_then(|value| value.as_int()).unwrap_or(default))
    }

    /// Reads `path` as an `f64`, coercing ints and strings, with a default
    /// when unset or uncoercible.
    pub fn get_float(&self, path: &str, default: f64) -> Result<f64, ConfigError> {
        Ok(self.get(path, None, None)?.and_then(|value| value.as_float()).unwrap_or(default))
    }

    /// Resolves `machine:resources`, discovering it on demand when unset.
    pub fn resources(&self) -> Result<ResourceTree, ConfigError> {
        match self.get("machine:resources", None, None)? {
            Some(value) => {
                let json = serde_json::to_value(&value)
                    .map_err(|e| ConfigError::InvalidResources(e.to_string()))?;
                let specs: Vec<ResourceSpec> = serde_json::from_value(json)
                    .map_err(|e| ConfigError::InvalidResources(e.to_string()))?;
                Ok(ResourceTree::new(specs)?)
            }
            None => {
                debug!("machine:resources unset, running discovery hook chain");
                let tree = discovery::discover();
                warn_if_minimal(&tree);
                Ok(tree)
            }
        }
    }
}

/// Logs a hint when discovery fell all the way through to the single-node
/// default, since that is rarely what a real cluster job wants.
fn warn_if_minimal(tree: &ResourceTree) {
    if tree.node_count() == 1 && tree.sockets_per_node() == 1 {
        debug!("resource discovery found no cluster backend or hostfile; using local CPU count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_default_when_unset() {
        let config = Config::empty();
        assert_eq!(
            config.get("submit:backend", None, None).unwrap(),
            Some(ConfigValue::from("local"))
        );
        assert_eq!(config.get("launch:exec", None, None).unwrap(), Some(ConfigValue::from("mpiexec")));
    }

    #[test]
    fn rejects_unknown_section() {
        assert!(matches!(
            Config::empty().get("bogus:key", None, None),
            Err(ConfigError::UnknownSection(_))
        ));
    }

    #[test]
    fn set_overrides_higher_precedence_wins() {
        let mut config = Config::empty();
        config.set("launch:exec", ConfigValue::from("srun"), ScopeId::Local).unwrap();
        assert_eq!(config.get("launch:exec", None, None).unwrap(), Some(ConfigValue::from("srun")));

        // A lower-precedence write after a higher one does not take effect.
        config.set("launch:exec", ConfigValue::from("custom-mpiexec"), ScopeId::Site).unwrap();
        assert_eq!(config.get("launch:exec", None, None).unwrap(), Some(ConfigValue::from("srun")));
    }

    #[test]
    fn defaults_only_visible_when_nothing_overrides() {
        let mut config = Config::empty();
        assert_eq!(config.get("submit:backend", None, None).unwrap(), Some(ConfigValue::from("local")));
        config.set("submit:backend", ConfigValue::from("slurm"), ScopeId::CommandLine).unwrap();
        assert_eq!(config.get("submit:backend", None, None).unwrap(), Some(ConfigValue::from("slurm")));
    }

    #[test]
    fn cannot_write_readonly_scopes() {
        let mut config = Config::empty();
        assert!(matches!(
            config.set("launch:exec", ConfigValue::from("srun"), ScopeId::Defaults),
            Err(ConfigError::ReadOnlyScope("defaults"))
        ));
        assert!(matches!(
            config.set("launch:exec", ConfigValue::from("srun"), ScopeId::Environment),
            Err(ConfigError::ReadOnlyScope("environment"))
        ));
    }

    #[test]
    fn add_appends_to_lists() {
        let mut config = Config::empty();
        config
            .set(
                "launch:default_options",
                ConfigValue::List(vec![ConfigValue::from("-bind-to")]),
                ScopeId::Local,
            )
            .unwrap();
        config.add("launch:default_options", ConfigValue::from("core"), ScopeId::Local).unwrap();
        assert_eq!(
            config.get("launch:default_options", None, None).unwrap(),
            Some(ConfigValue::List(vec![ConfigValue::from("-bind-to"), ConfigValue::from("core")]))
        );
    }

    #[test]
    fn scoped_get_sees_only_cumulative_prefix() {
        let mut config = Config::empty();
        config.set("launch:exec", ConfigValue::from("srun"), ScopeId::CommandLine).unwrap();
        assert_eq!(
            config.get("launch:exec", None, Some(ScopeId::Local)).unwrap(),
            Some(ConfigValue::from("mpiexec"))
        );
        assert_eq!(
            config.get("launch:exec", None, Some(ScopeId::CommandLine)).unwrap(),
            Some(ConfigValue::from("srun"))
        );
    }

    #[test]
    fn typed_accessors_coerce_and_default() {
        let mut config = Config::empty();
        config.set("submit:poll_interval", ConfigValue::from("2.5"), ScopeId::Local).unwrap();
        assert_eq!(config.get_float("submit:poll_interval", 1.0).unwrap(), 2.5);
        assert_eq!(config.get_int("config:retries", 3).unwrap(), 3);
        config.set("config:debug", ConfigValue::from("yes"), ScopeId::Local).unwrap();
        assert!(config.get_bool("config:debug", false).unwrap());
    }

    #[test]
    fn file_backed_scope_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut scope = Scope::from_file(path.clone()).unwrap();
        scope.sections.set_path(&["launch", "exec"], ConfigValue::from("srun"));
        scope.persist().unwrap();

        let reloaded = Scope::from_file(path).unwrap();
        assert_eq!(
            reloaded.sections.get_path(&["launch", "exec"]),
            Some(&ConfigValue::from("srun"))
        );
    }
}
