//! Parsing of the `HPC_CONNECT_<SECTION>_<KEY>` environment scope.

use indexmap::IndexMap;

use crate::value::ConfigValue;

/// The four sections a configuration tree is divided into.
const SECTIONS: &[&str] = &["config", "machine", "submit", "launch"];

/// How a known `(section, key)` pair should be typed when read from the
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    /// A shlex-split list of strings.
    List,
    /// A `k:v,k:v` map of strings.
    Map,
    /// A boolean (`true`/`false`/`1`/`0`/...).
    Bool,
    /// An opaque string, used verbatim.
    Str,
}

/// The typed schema for keys whose type cannot be inferred unambiguously.
fn schema(section: &str, key: &str) -> ValueKind {
    match (section, key) {
        (_, "default_options") => ValueKind::List,
        ("launch", "mappings") => ValueKind::Map,
        (_, "debug") => ValueKind::Bool,
        _ => ValueKind::Str,
    }
}

/// Parses a `k:v,k:v` environment value into a map of strings.
fn parse_kv_map(raw: &str) -> ConfigValue {
    let mut map = IndexMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once(':') {
            map.insert(k.trim().to_string(), ConfigValue::String(v.trim().to_string()));
        }
    }
    ConfigValue::Map(map)
}

/// Parses a single environment variable value according to its schema.
fn parse_value(kind: ValueKind, raw: &str) -> ConfigValue {
    match kind {
        ValueKind::List => ConfigValue::List(
            shlex::split(raw)
                .unwrap_or_else(|| vec![raw.to_string()])
                .into_iter()
                .map(ConfigValue::String)
                .collect(),
        ),
        ValueKind::Map => parse_kv_map(raw),
        ValueKind::Bool => ConfigValue::Bool(matches!(
            raw.to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        )),
        ValueKind::Str => {
            // Best-effort numeric inference for otherwise-untyped keys, so
            // e.g. `HPC_CONNECT_SUBMIT_RETRIES=3` round-trips as an int
            // rather than a string.
            if let Ok(i) = raw.parse::<i64>() {
                ConfigValue::Int(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                ConfigValue::Float(f)
            } else {
                ConfigValue::String(raw.to_string())
            }
        }
    }
}

/// A single `section:key -> value` entry parsed from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvEntry {
    /// The target section (`config`, `machine`, `submit`, or `launch`).
    pub section: String,
    /// The key within that section.
    pub key: String,
    /// The parsed value.
    pub value: ConfigValue,
}

/// Parses one `HPC_CONNECT_<SECTION>_<KEY>=value` pair.
///
/// Returns `None` if `name` does not start with the `HPC_CONNECT_` prefix or
/// its first underscore-delimited segment is not a recognized section. The
/// handful of control variables (`HPC_CONNECT_SITE_CONFIG`,
/// `HPC_CONNECT_GLOBAL_CONFIG`, `HPC_CONNECT_HOSTFILE`, `HPCC_POLL_INTERVAL`,
/// and bare `HPC_CONNECT_BACKEND`/`HPC_CONNECT_DEBUG`) are handled by the
/// caller before this function is consulted.
pub fn parse_env_var(name: &str, value: &str) -> Option<EnvEntry> {
    let rest = name.strip_prefix("HPC_CONNECT_")?;
    let (section, key) = rest.split_once('_')?;
    let section = section.to_ascii_lowercase();
    if !SECTIONS.contains(&section.as_str()) {
        return None;
    }
    let key = key.to_ascii_lowercase();
    let kind = schema(&section, &key);
    Some(EnvEntry {
        section,
        key,
        value: parse_value(kind, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_valued_key() {
        let entry = parse_env_var("HPC_CONNECT_LAUNCH_DEFAULT_OPTIONS", "-n 4 --bind-to core").unwrap();
        assert_eq!(entry.section, "launch");
        assert_eq!(entry.key, "default_options");
        assert_eq!(
            entry.value,
            ConfigValue::List(
                ["-n", "4", "--bind-to", "core"]
                    .into_iter()
                    .map(ConfigValue::from)
                    .collect()
            )
        );
    }

    #[test]
    fn parses_map_valued_key() {
        let entry = parse_env_var("HPC_CONNECT_LAUNCH_MAPPINGS", "--x:SUPPRESS,--y:-z").unwrap();
        assert_eq!(entry.key, "mappings");
        let map = entry.value.as_map().unwrap();
        assert_eq!(map.get("--x").and_then(|v| v.as_str()), Some("SUPPRESS"));
        assert_eq!(map.get("--y").and_then(|v| v.as_str()), Some("-z"));
    }

    #[test]
    fn parses_scalar_key() {
        let entry = parse_env_var("HPC_CONNECT_LAUNCH_EXEC", "srun").unwrap();
        assert_eq!(entry.section, "launch");
        assert_eq!(entry.key, "exec");
        assert_eq!(entry.value, ConfigValue::String("srun".to_string()));
    }

    #[test]
    fn rejects_unrecognized_section() {
        assert!(parse_env_var("HPC_CONNECT_BOGUS_KEY", "x").is_none());
    }

    #[test]
    fn rejects_non_hpc_connect_vars() {
        assert!(parse_env_var("PATH", "/usr/bin").is_none());
    }
}
