//! Parses `-c section:key:[subkey:…]:value` command-line overrides.

use hpc_connect_config::ConfigValue;

/// Splits a `-c` argument into its config path and parsed value.
///
/// The value is the final colon-delimited segment; everything before it is
/// the path. The value is parsed as JSON when possible, otherwise treated
/// as a literal string with a single layer of surrounding quotes (single,
/// double, or triple) stripped.
pub fn parse_override(arg: &str) -> anyhow::Result<(String, ConfigValue)> {
    let mut segments: Vec<&str> = arg.split(':').collect();
    let value = segments
        .pop()
        .ok_or_else(|| anyhow::anyhow!("override `{arg}` is missing a value"))?;
    if segments.is_empty() {
        anyhow::bail!("override `{arg}` is missing a config path");
    }
    let path = segments.join(":");
    Ok((path, parse_value(value)))
}

/// Parses a single override value: JSON if it parses as JSON, else a
/// string with matching surrounding quotes stripped.
fn parse_value(raw: &str) -> ConfigValue {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        return json_to_config(value);
    }
    ConfigValue::String(strip_quotes(raw).to_string())
}

fn strip_quotes(raw: &str) -> &str {
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if raw.len() >= quote.len() * 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[quote.len()..raw.len() - quote.len()];
        }
    }
    raw
}

fn json_to_config(value: serde_json::Value) -> ConfigValue {
    match value {
        serde_json::Value::Null => ConfigValue::String(String::new()),
        serde_json::Value::Bool(b) => ConfigValue::Bool(b),
        serde_json::Value::Number(n) => n.as_i64().map(ConfigValue::Int).unwrap_or_else(|| {
            ConfigValue::Float(n.as_f64().unwrap_or_default())
        }),
        serde_json::Value::String(s) => ConfigValue::String(s),
        serde_json::Value::Array(items) => ConfigValue::List(items.into_iter().map(json_to_config).collect()),
        serde_json::Value::Object(map) => {
            ConfigValue::Map(map.into_iter().map(|(k, v)| (k, json_to_config(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path_and_string_value() {
        let (path, value) = parse_override("launch:exec:srun").unwrap();
        assert_eq!(path, "launch:exec");
        assert_eq!(value, ConfigValue::String("srun".to_string()));
    }

    #[test]
    fn parses_json_integer_value() {
        let (_, value) = parse_override("submit:poll_interval:5").unwrap();
        assert_eq!(value, ConfigValue::Int(5));
    }

    #[test]
    fn strips_surrounding_quotes() {
        let (_, value) = parse_override("config:label:\"hello world\"").unwrap();
        assert_eq!(value, ConfigValue::String("hello world".to_string()));
    }
}
