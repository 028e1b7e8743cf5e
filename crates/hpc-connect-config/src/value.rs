//! A small tagged-variant value used for every configuration entry.
//!
//! Scheduler configuration is dynamically typed on disk (YAML) and from the
//! environment, but callers want typed access once a value has been read.
//! [`ConfigValue`] is the single representation shared by both worlds:
//! scopes store it, `get`/`set`/`add` operate on it, and typed accessors
//! coerce it on the way out.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// A dynamically typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    String(String),
    /// An ordered list; lists are replaced wholesale on merge, never
    /// concatenated.
    List(Vec<ConfigValue>),
    /// A nested mapping; maps are merged key-by-key on merge.
    Map(IndexMap<String, ConfigValue>),
}

impl ConfigValue {
    /// An empty map, the identity value for a config section.
    pub fn empty_map() -> Self {
        Self::Map(IndexMap::new())
    }

    /// Coerces to `bool` if this is a `Bool`, or a recognized string
    /// (`"true"`/`"false"`, case-insensitive).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Coerces to `i64` if this is an `Int`, or a parseable string.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Coerces to `f64` if this is a `Float`, `Int`, or a parseable string.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns the string if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list if this is a `List`.
    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map if this is a `Map`.
    pub fn as_map(&self) -> Option<&IndexMap<String, ConfigValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the map mutably if this is a `Map`.
    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, ConfigValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a `:`-separated path within this value, treating it as the
    /// root of a tree of maps.
    pub fn get_path(&self, segments: &[&str]) -> Option<&ConfigValue> {
        match segments.split_first() {
            None => Some(self),
            Some((head, rest)) => self.as_map()?.get(*head)?.get_path(rest),
        }
    }

    /// Sets a `:`-separated path within this value, creating intermediate
    /// maps as needed. Fails silently into a no-op if an intermediate
    /// segment already holds a non-map scalar (the caller is expected to
    /// `set` at that shallower path instead).
    pub fn set_path(&mut self, segments: &[&str], value: ConfigValue) {
        match segments.split_first() {
            None => *self = value,
            Some((head, rest)) => {
                if self.as_map().is_none() {
                    *self = ConfigValue::empty_map();
                }
                let map = self.as_map_mut().expect("just ensured this is a map");
                let entry = map.entry((*head).to_string()).or_insert_with(ConfigValue::empty_map);
                entry.set_path(rest, value);
            }
        }
    }

    /// Appends at a `:`-separated path: extends a `List`, deep-merges a
    /// `Map`, and replaces a scalar (or missing path).
    pub fn add_path(&mut self, segments: &[&str], value: ConfigValue) {
        match segments.split_first() {
            None => match (self.as_list().is_some(), self.as_map().is_some()) {
                (true, _) => {
                    let list = match &mut *self {
                        ConfigValue::List(items) => items,
                        _ => unreachable!(),
                    };
                    match value {
                        ConfigValue::List(mut items) => list.append(&mut items),
                        other => list.push(other),
                    }
                }
                (_, true) => {
                    if let ConfigValue::Map(overlay) = value {
                        *self = ConfigValue::merge(self, &ConfigValue::Map(overlay));
                    } else {
                        *self = value;
                    }
                }
                _ => *self = value,
            },
            Some((head, rest)) => {
                if self.as_map().is_none() {
                    *self = ConfigValue::empty_map();
                }
                let map = self.as_map_mut().expect("just ensured this is a map");
                let entry = map.entry((*head).to_string()).or_insert_with(ConfigValue::empty_map);
                entry.add_path(rest, value);
            }
        }
    }

    /// Deep-merges `overlay` onto `base`: maps union recursively key by key
    /// (overlay wins on conflicting scalars), lists and scalars are
    /// replaced wholesale by the overlay.
    pub fn merge(base: &ConfigValue, overlay: &ConfigValue) -> ConfigValue {
        match (base, overlay) {
            (ConfigValue::Map(base_map), ConfigValue::Map(overlay_map)) => {
                let mut merged = base_map.clone();
                for (key, value) in overlay_map {
                    match merged.get(key) {
                        Some(existing) => {
                            merged.insert(key.clone(), ConfigValue::merge(existing, value));
                        }
                        None => {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                }
                ConfigValue::Map(merged)
            }
            (_, overlay) => overlay.clone(),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(value: Vec<ConfigValue>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, ConfigValue)]) -> ConfigValue {
        let mut m = IndexMap::new();
        for (k, v) in pairs {
            m.insert((*k).to_string(), v.clone());
        }
        ConfigValue::Map(m)
    }

    #[test]
    fn merge_unions_maps_recursively() {
        let base = map(&[
            ("a", ConfigValue::Int(1)),
            ("nested", map(&[("x", ConfigValue::Int(1)), ("y", ConfigValue::Int(2))])),
        ]);
        let overlay = map(&[("nested", map(&[("y", ConfigValue::Int(20)), ("z", ConfigValue::Int(3))]))]);
        let merged = ConfigValue::merge(&base, &overlay);
        assert_eq!(merged.get_path(&["a"]), Some(&ConfigValue::Int(1)));
        assert_eq!(merged.get_path(&["nested", "x"]), Some(&ConfigValue::Int(1)));
        assert_eq!(merged.get_path(&["nested", "y"]), Some(&ConfigValue::Int(20)));
        assert_eq!(merged.get_path(&["nested", "z"]), Some(&ConfigValue::Int(3)));
    }

    #[test]
    fn merge_replaces_lists_wholesale() {
        let base = map(&[("l", ConfigValue::List(vec![ConfigValue::Int(1)]))]);
        let overlay = map(&[("l", ConfigValue::List(vec![ConfigValue::Int(2), ConfigValue::Int(3)]))]);
        let merged = ConfigValue::merge(&base, &overlay);
        assert_eq!(
            merged.get_path(&["l"]),
            Some(&ConfigValue::List(vec![ConfigValue::Int(2), ConfigValue::Int(3)]))
        );
    }

    #[test]
    fn add_path_extends_list() {
        let mut v = map(&[("l", ConfigValue::List(vec![ConfigValue::Int(1)]))]);
        v.add_path(&["l"], ConfigValue::Int(2));
        assert_eq!(
            v.get_path(&["l"]),
            Some(&ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::Int(2)]))
        );
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut v = ConfigValue::empty_map();
        v.set_path(&["launch", "exec"], ConfigValue::String("srun".to_string()));
        assert_eq!(v.get_path(&["launch", "exec"]).and_then(|v| v.as_str()), Some("srun"));
    }
}
