//! `%(key)s`-style percent expansion of launcher flag templates against a
//! [`ResourceView`].

use hpc_connect_job::HpcConnectError;
use hpc_connect_resource::ResourceView;
use regex::Regex;
use std::sync::LazyLock;

/// Matches a Python-`%`-operator-style placeholder, e.g. `%(ranks)s`.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\((?P<key>[a-zA-Z_]+)\)s").expect("valid regex"));

/// Looks up a resource-view field by its template key name.
fn lookup(view: &ResourceView, key: &str) -> Option<u64> {
    match key {
        "np" => Some(view.np),
        "ranks" => Some(view.ranks),
        "ranks_per_socket" => Some(view.ranks_per_socket),
        "nodes" => Some(view.nodes),
        "sockets" => Some(view.sockets),
        _ => None,
    }
}

/// Expands every `%(key)s` placeholder in `template` using `view`.
///
/// Missing keys are a hard error: the config author is expected to supply
/// only placeholders this module defines.
pub fn expand(template: &str, view: &ResourceView) -> Result<String, HpcConnectError> {
    let mut error = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps["key"];
        match lookup(view, key) {
            Some(value) => value.to_string(),
            None => {
                error.get_or_insert_with(|| HpcConnectError::Template(key.to_string()));
                String::new()
            }
        }
    });
    match error {
        Some(error) => Err(error),
        None => Ok(expanded.into_owned()),
    }
}

/// Expands a whole list of templates, collecting them into tokens (a
/// template that expands to an empty string is dropped).
pub fn expand_all(templates: &[String], view: &ResourceView) -> Result<Vec<String>, HpcConnectError> {
    let mut out = Vec::with_capacity(templates.len());
    for template in templates {
        let expanded = expand(template, view)?;
        if !expanded.is_empty() {
            out.push(expanded);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> ResourceView {
        hpc_connect_resource::ResourceTree::new(vec![hpc_connect_resource::ResourceSpec::new(
            "node", 1,
        )
        .with_child(
            hpc_connect_resource::ResourceSpec::new("socket", 2)
                .with_child(hpc_connect_resource::ResourceSpec::new("cpu", 8)),
        )])
        .unwrap()
        .resource_view(Some(12), None)
        .unwrap()
    }

    #[test]
    fn expands_known_keys() {
        assert_eq!(expand("-n %(ranks)s", &view()).unwrap(), "-n 12");
        assert_eq!(expand("--nodes=%(nodes)s", &view()).unwrap(), "--nodes=1");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = expand("%(bogus)s", &view()).unwrap_err();
        assert!(matches!(err, HpcConnectError::Template(key) if key == "bogus"));
    }
}
