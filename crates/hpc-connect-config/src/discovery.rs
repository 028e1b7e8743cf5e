//! Resource discovery: the hook chain consulted when `machine:resources` is
//! unset.
//!
//! Three hooks run in order, each pure-parsing-function-backed so the
//! subprocess or file I/O boundary stays a thin, separately testable shell:
//!
//! 1. the cluster-specific backend (`sinfo`, `pbsnodes`, or `flux resource
//!    info`, whichever is found first on `PATH`);
//! 2. `$HPC_CONNECT_HOSTFILE`, matching the local hostname against a glob
//!    per line;
//! 3. a default single-node, single-socket topology sized from the local
//!    CPU count.

use std::process::Command;

use globset::Glob;
use hpc_connect_resource::ResourceSpec;
use hpc_connect_resource::ResourceTree;
use sysinfo::System;
use tracing::debug;
use tracing::warn;

/// Builds the default topology: one node, one socket, `cpu_count()` CPUs.
pub fn default_resources() -> ResourceTree {
    let cpus = System::new_all().cpus().len().max(1) as u64;
    let node = ResourceSpec::new("node", 1)
        .with_child(ResourceSpec::new("socket", 1).with_child(ResourceSpec::new("cpu", cpus)));
    ResourceTree::new(vec![node]).expect("default topology is always well-formed")
}

/// Parses `sinfo -h -o "%D %X %Y %c"` output: node count, sockets per node,
/// cores per socket, and total CPUs, space-separated, one line per
/// partition. Only the first line is used.
pub fn parse_sinfo(output: &str) -> Option<ResourceTree> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    let node_count: u64 = fields.next()?.parse().ok()?;
    let sockets: u64 = fields.next()?.parse().ok()?;
    let cores_per_socket: u64 = fields.next()?.parse().ok()?;
    let node = ResourceSpec::new("node", node_count).with_child(
        ResourceSpec::new("socket", sockets).with_child(ResourceSpec::new("cpu", cores_per_socket)),
    );
    ResourceTree::new(vec![node]).ok()
}

/// Parses `pbsnodes -a -F json`-ish aggregate summary lines of the form
/// `nodes=<N> ncpus=<N>`.
pub fn parse_pbsnodes(output: &str) -> Option<ResourceTree> {
    let mut node_count = None;
    let mut ncpus = None;
    for token in output.split_whitespace() {
        if let Some(value) = token.strip_prefix("nodes=") {
            node_count = value.trim_end_matches(',').parse::<u64>().ok();
        }
        if let Some(value) = token.strip_prefix("ncpus=") {
            ncpus = value.trim_end_matches(',').parse::<u64>().ok();
        }
    }
    let node_count = node_count?;
    let ncpus = ncpus?;
    let node = ResourceSpec::new("node", node_count)
        .with_child(ResourceSpec::new("socket", 1).with_child(ResourceSpec::new("cpu", ncpus)));
    ResourceTree::new(vec![node]).ok()
}

/// Parses a `$HPC_CONNECT_HOSTFILE`: one line per host-glob, of the form
/// `<hostname-glob> socket=<N>,cpu=<N>[,gpu=<N>]`. The first line whose glob
/// matches `hostname` wins.
pub fn parse_hostfile(contents: &str, hostname: &str) -> Option<ResourceTree> {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (glob, spec) = line.split_once(char::is_whitespace)?;
        let glob = Glob::new(glob).ok()?.compile_matcher();
        if !glob.is_match(hostname) {
            continue;
        }

        let mut sockets = 1u64;
        let mut cpu = 0u64;
        let mut gpu = 0u64;
        for field in spec.split(',') {
            if let Some(v) = field.trim().strip_prefix("socket=") {
                sockets = v.parse().ok()?;
            } else if let Some(v) = field.trim().strip_prefix("cpu=") {
                cpu = v.parse().ok()?;
            } else if let Some(v) = field.trim().strip_prefix("gpu=") {
                gpu = v.parse().ok()?;
            }
        }

        let mut socket = ResourceSpec::new("socket", sockets);
        if cpu > 0 {
            socket = socket.with_child(ResourceSpec::new("cpu", cpu));
        }
        if gpu > 0 {
            socket = socket.with_child(ResourceSpec::new("gpu", gpu));
        }
        let node = ResourceSpec::new("node", 1).with_child(socket);
        return ResourceTree::new(vec![node]).ok();
    }
    None
}

/// Probes the cluster-specific backend by running whichever of `sinfo`,
/// `pbsnodes`, or `flux` is first found on `PATH`.
fn probe_cluster_backend() -> Option<ResourceTree> {
    if which::which("sinfo").is_ok() {
        if let Ok(output) = Command::new("sinfo").args(["-h", "-o", "%D %X %Y %c"]).output() {
            if output.status.success() {
                if let Some(tree) = parse_sinfo(&String::from_utf8_lossy(&output.stdout)) {
                    debug!("discovered resources via sinfo");
                    return Some(tree);
                }
            }
        }
    }
    if which::which("pbsnodes").is_ok() {
        if let Ok(output) = Command::new("pbsnodes").args(["-a", "-F", "json"]).output() {
            if output.status.success() {
                if let Some(tree) = parse_pbsnodes(&String::from_utf8_lossy(&output.stdout)) {
                    debug!("discovered resources via pbsnodes");
                    return Some(tree);
                }
            }
        }
    }
    None
}

/// Probes `$HPC_CONNECT_HOSTFILE`, if set.
fn probe_hostfile() -> Option<ResourceTree> {
    let path = std::env::var("HPC_CONNECT_HOSTFILE").ok()?;
    let contents = std::fs::read_to_string(&path)
        .inspect_err(|error| warn!(%path, %error, "failed to read HPC_CONNECT_HOSTFILE"))
        .ok()?;
    let hostname = System::host_name().unwrap_or_default();
    parse_hostfile(&contents, &hostname)
}

/// Runs the full discovery hook chain.
pub fn discover() -> ResourceTree {
    probe_cluster_backend()
        .or_else(probe_hostfile)
        .unwrap_or_else(default_resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sinfo_output() {
        let tree = parse_sinfo("4 2 8 16\n").unwrap();
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.sockets_per_node(), 2);
        assert_eq!(tree.count_per_socket("cpu", None), 8);
    }

    #[test]
    fn parses_pbsnodes_output() {
        let tree = parse_pbsnodes("nodes=10, ncpus=40,").unwrap();
        assert_eq!(tree.node_count(), 10);
        assert_eq!(tree.count_per_node("cpu", None), 40);
    }

    #[test]
    fn parses_hostfile_matching_glob() {
        let contents = "node[01-99].cluster socket=2,cpu=16,gpu=1\nother* socket=1,cpu=4\n";
        let tree = parse_hostfile(contents, "node[01-99].cluster").unwrap();
        assert_eq!(tree.sockets_per_node(), 2);
        assert_eq!(tree.count_per_socket("cpu", None), 16);
        assert_eq!(tree.count_per_socket("gpu", None), 1);
    }

    #[test]
    fn hostfile_skips_non_matching_lines() {
        let contents = "nomatch socket=1,cpu=99\n";
        assert!(parse_hostfile(contents, "realhost").is_none());
    }

    #[test]
    fn default_resources_uses_local_cpu_count() {
        let tree = default_resources();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.count_per_node("cpu", None) >= 1);
    }
}
