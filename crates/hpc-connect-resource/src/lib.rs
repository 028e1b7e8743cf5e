//! The resource topology model.
//!
//! A [`ResourceTree`] describes the allocatable resources of a cluster (or of
//! a single job's carve-out of one) as a forest of [`ResourceSpec`] nodes.
//! The canonical shape is `node -> socket -> {cpu, gpu, ...}`, but the tree
//! is not restricted to that depth: callers may nest arbitrarily, and
//! multiple top-level node groups are allowed to describe heterogeneous
//! clusters (e.g. a GPU partition alongside a CPU-only partition).
//!
//! The tree is walked once, on construction, into a flat index from
//! resource type name to every occurrence of that type in the forest. All
//! queries (`count_per_node`, `count_per_socket`, `nodes_required`, ...) are
//! answered from that index rather than by re-walking the tree.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the resource model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// A top-level resource entry did not have `type: node`.
    #[error("top-level resource entries must have type `node`, found `{0}`")]
    InvalidTopLevelType(String),
    /// A resource entry had `count < 1`.
    #[error("resource count must be >= 1 for type `{0}`, found {1}")]
    InvalidCount(String, u64),
    /// A query required a socket-scoped topology and none was present, or
    /// `ranks_per_socket` was given without `ranks`.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// `nodes_required` was asked about a type with no capacity anywhere in
    /// the tree.
    #[error("no capacity for resource type `{0}`")]
    NoCapacity(String),
}

/// A single node in a resource tree.
///
/// `additional_properties` captures any backend-specific keys (e.g. a GPU
/// model name) that this crate does not interpret itself but that callers
/// may want to carry through to a scheduler directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// The resource type, e.g. `"node"`, `"socket"`, `"cpu"`, `"gpu"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// How many of this resource are present at this position in the tree.
    pub count: u64,
    /// Backend-specific properties that pass through unmodified.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub additional_properties: IndexMap<String, serde_json::Value>,
    /// Child resources nested under this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
}

impl ResourceSpec {
    /// Constructs a leaf or interior resource node.
    pub fn new(kind: impl Into<String>, count: u64) -> Self {
        Self {
            kind: kind.into(),
            count,
            additional_properties: IndexMap::new(),
            resources: Vec::new(),
        }
    }

    /// Appends a child resource and returns `self` for chaining.
    pub fn with_child(mut self, child: ResourceSpec) -> Self {
        self.resources.push(child);
        self
    }
}

/// One occurrence of a resource type somewhere under a top-level node.
#[derive(Debug, Clone)]
struct Occurrence {
    /// The `count` of this occurrence.
    count: u64,
    /// The product of ancestor counts between the enclosing node and this
    /// occurrence, exclusive of the node itself.
    multiplier: u64,
    /// The resource type of the immediate parent, if any (`None` for a
    /// direct child of a top-level node).
    parent: Option<String>,
}

/// A parsed, validated, and indexed resource tree.
#[derive(Debug, Clone)]
pub struct ResourceTree {
    /// The top-level node groups.
    nodes: Vec<ResourceSpec>,
    /// Flattened index from resource type name to every occurrence.
    index: HashMap<String, Vec<Occurrence>>,
}

/// A derived resource view used to expand launcher flag templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceView {
    /// The process count this view was computed for (alias of `ranks`).
    pub np: u64,
    /// The number of ranks requested.
    pub ranks: u64,
    /// Ranks packed per socket.
    pub ranks_per_socket: u64,
    /// Nodes required to host `ranks` ranks.
    pub nodes: u64,
    /// Sockets required to host `ranks` ranks.
    pub sockets: u64,
}

impl ResourceView {
    /// The all-zero view returned when neither `ranks` nor
    /// `ranks_per_socket` were requested.
    fn zero() -> Self {
        Self::default()
    }
}

/// Ceiling integer division; `b == 0` is treated as `a` (avoids a spurious
/// divide-by-zero when a resource type has no capacity but the caller never
/// asked for it).
fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { a.div_ceil(b) }
}

impl ResourceTree {
    /// Validates and indexes a forest of top-level node groups.
    pub fn new(nodes: Vec<ResourceSpec>) -> Result<Self, ResourceError> {
        for node in &nodes {
            if node.kind != "node" {
                return Err(ResourceError::InvalidTopLevelType(node.kind.clone()));
            }
            Self::validate_subtree(node)?;
        }

        let mut index: HashMap<String, Vec<Occurrence>> = HashMap::new();
        for node in &nodes {
            Self::walk(node, 1, None, &mut index);
        }

        Ok(Self { nodes, index })
    }

    /// Recursively validates the `count >= 1` invariant.
    fn validate_subtree(spec: &ResourceSpec) -> Result<(), ResourceError> {
        if spec.count < 1 {
            return Err(ResourceError::InvalidCount(spec.kind.clone(), spec.count));
        }
        for child in &spec.resources {
            Self::validate_subtree(child)?;
        }
        Ok(())
    }

    /// Walks one node group, recording an [`Occurrence`] for every
    /// descendant (the node itself is the reference frame and is not
    /// indexed).
    fn walk(
        spec: &ResourceSpec,
        multiplier: u64,
        parent: Option<&str>,
        index: &mut HashMap<String, Vec<Occurrence>>,
    ) {
        let is_top_level = parent.is_none();
        if let Some(parent) = parent {
            index.entry(spec.kind.clone()).or_default().push(Occurrence {
                count: spec.count,
                multiplier,
                parent: Some(parent.to_string()),
            });
        }
        // The top-level node group's own `count` is how many physical nodes
        // exist, not a per-node multiplier, so it must not be folded into
        // the descendants' multipliers.
        let child_multiplier = if is_top_level { multiplier } else { multiplier * spec.count.max(1) };
        for child in &spec.resources {
            Self::walk(child, child_multiplier, Some(&spec.kind), index);
        }
    }

    /// Sum, over every occurrence of `ty`, of `count * multiplier`.
    pub fn count_per_node(&self, ty: &str, default: Option<u64>) -> u64 {
        match self.index.get(ty) {
            Some(occurrences) => occurrences.iter().map(|o| o.count * o.multiplier).sum(),
            None => default.unwrap_or(0),
        }
    }

    /// The count of `ty` for the first occurrence whose immediate parent is
    /// `"socket"`.
    ///
    /// Falls back to `count_per_node(ty) / sockets_per_node` when no
    /// socket-scoped occurrence exists, so the function stays total over any
    /// well-formed tree rather than silently returning `default`.
    pub fn count_per_socket(&self, ty: &str, default: Option<u64>) -> u64 {
        let direct = self.index.get(ty).and_then(|occurrences| {
            occurrences
                .iter()
                .find(|o| o.parent.as_deref() == Some("socket"))
                .map(|o| o.count)
        });
        if let Some(count) = direct {
            return count;
        }
        let spn = self.sockets_per_node();
        if spn == 0 {
            return default.unwrap_or(0);
        }
        let per_node = self.count_per_node(ty, None);
        if per_node == 0 && !self.index.contains_key(ty) {
            default.unwrap_or(0)
        } else {
            per_node / spn
        }
    }

    /// The total number of physical nodes across every top-level group.
    pub fn node_count(&self) -> u64 {
        self.nodes.iter().map(|n| n.count).sum()
    }

    /// `count_per_node("socket")`, or `1` if the tree has no socket level.
    pub fn sockets_per_node(&self) -> u64 {
        let spn = self.count_per_node("socket", None);
        if spn == 0 { 1 } else { spn }
    }

    /// Whether any occurrence of `"socket"` exists anywhere in the tree.
    fn has_socket_level(&self) -> bool {
        self.index.contains_key("socket")
    }

    /// The number of nodes required to satisfy every `(type, total)` demand
    /// in `totals`, i.e. `max(ceil(total / count_per_node(type)))`, floored
    /// at 1.
    pub fn nodes_required(&self, totals: &IndexMap<String, u64>) -> Result<u64, ResourceError> {
        let mut required = 1u64;
        for (ty, total) in totals {
            if *total == 0 {
                continue;
            }
            let per_node = self.count_per_node(ty, None);
            if per_node == 0 {
                return Err(ResourceError::NoCapacity(ty.clone()));
            }
            required = required.max(total.div_ceil(per_node));
        }
        Ok(required.max(1))
    }

    /// Derives a [`ResourceView`] for a process count and (optionally) a
    /// requested packing density.
    ///
    /// See the module documentation for the precise semantics; in short:
    /// `ranks_per_socket` without `ranks` is ambiguous and rejected, neither
    /// given yields the zero view, and deriving a non-trivial view requires
    /// a socket-scoped topology.
    pub fn resource_view(
        &self,
        ranks: Option<u64>,
        ranks_per_socket: Option<u64>,
    ) -> Result<ResourceView, ResourceError> {
        if ranks.is_none() && ranks_per_socket.is_some() {
            return Err(ResourceError::InvalidTopology(
                "ranks_per_socket requested without ranks".to_string(),
            ));
        }
        let Some(ranks) = ranks else {
            return Ok(ResourceView::zero());
        };
        if !self.has_socket_level() {
            return Err(ResourceError::InvalidTopology(
                "resource_view requires a socket-scoped topology".to_string(),
            ));
        }

        let sockets_per_node = self.sockets_per_node();
        let cpu_per_socket = self.count_per_socket("cpu", None);
        let user_supplied_rps = ranks_per_socket.is_some();
        let effective_rps = ranks_per_socket
            .unwrap_or_else(|| ranks.min(cpu_per_socket.max(1)))
            .max(1);

        let nodes = if user_supplied_rps {
            div_ceil(div_ceil(ranks, effective_rps), sockets_per_node)
        } else {
            div_ceil(div_ceil(ranks, cpu_per_socket.max(1)), sockets_per_node)
        };
        let sockets = div_ceil(ranks, effective_rps);

        Ok(ResourceView {
            np: ranks,
            ranks,
            ranks_per_socket: effective_rps,
            nodes: nodes.max(1),
            sockets: sockets.max(1),
        })
    }

    /// The top-level node groups that make up this tree.
    pub fn top_level(&self) -> &[ResourceSpec] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> ResourceTree {
        // node(1) -> socket(2) -> {cpu(8), gpu(1)}
        let node = ResourceSpec::new("node", 1).with_child(
            ResourceSpec::new("socket", 2)
                .with_child(ResourceSpec::new("cpu", 8))
                .with_child(ResourceSpec::new("gpu", 1)),
        );
        ResourceTree::new(vec![node]).unwrap()
    }

    #[test]
    fn rejects_non_node_top_level() {
        let err = ResourceTree::new(vec![ResourceSpec::new("socket", 1)]).unwrap_err();
        assert_eq!(err, ResourceError::InvalidTopLevelType("socket".to_string()));
    }

    #[test]
    fn rejects_zero_count() {
        let node = ResourceSpec::new("node", 1).with_child(ResourceSpec::new("socket", 0));
        let err = ResourceTree::new(vec![node]).unwrap_err();
        assert_eq!(err, ResourceError::InvalidCount("socket".to_string(), 0));
    }

    #[test]
    fn counts_per_node_and_socket() {
        let tree = canonical();
        assert_eq!(tree.count_per_node("socket", None), 2);
        assert_eq!(tree.count_per_node("cpu", None), 16);
        assert_eq!(tree.count_per_node("gpu", None), 2);
        assert_eq!(tree.count_per_socket("cpu", None), 8);
        assert_eq!(tree.sockets_per_node(), 2);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn count_per_node_equals_count_per_socket_times_sockets_per_node() {
        let tree = canonical();
        for ty in ["cpu", "gpu"] {
            assert_eq!(
                tree.count_per_node(ty, None),
                tree.count_per_socket(ty, None) * tree.sockets_per_node()
            );
        }
    }

    #[test]
    fn count_per_socket_falls_back_without_direct_occurrence() {
        // node(1) -> socket(4), cpu(16) directly under node (no socket-scoped cpu).
        let node = ResourceSpec::new("node", 1)
            .with_child(ResourceSpec::new("socket", 4))
            .with_child(ResourceSpec::new("cpu", 16));
        let tree = ResourceTree::new(vec![node]).unwrap();
        assert_eq!(tree.count_per_socket("cpu", None), 4);
    }

    #[test]
    fn nodes_required_is_monotonic_and_matches_ceiling_division() {
        let tree = canonical();
        let mut totals = IndexMap::new();
        for k in [1u64, 8, 9, 16, 17, 33] {
            totals.insert("cpu".to_string(), k);
            let required = tree.nodes_required(&totals).unwrap();
            assert_eq!(required, k.div_ceil(16).max(1));
        }
    }

    #[test]
    fn nodes_required_floors_at_one() {
        let tree = canonical();
        let totals = IndexMap::new();
        assert_eq!(tree.nodes_required(&totals).unwrap(), 1);
    }

    #[test]
    fn nodes_required_errors_on_missing_capacity() {
        let tree = canonical();
        let mut totals = IndexMap::new();
        totals.insert("fpga".to_string(), 1);
        assert_eq!(
            tree.nodes_required(&totals).unwrap_err(),
            ResourceError::NoCapacity("fpga".to_string())
        );
    }

    #[test]
    fn resource_view_with_neither_argument_is_zero() {
        let tree = canonical();
        assert_eq!(tree.resource_view(None, None).unwrap(), ResourceView::zero());
    }

    #[test]
    fn resource_view_rejects_ranks_per_socket_without_ranks() {
        let tree = canonical();
        assert!(matches!(
            tree.resource_view(None, Some(4)),
            Err(ResourceError::InvalidTopology(_))
        ));
    }

    #[test]
    fn resource_view_requires_socket_topology() {
        let node = ResourceSpec::new("node", 1).with_child(ResourceSpec::new("cpu", 16));
        let tree = ResourceTree::new(vec![node]).unwrap();
        assert!(matches!(
            tree.resource_view(Some(4), None),
            Err(ResourceError::InvalidTopology(_))
        ));
    }

    #[test]
    fn resource_view_derives_nodes_and_sockets() {
        let tree = canonical();
        let view = tree.resource_view(Some(20), None).unwrap();
        assert_eq!(view.ranks, 20);
        assert_eq!(view.ranks_per_socket, 8);
        assert_eq!(view.sockets, 3);
        assert_eq!(view.nodes, 2);
    }
}
