//! Node health classification
//!
//! A node is unhealthy only when it reports a `Ready` condition whose status is
//! not "True". Nodes without a `Ready` condition are left alone.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

/// Readiness as reported by the node's condition set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeReadiness {
    Ready,
    NotReady,
    /// No `Ready` condition reported
    Absent,
}

/// Per-pass view of a cluster node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub name: String,
    pub readiness: NodeReadiness,
}

impl NodeSnapshot {
    pub fn new(name: impl Into<String>, readiness: NodeReadiness) -> Self {
        Self {
            name: name.into(),
            readiness,
        }
    }
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        let readiness = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
            .map(|c| {
                if c.status == "True" {
                    NodeReadiness::Ready
                } else {
                    NodeReadiness::NotReady
                }
            })
            .unwrap_or(NodeReadiness::Absent);

        Self {
            name: node.name_any(),
            readiness,
        }
    }
}

/// Names of nodes classified unhealthy during one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnhealthyNodeSet(BTreeSet<String>);

impl UnhealthyNodeSet {
    pub fn contains(&self, node: &str) -> bool {
        self.0.contains(node)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

pub fn classify_nodes(nodes: &[NodeSnapshot]) -> UnhealthyNodeSet {
    UnhealthyNodeSet(
        nodes
            .iter()
            .filter(|n| n.readiness == NodeReadiness::NotReady)
            .map(|n| n.name.clone())
            .collect(),
    )
}
