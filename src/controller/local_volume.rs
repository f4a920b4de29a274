//! Local volume correlation
//!
//! Maps a PersistentVolume to the node it is pinned to. The notion of "pinned"
//! is deliberately broad: any volume that cannot follow its workload to another
//! node without manual intervention counts, including CSI volumes that only
//! declare node affinity for scheduling.
//!
//! A volume is pinned when:
//! - its backend is `local`, or
//! - its backend is CSI or hostPath and it carries at least one required
//!   node-affinity term.
//!
//! The node name is taken from the first `kubernetes.io/hostname` expression
//! found while walking the required terms in order.

use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;

/// Well-known node label holding the node's hostname
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Storage backend of a volume, as far as pinning is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeBackend {
    Local,
    Csi,
    HostPath,
    Other,
}

/// One `matchExpressions` entry of a node selector term
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffinityExpression {
    pub key: String,
    pub values: Vec<String>,
}

/// A required node selector term
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffinityTerm {
    pub expressions: Vec<AffinityExpression>,
}

/// Per-pass view of a PersistentVolume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeSnapshot {
    pub name: String,
    pub backend: VolumeBackend,
    /// `None` when the volume has no required node affinity at all
    pub required_terms: Option<Vec<AffinityTerm>>,
}

impl VolumeSnapshot {
    /// Whether the claim bound to this volume is stuck with a single node
    pub fn is_pinned(&self) -> bool {
        let has_terms = self
            .required_terms
            .as_ref()
            .map(|terms| !terms.is_empty())
            .unwrap_or(false);

        match self.backend {
            VolumeBackend::Local => true,
            VolumeBackend::Csi | VolumeBackend::HostPath => has_terms,
            VolumeBackend::Other => false,
        }
    }

    /// Node this volume is pinned to, if it is pinned and the node is resolvable
    pub fn resolve_pinned_node(&self) -> Option<String> {
        if !self.is_pinned() {
            return None;
        }
        self.required_terms
            .as_ref()?
            .iter()
            .flat_map(|term| term.expressions.iter())
            .find(|expr| expr.key == HOSTNAME_LABEL)
            .and_then(|expr| expr.values.first().cloned())
    }
}

impl From<&PersistentVolume> for VolumeSnapshot {
    fn from(pv: &PersistentVolume) -> Self {
        let spec = pv.spec.as_ref();

        let backend = match spec {
            Some(s) if s.local.is_some() => VolumeBackend::Local,
            Some(s) if s.csi.is_some() => VolumeBackend::Csi,
            Some(s) if s.host_path.is_some() => VolumeBackend::HostPath,
            _ => VolumeBackend::Other,
        };

        let required_terms = spec
            .and_then(|s| s.node_affinity.as_ref())
            .and_then(|na| na.required.as_ref())
            .map(|selector| {
                selector
                    .node_selector_terms
                    .iter()
                    .map(|term| AffinityTerm {
                        expressions: term
                            .match_expressions
                            .iter()
                            .flatten()
                            .map(|req| AffinityExpression {
                                key: req.key.clone(),
                                values: req.values.clone().unwrap_or_default(),
                            })
                            .collect(),
                    })
                    .collect()
            });

        Self {
            name: pv.name_any(),
            backend,
            required_terms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        CSIPersistentVolumeSource, HostPathVolumeSource, LocalVolumeSource, NFSVolumeSource,
        NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PersistentVolumeSpec,
        VolumeNodeAffinity,
    };
    use kube::api::ObjectMeta;

    fn hostname_term(node: &str) -> AffinityTerm {
        AffinityTerm {
            expressions: vec![AffinityExpression {
                key: HOSTNAME_LABEL.to_string(),
                values: vec![node.to_string()],
            }],
        }
    }

    fn snapshot(backend: VolumeBackend, terms: Option<Vec<AffinityTerm>>) -> VolumeSnapshot {
        VolumeSnapshot {
            name: "pv-1".to_string(),
            backend,
            required_terms: terms,
        }
    }

    #[test]
    fn test_local_volume_resolves_hostname() {
        let pv = snapshot(VolumeBackend::Local, Some(vec![hostname_term("worker-0")]));
        assert!(pv.is_pinned());
        assert_eq!(pv.resolve_pinned_node().as_deref(), Some("worker-0"));
    }

    #[test]
    fn test_local_volume_without_affinity_has_no_node() {
        let pv = snapshot(VolumeBackend::Local, None);
        assert!(pv.is_pinned());
        assert_eq!(pv.resolve_pinned_node(), None);
    }

    #[test]
    fn test_csi_and_host_path_need_terms() {
        for backend in [VolumeBackend::Csi, VolumeBackend::HostPath] {
            assert!(!snapshot(backend, None).is_pinned());
            assert!(!snapshot(backend, Some(vec![])).is_pinned());
            let pinned = snapshot(backend, Some(vec![hostname_term("worker-1")]));
            assert_eq!(pinned.resolve_pinned_node().as_deref(), Some("worker-1"));
        }
    }

    #[test]
    fn test_other_backend_is_never_pinned() {
        let pv = snapshot(VolumeBackend::Other, Some(vec![hostname_term("worker-0")]));
        assert!(!pv.is_pinned());
        assert_eq!(pv.resolve_pinned_node(), None);
    }

    #[test]
    fn test_first_hostname_expression_wins() {
        let terms = vec![
            AffinityTerm {
                expressions: vec![AffinityExpression {
                    key: "topology.kubernetes.io/zone".to_string(),
                    values: vec!["zone-a".to_string()],
                }],
            },
            hostname_term("worker-2"),
            hostname_term("worker-3"),
        ];
        let pv = snapshot(VolumeBackend::Csi, Some(terms));
        assert_eq!(pv.resolve_pinned_node().as_deref(), Some("worker-2"));
    }

    #[test]
    fn test_hostname_expression_without_values() {
        let terms = vec![
            AffinityTerm {
                expressions: vec![AffinityExpression {
                    key: HOSTNAME_LABEL.to_string(),
                    values: vec![],
                }],
            },
            hostname_term("worker-4"),
        ];
        let pv = snapshot(VolumeBackend::Local, Some(terms));
        assert_eq!(pv.resolve_pinned_node(), None);
    }

    #[test]
    fn test_no_hostname_key_is_unpinned() {
        let terms = vec![AffinityTerm {
            expressions: vec![AffinityExpression {
                key: "topology.kubernetes.io/zone".to_string(),
                values: vec!["zone-a".to_string()],
            }],
        }];
        let pv = snapshot(VolumeBackend::HostPath, Some(terms));
        assert!(pv.is_pinned());
        assert_eq!(pv.resolve_pinned_node(), None);
    }

    fn pv_with(spec: PersistentVolumeSpec) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pv-1".to_string()),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        }
    }

    fn hostname_affinity(node: &str) -> VolumeNodeAffinity {
        VolumeNodeAffinity {
            required: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    match_fields: None,
                }],
            }),
        }
    }

    #[test]
    fn test_snapshot_from_local_pv() {
        let pv = pv_with(PersistentVolumeSpec {
            local: Some(LocalVolumeSource {
                path: "/mnt/disks/ssd1".to_string(),
                fs_type: None,
            }),
            node_affinity: Some(hostname_affinity("worker-0")),
            ..Default::default()
        });
        let snap = VolumeSnapshot::from(&pv);
        assert_eq!(snap.backend, VolumeBackend::Local);
        assert_eq!(snap.resolve_pinned_node().as_deref(), Some("worker-0"));
    }

    #[test]
    fn test_snapshot_from_csi_and_host_path() {
        let csi = pv_with(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: "topolvm.io".to_string(),
                volume_handle: "vol-1".to_string(),
                ..Default::default()
            }),
            node_affinity: Some(hostname_affinity("worker-1")),
            ..Default::default()
        });
        assert_eq!(VolumeSnapshot::from(&csi).backend, VolumeBackend::Csi);

        let host_path = pv_with(PersistentVolumeSpec {
            host_path: Some(HostPathVolumeSource {
                path: "/var/data".to_string(),
                type_: None,
            }),
            ..Default::default()
        });
        let snap = VolumeSnapshot::from(&host_path);
        assert_eq!(snap.backend, VolumeBackend::HostPath);
        assert_eq!(snap.required_terms, None);
        assert!(!snap.is_pinned());
    }

    #[test]
    fn test_snapshot_from_nfs_is_other() {
        let pv = pv_with(PersistentVolumeSpec {
            nfs: Some(NFSVolumeSource {
                server: "nfs.example.com".to_string(),
                path: "/exports".to_string(),
                read_only: None,
            }),
            node_affinity: Some(hostname_affinity("worker-0")),
            ..Default::default()
        });
        let snap = VolumeSnapshot::from(&pv);
        assert_eq!(snap.backend, VolumeBackend::Other);
        assert_eq!(snap.resolve_pinned_node(), None);
    }
}
