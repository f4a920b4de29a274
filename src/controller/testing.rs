//! In-memory `ClusterStore` for unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::error::ErrorResponse;
use kube::ResourceExt;

use crate::crd::{RemediationPolicy, RemediationPolicySpec, RemediationPolicyStatus};
use crate::error::{Error, Result};

use super::dependencies::{
    ExternalKind, KindPresence, NODE_HEALTH_CHECK, SELF_NODE_REMEDIATION_TEMPLATE,
};
use super::local_volume::{
    AffinityExpression, AffinityTerm, VolumeBackend, VolumeSnapshot, HOSTNAME_LABEL,
};
use super::node_health::{NodeReadiness, NodeSnapshot};
use super::pvc_remediation::ClaimSnapshot;
use super::store::ClusterStore;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Shape store failures like API server responses
fn store_error(code: u16, message: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "Injected".to_string(),
        code,
    }))
}

#[derive(Default)]
struct State {
    next_version: u64,
    policies: BTreeMap<Key, RemediationPolicy>,
    kinds: HashMap<&'static str, std::result::Result<KindPresence, u16>>,
    nodes: Vec<NodeSnapshot>,
    claims: BTreeMap<Key, ClaimSnapshot>,
    volumes: BTreeMap<String, VolumeSnapshot>,
    deleted: Vec<Key>,
    delete_failures: HashMap<Key, u16>,
    hold_deleted_claims: bool,
    list_failures: HashMap<String, u16>,
    status_failures: Vec<u16>,
    status_writes: usize,
    finalizer_writes: usize,
    events: Vec<(String, String)>,
    panic_on_list_nodes: bool,
    node_list_calls: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_version(&self, policy: &RemediationPolicy) -> Result<Key> {
        let k = key(&policy.namespace().unwrap_or_default(), &policy.name_any());
        let stored = self
            .policies
            .get(&k)
            .ok_or_else(|| store_error(404, "policy not found"))?;
        if stored.resource_version() != policy.resource_version() {
            return Err(store_error(409, "the object has been modified"));
        }
        Ok(k)
    }
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn with_dependencies(self) -> Self {
        self.set_presence(&NODE_HEALTH_CHECK, KindPresence::Instances(1));
        self.set_presence(&SELF_NODE_REMEDIATION_TEMPLATE, KindPresence::Instances(1));
        self
    }

    pub fn set_presence(&self, kind: &ExternalKind, presence: KindPresence) {
        self.with_state(|s| s.kinds.insert(kind.plural, Ok(presence)));
    }

    pub fn fail_kind(&self, kind: &ExternalKind, code: u16) {
        self.with_state(|s| s.kinds.insert(kind.plural, Err(code)));
    }

    /// Store a policy, assigning a resourceVersion
    pub fn insert_policy(&self, mut policy: RemediationPolicy) -> RemediationPolicy {
        self.with_state(|s| {
            policy.metadata.resource_version = Some(s.bump());
            let k = key(&policy.namespace().unwrap_or_default(), &policy.name_any());
            s.policies.insert(k, policy.clone());
            policy
        })
    }

    pub fn create_policy(
        &self,
        namespace: &str,
        name: &str,
        spec: RemediationPolicySpec,
    ) -> RemediationPolicy {
        let mut policy = RemediationPolicy::new(name, spec);
        policy.metadata.namespace = Some(namespace.to_string());
        self.insert_policy(policy)
    }

    /// Simulate a user delete: the API server sets deletionTimestamp
    pub fn mark_policy_deleted(&self, namespace: &str, name: &str) {
        self.with_state(|s| {
            let version = s.bump();
            if let Some(p) = s.policies.get_mut(&key(namespace, name)) {
                p.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                p.metadata.resource_version = Some(version);
            }
        });
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<RemediationPolicy> {
        self.with_state(|s| s.policies.get(&key(namespace, name)).cloned())
    }

    pub fn add_node(&self, name: &str, readiness: NodeReadiness) {
        self.with_state(|s| s.nodes.push(NodeSnapshot::new(name, readiness)));
    }

    pub fn add_volume(&self, name: &str, backend: VolumeBackend, hostname: Option<&str>) {
        let required_terms = hostname.map(|node| {
            vec![AffinityTerm {
                expressions: vec![AffinityExpression {
                    key: HOSTNAME_LABEL.to_string(),
                    values: vec![node.to_string()],
                }],
            }]
        });
        self.with_state(|s| {
            s.volumes.insert(
                name.to_string(),
                VolumeSnapshot {
                    name: name.to_string(),
                    backend,
                    required_terms,
                },
            )
        });
    }

    pub fn add_local_volume(&self, name: &str, hostname: Option<&str>) {
        self.add_volume(name, VolumeBackend::Local, hostname);
    }

    pub fn add_claim(&self, namespace: &str, name: &str, volume: Option<&str>) {
        self.with_state(|s| {
            s.claims.insert(
                key(namespace, name),
                ClaimSnapshot::new(namespace, name, volume),
            )
        });
    }

    pub fn fail_delete(&self, namespace: &str, name: &str, code: u16) {
        self.with_state(|s| s.delete_failures.insert(key(namespace, name), code));
    }

    /// Deleted claims stay listed as terminating, as when a pod still uses them
    pub fn hold_deleted_claims(&self) {
        self.with_state(|s| s.hold_deleted_claims = true);
    }

    pub fn fail_list_claims(&self, namespace: &str, code: u16) {
        self.with_state(|s| s.list_failures.insert(namespace.to_string(), code));
    }

    /// Fail the next status writes with the given codes, in order
    pub fn fail_status_writes(&self, codes: Vec<u16>) {
        self.with_state(|s| s.status_failures = codes);
    }

    pub fn panic_on_list_nodes(&self) {
        self.with_state(|s| s.panic_on_list_nodes = true);
    }

    pub fn deleted_claims(&self) -> Vec<Key> {
        self.with_state(|s| s.deleted.clone())
    }

    pub fn claim_names(&self, namespace: &str) -> Vec<String> {
        self.with_state(|s| {
            s.claims
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, name)| name.clone())
                .collect()
        })
    }

    pub fn status_writes(&self) -> usize {
        self.with_state(|s| s.status_writes)
    }

    pub fn finalizer_writes(&self) -> usize {
        self.with_state(|s| s.finalizer_writes)
    }

    pub fn node_list_calls(&self) -> usize {
        self.with_state(|s| s.node_list_calls)
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.events.clone())
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<RemediationPolicy>> {
        Ok(self.policy(namespace, name))
    }

    async fn patch_policy_finalizers(
        &self,
        policy: &RemediationPolicy,
        finalizers: Vec<String>,
    ) -> Result<RemediationPolicy> {
        self.with_state(|s| {
            let k = s.check_version(policy)?;
            let version = s.bump();
            s.finalizer_writes += 1;
            let stored = s
                .policies
                .get_mut(&k)
                .ok_or_else(|| store_error(404, "policy not found"))?;
            stored.metadata.finalizers = Some(finalizers.clone());
            stored.metadata.resource_version = Some(version);
            let updated = stored.clone();
            if updated.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
                s.policies.remove(&k);
            }
            Ok(updated)
        })
    }

    async fn patch_policy_status(
        &self,
        policy: &RemediationPolicy,
        status: &RemediationPolicyStatus,
    ) -> Result<RemediationPolicy> {
        self.with_state(|s| {
            if !s.status_failures.is_empty() {
                let code = s.status_failures.remove(0);
                return Err(store_error(code, "status write rejected"));
            }
            let k = s.check_version(policy)?;
            let version = s.bump();
            s.status_writes += 1;
            let stored = s
                .policies
                .get_mut(&k)
                .ok_or_else(|| store_error(404, "policy not found"))?;
            stored.status = Some(status.clone());
            stored.metadata.resource_version = Some(version);
            Ok(stored.clone())
        })
    }

    async fn sample_kind(&self, kind: &ExternalKind) -> Result<KindPresence> {
        self.with_state(|s| match s.kinds.get(kind.plural) {
            Some(Ok(presence)) => Ok(*presence),
            Some(Err(code)) => Err(store_error(*code, "list failed")),
            None => Ok(KindPresence::Unavailable),
        })
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>> {
        let (nodes, should_panic) = self.with_state(|s| {
            s.node_list_calls += 1;
            (s.nodes.clone(), s.panic_on_list_nodes)
        });
        if should_panic {
            panic!("node list exploded");
        }
        Ok(nodes)
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSnapshot>> {
        self.with_state(|s| {
            if let Some(code) = s.list_failures.get(namespace) {
                return Err(store_error(*code, "list failed"));
            }
            Ok(s.claims
                .values()
                .filter(|c| c.namespace == namespace)
                .cloned()
                .collect())
        })
    }

    async fn get_volume(&self, name: &str) -> Result<Option<VolumeSnapshot>> {
        Ok(self.with_state(|s| s.volumes.get(name).cloned()))
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.with_state(|s| {
            let k = key(namespace, name);
            if let Some(code) = s.delete_failures.get(&k) {
                return Err(store_error(*code, "delete failed"));
            }
            if s.hold_deleted_claims {
                let claim = s
                    .claims
                    .get_mut(&k)
                    .ok_or_else(|| store_error(404, "claim not found"))?;
                if !claim.terminating {
                    claim.terminating = true;
                    s.deleted.push(k);
                }
                return Ok(());
            }
            match s.claims.remove(&k) {
                Some(_) => {
                    s.deleted.push(k);
                    Ok(())
                }
                None => Err(store_error(404, "claim not found")),
            }
        })
    }

    async fn publish_event(
        &self,
        _policy: &RemediationPolicy,
        _event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        self.with_state(|s| s.events.push((reason.to_string(), message.to_string())));
        Ok(())
    }
}
