//! Cluster access used by the reconciler
//!
//! `ClusterStore` is the narrow set of reads and writes a reconcile pass needs.
//! `KubeStore` implements it against the API server; tests use an in-memory
//! implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Event, Node, ObjectReference, PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde_json::json;
use tracing::debug;

use crate::crd::{RemediationPolicy, RemediationPolicyStatus};
use crate::error::{Error, Result};

use super::dependencies::{ExternalKind, KindPresence};
use super::local_volume::VolumeSnapshot;
use super::node_health::NodeSnapshot;
use super::pvc_remediation::ClaimSnapshot;

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "pvc-remediator";

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a policy; `None` when it no longer exists
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<RemediationPolicy>>;

    /// Replace the policy's finalizer list. Fails with a conflict if the
    /// policy changed since it was read.
    async fn patch_policy_finalizers(
        &self,
        policy: &RemediationPolicy,
        finalizers: Vec<String>,
    ) -> Result<RemediationPolicy>;

    /// Write the status subresource, guarded by the policy's resourceVersion
    async fn patch_policy_status(
        &self,
        policy: &RemediationPolicy,
        status: &RemediationPolicyStatus,
    ) -> Result<RemediationPolicy>;

    /// Check whether an externally-defined kind is served and has instances
    async fn sample_kind(&self, kind: &ExternalKind) -> Result<KindPresence>;

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>>;

    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSnapshot>>;

    /// Fetch a volume; `None` when it does not exist
    async fn get_volume(&self, name: &str) -> Result<Option<VolumeSnapshot>>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// Record a Kubernetes Event against the policy
    async fn publish_event(
        &self,
        policy: &RemediationPolicy,
        event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// `ClusterStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn policies(&self, policy: &RemediationPolicy) -> Result<Api<RemediationPolicy>> {
        let namespace = policy
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

fn resource_version(policy: &RemediationPolicy) -> Result<String> {
    policy
        .resource_version()
        .ok_or(Error::MissingObjectKey("metadata.resourceVersion"))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<RemediationPolicy>> {
        let api: Api<RemediationPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_policy_finalizers(
        &self,
        policy: &RemediationPolicy,
        finalizers: Vec<String>,
    ) -> Result<RemediationPolicy> {
        let api = self.policies(policy)?;
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version(policy)?,
                "finalizers": finalizers
            }
        });
        let updated = api
            .patch(
                &policy.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn patch_policy_status(
        &self,
        policy: &RemediationPolicy,
        status: &RemediationPolicyStatus,
    ) -> Result<RemediationPolicy> {
        let api = self.policies(policy)?;
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version(policy)?
            },
            "status": status
        });
        let updated = api
            .patch_status(
                &policy.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn sample_kind(&self, kind: &ExternalKind) -> Result<KindPresence> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        match api.list(&ListParams::default().limit(1)).await {
            Ok(list) => Ok(KindPresence::Instances(list.items.len())),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("{} is not served by the cluster", kind.api_version());
                Ok(KindPresence::Unavailable)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items.iter().map(NodeSnapshot::from).collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSnapshot>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claims = api.list(&ListParams::default()).await?;
        Ok(claims.items.iter().map(ClaimSnapshot::from).collect())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<VolumeSnapshot>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.as_ref().map(VolumeSnapshot::from))
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn publish_event(
        &self,
        policy: &RemediationPolicy,
        event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let namespace = policy
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let involved_object: ObjectReference = policy.object_ref(&());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", policy.name_any())),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object,
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            reporting_component: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}
