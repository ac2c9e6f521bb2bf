//! Scale-subresource client seam and its kube-backed implementation.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde_json::json;
use tracing::debug;

use skala_core::TargetGvk;

/// Identity of the workload whose scale subresource is reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleTarget {
    pub gvk: TargetGvk,
    pub namespace: String,
    pub name: String,
}

/// Live scale representation fetched from the cluster, reused as the handle
/// for the follow-up write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleHandle {
    pub target: ScaleTarget,
    /// Replica count currently declared on the target.
    pub replicas: i32,
}

/// Orchestrator seam. Implementations must not be called while a store lock
/// is held; calls are cancel-safe (dropping the future aborts the request).
#[async_trait]
pub trait ScaleClient: Send + Sync {
    async fn get(&self, target: &ScaleTarget) -> Result<ScaleHandle>;
    async fn update(&self, handle: &ScaleHandle, replicas: i32) -> Result<()>;
}

/// kube-backed implementation using the scale subresource.
pub struct KubeScaleClient {
    client: Client,
}

impl KubeScaleClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self { client: Client::try_default().await? })
    }

    async fn dynamic_api(&self, target: &ScaleTarget) -> Result<Api<DynamicObject>> {
        let gvk = GroupVersionKind {
            group: target.gvk.group.clone(),
            version: target.gvk.version.clone(),
            kind: target.gvk.kind.clone(),
        };
        let discovery = Discovery::new(self.client.clone()).run().await?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    return match caps.scope {
                        Scope::Namespaced => {
                            Ok(Api::namespaced_with(self.client.clone(), &target.namespace, &ar))
                        }
                        Scope::Cluster => Err(anyhow!(
                            "target {}/{} is cluster-scoped and cannot be scaled",
                            gvk.kind,
                            target.name
                        )),
                    };
                }
            }
        }
        Err(anyhow!("GVK not found: {}", target.gvk))
    }
}

#[async_trait]
impl ScaleClient for KubeScaleClient {
    async fn get(&self, target: &ScaleTarget) -> Result<ScaleHandle> {
        let api = self.dynamic_api(target).await?;
        let scale = api
            .get_scale(&target.name)
            .await
            .with_context(|| format!("getting scale for {}/{}", target.namespace, target.name))?;
        let replicas = scale.spec.and_then(|spec| spec.replicas).unwrap_or(0);
        Ok(ScaleHandle { target: target.clone(), replicas })
    }

    async fn update(&self, handle: &ScaleHandle, replicas: i32) -> Result<()> {
        let api = self.dynamic_api(&handle.target).await?;
        let payload = json!({"spec": {"replicas": replicas}});
        api.patch_scale(&handle.target.name, &PatchParams::default(), &Patch::Merge(&payload))
            .await
            .with_context(|| {
                format!("patching scale for {}/{}", handle.target.namespace, handle.target.name)
            })?;
        debug!(target = %handle.target.name, replicas, "scale subresource updated");
        Ok(())
    }
}
