//! Horizontal sync: fetch the live scale, detect drift, converge replicas.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use skala_core::{AutoscalerInternal, Constraints, HorizontalAction, TargetError};

use crate::scaler::{ScaleClient, ScaleTarget};

const DEFAULT_MIN_REPLICAS: i32 = 1;
const DEFAULT_MAX_REPLICAS: i32 = i32::MAX;

/// What a successful sync owes the caller. `update_status` distinguishes
/// "nothing to do" from "had to act" so the caller can decide whether a
/// status write is worth the API cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub update_status: bool,
}

/// Per-autoscaler sync failure. Every error implies a status update; whether
/// the caller should also requeue depends on the variant.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to resolve target for autoscaler {id}: {source}")]
    ResolveTarget {
        id: String,
        #[source]
        source: TargetError,
    },
    #[error("failed to get scale subresource for autoscaler {id}: {source}")]
    GetScale {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to update scale subresource for autoscaler {id}: {source}")]
    UpdateScale {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    /// Resolution failures are deterministic until the spec changes, so
    /// retrying them is pointless; API failures are worth a retry.
    pub fn needs_requeue(&self) -> bool {
        matches!(self, Self::GetScale { .. } | Self::UpdateScale { .. })
    }
}

pub struct HorizontalReconciler {
    scaler: Arc<dyn ScaleClient>,
}

impl HorizontalReconciler {
    pub fn new(scaler: Arc<dyn ScaleClient>) -> Self {
        Self { scaler }
    }

    /// Compare-then-converge one autoscaler.
    ///
    /// The scale API is called with no store lock held; the caller persists
    /// the mutated state afterwards. Never writes when desired already
    /// equals observed.
    pub async fn sync(
        &self,
        now: DateTime<Utc>,
        autoscaler: &mut AutoscalerInternal,
    ) -> Result<ProcessResult, SyncError> {
        let id = autoscaler.id();
        let gvk = autoscaler
            .target_gvk()
            .map_err(|source| SyncError::ResolveTarget { id: id.clone(), source })?;
        let Some(spec) = autoscaler.spec.as_ref() else {
            return Err(SyncError::ResolveTarget { id, source: TargetError::NoSpec });
        };
        let target = ScaleTarget {
            gvk,
            namespace: autoscaler.namespace.clone(),
            name: spec.target_ref.name.clone(),
        };
        let constraints = spec.constraints.clone();

        let handle = self
            .scaler
            .get(&target)
            .await
            .map_err(|source| SyncError::GetScale { id: id.clone(), source })?;

        // Drift from manual scaling or other controllers shows up here.
        let mut result = ProcessResult::default();
        if autoscaler.current_replicas != Some(handle.replicas) {
            autoscaler.current_replicas = Some(handle.replicas);
            result.update_status = true;
        }

        let Some(horizontal) = autoscaler.scaling_values.horizontal.as_ref() else {
            return Ok(result);
        };
        if horizontal.replicas == handle.replicas {
            return Ok(result);
        }

        let target_replicas = clamp_replicas(horizontal.replicas, constraints.as_ref());
        if target_replicas == handle.replicas {
            // Constraints pinned us to the live count; nothing to write.
            return Ok(result);
        }

        self.scaler
            .update(&handle, target_replicas)
            .await
            .map_err(|source| SyncError::UpdateScale { id: id.clone(), source })?;

        counter!("reconcile_scale_writes", 1u64);
        debug!(autoscaler = %id, from = handle.replicas, to = target_replicas, "scaled target");
        autoscaler.horizontal_last_action = Some(HorizontalAction {
            time: now,
            from_replicas: handle.replicas,
            to_replicas: target_replicas,
        });
        autoscaler.horizontal_last_error = None;
        result.update_status = true;
        Ok(result)
    }
}

fn clamp_replicas(desired: i32, constraints: Option<&Constraints>) -> i32 {
    let min = constraints
        .and_then(|c| c.min_replicas)
        .unwrap_or(DEFAULT_MIN_REPLICAS);
    let max = constraints
        .and_then(|c| c.max_replicas)
        // A max below min is ignored rather than inverted.
        .filter(|&max| max >= min)
        .unwrap_or(DEFAULT_MAX_REPLICAS);
    desired.clamp(min, max)
}
