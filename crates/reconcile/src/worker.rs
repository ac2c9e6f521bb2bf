//! Reconciliation driver: snapshots the store, syncs each autoscaler with no
//! lock held across cluster I/O, then persists the observed outcome.

use chrono::Utc;
use tracing::{debug, warn};

use skala_core::AutoscalerInternal;
use skala_store::KeyedStore;

use crate::horizontal::HorizontalReconciler;

const RECONCILE_WRITER: &str = "reconciler";

/// Per-autoscaler outcome handed to the caller, which owns retry cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub status_update: bool,
    pub requeue: bool,
}

pub struct Worker {
    store: KeyedStore<AutoscalerInternal>,
    horizontal: HorizontalReconciler,
}

impl Worker {
    pub fn new(store: KeyedStore<AutoscalerInternal>, horizontal: HorizontalReconciler) -> Self {
        Self { store, horizontal }
    }

    /// One pass over every live autoscaler. An error on one autoscaler never
    /// aborts the others. Returns the ids that want a retry.
    pub async fn reconcile_all(&self) -> Vec<String> {
        let mut requeue = Vec::new();
        for autoscaler in self.store.get_all() {
            if autoscaler.deleted || autoscaler.spec.is_none() {
                continue;
            }
            let id = autoscaler.id();
            let outcome = self.reconcile_one(autoscaler).await;
            if outcome.requeue {
                requeue.push(id);
            }
        }
        requeue
    }

    /// Sync a detached copy, then merge the reconciler-owned fields back
    /// under the key lock so config updates racing the scale call are
    /// preserved.
    pub async fn reconcile_one(&self, mut autoscaler: AutoscalerInternal) -> ReconcileOutcome {
        let id = autoscaler.id();
        let mut outcome = ReconcileOutcome::default();
        match self.horizontal.sync(Utc::now(), &mut autoscaler).await {
            Ok(result) => {
                outcome.status_update = result.update_status;
                autoscaler.horizontal_last_error = None;
            }
            Err(err) => {
                warn!(autoscaler = %id, error = %err, "horizontal sync failed");
                outcome.status_update = true;
                outcome.requeue = err.needs_requeue();
                autoscaler.horizontal_last_error = Some(err.to_string());
            }
        }

        match self.store.lock_entry(&id).await {
            Some(entry) => {
                if let Some(mut stored) = entry.cloned() {
                    stored.current_replicas = autoscaler.current_replicas;
                    stored.horizontal_last_action = autoscaler.horizontal_last_action.clone();
                    stored.horizontal_last_error = autoscaler.horizontal_last_error.clone();
                    entry.commit(stored, RECONCILE_WRITER);
                }
            }
            None => {
                debug!(autoscaler = %id, "autoscaler removed during sync, dropping outcome");
            }
        }
        outcome
    }
}
