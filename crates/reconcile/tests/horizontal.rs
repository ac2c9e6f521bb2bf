#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use skala_core::{
    AutoscalerInternal, AutoscalerSpec, Constraints, HorizontalScalingValues, ScalingValues,
    SpecOwner, TargetRef, ValueSource,
};
use skala_reconcile::{
    HorizontalReconciler, ReconcileOutcome, ScaleClient, ScaleHandle, ScaleTarget, SyncError,
    Worker,
};
use skala_store::KeyedStore;

#[derive(Default)]
struct MockState {
    replicas: i32,
    fail_get: bool,
    fail_update: bool,
    gets: u32,
    updates: Vec<i32>,
}

#[derive(Default)]
struct MockScaler {
    state: Mutex<MockState>,
}

impl MockScaler {
    fn with_replicas(replicas: i32) -> Arc<Self> {
        let scaler = Self::default();
        scaler.state.lock().unwrap().replicas = replicas;
        Arc::new(scaler)
    }

    fn updates(&self) -> Vec<i32> {
        self.state.lock().unwrap().updates.clone()
    }
}

#[async_trait]
impl ScaleClient for MockScaler {
    async fn get(&self, target: &ScaleTarget) -> Result<ScaleHandle> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        if state.fail_get {
            return Err(anyhow!("scale fetch unavailable"));
        }
        Ok(ScaleHandle { target: target.clone(), replicas: state.replicas })
    }

    async fn update(&self, _handle: &ScaleHandle, replicas: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_update {
            return Err(anyhow!("scale write rejected"));
        }
        state.replicas = replicas;
        state.updates.push(replicas);
        Ok(())
    }
}

fn spec(constraints: Option<Constraints>) -> AutoscalerSpec {
    AutoscalerSpec {
        owner: SpecOwner::Remote,
        remote_version: None,
        target_ref: TargetRef {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "web".into(),
        },
        constraints,
        policy: None,
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn autoscaler(desired: Option<i32>, constraints: Option<Constraints>) -> AutoscalerInternal {
    let mut state = AutoscalerInternal::new("ns", "web");
    state.update_from_settings(spec(constraints), 1, ts(1));
    if let Some(replicas) = desired {
        state.update_from_values(
            ScalingValues {
                horizontal: Some(HorizontalScalingValues {
                    source: ValueSource::Autoscaling,
                    replicas,
                }),
                vertical: None,
            },
            1,
            ts(2),
        );
    }
    state
}

#[tokio::test]
async fn converged_target_performs_no_write() {
    let scaler = MockScaler::with_replicas(3);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(Some(3), None);
    state.current_replicas = Some(3);

    let result = reconciler.sync(ts(10), &mut state).await.unwrap();
    assert!(!result.update_status);
    assert!(scaler.updates().is_empty());
    assert!(state.horizontal_last_action.is_none());
}

#[tokio::test]
async fn drift_is_observed_even_without_recommendations() {
    let scaler = MockScaler::with_replicas(7);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(None, None);
    state.current_replicas = Some(3);

    let result = reconciler.sync(ts(10), &mut state).await.unwrap();
    assert!(result.update_status);
    assert_eq!(state.current_replicas, Some(7));
    assert!(scaler.updates().is_empty());
}

#[tokio::test]
async fn divergent_target_is_scaled_and_action_recorded() {
    let scaler = MockScaler::with_replicas(2);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(Some(5), None);

    let result = reconciler.sync(ts(10), &mut state).await.unwrap();
    assert!(result.update_status);
    assert_eq!(scaler.updates(), vec![5]);

    let action = state.horizontal_last_action.unwrap();
    assert_eq!(action.from_replicas, 2);
    assert_eq!(action.to_replicas, 5);
    assert_eq!(action.time, ts(10));
    assert!(state.horizontal_last_error.is_none());
}

#[tokio::test]
async fn desired_replicas_are_clamped_to_constraints() {
    let scaler = MockScaler::with_replicas(2);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let constraints = Constraints { min_replicas: Some(1), max_replicas: Some(5) };
    let mut state = autoscaler(Some(100), Some(constraints));

    reconciler.sync(ts(10), &mut state).await.unwrap();
    assert_eq!(scaler.updates(), vec![5]);
}

#[tokio::test]
async fn clamp_landing_on_live_count_skips_the_write() {
    let scaler = MockScaler::with_replicas(5);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let constraints = Constraints { min_replicas: Some(1), max_replicas: Some(5) };
    let mut state = autoscaler(Some(100), Some(constraints));

    let result = reconciler.sync(ts(10), &mut state).await.unwrap();
    assert!(scaler.updates().is_empty());
    // Only the drift observation requires a status write.
    assert!(result.update_status);
}

#[tokio::test]
async fn fetch_failure_wants_a_requeue() {
    let scaler = MockScaler::with_replicas(2);
    scaler.state.lock().unwrap().fail_get = true;
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(Some(5), None);

    let err = reconciler.sync(ts(10), &mut state).await.unwrap_err();
    assert!(matches!(err, SyncError::GetScale { .. }));
    assert!(err.needs_requeue());
    assert!(err.to_string().contains("ns/web"));
}

#[tokio::test]
async fn write_failure_wants_a_requeue() {
    let scaler = MockScaler::with_replicas(2);
    scaler.state.lock().unwrap().fail_update = true;
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(Some(5), None);

    let err = reconciler.sync(ts(10), &mut state).await.unwrap_err();
    assert!(matches!(err, SyncError::UpdateScale { .. }));
    assert!(err.needs_requeue());
    // The live count was still observed before the write failed.
    assert_eq!(state.current_replicas, Some(2));
}

#[tokio::test]
async fn unresolvable_target_does_not_requeue() {
    let scaler = MockScaler::with_replicas(2);
    let reconciler = HorizontalReconciler::new(scaler.clone());
    let mut state = autoscaler(Some(5), None);
    state
        .spec
        .as_mut()
        .unwrap()
        .target_ref
        .api_version = "apps/v1/bogus".into();

    let err = reconciler.sync(ts(10), &mut state).await.unwrap_err();
    assert!(matches!(err, SyncError::ResolveTarget { .. }));
    assert!(!err.needs_requeue());
    assert_eq!(scaler.state.lock().unwrap().gets, 0);
}

mod worker {
    use super::*;

    #[tokio::test]
    async fn outcome_is_persisted_through_the_store() {
        let scaler = MockScaler::with_replicas(2);
        let store: KeyedStore<AutoscalerInternal> = KeyedStore::new();
        let state = autoscaler(Some(5), None);
        store.set(&state.id(), state, "unittest");

        let worker = Worker::new(store.clone(), HorizontalReconciler::new(scaler.clone()));
        let requeue = worker.reconcile_all().await;
        assert!(requeue.is_empty());

        let stored = store.get("ns/web").unwrap();
        assert_eq!(stored.current_replicas, Some(2));
        let action = stored.horizontal_last_action.unwrap();
        assert_eq!(action.to_replicas, 5);
        assert!(stored.horizontal_last_error.is_none());
    }

    #[tokio::test]
    async fn failures_record_the_error_and_request_requeue() {
        let scaler = MockScaler::with_replicas(2);
        scaler.state.lock().unwrap().fail_get = true;
        let store: KeyedStore<AutoscalerInternal> = KeyedStore::new();
        let state = autoscaler(Some(5), None);
        store.set(&state.id(), state, "unittest");

        let worker = Worker::new(store.clone(), HorizontalReconciler::new(scaler.clone()));
        let requeue = worker.reconcile_all().await;
        assert_eq!(requeue, vec!["ns/web".to_string()]);

        let stored = store.get("ns/web").unwrap();
        assert!(stored.horizontal_last_error.unwrap().contains("scale fetch unavailable"));
    }

    #[tokio::test]
    async fn deleted_and_specless_autoscalers_are_skipped() {
        let scaler = MockScaler::with_replicas(2);
        let store: KeyedStore<AutoscalerInternal> = KeyedStore::new();

        let mut deleted = autoscaler(Some(5), None);
        deleted.deleted = true;
        store.set(&deleted.id(), deleted, "unittest");
        let specless = AutoscalerInternal::new("ns", "bare");
        store.set(&specless.id(), specless, "unittest");

        let worker = Worker::new(store.clone(), HorizontalReconciler::new(scaler.clone()));
        let requeue = worker.reconcile_all().await;
        assert!(requeue.is_empty());
        assert_eq!(scaler.state.lock().unwrap().gets, 0);
        assert!(scaler.updates().is_empty());
    }

    #[tokio::test]
    async fn racing_config_updates_survive_the_write_back() {
        let scaler = MockScaler::with_replicas(2);
        let store: KeyedStore<AutoscalerInternal> = KeyedStore::new();
        let state = autoscaler(Some(5), None);
        store.set(&state.id(), state.clone(), "unittest");

        let worker = Worker::new(store.clone(), HorizontalReconciler::new(scaler.clone()));

        // A values update lands while the sync's copy is detached.
        let mut racing = store.get("ns/web").unwrap();
        racing.update_from_values(
            ScalingValues {
                horizontal: Some(HorizontalScalingValues {
                    source: ValueSource::Manual,
                    replicas: 9,
                }),
                vertical: None,
            },
            42,
            ts(50),
        );
        store.set("ns/web", racing, "unittest");

        let outcome = worker.reconcile_one(state).await;
        assert_eq!(outcome, ReconcileOutcome { status_update: true, requeue: false });

        // The write-back merged only reconciler-owned fields.
        let stored = store.get("ns/web").unwrap();
        assert_eq!(stored.scaling_values_version, Some(42));
        assert_eq!(stored.scaling_values.horizontal.unwrap().replicas, 9);
        assert_eq!(stored.current_replicas, Some(2));
    }
}
