//! Skala config ingestor: applies settings and values update batches to the
//! keyed store and reports per-batch apply status back to the transport.

#![forbid(unsafe_code)]

pub mod values;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use skala_core::{object_id, wire, AutoscalerInternal};
use skala_store::KeyedStore;

use values::ValuesProcessor;

/// Store shared between the ingestor and the reconciler.
pub type SharedStore = KeyedStore<AutoscalerInternal>;

pub(crate) const INGEST_WRITER: &str = "ingest";

/// Config products this ingestor subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    AutoscalingSettings,
    AutoscalingValues,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoscalingSettings => "autoscaling-settings",
            Self::AutoscalingValues => "autoscaling-values",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw payload as delivered by the transport.
#[derive(Debug, Clone)]
pub struct RawConfig {
    /// Opaque config identifier assigned by the transport.
    pub id: String,
    /// Declared payload version.
    pub version: u64,
    /// Raw JSON payload bytes.
    pub data: Vec<u8>,
}

/// Apply outcome reported per batch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    /// Not processed; this replica is not the leader.
    Unacknowledged,
    Acknowledged,
    Error(String),
}

/// Leadership oracle. Non-leader replicas receive every update and discard
/// it without touching the store.
pub trait LeaderElection: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Fixed-answer oracle for wiring without an elector, and for tests.
pub struct StaticLeadership(pub bool);

impl LeaderElection for StaticLeadership {
    fn is_leader(&self) -> bool {
        self.0
    }
}

pub type ApplyStatusCallback = Box<dyn Fn(&str, ApplyStatus) + Send>;

/// One delivered update: batch key to raw payload, plus the callback used to
/// report per-batch apply status. The transport may redeliver; applying the
/// same batch twice must be safe.
pub struct ConfigUpdate {
    pub configs: HashMap<String, RawConfig>,
    pub apply_status: ApplyStatusCallback,
}

/// Subscription seam to the config transport.
pub trait ConfigClient {
    fn subscribe(&self, product: Product, updates: mpsc::Sender<ConfigUpdate>);
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to unmarshal config id:{id}, version: {version}, config key: {key}, err: {source}")]
    Deserialize {
        id: String,
        version: u64,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// Aggregated per-identifier translation failures of one values batch.
    #[error("config id:{id}, version: {version}, config key: {key}: {message}")]
    Values { id: String, version: u64, key: String, message: String },
}

/// Applies config-stream updates to the store.
pub struct ConfigIngestor {
    store: SharedStore,
    leadership: Arc<dyn LeaderElection>,
}

impl ConfigIngestor {
    pub fn new(store: SharedStore, leadership: Arc<dyn LeaderElection>) -> Self {
        Self { store, leadership }
    }

    /// Register on both products and spawn one apply task per stream. The
    /// two streams are independent and unordered with respect to each other.
    pub fn spawn(self: Arc<Self>, client: &dyn ConfigClient, queue_depth: usize) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);
        for product in [Product::AutoscalingSettings, Product::AutoscalingValues] {
            let (tx, mut rx) = mpsc::channel::<ConfigUpdate>(queue_depth);
            client.subscribe(product, tx);
            let ingestor = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    ingestor.handle_update(product, Utc::now(), update).await;
                }
                debug!(product = %product, "config update channel closed");
            }));
        }
        handles
    }

    /// Apply one delivered update for `product`, stamping `received_at` as
    /// the receipt timestamp of every applied entry.
    pub async fn handle_update(&self, product: Product, received_at: DateTime<Utc>, update: ConfigUpdate) {
        match product {
            Product::AutoscalingSettings => self.handle_settings_update(received_at, update).await,
            Product::AutoscalingValues => self.handle_values_update(received_at, update).await,
        }
    }

    /// Settings stream: a decode failure rejects the whole batch and leaves
    /// the store untouched; otherwise each entry is created or updated under
    /// its own key lock.
    pub async fn handle_settings_update(&self, received_at: DateTime<Utc>, update: ConfigUpdate) {
        for (key, raw) in &update.configs {
            // Leadership is re-checked per batch so a step-down mid-update
            // stops writes no later than the next batch.
            if !self.leadership.is_leader() {
                (update.apply_status)(key, ApplyStatus::Unacknowledged);
                continue;
            }
            match self.process_settings_config(received_at, key, raw).await {
                Ok(()) => (update.apply_status)(key, ApplyStatus::Acknowledged),
                Err(err) => {
                    warn!(key = %key, error = %err, "settings batch rejected");
                    counter!("ingest_settings_errors", 1u64);
                    (update.apply_status)(key, ApplyStatus::Error(err.to_string()));
                }
            }
        }
    }

    /// Values stream: entries for unknown autoscalers are skipped silently;
    /// translation failures are aggregated per batch while parsed fields
    /// still commit. After a fully-clean update the autoscalers the stream
    /// no longer mentions lose their values.
    pub async fn handle_values_update(&self, received_at: DateTime<Utc>, update: ConfigUpdate) {
        let mut processor = ValuesProcessor::new(&self.store);
        let mut clean = true;
        for (key, raw) in &update.configs {
            if !self.leadership.is_leader() {
                clean = false;
                (update.apply_status)(key, ApplyStatus::Unacknowledged);
                continue;
            }
            match processor.process(received_at, key, raw).await {
                Ok(()) => (update.apply_status)(key, ApplyStatus::Acknowledged),
                Err(err) => {
                    clean = false;
                    warn!(key = %key, error = %err, "values batch rejected");
                    counter!("ingest_values_errors", 1u64);
                    (update.apply_status)(key, ApplyStatus::Error(err.to_string()));
                }
            }
        }
        processor.post_process(clean).await;
    }

    async fn process_settings_config(
        &self,
        received_at: DateTime<Utc>,
        key: &str,
        raw: &RawConfig,
    ) -> Result<(), IngestError> {
        let list: wire::SettingsList = serde_json::from_slice(&raw.data).map_err(|source| {
            IngestError::Deserialize {
                id: raw.id.clone(),
                version: raw.version,
                key: key.to_string(),
                source,
            }
        })?;

        for settings in &list.settings {
            if settings.namespace.is_empty() || settings.name.is_empty() {
                warn!(
                    config_id = %raw.id,
                    version = raw.version,
                    key,
                    namespace = %settings.namespace,
                    name = %settings.name,
                    "received invalid autoscaler identifier, discarding entry"
                );
                continue;
            }
            let id = object_id(&settings.namespace, &settings.name);
            let entry = self.store.lock_entry_or_create(&id).await;
            let autoscaler = match entry.cloned() {
                Some(mut existing) => {
                    existing.update_from_settings(settings.spec.clone(), raw.version, received_at);
                    existing
                }
                None => AutoscalerInternal::from_settings(
                    &settings.namespace,
                    &settings.name,
                    settings.spec.clone(),
                    raw.version,
                    received_at,
                ),
            };
            entry.commit(autoscaler, INGEST_WRITER);
            counter!("ingest_settings_applied", 1u64);
        }
        Ok(())
    }
}
