//! Values-stream processing: translate wire recommendations and apply them
//! to autoscalers that already exist.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::debug;

use skala_core::values::parse_scaling_values;
use skala_core::{object_id, wire};

use crate::{IngestError, RawConfig, SharedStore, INGEST_WRITER};

/// Per-update values applier. Tracks which autoscalers the update mentioned
/// so `post_process` can clear the rest.
pub(crate) struct ValuesProcessor<'a> {
    store: &'a SharedStore,
    processed: HashSet<String>,
}

impl<'a> ValuesProcessor<'a> {
    pub(crate) fn new(store: &'a SharedStore) -> Self {
        Self { store, processed: HashSet::new() }
    }

    /// Apply one values config. Translation failures are aggregated into one
    /// batch error; fields that parsed are committed anyway.
    pub(crate) async fn process(
        &mut self,
        received_at: DateTime<Utc>,
        key: &str,
        raw: &RawConfig,
    ) -> Result<(), IngestError> {
        let list: wire::WorkloadValuesList = serde_json::from_slice(&raw.data).map_err(|source| {
            IngestError::Deserialize {
                id: raw.id.clone(),
                version: raw.version,
                key: key.to_string(),
                source,
            }
        })?;

        let mut errors: Vec<String> = Vec::new();
        for values in &list.values {
            if let Err(err) = self.process_values(values, raw.version, received_at).await {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Values {
                id: raw.id.clone(),
                version: raw.version,
                key: key.to_string(),
                message: errors.join("; "),
            })
        }
    }

    async fn process_values(
        &mut self,
        values: &wire::WorkloadValues,
        version: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), String> {
        if values.namespace.is_empty() || values.name.is_empty() {
            // Should never happen, guard against invalid inputs.
            return Ok(());
        }

        let id = object_id(&values.namespace, &values.name);
        // Values never create autoscalers; creation belongs to the settings
        // stream and the object watch. Unknown targets are not an error.
        let Some(entry) = self.store.lock_entry(&id).await else {
            counter!("ingest_values_skipped", 1u64);
            debug!(autoscaler = %id, "values for unknown autoscaler, skipping");
            return Ok(());
        };
        let Some(mut autoscaler) = entry.cloned() else {
            return Ok(());
        };

        self.processed.insert(id.clone());

        // Explicit partial-commit policy: whatever translated cleanly is
        // applied and stamped, failed dimensions are reported to the batch.
        let (scaling_values, errors) = parse_scaling_values(values);
        autoscaler.update_from_values(scaling_values, version, timestamp);
        entry.commit(autoscaler, INGEST_WRITER);
        counter!("ingest_values_applied", 1u64);

        if errors.is_empty() {
            Ok(())
        } else {
            let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            Err(format!("failed to parse scaling values for autoscaler {id}: {joined}"))
        }
    }

    /// After a fully-clean update, autoscalers the stream no longer mentions
    /// lose their values. Any error (or a non-leader skip) keeps everything:
    /// absence in a bad batch is not evidence of removal.
    pub(crate) async fn post_process(self, clean: bool) {
        if !clean {
            return;
        }
        let Self { store, processed } = self;
        store
            .update(
                |autoscaler| {
                    if processed.contains(&autoscaler.id()) {
                        return false;
                    }
                    if autoscaler.scaling_values_version.is_none() {
                        return false;
                    }
                    autoscaler.remove_values();
                    true
                },
                INGEST_WRITER,
            )
            .await;
    }
}
