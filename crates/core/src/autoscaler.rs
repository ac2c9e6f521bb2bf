//! In-memory state of one managed autoscaler and its field-scoped mutators.

use chrono::{DateTime, Utc};

use crate::spec::AutoscalerSpec;
use crate::status::{
    AutoscalerStatus, Condition, ConditionStatus, ConditionType, HorizontalAction,
    HorizontalStatus, VerticalAction, VerticalStatus,
};
use crate::values::{HorizontalScalingValues, ScalingValues, VerticalScalingValues};
use crate::{object_id, TargetError, TargetGvk};

/// Merged in-memory state of one autoscaler.
///
/// The mutators own disjoint field sets so the settings stream, the values
/// stream and the reconciler can interleave on the same entity without
/// clobbering each other's fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoscalerInternal {
    pub namespace: String,
    pub name: String,

    /// Desired behavior, absent until the first settings update or object
    /// load. Always owned by this state; never aliases decode buffers.
    pub spec: Option<AutoscalerSpec>,

    /// Settings lineage. Independent of the values lineage.
    pub settings_version: Option<u64>,
    pub settings_timestamp: Option<DateTime<Utc>>,

    /// Values lineage. Lower-than-stored versions are still applied:
    /// last-applied-wins within the stream.
    pub scaling_values: ScalingValues,
    pub scaling_values_version: Option<u64>,
    pub scaling_values_timestamp: Option<DateTime<Utc>>,

    /// Last replica count observed live from the cluster; distinct from the
    /// desired count carried in `scaling_values`.
    pub current_replicas: Option<i32>,

    pub horizontal_last_action: Option<HorizontalAction>,
    pub horizontal_last_error: Option<String>,
    pub vertical_last_action: Option<VerticalAction>,
    pub vertical_rollout_error: Option<String>,
    pub global_error: Option<String>,

    /// Soft-delete marker: excluded from reconciliation, entity stays in the
    /// store until hard removal.
    pub deleted: bool,

    // Resolved lazily from spec.target_ref; dropped whenever the spec
    // changes because it is derived data, not source of truth.
    target_gvk: Option<TargetGvk>,
}

impl AutoscalerInternal {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a fresh state from a settings-stream entry.
    pub fn from_settings(
        namespace: &str,
        name: &str,
        spec: AutoscalerSpec,
        version: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut state = Self::new(namespace, name);
        state.update_from_settings(spec, version, timestamp);
        state
    }

    /// Functional identifier, also the store key.
    pub fn id(&self) -> String {
        object_id(&self.namespace, &self.name)
    }

    /// Resolve the target group/version/kind, caching the result.
    pub fn target_gvk(&mut self) -> Result<TargetGvk, TargetError> {
        if let Some(gvk) = &self.target_gvk {
            return Ok(gvk.clone());
        }
        let spec = self.spec.as_ref().ok_or(TargetError::NoSpec)?;
        let gvk = TargetGvk::parse(&spec.target_ref.api_version, &spec.target_ref.kind)?;
        self.target_gvk = Some(gvk.clone());
        Ok(gvk)
    }

    /// Apply a settings-stream update. Owns `spec` and the settings lineage.
    pub fn update_from_settings(
        &mut self,
        mut spec: AutoscalerSpec,
        version: u64,
        timestamp: DateTime<Utc>,
    ) {
        spec.remote_version = Some(version);
        self.spec = Some(spec);
        self.settings_version = Some(version);
        self.settings_timestamp = Some(timestamp);
        // The target may have changed with the spec; resolution happens on
        // the next sync so errors surface there.
        self.target_gvk = None;
    }

    /// Apply a values-stream update. Owns the values lineage only.
    pub fn update_from_values(
        &mut self,
        values: ScalingValues,
        version: u64,
        timestamp: DateTime<Utc>,
    ) {
        self.scaling_values = values;
        self.scaling_values_version = Some(version);
        self.scaling_values_timestamp = Some(timestamp);
    }

    /// Clear the values lineage once a target stops being autoscaled.
    pub fn remove_values(&mut self) {
        self.scaling_values = ScalingValues::default();
        self.scaling_values_version = None;
        self.scaling_values_timestamp = None;
    }

    /// Bootstrap from a previously written status object. Expected to run at
    /// most once, before either live stream delivers.
    pub fn update_from_status(&mut self, status: &AutoscalerStatus) {
        if status.recommendations_version.is_some() {
            self.scaling_values_version = status.recommendations_version;
            self.scaling_values_timestamp = status.update_time;
        } else {
            self.scaling_values_version = None;
            self.scaling_values_timestamp = None;
        }

        self.current_replicas = status.current_replicas;

        self.scaling_values.horizontal = status.horizontal.as_ref().map(|h| HorizontalScalingValues {
            source: h.source,
            replicas: h.desired_replicas,
        });
        self.horizontal_last_action = status.horizontal.as_ref().and_then(|h| h.last_action.clone());

        self.scaling_values.vertical = status.vertical.as_ref().map(|v| VerticalScalingValues {
            source: v.source,
            container_resources: v.desired_resources.clone(),
        });
        self.vertical_last_action = status.vertical.as_ref().and_then(|v| v.last_action.clone());

        // Errors are recovered from conditions; only the reason survives.
        self.global_error = None;
        self.horizontal_last_error = None;
        self.vertical_rollout_error = None;
        for condition in &status.conditions {
            match (&condition.condition_type, condition.status) {
                (ConditionType::Error, ConditionStatus::True) => {
                    self.global_error = Some(condition.reason.clone());
                }
                (ConditionType::HorizontalAbleToScale, ConditionStatus::False) => {
                    self.horizontal_last_error = Some(condition.reason.clone());
                }
                (ConditionType::VerticalAbleToRollout, ConditionStatus::False) => {
                    self.vertical_rollout_error = Some(condition.reason.clone());
                }
                _ => {}
            }
        }
    }

    /// Derive the externally-visible status snapshot. Pure.
    ///
    /// Transition times are carried over from `current` unless the condition
    /// outcome changed; unmanaged condition types are passed through.
    pub fn build_status(
        &self,
        now: DateTime<Utc>,
        current: Option<&AutoscalerStatus>,
    ) -> AutoscalerStatus {
        let mut status = AutoscalerStatus::default();

        if let Some(version) = self.scaling_values_version {
            status.recommendations_version = Some(version);
            status.update_time = self.scaling_values_timestamp;
        }
        status.current_replicas = self.current_replicas;

        if let Some(horizontal) = &self.scaling_values.horizontal {
            status.horizontal = Some(HorizontalStatus {
                source: horizontal.source,
                desired_replicas: horizontal.replicas,
                last_action: self.horizontal_last_action.clone(),
            });
        }
        if let Some(vertical) = &self.scaling_values.vertical {
            status.vertical = Some(VerticalStatus {
                source: vertical.source,
                desired_resources: vertical.container_resources.clone(),
                last_action: self.vertical_last_action.clone(),
            });
        }

        let previous = |ty: &ConditionType| {
            current.and_then(|c| c.conditions.iter().find(|cond| &cond.condition_type == ty))
        };

        let (error_status, error_reason) = match &self.global_error {
            Some(err) => (ConditionStatus::True, err.clone()),
            None => (ConditionStatus::False, String::new()),
        };
        let (scale_status, scale_reason) =
            match (&self.horizontal_last_error, &self.horizontal_last_action) {
                (Some(err), _) => (ConditionStatus::False, err.clone()),
                (None, Some(_)) => (ConditionStatus::True, String::new()),
                (None, None) => (ConditionStatus::Unknown, String::new()),
            };
        let (rollout_status, rollout_reason) =
            match (&self.vertical_rollout_error, &self.vertical_last_action) {
                (Some(err), _) => (ConditionStatus::False, err.clone()),
                (None, Some(_)) => (ConditionStatus::True, String::new()),
                (None, None) => (ConditionStatus::Unknown, String::new()),
            };

        status.conditions = vec![
            new_condition(ConditionType::Error, error_status, error_reason, now, previous(&ConditionType::Error)),
            new_condition(
                ConditionType::HorizontalAbleToScale,
                scale_status,
                scale_reason,
                now,
                previous(&ConditionType::HorizontalAbleToScale),
            ),
            new_condition(
                ConditionType::VerticalAbleToRollout,
                rollout_status,
                rollout_reason,
                now,
                previous(&ConditionType::VerticalAbleToRollout),
            ),
        ];
        if let Some(current) = current {
            status.conditions.extend(
                current
                    .conditions
                    .iter()
                    .filter(|condition| !condition.condition_type.is_managed())
                    .cloned(),
            );
        }

        status
    }
}

fn new_condition(
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: String,
    now: DateTime<Utc>,
    previous: Option<&Condition>,
) -> Condition {
    let last_transition_time = match previous {
        Some(prev) if prev.status == status => prev.last_transition_time,
        _ => now,
    };
    Condition { condition_type, status, reason, last_transition_time }
}
