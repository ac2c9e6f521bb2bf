//! Externally-visible status snapshot and conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::values::{ContainerResources, ValueSource};

/// Condition types. The three managed types are produced by this controller;
/// any other type found on an existing status is carried over untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    Error,
    HorizontalAbleToScale,
    VerticalAbleToRollout,
    Other(String),
}

impl ConditionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Error => "Error",
            Self::HorizontalAbleToScale => "HorizontalAbleToScale",
            Self::VerticalAbleToRollout => "VerticalAbleToRollout",
            Self::Other(other) => other,
        }
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ConditionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Error" => Self::Error,
            "HorizontalAbleToScale" => Self::HorizontalAbleToScale,
            "VerticalAbleToRollout" => Self::VerticalAbleToRollout,
            _ => Self::Other(value),
        }
    }
}

impl From<ConditionType> for String {
    fn from(value: ConditionType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Record of the last successful horizontal scale write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalAction {
    pub time: DateTime<Utc>,
    pub from_replicas: i32,
    pub to_replicas: i32,
}

/// Record of the last vertical rollout trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalAction {
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalStatus {
    pub source: ValueSource,
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<HorizontalAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalStatus {
    pub source: ValueSource,
    pub desired_resources: Vec<ContainerResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<VerticalAction>,
}

/// Status snapshot derived from the internal state by `build_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<HorizontalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<VerticalStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_type_roundtrips_through_strings() {
        for (ty, s) in [
            (ConditionType::Error, "Error"),
            (ConditionType::HorizontalAbleToScale, "HorizontalAbleToScale"),
            (ConditionType::Other("Custom".into()), "Custom"),
        ] {
            assert_eq!(ty.as_str(), s);
            assert_eq!(ConditionType::from(s.to_string()), ty);
        }
        assert!(!ConditionType::Other("Custom".into()).is_managed());
        assert!(ConditionType::Error.is_managed());
    }
}
