//! Desired-behavior specification of one autoscaler, as pushed over the
//! settings stream or read from the in-cluster object.

use serde::{Deserialize, Serialize};

/// Who owns the autoscaler object: created in-cluster or pushed remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecOwner {
    #[default]
    Local,
    Remote,
}

/// Reference to the workload whose scale subresource is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Replica bounds applied before any scale write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default)]
    pub mode: UpdateMode,
}

/// Policy knobs carried with the spec. Only `constraints` feeds the
/// horizontal path today; the rest rides along for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdatePolicy>,
}

/// Full desired-behavior specification of one autoscaler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    #[serde(default)]
    pub owner: SpecOwner,

    /// Version stamped by the settings stream; absent for locally-owned
    /// objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,

    pub target_ref: TargetRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}
