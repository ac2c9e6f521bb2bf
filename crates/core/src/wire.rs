//! Wire schema of the settings and values payloads.
//!
//! Structured variant: entries carry `namespace`/`name` directly and each
//! scaling dimension distinguishes `manual` and `auto` sub-sources. Manual
//! data wins over auto data when both are present for a dimension.

use serde::{Deserialize, Serialize};

use crate::spec::AutoscalerSpec;

/// Settings payload: full desired specs, one entry per autoscaler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsList {
    #[serde(default)]
    pub settings: Vec<AutoscalerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerSettings {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    pub spec: AutoscalerSpec,
}

/// Values payload: computed scaling recommendations, one entry per
/// autoscaler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadValuesList {
    #[serde(default)]
    pub values: Vec<WorkloadValues>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadValues {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<WorkloadHorizontalValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<WorkloadVerticalValues>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadHorizontalValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<WorkloadHorizontalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<WorkloadHorizontalData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadHorizontalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadVerticalValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<WorkloadVerticalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<WorkloadVerticalData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadVerticalData {
    #[serde(default)]
    pub resources: Vec<WireContainerResources>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContainerResources {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub requests: Vec<WireResource>,
    #[serde(default)]
    pub limits: Vec<WireResource>,
}

/// One `name`/`value` resource pair, quantity in Kubernetes string form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireResource {
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_payload_decodes() {
        let raw = r#"{
            "values": [
                {
                    "namespace": "ns",
                    "name": "web",
                    "horizontal": {"auto": {"replicas": 4}},
                    "vertical": {"manual": {"resources": [
                        {"containerName": "app",
                         "requests": [{"name": "cpu", "value": "100m"}],
                         "limits": [{"name": "cpu", "value": "200m"}]}
                    ]}}
                }
            ]
        }"#;
        let list: WorkloadValuesList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.values.len(), 1);
        let entry = &list.values[0];
        assert_eq!(entry.horizontal.as_ref().unwrap().auto.as_ref().unwrap().replicas, Some(4));
        let vertical = entry.vertical.as_ref().unwrap().manual.as_ref().unwrap();
        assert_eq!(vertical.resources[0].container_name, "app");
    }

    #[test]
    fn empty_payload_decodes_to_empty_lists() {
        let settings: SettingsList = serde_json::from_str("{}").unwrap();
        assert!(settings.settings.is_empty());
        let values: WorkloadValuesList = serde_json::from_str("{}").unwrap();
        assert!(values.values.is_empty());
    }
}
