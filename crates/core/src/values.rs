//! Scaling values: per-dimension recommendations applied to a target, plus
//! the translation from the wire payload shape.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire;

/// Where a recommendation came from. Manual wins over autoscaling when the
/// wire payload carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Autoscaling,
    Manual,
}

/// Resource name to quantity, quantities kept in Kubernetes string form.
pub type ResourceList = BTreeMap<String, String>;

/// Current target scaling values for one autoscaler. Either dimension may be
/// absent independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<HorizontalScalingValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<VerticalScalingValues>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalScalingValues {
    pub source: ValueSource,
    /// Desired number of replicas for the target.
    pub replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalScalingValues {
    pub source: ValueSource,
    pub container_resources: Vec<ContainerResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResources {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValuesError {
    #[error("horizontal replicas value is missing")]
    MissingReplicas,
    #[error("resource {0} is duplicated")]
    DuplicateResource(String),
    #[error("failed to parse resource {name} value {value:?}")]
    InvalidQuantity { name: String, value: String },
}

// Kubernetes quantity grammar: optional sign, decimal number, optional
// suffix (decimal SI, binary SI or decimal exponent).
static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?([0-9]+|[0-9]+\.[0-9]*|\.[0-9]+)(m|k|M|G|T|P|E|Ki|Mi|Gi|Ti|Pi|Ei|[eE][+-]?[0-9]+)?$")
        .expect("quantity regex")
});

/// Translate one wire values entry into internal scaling values.
///
/// Best effort per dimension: a dimension that fails to translate stays
/// unset and is reported in the returned errors while the other dimension
/// still applies. Within a dimension, manual data takes priority over auto
/// data.
pub fn parse_scaling_values(values: &wire::WorkloadValues) -> (ScalingValues, Vec<ValuesError>) {
    let mut out = ScalingValues::default();
    let mut errors = Vec::new();

    if let Some(horizontal) = &values.horizontal {
        let picked = horizontal
            .manual
            .as_ref()
            .map(|data| (data, ValueSource::Manual))
            .or_else(|| horizontal.auto.as_ref().map(|data| (data, ValueSource::Autoscaling)));
        if let Some((data, source)) = picked {
            match parse_horizontal(data, source) {
                Ok(parsed) => out.horizontal = Some(parsed),
                Err(err) => errors.push(err),
            }
        }
    }

    if let Some(vertical) = &values.vertical {
        let picked = vertical
            .manual
            .as_ref()
            .map(|data| (data, ValueSource::Manual))
            .or_else(|| vertical.auto.as_ref().map(|data| (data, ValueSource::Autoscaling)));
        if let Some((data, source)) = picked {
            match parse_vertical(data, source) {
                Ok(parsed) => out.vertical = Some(parsed),
                Err(err) => errors.push(err),
            }
        }
    }

    (out, errors)
}

fn parse_horizontal(
    data: &wire::WorkloadHorizontalData,
    source: ValueSource,
) -> Result<HorizontalScalingValues, ValuesError> {
    let replicas = data.replicas.ok_or(ValuesError::MissingReplicas)?;
    Ok(HorizontalScalingValues { source, replicas })
}

fn parse_vertical(
    data: &wire::WorkloadVerticalData,
    source: ValueSource,
) -> Result<VerticalScalingValues, ValuesError> {
    let mut container_resources = Vec::with_capacity(data.resources.len());
    for resources in &data.resources {
        container_resources.push(ContainerResources {
            name: resources.container_name.clone(),
            requests: parse_resource_list(&resources.requests)?,
            limits: parse_resource_list(&resources.limits)?,
        });
    }
    Ok(VerticalScalingValues { source, container_resources })
}

fn parse_resource_list(list: &[wire::WireResource]) -> Result<ResourceList, ValuesError> {
    let mut out = ResourceList::new();
    for resource in list {
        if out.contains_key(&resource.name) {
            return Err(ValuesError::DuplicateResource(resource.name.clone()));
        }
        if !QUANTITY.is_match(&resource.value) {
            return Err(ValuesError::InvalidQuantity {
                name: resource.name.clone(),
                value: resource.value.clone(),
            });
        }
        out.insert(resource.name.clone(), resource.value.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        WireContainerResources, WireResource, WorkloadHorizontalData, WorkloadHorizontalValues,
        WorkloadValues, WorkloadVerticalData, WorkloadVerticalValues,
    };

    fn horizontal(manual: Option<i32>, auto: Option<i32>) -> WorkloadHorizontalValues {
        WorkloadHorizontalValues {
            manual: manual.map(|replicas| WorkloadHorizontalData { replicas: Some(replicas) }),
            auto: auto.map(|replicas| WorkloadHorizontalData { replicas: Some(replicas) }),
        }
    }

    #[test]
    fn manual_overrides_auto() {
        let values = WorkloadValues {
            namespace: "ns".into(),
            name: "web".into(),
            horizontal: Some(horizontal(Some(2), Some(9))),
            vertical: None,
        };
        let (parsed, errors) = parse_scaling_values(&values);
        assert!(errors.is_empty());
        let h = parsed.horizontal.unwrap();
        assert_eq!(h.source, ValueSource::Manual);
        assert_eq!(h.replicas, 2);
    }

    #[test]
    fn auto_applies_when_no_manual() {
        let values = WorkloadValues {
            horizontal: Some(horizontal(None, Some(5))),
            ..Default::default()
        };
        let (parsed, errors) = parse_scaling_values(&values);
        assert!(errors.is_empty());
        assert_eq!(parsed.horizontal.unwrap().source, ValueSource::Autoscaling);
    }

    #[test]
    fn missing_replicas_is_an_error_and_leaves_dimension_unset() {
        let values = WorkloadValues {
            horizontal: Some(WorkloadHorizontalValues {
                manual: Some(WorkloadHorizontalData { replicas: None }),
                auto: None,
            }),
            ..Default::default()
        };
        let (parsed, errors) = parse_scaling_values(&values);
        assert!(parsed.horizontal.is_none());
        assert_eq!(errors, vec![ValuesError::MissingReplicas]);
    }

    #[test]
    fn one_failing_dimension_does_not_block_the_other() {
        let values = WorkloadValues {
            horizontal: Some(horizontal(None, Some(3))),
            vertical: Some(WorkloadVerticalValues {
                manual: Some(WorkloadVerticalData {
                    resources: vec![WireContainerResources {
                        container_name: "app".into(),
                        requests: vec![WireResource { name: "cpu".into(), value: "not-a-qty".into() }],
                        limits: vec![],
                    }],
                }),
                auto: None,
            }),
            ..Default::default()
        };
        let (parsed, errors) = parse_scaling_values(&values);
        assert_eq!(parsed.horizontal.unwrap().replicas, 3);
        assert!(parsed.vertical.is_none());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValuesError::InvalidQuantity { .. }));
    }

    #[test]
    fn duplicate_resource_is_rejected() {
        let list = vec![
            WireResource { name: "cpu".into(), value: "100m".into() },
            WireResource { name: "cpu".into(), value: "200m".into() },
        ];
        assert_eq!(
            parse_resource_list(&list),
            Err(ValuesError::DuplicateResource("cpu".into()))
        );
    }

    #[test]
    fn quantity_grammar() {
        for ok in ["1", "100m", "1.5", "100Mi", "2Gi", "1e3", "0.5", "+1", "-1", ".5"] {
            assert!(QUANTITY.is_match(ok), "{ok} should parse");
        }
        for bad in ["", "abc", "1x", "Mi", "1.2.3", "1 Gi"] {
            assert!(!QUANTITY.is_match(bad), "{bad} should not parse");
        }
    }
}
