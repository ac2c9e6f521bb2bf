//! Skala core types: autoscaler state, scaling values and wire schema.

#![forbid(unsafe_code)]

pub mod autoscaler;
pub mod spec;
pub mod status;
pub mod values;
pub mod wire;

pub use autoscaler::AutoscalerInternal;
pub use spec::{AutoscalerSpec, Constraints, Policy, SpecOwner, TargetRef, UpdateMode, UpdatePolicy};
pub use status::{
    AutoscalerStatus, Condition, ConditionStatus, ConditionType, HorizontalAction,
    HorizontalStatus, VerticalAction, VerticalStatus,
};
pub use values::{
    ContainerResources, HorizontalScalingValues, ResourceList, ScalingValues, ValueSource,
    ValuesError, VerticalScalingValues,
};

use std::fmt;

use thiserror::Error;

/// Composite identifier `namespace/name` used as the store key.
pub fn object_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("autoscaler has no spec")]
    NoSpec,
    #[error("failed to parse API version {0:?}")]
    InvalidApiVersion(String),
}

/// Resolved group/version/kind of a scale target.
///
/// Derived from `TargetRef` and cached on the autoscaler state; the cache is
/// dropped whenever the spec changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TargetGvk {
    /// Parse an `apiVersion` (`v1` or `group/v1`) plus a kind.
    pub fn parse(api_version: &str, kind: &str) -> Result<Self, TargetError> {
        let (group, version) = match api_version.split_once('/') {
            None => ("", api_version),
            Some((g, v)) if !g.is_empty() && !v.is_empty() && !v.contains('/') => (g, v),
            Some(_) => return Err(TargetError::InvalidApiVersion(api_version.to_string())),
        };
        if version.is_empty() || kind.is_empty() {
            return Err(TargetError::InvalidApiVersion(api_version.to_string()));
        }
        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        })
    }
}

impl fmt::Display for TargetGvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_core_group() {
        let gvk = TargetGvk::parse("v1", "Deployment").unwrap();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
        assert_eq!(gvk.to_string(), "v1/Deployment");
    }

    #[test]
    fn parse_named_group() {
        let gvk = TargetGvk::parse("apps/v1", "StatefulSet").unwrap();
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.to_string(), "apps/v1/StatefulSet");
    }

    #[test]
    fn parse_rejects_malformed_api_version() {
        assert!(TargetGvk::parse("apps/v1/extra", "Deployment").is_err());
        assert!(TargetGvk::parse("", "Deployment").is_err());
        assert!(TargetGvk::parse("apps/", "Deployment").is_err());
        assert!(TargetGvk::parse("v1", "").is_err());
    }
}
