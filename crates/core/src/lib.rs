//! kawait core types: resolved types, watched objects, conditions and the
//! object source seam the store consumes.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod ident;
pub mod ready;
pub mod source;

pub use ident::{parse, Target, DEFAULT_NAMESPACE};
pub use ready::{evaluate, ReadinessVerdict, PRIORITY};
pub use source::{EventStream, ObjectSource, SourceEvent};

/// Fully-qualified resource type: one server-side collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedType {
    /// API group, empty for the core group.
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
}

impl ResolvedType {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// `apps/v1` style apiVersion, or just the version for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Anything other than exactly `True` or `False` reads as `Unknown`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self { type_: type_.into(), status, reason: None, message: None }
    }
}

pub type Conditions = SmallVec<[Condition; 4]>;

/// Cached snapshot of one server object, reduced to what readiness needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedObject {
    pub namespace: Option<String>,
    pub name: String,
    pub resource_version: Option<String>,
    /// `None` when the object has no `status.conditions` list at all.
    pub conditions: Option<Conditions>,
}

impl WatchedObject {
    /// Reduce a raw JSON object. Returns `None` when `metadata.name` is missing.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        let meta = v.get("metadata")?;
        let name = meta.get("name").and_then(|v| v.as_str())?.to_string();
        let namespace = meta.get("namespace").and_then(|v| v.as_str()).map(|s| s.to_string());
        let resource_version = meta.get("resourceVersion").and_then(|v| v.as_str()).map(|s| s.to_string());
        let conditions = conditions_from_status(v.get("status"));
        Some(Self { namespace, name, resource_version, conditions })
    }

    pub fn has_conditions(&self) -> bool {
        self.conditions.is_some()
    }
}

/// Read `conditions` out of a `status` stanza. Entries without a `type` are
/// dropped; `None` means there is no conditions list at all.
pub fn conditions_from_status(status: Option<&serde_json::Value>) -> Option<Conditions> {
    status
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .map(|arr| arr.iter().filter_map(condition_from_json).collect())
}

fn condition_from_json(v: &serde_json::Value) -> Option<Condition> {
    let type_ = v.get("type").and_then(|t| t.as_str())?.to_string();
    let status = v
        .get("status")
        .and_then(|s| s.as_str())
        .map(ConditionStatus::from_str_lossy)
        .unwrap_or(ConditionStatus::Unknown);
    let reason = v.get("reason").and_then(|s| s.as_str()).map(|s| s.to_string());
    let message = v.get("message").and_then(|s| s.as_str()).map(|s| s.to_string());
    Some(Condition { type_, status, reason, message })
}

/// Anything that exposes a generic status conditions list.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    /// First condition of the given type; later duplicates are ignored.
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }
}

impl Conditioned for WatchedObject {
    fn conditions(&self) -> &[Condition] {
        self.conditions.as_deref().unwrap_or(&[])
    }
}

impl Conditioned for [Condition] {
    fn conditions(&self) -> &[Condition] {
        self
    }
}

impl Conditioned for Vec<Condition> {
    fn conditions(&self) -> &[Condition] {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("malformed identifier {input:?}: {reason}")]
    MalformedIdentifier { input: String, reason: &'static str },
}

pub mod prelude {
    pub use super::{
        Condition, ConditionStatus, Conditioned, Conditions, CoreError, ObjectSource, ReadinessVerdict,
        ResolvedType, SourceEvent, Target, WatchedObject,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_reads_metadata_and_conditions() {
        let v = serde_json::json!({
            "metadata": { "name": "coredns", "namespace": "kube-system", "resourceVersion": "42" },
            "status": { "conditions": [
                { "type": "Available", "status": "True" },
                { "type": "Ready", "status": "False", "reason": "Scaling" },
                { "status": "True" },
                { "type": "Progressing", "status": "Maybe" }
            ]}
        });
        let o = WatchedObject::from_json(&v).unwrap();
        assert_eq!(o.name, "coredns");
        assert_eq!(o.namespace.as_deref(), Some("kube-system"));
        assert_eq!(o.resource_version.as_deref(), Some("42"));
        let conds = o.conditions.as_ref().unwrap();
        // entry without a type is dropped
        assert_eq!(conds.len(), 3);
        assert_eq!(conds[1].reason.as_deref(), Some("Scaling"));
        assert_eq!(conds[2].status, ConditionStatus::Unknown);
    }

    #[test]
    fn from_json_without_status_has_no_conditions() {
        let v = serde_json::json!({ "metadata": { "name": "cm" } });
        let o = WatchedObject::from_json(&v).unwrap();
        assert!(!o.has_conditions());
        assert!(o.conditions().is_empty());
        assert!(WatchedObject::from_json(&serde_json::json!({ "metadata": {} })).is_none());
    }

    #[test]
    fn resolved_type_display() {
        assert_eq!(ResolvedType::new("apps", "v1", "deployments").to_string(), "apps/v1/deployments");
        assert_eq!(ResolvedType::new("", "v1", "pods").to_string(), "v1/pods");
    }
}
