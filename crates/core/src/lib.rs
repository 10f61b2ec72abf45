//! Spindle core types: annotation stores, monikers, artifacts and manifests.

#![forbid(unsafe_code)]

pub mod names;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotation bag attached to a resource (or to its pod template).
pub type Annotations = BTreeMap<String, String>;

/// String-keyed attribute store backing the annotation protocol.
///
/// The codec only ever writes through [`AttributeStore::insert_if_absent`], which
/// is what gives annotation writes their first-writer-wins semantics.
pub trait AttributeStore {
    fn get(&self, key: &str) -> Option<&str>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert `value` only when `key` is absent. Returns whether the write happened.
    fn insert_if_absent(&mut self, key: &str, value: String) -> bool;

    fn remove(&mut self, key: &str) -> Option<String>;
}

impl AttributeStore for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }

    fn insert_if_absent(&mut self, key: &str, value: String) -> bool {
        match self.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        BTreeMap::remove(self, key)
    }
}

/// Canonical naming tuple assigned to every deployed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moniker {
    pub app: Option<String>,
    pub cluster: Option<String>,
    pub stack: Option<String>,
    pub detail: Option<String>,
    pub sequence: Option<i64>,
}

impl Moniker {
    pub fn for_app(app: impl Into<String>) -> Self {
        Self { app: Some(app.into()), ..Self::default() }
    }

    /// Application name, treating blank as absent.
    pub fn app_name(&self) -> Option<&str> {
        self.app.as_deref().filter(|a| !a.trim().is_empty())
    }
}

/// Artifact a deployed resource originated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
}

/// Read-time metadata; never stored verbatim in annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_configuration: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Resource kinds the protocol distinguishes; anything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    Pod,
    Service,
    Ingress,
    ConfigMap,
    Secret,
    ClusterRole,
    ClusterRoleBinding,
    Other(String),
}

impl ResourceKind {
    pub fn parse(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "deployment" => Self::Deployment,
            "replicaset" => Self::ReplicaSet,
            "statefulset" => Self::StatefulSet,
            "daemonset" => Self::DaemonSet,
            "job" => Self::Job,
            "pod" => Self::Pod,
            "service" => Self::Service,
            "ingress" => Self::Ingress,
            "configmap" => Self::ConfigMap,
            "secret" => Self::Secret,
            "clusterrole" => Self::ClusterRole,
            "clusterrolebinding" => Self::ClusterRoleBinding,
            _ => Self::Other(kind.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::ReplicaSet => "ReplicaSet",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::Pod => "Pod",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Other(k) => k.as_str(),
        }
    }
}

impl From<String> for ResourceKind {
    fn from(v: String) -> Self { Self::parse(&v) }
}

impl From<ResourceKind> for String {
    fn from(v: ResourceKind) -> Self { v.as_str().to_string() }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a manifest the annotation protocol reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
    /// `metadata.annotations`
    pub annotations: Annotations,
    /// `spec.template.metadata.annotations`, for kinds that embed a pod template.
    pub template_annotations: Option<Annotations>,
}

impl Manifest {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), namespace: None, annotations: Annotations::new(), template_annotations: None }
    }

    pub fn with_template(mut self) -> Self {
        self.template_annotations.get_or_insert_with(Annotations::new);
        self
    }

    /// Primary store first, then the template store when present.
    pub fn stores_mut(&mut self) -> impl Iterator<Item = &mut Annotations> {
        std::iter::once(&mut self.annotations).chain(self.template_annotations.as_mut())
    }
}

/// Errors raised by mutating annotation operations. Decode problems are never errors.
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("manifest already has {key} annotation set to {existing:?}; failed attempting to set it to {requested:?}")]
    Conflict { key: String, existing: Vec<String>, requested: Vec<String> },
    #[error("illegal annotation value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub mod prelude {
    pub use super::{Annotations, AnnotationError, Artifact, ArtifactMetadata, AttributeStore, Manifest, Moniker, ResourceKind};
    pub use super::names::{NameParser, ParsedName, ResourceAwareNames};
}
