use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use crate::config::SUBMISSION_ID_ANNOTATION;

/// Value of `spec.submissionMode` as written in the resource file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Key absent
    Missing,
    /// Key present but null
    Null,
    Value(String),
}

/// Backing cluster reference read from `status.rayClusterName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterRef {
    /// The control plane has not written a status yet
    Unpopulated,
    /// Status exists but carries no usable cluster name
    Missing,
    Named(String),
}

/// A RayJob as a generic object.
#[derive(Debug, Clone)]
pub struct JobResource(DynamicObject);

impl JobResource {
    pub fn new(object: DynamicObject) -> Self {
        Self(object)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content).map(Self)
    }

    pub fn object(&self) -> &DynamicObject {
        &self.0
    }

    /// Name assigned by the control plane (or given in the file).
    pub fn name(&self) -> Option<&str> {
        self.0.metadata.name.as_deref()
    }

    /// Name for messages; falls back to `generateName` for unsubmitted objects.
    pub fn display_name(&self) -> String {
        self.0
            .metadata
            .name
            .clone()
            .or_else(|| self.0.metadata.generate_name.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn field(&self, section: &str, key: &str) -> Option<&Value> {
        self.0.data.get(section)?.as_object()?.get(key)
    }

    pub fn has_spec(&self) -> bool {
        self.0.data.get("spec").map_or(false, Value::is_object)
    }

    pub fn submission_mode(&self) -> SubmissionMode {
        match self.field("spec", "submissionMode") {
            None => SubmissionMode::Missing,
            Some(Value::Null) => SubmissionMode::Null,
            Some(Value::String(mode)) => SubmissionMode::Value(mode.clone()),
            Some(other) => SubmissionMode::Value(other.to_string()),
        }
    }

    /// Inline runtime environment (`spec.runtimeEnvYAML`).
    pub fn runtime_env_yaml(&self) -> Option<&str> {
        self.field("spec", "runtimeEnvYAML")?.as_str()
    }

    pub fn cluster_ref(&self) -> ClusterRef {
        match self.0.data.get("status") {
            None | Some(Value::Null) => ClusterRef::Unpopulated,
            Some(_) => match self.field("status", "rayClusterName").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => ClusterRef::Named(name.to_string()),
                _ => ClusterRef::Missing,
            },
        }
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        self.0.annotations()
    }

    pub fn submission_id(&self) -> Option<&str> {
        self.annotations()
            .get(SUBMISSION_ID_ANNOTATION)
            .map(String::as_str)
    }

    /// Record the Ray submission id, keeping every other annotation.
    pub fn set_submission_id(&mut self, id: &str) {
        self.0
            .annotations_mut()
            .insert(SUBMISSION_ID_ANNOTATION.to_string(), id.to_string());
    }
}
