use kube::api::DynamicObject;
use serde_json::Value;

/// Readiness of a RayCluster as far as its status tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterReadiness {
    Ready,
    /// `status.state` present but not `ready`
    NotReady(String),
    /// Neither a Ready condition nor a state string is present
    Undetermined,
}

impl std::fmt::Display for ClusterReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterReadiness::Ready => write!(f, "ready"),
            ClusterReadiness::NotReady(state) => write!(f, "cluster state is {:?}", state),
            ClusterReadiness::Undetermined => write!(f, "cannot determine cluster state"),
        }
    }
}

/// A RayCluster as a generic object. Read-only here.
#[derive(Debug, Clone)]
pub struct ExecutionCluster(DynamicObject);

impl ExecutionCluster {
    pub fn new(object: DynamicObject) -> Self {
        Self(object)
    }

    fn status(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.data.get("status")?.as_object()
    }

    /// Ready if a `Ready` condition is `True` or `status.state` is `ready`.
    pub fn readiness(&self) -> ClusterReadiness {
        let Some(status) = self.status() else {
            return ClusterReadiness::Undetermined;
        };

        let condition_ready = status
            .get("conditions")
            .and_then(Value::as_array)
            .map_or(false, |conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(Value::as_str) == Some("Ready")
                        && c.get("status").and_then(Value::as_str) == Some("True")
                })
            });
        let state = status.get("state").and_then(Value::as_str);

        if condition_ready || state == Some("ready") {
            ClusterReadiness::Ready
        } else if let Some(state) = state {
            ClusterReadiness::NotReady(state.to_string())
        } else {
            ClusterReadiness::Undetermined
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == ClusterReadiness::Ready
    }

    /// Head service name when the operator publishes it in `status.head`.
    pub fn head_service_name(&self) -> Option<&str> {
        self.status()?
            .get("head")?
            .get("serviceName")?
            .as_str()
            .filter(|name| !name.is_empty())
    }
}
