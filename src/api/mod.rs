//! Control-plane access for RayJob and RayCluster resources.
//!
//! The orchestrator only talks to [`RayApi`]; [`KubeRayApi`] is the
//! Kubernetes-backed implementation used by the CLI.

pub mod kubernetes;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{ExecutionCluster, JobResource};

pub use kubernetes::KubeRayApi;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Kube(#[from] kube::Error),

    #[error("{kind} {name} has no name assigned")]
    Unnamed { kind: &'static str, name: String },

    #[error("head service for cluster {cluster} not found: {detail}")]
    HeadServiceNotFound { cluster: String, detail: String },

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait RayApi: Send + Sync {
    async fn create_job(&self, namespace: &str, job: &JobResource) -> Result<JobResource, ApiError>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<JobResource, ApiError>;

    async fn update_job(&self, namespace: &str, job: &JobResource) -> Result<JobResource, ApiError>;

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ExecutionCluster, ApiError>;

    /// Name of the Service fronting the head node of `cluster`.
    async fn head_service_name(&self, namespace: &str, cluster: &str) -> Result<String, ApiError>;
}
