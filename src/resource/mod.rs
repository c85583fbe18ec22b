//! Typed views over the generic RayJob and RayCluster objects.
//!
//! Both resources are carried as [`DynamicObject`](kube::api::DynamicObject)s
//! so fields this tool does not know about survive a read-modify-write cycle.

pub mod cluster;
pub mod job;

pub use cluster::{ClusterReadiness, ExecutionCluster};
pub use job::{ClusterRef, JobResource, SubmissionMode};
