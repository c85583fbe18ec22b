use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::{Client, ResourceExt};

use super::{ApiError, RayApi};
use crate::resource::{ExecutionCluster, JobResource};

const RAY_GROUP: &str = "ray.io";
const RAY_VERSION: &str = "v1";

/// [`RayApi`] backed by a Kubernetes client.
#[derive(Clone)]
pub struct KubeRayApi {
    client: Client,
    rayjobs: ApiResource,
    rayclusters: ApiResource,
}

impl KubeRayApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            rayjobs: ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(RAY_GROUP, RAY_VERSION, "RayJob"),
                "rayjobs",
            ),
            rayclusters: ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(RAY_GROUP, RAY_VERSION, "RayCluster"),
                "rayclusters",
            ),
        }
    }

    fn jobs(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.rayjobs)
    }

    fn clusters(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.rayclusters)
    }
}

#[async_trait]
impl RayApi for KubeRayApi {
    async fn create_job(&self, namespace: &str, job: &JobResource) -> Result<JobResource, ApiError> {
        let created = self
            .jobs(namespace)
            .create(&PostParams::default(), job.object())
            .await?;
        Ok(JobResource::new(created))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<JobResource, ApiError> {
        Ok(JobResource::new(self.jobs(namespace).get(name).await?))
    }

    async fn update_job(&self, namespace: &str, job: &JobResource) -> Result<JobResource, ApiError> {
        let name = job.name().ok_or_else(|| ApiError::Unnamed {
            kind: "RayJob",
            name: job.display_name(),
        })?;
        let updated = self
            .jobs(namespace)
            .replace(name, &PostParams::default(), job.object())
            .await?;
        Ok(JobResource::new(updated))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ExecutionCluster, ApiError> {
        Ok(ExecutionCluster::new(self.clusters(namespace).get(name).await?))
    }

    async fn head_service_name(&self, namespace: &str, cluster: &str) -> Result<String, ApiError> {
        let raycluster = self.get_cluster(namespace, cluster).await?;
        if let Some(name) = raycluster.head_service_name() {
            return Ok(name.to_string());
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("ray.io/cluster={},ray.io/node-type=head", cluster);
        let list = services
            .list(&ListParams::default().labels(&selector))
            .await?;

        match list.items.as_slice() {
            [svc] => Ok(svc.name_any()),
            [] => Err(ApiError::HeadServiceNotFound {
                cluster: cluster.to_string(),
                detail: format!("no service matches {}", selector),
            }),
            many => Err(ApiError::HeadServiceNotFound {
                cluster: cluster.to_string(),
                detail: format!("{} services match {}", many.len(), selector),
            }),
        }
    }
}
