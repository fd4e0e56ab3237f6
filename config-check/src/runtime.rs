use async_trait::async_trait;
use operator_common::kube::{ApiResource, KubeClient};
use operator_common::store::StoreError;
use serde_json::Value;

use crate::error::RuntimeError;

/// Object kinds a config check creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckObject {
    ServiceAccount,
    Secret,
    Pod,
}

impl CheckObject {
    pub fn api_resource(&self) -> ApiResource {
        match self {
            CheckObject::ServiceAccount => ApiResource::SERVICE_ACCOUNT,
            CheckObject::Secret => ApiResource::SECRET,
            CheckObject::Pod => ApiResource::POD,
        }
    }

    pub fn all() -> [CheckObject; 3] {
        [
            CheckObject::Pod,
            CheckObject::Secret,
            CheckObject::ServiceAccount,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Whatever runs check workloads. Creating an object that already exists is
/// not an error for service accounts; deleting a missing object never is.
#[async_trait]
pub trait CheckRuntime: Send + Sync {
    async fn create(&self, object: CheckObject, manifest: &Value) -> Result<(), RuntimeError>;

    async fn delete(
        &self,
        object: CheckObject,
        namespace: &str,
        name: &str,
    ) -> Result<(), RuntimeError>;

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<PodPhase, RuntimeError>;

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: u32,
    ) -> Result<String, RuntimeError>;
}

#[derive(Clone)]
pub struct KubeCheckRuntime {
    client: KubeClient,
}

impl KubeCheckRuntime {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CheckRuntime for KubeCheckRuntime {
    async fn create(&self, object: CheckObject, manifest: &Value) -> Result<(), RuntimeError> {
        let namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .ok_or(RuntimeError::Manifest {
                what: "check",
                field: "metadata.namespace",
            })?;
        let path = object.api_resource().collection_path(Some(namespace));

        match self.client.create(&path, manifest).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict(_)) if object == CheckObject::ServiceAccount => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        object: CheckObject,
        namespace: &str,
        name: &str,
    ) -> Result<(), RuntimeError> {
        let path = object.api_resource().object_path(Some(namespace), name);
        self.client.delete(&path).await?;
        Ok(())
    }

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<PodPhase, RuntimeError> {
        let path = ApiResource::POD.object_path(Some(namespace), name);
        let pod: Value = self
            .client
            .get(&path)
            .await?
            .ok_or(StoreError::NotFound(path))?;

        Ok(pod
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .map(PodPhase::parse)
            .unwrap_or(PodPhase::Pending))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: u32,
    ) -> Result<String, RuntimeError> {
        let path = format!("{}/log", ApiResource::POD.object_path(Some(namespace), name));
        let tail_lines = tail_lines.to_string();
        Ok(self
            .client
            .get_text(&path, &[("tailLines", tail_lines.as_str())])
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_phases_do_not_end_the_check() {
        assert_eq!(PodPhase::parse("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::parse("Failed"), PodPhase::Failed);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn objects_map_to_core_collections() {
        assert_eq!(
            CheckObject::Pod
                .api_resource()
                .object_path(Some("vector"), "configcheck-a-bcdef"),
            "/api/v1/namespaces/vector/pods/configcheck-a-bcdef"
        );
        assert_eq!(
            CheckObject::ServiceAccount
                .api_resource()
                .collection_path(Some("vector")),
            "/api/v1/namespaces/vector/serviceaccounts"
        );
    }
}
