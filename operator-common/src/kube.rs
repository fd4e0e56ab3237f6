//! Minimal Kubernetes REST client: typed reads, whole-object writes and the
//! `ResourceStore` implementation over the operator's custom resources.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::resources::{
    AnyPipeline, ClusterVectorPipeline, Fragment, Instance, InstanceKey, InstanceKind,
    PipelineKey, PipelineKind, VectorPipeline, API_GROUP, API_VERSION,
};
use crate::store::{ResourceStore, StoreError};

pub const DEFAULT_API_URL: &str = "https://kubernetes.default.svc";
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const DEFAULT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Addressing for one resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiResource {
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

impl ApiResource {
    pub const POD: ApiResource = ApiResource::core("pods");
    pub const SECRET: ApiResource = ApiResource::core("secrets");
    pub const SERVICE: ApiResource = ApiResource::core("services");
    pub const SERVICE_ACCOUNT: ApiResource = ApiResource::core("serviceaccounts");

    pub const fn core(plural: &'static str) -> Self {
        ApiResource {
            group: "",
            version: "v1",
            plural,
        }
    }

    pub const fn custom(plural: &'static str) -> Self {
        ApiResource {
            group: API_GROUP,
            version: API_VERSION,
            plural,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Collection path; `None` lists across all namespaces (or addresses a
    /// cluster-scoped resource).
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        let base = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        match namespace {
            Some(namespace) => format!("{base}/namespaces/{namespace}/{}", self.plural),
            None => format!("{base}/{}", self.plural),
        }
    }

    pub fn object_path(&self, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_tls: bool,
    pub timeout: Duration,
}

impl KubeConfig {
    /// Credentials mounted into every pod by its service account.
    pub fn in_cluster(
        api_url: &str,
        token_path: &str,
        ca_path: &str,
        insecure_tls: bool,
    ) -> Result<Self, StoreError> {
        let token = std::fs::read_to_string(token_path)
            .map_err(|e| StoreError::Config(format!("failed to read token {token_path}: {e}")))?;
        let ca_pem = std::fs::read(ca_path).ok();

        Ok(Self {
            api_url: api_url.to_owned(),
            token: Some(token.trim().to_owned()),
            ca_pem,
            insecure_tls,
            timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> Result<Self, StoreError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(pem) = &config.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if config.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let base = Url::parse(&config.api_url)
            .map_err(|e| StoreError::Config(format!("invalid API url {}: {e}", config.api_url)))?;

        Ok(Self {
            client: builder.build()?,
            base,
            token: config.token,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response, StoreError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| StoreError::Config(format!("invalid path {path}: {e}")))?;

        let mut request = self.client.request(method.clone(), url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let labels = [
            ("verb", method.to_string()),
            ("status", response.status().as_u16().to_string()),
        ];
        metrics::counter!("kube_requests_total", &labels).increment(1);
        debug!(%method, path, status = response.status().as_u16(), "kube request");

        Ok(response)
    }

    async fn into_error(path: &str, response: Response) -> StoreError {
        let status = response.status();
        match status {
            StatusCode::CONFLICT => StoreError::Conflict(path.to_owned()),
            StatusCode::NOT_FOUND => StoreError::NotFound(path.to_owned()),
            _ => StoreError::Status {
                status: status.as_u16(),
                path: path.to_owned(),
                message: response.text().await.unwrap_or_default(),
            },
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        let response = self.send(Method::GET, path, &[], None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::decode(path, e))
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<T>, StoreError> {
        let query: Vec<(&str, &str)> = label_selector
            .map(|selector| vec![("labelSelector", selector)])
            .unwrap_or_default();
        let response = self.send(Method::GET, path, &query, None).await?;
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        let bytes = response.bytes().await?;
        let list: ObjectList<T> =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::decode(path, e))?;
        Ok(list.items)
    }

    pub async fn create(&self, path: &str, body: &Value) -> Result<(), StoreError> {
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        Ok(())
    }

    pub async fn replace(&self, path: &str, body: &Value) -> Result<(), StoreError> {
        let response = self.send(Method::PUT, path, &[], Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        Ok(())
    }

    /// Returns `false` when the object was already gone.
    pub async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let response = self.send(Method::DELETE, path, &[], None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        Ok(true)
    }

    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, StoreError> {
        let response = self.send(Method::GET, path, query, None).await?;
        if !response.status().is_success() {
            return Err(Self::into_error(path, response).await);
        }
        Ok(response.text().await?)
    }

    /// Create `body` under `collection`, or replace the existing object named
    /// `name` at the version it was just read at.
    pub async fn upsert(
        &self,
        collection: &str,
        name: &str,
        mut body: Value,
    ) -> Result<(), StoreError> {
        let path = format!("{collection}/{name}");
        let existing: Option<Value> = self.get(&path).await?;

        match existing {
            None => self.create(collection, &body).await,
            Some(existing) => {
                if let (Some(version), Some(metadata)) = (
                    existing.pointer("/metadata/resourceVersion").cloned(),
                    body.get_mut("metadata").and_then(Value::as_object_mut),
                ) {
                    metadata.insert("resourceVersion".to_owned(), version);
                }
                self.replace(&path, &body).await
            }
        }
    }

    fn pipeline_path(key: &PipelineKey) -> String {
        ApiResource::custom(key.kind.plural()).object_path(key.namespace.as_deref(), &key.name)
    }

    fn instance_path(key: &InstanceKey) -> String {
        ApiResource::custom(key.kind.plural()).object_path(key.namespace.as_deref(), &key.name)
    }
}

#[async_trait]
impl ResourceStore for KubeClient {
    async fn list_pipelines(&self) -> Result<Vec<AnyPipeline>, StoreError> {
        let namespaced: Vec<VectorPipeline> = self
            .list(
                &ApiResource::custom(PipelineKind::Namespaced.plural()).collection_path(None),
                None,
            )
            .await?;
        let cluster: Vec<ClusterVectorPipeline> = self
            .list(
                &ApiResource::custom(PipelineKind::Cluster.plural()).collection_path(None),
                None,
            )
            .await?;

        Ok(namespaced
            .into_iter()
            .map(AnyPipeline::from)
            .chain(cluster.into_iter().map(AnyPipeline::from))
            .collect())
    }

    async fn get_pipeline(&self, key: &PipelineKey) -> Result<Option<AnyPipeline>, StoreError> {
        let path = Self::pipeline_path(key);
        Ok(match key.kind {
            PipelineKind::Namespaced => self
                .get::<VectorPipeline>(&path)
                .await?
                .map(AnyPipeline::from),
            PipelineKind::Cluster => self
                .get::<ClusterVectorPipeline>(&path)
                .await?
                .map(AnyPipeline::from),
        })
    }

    async fn update_pipeline_status(&self, pipeline: &AnyPipeline) -> Result<(), StoreError> {
        let path = format!("{}/status", Self::pipeline_path(&pipeline.key()));
        let body = pipeline
            .to_object()
            .map_err(|e| StoreError::decode(&path, e))?;
        self.replace(&path, &body).await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        let mut instances = Vec::new();
        for kind in InstanceKind::all() {
            let path = ApiResource::custom(kind.plural()).collection_path(None);
            let items: Vec<Instance> = self.list(&path, None).await?;
            instances.extend(items.into_iter().map(|mut instance| {
                instance.kind = kind;
                instance
            }));
        }
        Ok(instances)
    }

    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<Instance>, StoreError> {
        let instance: Option<Instance> = self.get(&Self::instance_path(key)).await?;
        Ok(instance.map(|mut instance| {
            instance.kind = key.kind;
            instance
        }))
    }

    async fn update_instance_status(&self, instance: &Instance) -> Result<(), StoreError> {
        let path = format!("{}/status", Self::instance_path(&instance.key()));
        let body = instance
            .to_object()
            .map_err(|e| StoreError::decode(&path, e))?;
        self.replace(&path, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_core_and_custom_paths() {
        assert_eq!(
            ApiResource::POD.object_path(Some("ns1"), "check"),
            "/api/v1/namespaces/ns1/pods/check"
        );
        assert_eq!(
            ApiResource::custom("clustervectorpipelines").object_path(None, "p"),
            "/apis/observability.kaasops.io/v1alpha1/clustervectorpipelines/p"
        );
        assert_eq!(ApiResource::SECRET.api_version(), "v1");
        assert_eq!(
            ApiResource::custom("vectors").api_version(),
            "observability.kaasops.io/v1alpha1"
        );
    }
}
