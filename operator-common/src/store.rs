use async_trait::async_trait;
use thiserror::Error;

use crate::resources::{AnyPipeline, Instance, InstanceKey, PipelineKey};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conflict writing {0}: the object was modified concurrently")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("request to the API server failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API server returned {status} for {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }

    /// Everything but a broken client setup may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Config(_))
    }
}

/// Typed access to pipelines and instances.
///
/// Reads never mutate anything; the only writes are status updates, which
/// carry the `resourceVersion` they were read at and fail with
/// [`StoreError::Conflict`] when that version is stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_pipelines(&self) -> Result<Vec<AnyPipeline>, StoreError>;

    async fn get_pipeline(&self, key: &PipelineKey) -> Result<Option<AnyPipeline>, StoreError>;

    async fn update_pipeline_status(&self, pipeline: &AnyPipeline) -> Result<(), StoreError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError>;

    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<Instance>, StoreError>;

    async fn update_instance_status(&self, instance: &Instance) -> Result<(), StoreError>;
}
