//! In-memory `ResourceStore` for tests across the workspace.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::resources::{AnyPipeline, Fragment, Instance, InstanceKey, PipelineKey};
use crate::store::{ResourceStore, StoreError};

#[derive(Default)]
struct State {
    pipelines: BTreeMap<PipelineKey, AnyPipeline>,
    instances: BTreeMap<InstanceKey, Instance>,
    version: u64,
    status_writes: usize,
    conflicts_pending: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Behaves like the API server's status subresource: a status write only
/// touches `status`, bumps `resourceVersion` and is rejected when the
/// caller's version is stale.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn insert_pipeline(&self, pipeline: impl Into<AnyPipeline>) {
        let mut pipeline = pipeline.into();
        let mut state = self.lock();
        let version = state.next_version();
        match &mut pipeline {
            AnyPipeline::Namespaced(p) => p.metadata.resource_version = Some(version),
            AnyPipeline::Cluster(p) => p.metadata.resource_version = Some(version),
        }
        state.pipelines.insert(pipeline.key(), pipeline);
    }

    pub fn remove_pipeline(&self, key: &PipelineKey) {
        self.lock().pipelines.remove(key);
    }

    pub fn pipeline(&self, key: &PipelineKey) -> Option<AnyPipeline> {
        self.lock().pipelines.get(key).cloned()
    }

    pub fn insert_instance(&self, mut instance: Instance) {
        let mut state = self.lock();
        instance.metadata.resource_version = Some(state.next_version());
        state.instances.insert(instance.key(), instance);
    }

    pub fn instance(&self, key: &InstanceKey) -> Option<Instance> {
        self.lock().instances.get(key).cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    /// Reject the next `n` status writes with a conflict.
    pub fn fail_status_writes(&self, n: usize) {
        self.lock().conflicts_pending = n;
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_pipelines(&self) -> Result<Vec<AnyPipeline>, StoreError> {
        Ok(self.lock().pipelines.values().cloned().collect())
    }

    async fn get_pipeline(&self, key: &PipelineKey) -> Result<Option<AnyPipeline>, StoreError> {
        Ok(self.pipeline(key))
    }

    async fn update_pipeline_status(&self, pipeline: &AnyPipeline) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = pipeline.key();
        if state.conflicts_pending > 0 {
            state.conflicts_pending -= 1;
            return Err(StoreError::Conflict(key.to_string()));
        }
        let version = state.next_version();
        let stored = state
            .pipelines
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.metadata().resource_version != pipeline.metadata().resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        *stored.status_mut() = pipeline.status().clone();
        match stored {
            AnyPipeline::Namespaced(p) => p.metadata.resource_version = Some(version),
            AnyPipeline::Cluster(p) => p.metadata.resource_version = Some(version),
        }
        state.status_writes += 1;
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.lock().instances.values().cloned().collect())
    }

    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<Instance>, StoreError> {
        Ok(self.instance(key))
    }

    async fn update_instance_status(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = instance.key();
        if state.conflicts_pending > 0 {
            state.conflicts_pending -= 1;
            return Err(StoreError::Conflict(key.to_string()));
        }
        let version = state.next_version();
        let stored = state
            .instances
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.metadata.resource_version != instance.metadata.resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        stored.status = instance.status.clone();
        stored.metadata.resource_version = Some(version);
        state.status_writes += 1;
        Ok(())
    }
}
