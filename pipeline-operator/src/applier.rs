//! Promotion of a checked configuration to the running workload.
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use operator_common::kube::{ApiResource, KubeClient};
use operator_common::resources::{InstanceKey, InstanceKind, API_GROUP};
use operator_common::store::StoreError;
use pipeline_config::ports::{EventReceiver, ServiceDefinition};
use serde_json::{json, Value};
use tracing::info;

pub const MANAGED_BY: &str = "vector-operator";

/// Everything written for one instance after its configuration passed.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub instance: InstanceKey,
    pub namespace: String,
    pub secret_name: String,
    pub config: Vec<u8>,
    pub compressed: bool,
    pub config_hash: u32,
    pub global_hash: u32,
    pub services: Vec<ServiceDefinition>,
    pub event_receivers: Vec<EventReceiver>,
}

impl Workload {
    pub fn component(&self) -> &'static str {
        match self.instance.kind {
            InstanceKind::Agent => "Agent",
            InstanceKind::Aggregator | InstanceKind::ClusterAggregator => "Aggregator",
        }
    }

    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_owned(), "vector".to_owned()),
            (
                "app.kubernetes.io/instance".to_owned(),
                self.instance.name.clone(),
            ),
            (
                "app.kubernetes.io/component".to_owned(),
                self.component().to_owned(),
            ),
        ])
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(
            "app.kubernetes.io/managed-by".to_owned(),
            MANAGED_BY.to_owned(),
        );
        labels
    }

    /// Selector matching every object this instance owns.
    pub fn label_selector(&self) -> String {
        self.labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn secret_manifest(&self) -> Value {
        let file = if self.compressed {
            "config.json.gz"
        } else {
            "config.json"
        };
        let mut annotations = json!({
            format!("{API_GROUP}/config-hash"): self.config_hash.to_string(),
            format!("{API_GROUP}/global-hash"): self.global_hash.to_string(),
        });
        if !self.event_receivers.is_empty() {
            annotations[format!("{API_GROUP}/event-receivers")] =
                Value::String(serde_json::to_string(&self.event_receivers).unwrap_or_default());
        }
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": self.secret_name,
                "namespace": self.namespace,
                "labels": self.labels(),
                "annotations": annotations,
            },
            "data": { file: STANDARD.encode(&self.config) },
        })
    }

    pub fn service_manifest(&self, service: &ServiceDefinition) -> Value {
        let ports: Vec<Value> = service
            .ports
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "port": p.port,
                    "targetPort": p.port,
                    "protocol": p.protocol.to_string(),
                })
            })
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": service.name,
                "namespace": self.namespace,
                "labels": self.labels(),
            },
            "spec": {
                "selector": self.selector_labels(),
                "ports": ports,
            },
        })
    }
}

#[async_trait]
pub trait WorkloadApplier: Send + Sync {
    async fn apply(&self, workload: &Workload) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct KubeApplier {
    client: KubeClient,
}

impl KubeApplier {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }

    async fn apply_services(&self, workload: &Workload) -> Result<(), StoreError> {
        let collection = ApiResource::SERVICE.collection_path(Some(&workload.namespace));
        let mut desired = BTreeSet::new();

        for service in &workload.services {
            self.client
                .upsert(&collection, &service.name, workload.service_manifest(service))
                .await?;
            desired.insert(service.name.as_str());
        }

        let existing: Vec<Value> = self
            .client
            .list(&collection, Some(&workload.label_selector()))
            .await?;
        for service in existing {
            let Some(name) = service.pointer("/metadata/name").and_then(Value::as_str) else {
                continue;
            };
            if desired.contains(name) {
                continue;
            }
            info!(instance = %workload.instance, service = name, "deleting stale service");
            self.client
                .delete(&ApiResource::SERVICE.object_path(Some(&workload.namespace), name))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkloadApplier for KubeApplier {
    async fn apply(&self, workload: &Workload) -> Result<(), StoreError> {
        let collection = ApiResource::SECRET.collection_path(Some(&workload.namespace));
        self.client
            .upsert(&collection, &workload.secret_name, workload.secret_manifest())
            .await?;

        if workload.instance.kind != InstanceKind::Agent {
            self.apply_services(workload).await?;
        }

        Ok(())
    }
}
