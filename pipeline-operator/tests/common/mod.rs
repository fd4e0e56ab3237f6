#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use config_check::test_utils::ScriptedRuntime;
use config_check::{CheckSettings, ConfigCheck};
use httpmock::MockServer;
use operator_common::kube::{KubeClient, KubeConfig};
use operator_common::resources::{
    AnyPipeline, ClusterVectorPipeline, Fragment, Instance, InstanceKind, ObjectMeta,
    PipelineSpec, Role, VectorPipeline,
};
use operator_common::store::StoreError;
use operator_common::test_utils::MemoryStore;
use pipeline_operator::applier::{Workload, WorkloadApplier};
use pipeline_operator::reconciler::Reconciler;
use serde_json::{json, Value};

pub const OPERATOR_NAMESPACE: &str = "vector";

#[derive(Default)]
struct Applied {
    workloads: Vec<Workload>,
    fail: bool,
}

/// Keeps every workload it is asked to apply.
#[derive(Clone, Default)]
pub struct RecordingApplier {
    state: Arc<Mutex<Applied>>,
}

impl RecordingApplier {
    fn lock(&self) -> MutexGuard<'_, Applied> {
        self.state.lock().expect("recording applier lock poisoned")
    }

    pub fn workloads(&self) -> Vec<Workload> {
        self.lock().workloads.clone()
    }

    pub fn last(&self) -> Workload {
        self.workloads().pop().expect("nothing applied")
    }

    pub fn fail(&self, fail: bool) {
        self.lock().fail = fail;
    }
}

#[async_trait]
impl WorkloadApplier for RecordingApplier {
    async fn apply(&self, workload: &Workload) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.fail {
            return Err(StoreError::Status {
                status: 503,
                path: format!("secrets/{}", workload.secret_name),
                message: "service unavailable".to_owned(),
            });
        }
        state.workloads.push(workload.clone());
        Ok(())
    }
}

pub struct Harness {
    pub reconciler: Reconciler,
    pub store: MemoryStore,
    pub runtime: ScriptedRuntime,
    pub applier: RecordingApplier,
}

pub fn settings() -> CheckSettings {
    CheckSettings {
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(1),
        ..CheckSettings::default()
    }
}

pub fn harness(runtime: ScriptedRuntime) -> Harness {
    let store = MemoryStore::new();
    let applier = RecordingApplier::default();
    let check = ConfigCheck::new(Arc::new(runtime.clone()), settings());
    let reconciler = Reconciler::new(
        Arc::new(store.clone()),
        check,
        Arc::new(applier.clone()),
        OPERATOR_NAMESPACE,
    );
    Harness {
        reconciler,
        store,
        runtime,
        applier,
    }
}

pub fn instance(kind: InstanceKind, namespace: Option<&str>, name: &str) -> Instance {
    Instance {
        kind,
        metadata: ObjectMeta {
            name: name.to_owned(),
            namespace: namespace.map(str::to_owned),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn agent(name: &str) -> Instance {
    instance(InstanceKind::Agent, Some(OPERATOR_NAMESPACE), name)
}

pub fn pipeline(namespace: &str, name: &str, spec: Value) -> AnyPipeline {
    AnyPipeline::from(VectorPipeline {
        metadata: ObjectMeta {
            name: name.to_owned(),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        },
        spec: serde_json::from_value::<PipelineSpec>(spec).expect("valid pipeline spec"),
        ..Default::default()
    })
}

pub fn cluster_pipeline(name: &str, spec: Value) -> AnyPipeline {
    AnyPipeline::from(ClusterVectorPipeline {
        metadata: ObjectMeta {
            name: name.to_owned(),
            ..Default::default()
        },
        spec: serde_json::from_value::<PipelineSpec>(spec).expect("valid pipeline spec"),
        ..Default::default()
    })
}

/// Marks a fragment as already checked for its current content.
pub fn accepted(mut pipeline: AnyPipeline, role: Role) -> AnyPipeline {
    let hash = pipeline.pipeline_hash().expect("hashable pipeline");
    pipeline.set_succeeded(role, hash);
    pipeline
}

pub fn pod_logs_spec() -> Value {
    json!({
        "sources": {"logs": {"type": "kubernetes_logs"}},
        "sinks": {"out": {"type": "console", "inputs": ["logs"], "encoding": {"codec": "json"}}}
    })
}

pub fn ingest_spec(port: u16) -> Value {
    json!({
        "sources": {"http": {"type": "http_server", "address": format!("0.0.0.0:{port}")}},
        "sinks": {"out": {"type": "blackhole", "inputs": ["http"]}}
    })
}

pub fn to_value(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("config is valid json")
}

pub fn client_for(server: &MockServer) -> KubeClient {
    KubeClient::new(KubeConfig {
        api_url: server.base_url(),
        token: Some("test-token".to_owned()),
        ca_pem: None,
        insecure_tls: false,
        timeout: Duration::from_secs(5),
    })
    .expect("failed to build client")
}
