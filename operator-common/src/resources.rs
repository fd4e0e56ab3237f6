//! Custom resources the operator reads and whose status it writes:
//! pipeline fragments (`VectorPipeline`, `ClusterVectorPipeline`) and the
//! instances that run them (`Vector`, `VectorAggregator`,
//! `ClusterVectorAggregator`).
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hash::json_hash;

pub const API_GROUP: &str = "observability.kaasops.io";
pub const API_VERSION: &str = "v1alpha1";

/// Fragment annotation overriding the aggregator service its ports land in.
pub const SERVICE_NAME_ANNOTATION: &str = "observability.kaasops.io/service-name";

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Aggregator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::Aggregator => write!(f, "aggregator"),
        }
    }
}

// ── Pipelines ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineKind {
    Namespaced,
    Cluster,
}

impl PipelineKind {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineKind::Namespaced => "VectorPipeline",
            PipelineKind::Cluster => "ClusterVectorPipeline",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            PipelineKind::Namespaced => "vectorpipelines",
            PipelineKind::Cluster => "clustervectorpipelines",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey {
    pub kind: PipelineKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Raw sources/transforms/sinks as authored. Decoding into typed components
/// happens at synthesis time so malformed fragments can be attributed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_prefix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transforms: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_check_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        rename = "LastAppliedPipelineHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_applied_pipeline_hash: Option<u32>,
    /// Fragment this one lost a name or port collision to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collides_with: Option<String>,
}

/// Read access to a pipeline fragment regardless of its scope.
pub trait Fragment {
    fn kind(&self) -> PipelineKind;
    fn metadata(&self) -> &ObjectMeta;
    fn spec(&self) -> &PipelineSpec;
    fn status(&self) -> &PipelineStatus;
    fn status_mut(&mut self) -> &mut PipelineStatus;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Owning namespace; `None` for cluster-scoped fragments.
    fn namespace(&self) -> Option<&str> {
        match self.kind() {
            PipelineKind::Namespaced => self.metadata().namespace.as_deref(),
            PipelineKind::Cluster => None,
        }
    }

    fn key(&self) -> PipelineKey {
        PipelineKey {
            kind: self.kind(),
            namespace: self.namespace().map(str::to_owned),
            name: self.name().to_owned(),
        }
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata().labels
    }

    fn is_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    fn is_valid(&self) -> bool {
        self.status().config_check_result == Some(true)
    }

    fn role(&self) -> Option<Role> {
        self.status().role
    }

    /// Only cluster-scoped fragments may keep their component names global.
    fn skip_prefix(&self) -> bool {
        self.kind() == PipelineKind::Cluster && self.spec().skip_prefix
    }

    fn service_name_override(&self) -> Option<&str> {
        self.metadata()
            .annotations
            .get(SERVICE_NAME_ANNOTATION)
            .map(String::as_str)
    }

    /// Hash of everything that influences how this fragment is synthesized.
    fn pipeline_hash(&self) -> Result<u32, serde_json::Error> {
        json_hash(&json!({
            "spec": self.spec(),
            "labels": self.labels(),
            "serviceName": self.service_name_override(),
        }))
    }

    fn set_succeeded(&mut self, role: Role, hash: u32) {
        let status = self.status_mut();
        status.role = Some(role);
        status.config_check_result = Some(true);
        status.reason = None;
        status.last_applied_pipeline_hash = Some(hash);
        status.collides_with = None;
    }

    /// `hash` is the content that was rejected, so an unchanged fragment is
    /// not checked again.
    fn set_failed(&mut self, reason: impl Into<String>, hash: u32) {
        let status = self.status_mut();
        status.config_check_result = Some(false);
        status.reason = Some(reason.into());
        status.last_applied_pipeline_hash = Some(hash);
        status.collides_with = None;
    }

    /// Rejected for colliding with `other`. Stays settled for this content
    /// until `other` goes away.
    fn set_collision(&mut self, reason: impl Into<String>, hash: u32, other: &str) {
        self.set_failed(reason, hash);
        self.status_mut().collides_with = Some(other.to_owned());
    }

    fn collides_with(&self) -> Option<&str> {
        self.status().collides_with.as_deref()
    }

    /// True when the recorded outcome, positive or not, is for this content.
    fn is_settled(&self, hash: u32) -> bool {
        let status = self.status();
        status.config_check_result.is_some() && status.last_applied_pipeline_hash == Some(hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorPipeline {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineSpec,
    #[serde(default)]
    pub status: PipelineStatus,
}

impl Fragment for VectorPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Namespaced
    }
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn spec(&self) -> &PipelineSpec {
        &self.spec
    }
    fn status(&self) -> &PipelineStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut PipelineStatus {
        &mut self.status
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterVectorPipeline {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineSpec,
    #[serde(default)]
    pub status: PipelineStatus,
}

impl Fragment for ClusterVectorPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Cluster
    }
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn spec(&self) -> &PipelineSpec {
        &self.spec
    }
    fn status(&self) -> &PipelineStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut PipelineStatus {
        &mut self.status
    }
}

/// Either pipeline variant, as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPipeline {
    Namespaced(VectorPipeline),
    Cluster(ClusterVectorPipeline),
}

impl AnyPipeline {
    /// Full object with `apiVersion`/`kind`, as the API server expects it.
    pub fn to_object(&self) -> Result<Value, serde_json::Error> {
        let mut value = match self {
            AnyPipeline::Namespaced(p) => serde_json::to_value(p)?,
            AnyPipeline::Cluster(p) => serde_json::to_value(p)?,
        };
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "apiVersion".to_owned(),
                Value::String(format!("{API_GROUP}/{API_VERSION}")),
            );
            object.insert("kind".to_owned(), Value::String(self.kind().kind().to_owned()));
        }
        Ok(value)
    }
}

impl From<VectorPipeline> for AnyPipeline {
    fn from(p: VectorPipeline) -> Self {
        AnyPipeline::Namespaced(p)
    }
}

impl From<ClusterVectorPipeline> for AnyPipeline {
    fn from(p: ClusterVectorPipeline) -> Self {
        AnyPipeline::Cluster(p)
    }
}

impl Fragment for AnyPipeline {
    fn kind(&self) -> PipelineKind {
        match self {
            AnyPipeline::Namespaced(_) => PipelineKind::Namespaced,
            AnyPipeline::Cluster(_) => PipelineKind::Cluster,
        }
    }
    fn metadata(&self) -> &ObjectMeta {
        match self {
            AnyPipeline::Namespaced(p) => &p.metadata,
            AnyPipeline::Cluster(p) => &p.metadata,
        }
    }
    fn spec(&self) -> &PipelineSpec {
        match self {
            AnyPipeline::Namespaced(p) => &p.spec,
            AnyPipeline::Cluster(p) => &p.spec,
        }
    }
    fn status(&self) -> &PipelineStatus {
        match self {
            AnyPipeline::Namespaced(p) => &p.status,
            AnyPipeline::Cluster(p) => &p.status,
        }
    }
    fn status_mut(&mut self) -> &mut PipelineStatus {
        match self {
            AnyPipeline::Namespaced(p) => &mut p.status,
            AnyPipeline::Cluster(p) => &mut p.status,
        }
    }
}

// ── Instances ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKind {
    #[default]
    Agent,
    Aggregator,
    ClusterAggregator,
}

impl InstanceKind {
    pub fn kind(&self) -> &'static str {
        match self {
            InstanceKind::Agent => "Vector",
            InstanceKind::Aggregator => "VectorAggregator",
            InstanceKind::ClusterAggregator => "ClusterVectorAggregator",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            InstanceKind::Agent => "vectors",
            InstanceKind::Aggregator => "vectoraggregators",
            InstanceKind::ClusterAggregator => "clustervectoraggregators",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, InstanceKind::ClusterAggregator)
    }

    pub fn role(&self) -> Role {
        match self {
            InstanceKind::Agent => Role::Agent,
            InstanceKind::Aggregator | InstanceKind::ClusterAggregator => Role::Aggregator,
        }
    }

    pub fn all() -> [InstanceKind; 3] {
        [
            InstanceKind::Agent,
            InstanceKind::Aggregator,
            InstanceKind::ClusterAggregator,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub kind: InstanceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind.kind(), namespace, self.name),
            None => write!(f, "{}/{}", self.kind.kind(), self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub playground: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigCheckOptions {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorSpec>,
    #[serde(default)]
    pub api: ApiOptions,
    #[serde(default)]
    pub internal_metrics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub use_apiserver_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_metrics_secs: Option<u32>,
    #[serde(default)]
    pub compress_config: bool,
    #[serde(default)]
    pub config_check: ConfigCheckOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_check_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_config_hash: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rejected_config_hash: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_global_hash: Option<u32>,
}

/// A managed agent or aggregator. `kind` is not part of the object body; the
/// store fills it in from the collection the object was read from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(skip)]
    pub kind: InstanceKind,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstanceSpec,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            kind: self.kind,
            namespace: if self.kind.is_namespaced() {
                self.metadata.namespace.clone()
            } else {
                None
            },
            name: self.metadata.name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn match_labels(&self) -> BTreeMap<String, String> {
        self.spec
            .selector
            .as_ref()
            .map(|s| s.match_labels.clone())
            .unwrap_or_default()
    }

    /// Name of the secret holding the promoted configuration.
    pub fn config_secret_name(&self) -> String {
        match self.kind {
            InstanceKind::Agent => format!("{}-agent", self.metadata.name),
            InstanceKind::Aggregator | InstanceKind::ClusterAggregator => {
                format!("{}-aggregator", self.metadata.name)
            }
        }
    }

    pub fn set_succeeded(&mut self, config_hash: u32, global_hash: u32) {
        self.status.config_check_result = Some(true);
        self.status.reason = None;
        self.status.last_applied_config_hash = Some(config_hash);
        self.status.last_applied_global_hash = Some(global_hash);
        self.status.last_rejected_config_hash = None;
    }

    /// Records a rejected configuration. The applied-hash markers stay put so
    /// the last promoted configuration remains the reference.
    pub fn set_failed(&mut self, reason: impl Into<String>, config_hash: u32) {
        self.status.config_check_result = Some(false);
        self.status.reason = Some(reason.into());
        self.status.last_rejected_config_hash = Some(config_hash);
    }

    /// The configuration with this hash was already checked and rejected.
    pub fn rejected(&self, config_hash: u32) -> bool {
        self.status.config_check_result == Some(false)
            && self.status.last_rejected_config_hash == Some(config_hash)
    }

    pub fn to_object(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "apiVersion".to_owned(),
                Value::String(format!("{API_GROUP}/{API_VERSION}")),
            );
            object.insert("kind".to_owned(), Value::String(self.kind.kind().to_owned()));
        }
        Ok(value)
    }
}
