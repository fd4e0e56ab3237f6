use std::collections::BTreeMap;

use operator_common::hash::{content_hash, json_hash};
use operator_common::resources::{Fragment, PipelineSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

pub const KUBERNETES_LOGS: &str = "kubernetes_logs";
pub const KUBERNETES_EVENTS: &str = "kubernetes_events";
pub const INTERNAL_METRICS: &str = "internal_metrics";
pub const PROMETHEUS_EXPORTER: &str = "prometheus_exporter";
pub const VECTOR: &str = "vector";
pub const BLACKHOLE: &str = "blackhole";
pub const FILTER: &str = "filter";

fn is_false(b: &bool) -> bool {
    !*b
}

/// Hash of `type` plus the passthrough options. Names and inputs are not
/// part of it, so identical components in different fragments hash the same.
fn options_hash(kind: &str, options: &Map<String, Value>) -> u32 {
    let mut doc = options.clone();
    doc.insert("type".to_owned(), Value::String(kind.to_owned()));
    content_hash(Value::Object(doc).to_string().as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_label_selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_namespace_label_selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_field_selector: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_apiserver_cache: bool,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Source {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_owned(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
    /// Produced by the optimizer rather than authored.
    #[serde(skip)]
    pub merged: bool,
}

impl Transform {
    pub fn options_hash(&self) -> u32 {
        options_hash(&self.kind, &self.options)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
    #[serde(skip)]
    pub merged: bool,
}

impl Sink {
    pub fn new(kind: &str, inputs: &[&str]) -> Self {
        Self {
            kind: kind.to_owned(),
            inputs: inputs.iter().map(|i| i.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_owned(), value.into());
        self
    }

    pub fn options_hash(&self) -> u32 {
        options_hash(&self.kind, &self.options)
    }
}

/// One fragment's components, typed but not yet namespaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentComponents {
    pub sources: BTreeMap<String, Source>,
    pub transforms: BTreeMap<String, Transform>,
    pub sinks: BTreeMap<String, Sink>,
}

impl FragmentComponents {
    pub fn decode<F: Fragment + ?Sized>(fragment: &F) -> Result<Self, ConfigError> {
        let pipeline = fragment.key().to_string();
        let spec: &PipelineSpec = fragment.spec();

        Ok(Self {
            sources: decode_section(&pipeline, "sources", spec.sources.as_ref())?,
            transforms: decode_section(&pipeline, "transforms", spec.transforms.as_ref())?,
            sinks: decode_section(&pipeline, "sinks", spec.sinks.as_ref())?,
        })
    }
}

pub(crate) fn decode_section<T: DeserializeOwned>(
    pipeline: &str,
    section: &'static str,
    raw: Option<&Value>,
) -> Result<BTreeMap<String, T>, ConfigError> {
    match raw {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|source| ConfigError::Decode {
            pipeline: pipeline.to_owned(),
            section,
            source,
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiSpec {
    pub address: String,
    pub enabled: bool,
    pub playground: bool,
}

/// Settings shared by the whole document rather than owned by a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalOptions {
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_metrics_secs: Option<u32>,
    pub api: ApiSpec,
}

/// Where a synthesized source came from. Kept off the wire; the port
/// allocator needs it after names have been prefixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub pipeline: String,
    pub pipeline_name: String,
    pub namespace: Option<String>,
    pub component: String,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VectorConfig {
    #[serde(flatten)]
    pub global: GlobalOptions,
    pub sources: BTreeMap<String, Source>,
    pub transforms: BTreeMap<String, Transform>,
    pub sinks: BTreeMap<String, Sink>,
    #[serde(skip)]
    pub origins: BTreeMap<String, Origin>,
    /// Set when no fragment contributed anything and defaults were used.
    #[serde(skip)]
    pub defaulted: bool,
}

impl VectorConfig {
    pub fn new(global: GlobalOptions) -> Self {
        Self {
            global,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn global_hash(&self) -> Result<u32, ConfigError> {
        Ok(json_hash(&self.global)?)
    }

    /// Inputs that name neither a source nor a transform. Wildcards and
    /// `component.output` references are resolved against the component part.
    pub fn dangling_inputs(&self) -> Vec<(String, String)> {
        let resolves = |input: &str| {
            input.contains('*')
                || self.sources.contains_key(input)
                || self.transforms.contains_key(input)
                || input.split_once('.').is_some_and(|(component, _)| {
                    self.sources.contains_key(component) || self.transforms.contains_key(component)
                })
        };

        let transforms = self.transforms.iter().map(|(n, t)| (n, &t.inputs));
        let sinks = self.sinks.iter().map(|(n, s)| (n, &s.inputs));
        transforms
            .chain(sinks)
            .flat_map(|(name, inputs)| {
                inputs
                    .iter()
                    .filter(|input| !resolves(input.as_str()))
                    .map(move |input| (name.clone(), input.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_stay_inline() {
        let source: Source = serde_json::from_value(json!({
            "type": "kubernetes_logs",
            "extra_label_selector": "app=web",
            "auto_partial_merge": true
        }))
        .unwrap();

        assert_eq!(source.kind, "kubernetes_logs");
        assert_eq!(source.extra_label_selector, "app=web");
        assert_eq!(source.options.get("auto_partial_merge"), Some(&json!(true)));

        let back = serde_json::to_value(&source).unwrap();
        assert_eq!(back["auto_partial_merge"], json!(true));
        assert!(back.get("use_apiserver_cache").is_none());
    }

    #[test]
    fn options_hash_ignores_name_and_inputs() {
        let a = Sink::new("blackhole", &["x"]).with_option("rate", 100);
        let b = Sink::new("blackhole", &["y", "z"]).with_option("rate", 100);
        let c = Sink::new("blackhole", &["x"]).with_option("rate", 101);
        let d = Sink::new("console", &["x"]).with_option("rate", 100);

        assert_eq!(a.options_hash(), b.options_hash());
        assert_ne!(a.options_hash(), c.options_hash());
        assert_ne!(a.options_hash(), d.options_hash());
    }

    #[test]
    fn serializes_wire_layout() {
        let mut config = VectorConfig::new(GlobalOptions {
            data_dir: "/vector-data-dir".into(),
            expire_metrics_secs: None,
            api: ApiSpec {
                address: "0.0.0.0:8686".into(),
                enabled: true,
                playground: false,
            },
        });
        config
            .sources
            .insert("s".into(), Source::new("demo_logs").with_option("format", "json"));
        config.sinks.insert("o".into(), Sink::new("console", &["s"]));

        let value: Value = serde_json::from_slice(&config.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "data_dir": "/vector-data-dir",
                "api": {"address": "0.0.0.0:8686", "enabled": true, "playground": false},
                "sources": {"s": {"type": "demo_logs", "format": "json"}},
                "transforms": {},
                "sinks": {"o": {"type": "console", "inputs": ["s"]}}
            })
        );
    }

    #[test]
    fn finds_dangling_inputs() {
        let mut config = VectorConfig::default();
        config.sources.insert("s".into(), Source::new("demo_logs"));
        config.transforms.insert(
            "route".into(),
            Transform {
                kind: "route".into(),
                inputs: vec!["s".into()],
                ..Default::default()
            },
        );
        config.sinks.insert(
            "o".into(),
            Sink::new("console", &["route.errors", "ns-*", "missing"]),
        );

        assert_eq!(
            config.dangling_inputs(),
            vec![("o".to_string(), "missing".to_string())]
        );
    }
}
