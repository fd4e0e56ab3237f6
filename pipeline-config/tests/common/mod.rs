use operator_common::resources::{
    AnyPipeline, ClusterVectorPipeline, ObjectMeta, PipelineSpec, VectorPipeline,
};
use serde_json::Value;

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

pub fn to_value(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("config is valid json")
}
