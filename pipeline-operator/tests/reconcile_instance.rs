use config_check::test_utils::ScriptedRuntime;
use config_check::{CheckObject, PodPhase};
use operator_common::compression::gunzip;
use operator_common::resources::{Fragment, InstanceKind, Role};
use pipeline_operator::reconciler::{Outcome, Trigger};
use serde_json::json;

mod common;
use common::{
    accepted, agent, cluster_pipeline, harness, instance, ingest_spec, pipeline, pod_logs_spec,
    to_value,
};

#[tokio::test(start_paused = true)]
async fn agent_config_is_checked_and_applied() {
    let h = harness(ScriptedRuntime::passing());
    h.store
        .insert_pipeline(accepted(pipeline("ns1", "logs", pod_logs_spec()), Role::Agent));
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();

    let Outcome::Applied {
        config_hash,
        checked,
    } = reconciled.outcome
    else {
        panic!("unexpected outcome {:?}", reconciled.outcome);
    };
    assert!(checked);
    assert!(reconciled.follow_up.is_empty());
    assert_eq!(h.runtime.runs(), 1);

    let workload = h.applier.last();
    assert_eq!(workload.secret_name, "agent-agent");
    assert_eq!(workload.namespace, "vector");
    assert_eq!(workload.config_hash, config_hash);
    assert!(workload.services.is_empty());

    let config = to_value(&workload.config);
    assert_eq!(config["sinks"]["ns1-logs-out"]["type"], "console");
    assert_eq!(
        config["sources"]["ns1-logs-logs"]["extra_namespace_label_selector"],
        "kubernetes.io/metadata.name=ns1"
    );

    let status = h.store.instance(&key).unwrap().status;
    assert_eq!(status.config_check_result, Some(true));
    assert_eq!(status.last_applied_config_hash, Some(config_hash));
    assert!(status.last_applied_global_hash.is_some());
}

#[tokio::test(start_paused = true)]
async fn unchanged_config_skips_the_check() {
    let h = harness(ScriptedRuntime::passing());
    h.store
        .insert_pipeline(accepted(pipeline("ns1", "logs", pod_logs_spec()), Role::Agent));
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    h.reconciler.reconcile_instance(&key).await.unwrap();
    let writes = h.store.status_writes();
    let again = h.reconciler.reconcile_instance(&key).await.unwrap();

    assert!(matches!(again.outcome, Outcome::Applied { checked: false, .. }));
    assert_eq!(h.runtime.runs(), 1);
    assert_eq!(h.store.status_writes(), writes);
    assert_eq!(h.applier.workloads().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_config_keeps_the_applied_hash() {
    let h = harness(ScriptedRuntime::failing("error: unknown sink type"));
    h.store
        .insert_pipeline(accepted(pipeline("ns1", "logs", pod_logs_spec()), Role::Agent));
    let mut agent = agent("agent");
    agent.set_succeeded(42, 7);
    let key = agent.key();
    h.store.insert_instance(agent);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();

    assert_eq!(
        reconciled.outcome,
        Outcome::InstanceRejected {
            reason: "error: unknown sink type".to_owned()
        }
    );
    assert!(h.applier.workloads().is_empty());

    let status = h.store.instance(&key).unwrap().status;
    assert_eq!(status.config_check_result, Some(false));
    assert_eq!(status.reason.as_deref(), Some("error: unknown sink type"));
    assert_eq!(status.last_applied_config_hash, Some(42));
    assert!(status.last_rejected_config_hash.is_some());

    let again = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert_eq!(again.outcome, Outcome::Unchanged);
    assert_eq!(h.runtime.runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn infrastructure_failures_are_retried_without_touching_status() {
    let h = harness(ScriptedRuntime::passing());
    h.runtime.fail_create(CheckObject::Pod);
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    let error = h.reconciler.reconcile_instance(&key).await.unwrap_err();

    assert!(error.is_retryable());
    assert_eq!(h.store.status_writes(), 0);
    assert!(h.applier.workloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn apply_failures_are_retried() {
    let h = harness(ScriptedRuntime::passing());
    h.applier.fail(true);
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    let error = h.reconciler.reconcile_instance(&key).await.unwrap_err();

    assert!(error.is_retryable());
    assert!(error.to_string().contains("failed to apply workload"));
    assert_eq!(h.store.instance(&key).unwrap().status.config_check_result, None);
}

#[tokio::test(start_paused = true)]
async fn later_colliding_fragment_is_rejected_and_the_instance_rebuilt() {
    let h = harness(ScriptedRuntime::passing());
    let spec = |sink: &str| {
        json!({
            "skipPrefix": true,
            "sources": {"logs": {"type": "kubernetes_logs"}},
            "sinks": {sink: {"type": "blackhole", "inputs": ["logs"]}}
        })
    };
    let first = accepted(cluster_pipeline("a", spec("a-out")), Role::Agent);
    let second = accepted(cluster_pipeline("b", spec("b-out")), Role::Agent);
    let (first_key, second_key) = (first.key(), second.key());
    h.store.insert_pipeline(first);
    h.store.insert_pipeline(second);
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();

    assert_eq!(
        reconciled.outcome,
        Outcome::FragmentsRejected {
            pipelines: vec![second_key.clone()]
        }
    );
    assert_eq!(reconciled.follow_up, vec![Trigger::Instance(key.clone())]);
    assert_eq!(h.runtime.runs(), 0);
    assert!(h.store.pipeline(&first_key).unwrap().is_valid());
    let status = h.store.pipeline(&second_key).unwrap().status().clone();
    assert_eq!(status.config_check_result, Some(false));
    assert_eq!(status.collides_with.as_deref(), Some("a"));
    assert!(status.reason.unwrap().contains("collides"));

    let rebuilt = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert!(matches!(rebuilt.outcome, Outcome::Applied { .. }));
    let config = to_value(&h.applier.last().config);
    assert!(config["sinks"].get("a-out").is_some());
    assert!(config["sinks"].get("b-out").is_none());
}

#[tokio::test(start_paused = true)]
async fn port_conflict_leaves_the_established_fragment_alone() {
    let h = harness(ScriptedRuntime::passing());
    let established = accepted(pipeline("ns1", "a", ingest_spec(9000)), Role::Aggregator);
    let established_key = established.key();
    h.store.insert_pipeline(established);
    let aggregator = instance(InstanceKind::Aggregator, Some("ns1"), "agg");
    let key = aggregator.key();
    h.store.insert_instance(aggregator);
    h.reconciler.reconcile_instance(&key).await.unwrap();

    let newcomer = accepted(pipeline("ns1", "b", ingest_spec(9000)), Role::Aggregator);
    let newcomer_key = newcomer.key();
    h.store.insert_pipeline(newcomer);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert_eq!(
        reconciled.outcome,
        Outcome::FragmentsRejected {
            pipelines: vec![newcomer_key.clone()]
        }
    );
    assert!(h.store.pipeline(&established_key).unwrap().is_valid());

    h.store.remove_pipeline(&newcomer_key);
    let removed = h.reconciler.reconcile_pipeline(&newcomer_key).await.unwrap();
    assert_eq!(removed.outcome, Outcome::Gone);
    assert_eq!(removed.follow_up, vec![Trigger::Instance(key.clone())]);

    let again = h
        .reconciler
        .reconcile_pipeline(&established_key)
        .await
        .unwrap();
    assert_eq!(again.outcome, Outcome::Unchanged);
    let established = h.store.pipeline(&established_key).unwrap();
    assert!(established.is_valid());
    assert_eq!(established.status().reason, None);
}

#[tokio::test(start_paused = true)]
async fn newcomer_is_blamed_even_when_it_sorts_first() {
    let h = harness(ScriptedRuntime::passing());
    let established = accepted(pipeline("ns1", "z", ingest_spec(9000)), Role::Aggregator);
    let established_key = established.key();
    h.store.insert_pipeline(established);
    let aggregator = instance(InstanceKind::Aggregator, Some("ns1"), "agg");
    let key = aggregator.key();
    h.store.insert_instance(aggregator);
    h.reconciler.reconcile_instance(&key).await.unwrap();

    let newcomer = accepted(pipeline("ns1", "a", ingest_spec(9000)), Role::Aggregator);
    let newcomer_key = newcomer.key();
    h.store.insert_pipeline(newcomer);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert_eq!(
        reconciled.outcome,
        Outcome::FragmentsRejected {
            pipelines: vec![newcomer_key.clone()]
        }
    );
    assert!(h.store.pipeline(&established_key).unwrap().is_valid());
    let status = h.store.pipeline(&newcomer_key).unwrap().status().clone();
    assert_eq!(status.collides_with.as_deref(), Some("ns1/z"));
    assert_eq!(
        status.reason.as_deref(),
        Some("pipeline ns1/a: duplicate port 9000/TCP already used by pipeline ns1/z")
    );

    let rebuilt = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert!(matches!(rebuilt.outcome, Outcome::Applied { .. }));
    let config = to_value(&h.applier.last().config);
    assert!(config["sources"].get("ns1-z-http").is_some());

    h.store.remove_pipeline(&established_key);
    let removed = h
        .reconciler
        .reconcile_pipeline(&established_key)
        .await
        .unwrap();
    assert_eq!(
        removed.follow_up,
        vec![
            Trigger::Pipeline(newcomer_key.clone()),
            Trigger::Instance(key.clone())
        ]
    );

    let rechecked = h.reconciler.reconcile_pipeline(&newcomer_key).await.unwrap();
    assert_eq!(
        rechecked.outcome,
        Outcome::PipelineAccepted {
            role: Role::Aggregator,
            checked: 1
        }
    );
    let status = h.store.pipeline(&newcomer_key).unwrap().status().clone();
    assert_eq!(status.config_check_result, Some(true));
    assert_eq!(status.collides_with, None);
}

#[tokio::test(start_paused = true)]
async fn aggregator_gets_services_in_its_namespace() {
    let h = harness(ScriptedRuntime::passing());
    h.store
        .insert_pipeline(accepted(pipeline("ns1", "ingest", ingest_spec(8080)), Role::Aggregator));
    h.store
        .insert_pipeline(accepted(pipeline("ns2", "other", ingest_spec(8081)), Role::Aggregator));
    let aggregator = instance(InstanceKind::Aggregator, Some("ns1"), "agg");
    let key = aggregator.key();
    h.store.insert_instance(aggregator);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();
    assert!(matches!(reconciled.outcome, Outcome::Applied { .. }));

    let workload = h.applier.last();
    assert_eq!(workload.namespace, "ns1");
    assert_eq!(workload.secret_name, "agg-aggregator");
    assert_eq!(workload.services.len(), 1);
    assert_eq!(workload.services[0].name, "agg-ingest");
    assert_eq!(workload.services[0].ports[0].port, 8080);

    let config = to_value(&workload.config);
    assert!(config["sources"].get("ns1-ingest-http").is_some());
    assert!(config["sources"].get("ns2-other-http").is_none());

    let pods: Vec<_> = h
        .runtime
        .created()
        .into_iter()
        .filter(|(object, _)| *object == CheckObject::Pod)
        .collect();
    assert_eq!(pods[0].1["metadata"]["namespace"], "ns1");
}

#[tokio::test(start_paused = true)]
async fn cluster_aggregator_runs_in_the_operator_namespace() {
    let h = harness(ScriptedRuntime::passing());
    h.store
        .insert_pipeline(accepted(cluster_pipeline("relay", ingest_spec(9000)), Role::Aggregator));
    h.store
        .insert_pipeline(accepted(pipeline("ns1", "ingest", ingest_spec(8080)), Role::Aggregator));
    let aggregator = instance(InstanceKind::ClusterAggregator, None, "central");
    let key = aggregator.key();
    h.store.insert_instance(aggregator);

    h.reconciler.reconcile_instance(&key).await.unwrap();

    let workload = h.applier.last();
    assert_eq!(workload.namespace, "vector");
    assert_eq!(workload.secret_name, "central-aggregator");
    assert_eq!(workload.services.len(), 1);
    assert_eq!(workload.services[0].name, "central-relay");

    let config = to_value(&workload.config);
    assert!(config["sources"].get("relay-http").is_some());
    assert!(config["sources"].get("ns1-ingest-http").is_none());
}

#[tokio::test(start_paused = true)]
async fn empty_agent_falls_back_to_defaults() {
    let h = harness(ScriptedRuntime::passing());
    let agent = agent("agent");
    let key = agent.key();
    h.store.insert_instance(agent);

    h.reconciler.reconcile_instance(&key).await.unwrap();

    let config = to_value(&h.applier.last().config);
    assert_eq!(config["sources"]["defaultSource"]["type"], "kubernetes_logs");
    assert_eq!(config["sinks"]["defaultSink"]["type"], "blackhole");
    assert_eq!(config["sinks"]["defaultSink"]["inputs"], json!(["defaultSource"]));
}

#[tokio::test(start_paused = true)]
async fn disabled_check_applies_directly() {
    let h = harness(ScriptedRuntime::new([PodPhase::Failed]));
    let mut agent = agent("agent");
    agent.spec.config_check.disabled = true;
    let key = agent.key();
    h.store.insert_instance(agent);

    let reconciled = h.reconciler.reconcile_instance(&key).await.unwrap();

    assert!(matches!(reconciled.outcome, Outcome::Applied { checked: false, .. }));
    assert_eq!(h.runtime.runs(), 0);
    assert_eq!(h.applier.workloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn compressed_config_is_gzipped_everywhere() {
    let h = harness(ScriptedRuntime::passing());
    let mut agent = agent("agent");
    agent.spec.compress_config = true;
    let key = agent.key();
    h.store.insert_instance(agent);

    h.reconciler.reconcile_instance(&key).await.unwrap();

    let workload = h.applier.last();
    assert!(workload.compressed);
    let config = to_value(&gunzip(&workload.config).unwrap());
    assert!(config["sources"].get("defaultSource").is_some());

    let secret = h
        .runtime
        .created()
        .into_iter()
        .find(|(object, _)| *object == CheckObject::Secret)
        .unwrap()
        .1;
    assert!(secret["data"].get("config.json.gz").is_some());
}

#[tokio::test(start_paused = true)]
async fn check_uses_the_instance_image() {
    let h = harness(ScriptedRuntime::passing());
    let mut agent = agent("agent");
    agent.spec.image = Some("timberio/vector:0.40.0-distroless-libc".to_owned());
    let key = agent.key();
    h.store.insert_instance(agent);

    h.reconciler.reconcile_instance(&key).await.unwrap();

    let pod = h
        .runtime
        .created()
        .into_iter()
        .find(|(object, _)| *object == CheckObject::Pod)
        .unwrap()
        .1;
    assert_eq!(
        pod["spec"]["containers"][0]["image"],
        "timberio/vector:0.40.0-distroless-libc"
    );
}

#[tokio::test]
async fn missing_or_deleted_instances_are_gone() {
    let h = harness(ScriptedRuntime::passing());
    let mut deleted = agent("old");
    deleted.metadata.deletion_timestamp = Some("2024-01-01T00:00:00Z".to_owned());
    let deleted_key = deleted.key();
    h.store.insert_instance(deleted);

    let missing = h
        .reconciler
        .reconcile_instance(&agent("missing").key())
        .await
        .unwrap();
    let gone = h.reconciler.reconcile_instance(&deleted_key).await.unwrap();

    assert_eq!(missing.outcome, Outcome::Gone);
    assert_eq!(gone.outcome, Outcome::Gone);
    assert!(h.applier.workloads().is_empty());
}
