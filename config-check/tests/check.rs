use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use config_check::test_utils::ScriptedRuntime;
use config_check::{CheckError, CheckObject, CheckTarget, PodPhase};
use operator_common::compression::gunzip;

mod common;

#[tokio::test(start_paused = true)]
async fn succeeds_once_the_pod_completes() {
    let runtime = ScriptedRuntime::new([PodPhase::Pending, PodPhase::Running, PodPhase::Succeeded]);
    let check = common::check_with(&runtime);

    check.run(&common::target(false), common::CONFIG).await.unwrap();

    assert_eq!(runtime.polls(), 3);
    let created = runtime.created();
    let kinds: Vec<CheckObject> = created.iter().map(|(object, _)| *object).collect();
    assert_eq!(
        kinds,
        [CheckObject::ServiceAccount, CheckObject::Secret, CheckObject::Pod]
    );

    let name = created[0].1["metadata"]["name"].as_str().unwrap().to_owned();
    assert!(name.starts_with("configcheck-logs-"));
    assert_eq!(name.len(), "configcheck-logs-".len() + 5);
    assert!(created
        .iter()
        .all(|(_, manifest)| manifest["metadata"]["name"] == name.as_str()));

    let secret = &created[1].1;
    let payload = STANDARD
        .decode(secret["data"]["config.json"].as_str().unwrap())
        .unwrap();
    assert_eq!(payload, common::CONFIG);
}

#[tokio::test(start_paused = true)]
async fn failed_pod_reports_its_logs() {
    let runtime = ScriptedRuntime::failing("error: unknown variant `vectr`");
    let check = common::check_with(&runtime);

    let error = check
        .run(&common::target(false), common::CONFIG)
        .await
        .unwrap_err();

    match &error {
        CheckError::Validation { reason } => assert_eq!(reason, "error: unknown variant `vectr`"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!error.is_retryable());
    assert_eq!(runtime.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn pending_pod_times_out_and_is_cleaned_up() {
    let runtime = ScriptedRuntime::new([]);
    let check = common::check_with(&runtime);

    let error = check
        .run(&common::target(false), common::CONFIG)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CheckError::TimedOut { timeout, .. } if timeout == Duration::from_secs(30)
    ));
    assert!(error.is_retryable());
    // one immediate poll plus one per interval until the deadline
    assert!(runtime.polls() >= 6);

    let deleted = runtime.deleted();
    let kinds: Vec<CheckObject> = deleted.iter().map(|(object, _)| *object).collect();
    assert_eq!(
        kinds,
        [CheckObject::Pod, CheckObject::Secret, CheckObject::ServiceAccount]
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_hanging_creation() {
    let runtime = ScriptedRuntime::passing();
    runtime.delay_creates(Duration::from_secs(60));
    let check = common::check_with(&runtime);

    let error = check
        .run(&common::target(false), common::CONFIG)
        .await
        .unwrap_err();

    assert!(matches!(error, CheckError::TimedOut { .. }));
    assert!(runtime.created().is_empty());
    assert_eq!(runtime.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn creation_failure_is_an_infrastructure_error() {
    let runtime = ScriptedRuntime::passing();
    runtime.fail_create(CheckObject::Pod);
    let check = common::check_with(&runtime);

    let error = check
        .run(&common::target(false), common::CONFIG)
        .await
        .unwrap_err();

    assert!(matches!(error, CheckError::Runtime(_)));
    assert!(error.is_retryable());
    assert_eq!(runtime.created().len(), 2);
    assert_eq!(runtime.polls(), 0);
    assert_eq!(runtime.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn cleanup_failures_do_not_change_the_outcome() {
    let runtime = ScriptedRuntime::passing();
    runtime.fail_deletes();
    let check = common::check_with(&runtime);

    check.run(&common::target(false), common::CONFIG).await.unwrap();
    assert_eq!(runtime.deleted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn compressed_config_is_stored_gzipped() {
    let runtime = ScriptedRuntime::passing();
    let check = common::check_with(&runtime);

    check.run(&common::target(true), common::CONFIG).await.unwrap();

    let created = runtime.created();
    let secret = &created[1].1;
    assert!(secret["data"].get("config.json").is_none());
    let archive = STANDARD
        .decode(secret["data"]["config.json.gz"].as_str().unwrap())
        .unwrap();
    assert_eq!(gunzip(&archive).unwrap(), common::CONFIG);

    let pod = &created[2].1;
    assert_eq!(pod["spec"]["initContainers"].as_array().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn instance_image_overrides_the_default() {
    let runtime = ScriptedRuntime::passing();
    let check = common::check_with(&runtime);
    let target = CheckTarget {
        image: Some("timberio/vector:0.34.0-debian"),
        ..common::target(false)
    };

    check.run(&target, common::CONFIG).await.unwrap();

    let pod = &runtime.created()[2].1;
    assert_eq!(
        pod["spec"]["containers"][0]["image"],
        "timberio/vector:0.34.0-debian"
    );
}

#[tokio::test(start_paused = true)]
async fn every_run_uses_fresh_names() {
    let runtime = ScriptedRuntime::passing();
    let check = common::check_with(&runtime);

    check.run(&common::target(false), common::CONFIG).await.unwrap();
    check.run(&common::target(false), common::CONFIG).await.unwrap();

    assert_eq!(runtime.runs(), 2);
    let created = runtime.created();
    assert_ne!(
        created[0].1["metadata"]["name"],
        created[3].1["metadata"]["name"]
    );
}
