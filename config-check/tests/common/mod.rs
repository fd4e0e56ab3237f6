use std::sync::Arc;
use std::time::Duration;

use config_check::test_utils::ScriptedRuntime;
use config_check::{CheckSettings, CheckTarget, ConfigCheck};
use httpmock::MockServer;
use operator_common::kube::{KubeClient, KubeConfig};

pub const CONFIG: &[u8] = br#"{"sources":{"in":{"type":"vector","address":"0.0.0.0:8989"}}}"#;

pub fn settings() -> CheckSettings {
    CheckSettings {
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(5),
        ..CheckSettings::default()
    }
}

pub fn check_with(runtime: &ScriptedRuntime) -> ConfigCheck {
    ConfigCheck::new(Arc::new(runtime.clone()), settings())
}

pub fn target(compress: bool) -> CheckTarget<'static> {
    CheckTarget {
        instance: "logs",
        namespace: "vector",
        image: None,
        compress,
    }
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
