use std::time::Duration;

use httpmock::MockServer;
use operator_common::kube::{KubeClient, KubeConfig};

pub const TOKEN: &str = "test-token";

pub fn client_for(server: &MockServer) -> KubeClient {
    KubeClient::new(KubeConfig {
        api_url: server.base_url(),
        token: Some(TOKEN.to_owned()),
        ca_pem: None,
        insecure_tls: false,
        timeout: Duration::from_secs(5),
    })
    .expect("failed to build client")
}
