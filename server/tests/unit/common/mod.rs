
use std::time::Duration;

use storm::authn::registry::RegistryCredentials;
use storm::config::settings::{ClusterSettings, RegistrySettings};
use storm::config::SecretValue;

pub const TEST_NAMESPACE: &str = "namespace-storm-test";

pub fn cluster_settings() -> ClusterSettings {
    ClusterSettings {
        namespace: TEST_NAMESPACE.to_string(),
        pull_secret_name: "storm-secret".to_string(),
        local: true,
        port_check_host: "127.0.0.1".to_string(),
        port_check_timeout_ms: 200,
        max_port_attempts: 5,
        delete_timeout_secs: 5,
    }
}

pub fn credentials() -> RegistryCredentials {
    RegistryCredentials::new(&RegistrySettings {
        url: "localhost:5000".to_string(),
        username: "user".to_string(),
        password: SecretValue::new("pass"),
    })
}

pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
