//! Common test helpers for the Hauptbahnhof crates
//!
//! - A sample hub configuration with two lamp nodes, a door lock and a
//!   couple of virtual topics
//! - Port allocation for loopback listeners
//! - Condition-based waiting (no hardcoded sleeps)

use hbf_core::HubConfig;
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Username and password accepted by [`sample_config`]
pub const TEST_USER: (&str, &str) = ("member", "hunter2");

// ============================================================================
// Configuration
// ============================================================================

/// Sample configuration in the on-disk JSON format
pub const SAMPLE_CONFIG: &str = r#"{
    "debug": true,
    "mqtt": {"host": "127.0.0.1", "reconnect_delay_secs": 1},
    "websocket": {
        "internal_host": "127.0.0.1",
        "external_host": "127.0.0.1",
        "users": {"member": "hunter2"}
    },
    "nodes": [
        {
            "type": "dfnode",
            "topic": "/haspa/esp/1",
            "espid": "esp1",
            "mappings": {"/haspa/licht/c": 0, "/haspa/licht/w": 1, "/haspa/licht/tisch": 2}
        },
        {
            "type": "dfnode",
            "topic": "/haspa/esp/2",
            "espid": "esp2",
            "mappings": {"/haspa/licht/2/c": 0, "/haspa/licht/2/w": 1}
        },
        {
            "type": "delock",
            "topic": "/haspa/lock",
            "mappings": {"/haspa/tuer": 0}
        }
    ],
    "translation": {
        "/haspa/licht": ["/haspa/licht/c", "/haspa/licht/w"],
        "/haspa/licht/alle": ["/haspa/licht", "/haspa/licht/2/c", "/haspa/licht/2/w"]
    }
}"#;

/// [`SAMPLE_CONFIG`], parsed and validated
pub fn sample_config() -> HubConfig {
    HubConfig::from_json_str(SAMPLE_CONFIG).expect("sample config is valid")
}

/// [`sample_config`] with both WebSocket listeners moved to the given ports
pub fn sample_config_on(internal_port: u16, external_port: u16) -> HubConfig {
    let mut config = sample_config();
    config.websocket.internal_port = internal_port;
    config.websocket.external_port = external_port;
    config
}

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until something accepts TCP connections on `port`
pub async fn wait_for_listener(port: u16) -> bool {
    wait_for(
        || async move {
            tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_ok()
        },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await
}
