//! Hub configuration
//!
//! Loaded once at startup from a single JSON (or TOML) file. Everything that
//! is wrong with it surfaces as [`Error::Config`] before any task is spawned.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::node::{build_nodes, Node};
use crate::translation::Translation;
use crate::{Error, Result};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hauptbahnhof/hauptbahnhof.json";

/// Default master light topic acting as kill switch
pub const DEFAULT_KILL_SWITCH_TOPIC: &str = "/haspa/licht";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
    /// Broker connection
    pub mqtt: MqttConfig,
    /// WebSocket listeners and authentication
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// Physical devices
    pub nodes: Vec<NodeConfig>,
    /// Virtual topic -> target topics
    #[serde(default)]
    pub translation: BTreeMap<String, Vec<String>>,
    /// Topic that turns every node off when set to 0 (`null` disables it)
    #[serde(default = "default_kill_switch_topic")]
    pub kill_switch_topic: Option<String>,
    /// Capacity of the outbound MQTT and WebSocket queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_kill_switch_topic() -> Option<String> {
    Some(DEFAULT_KILL_SWITCH_TOPIC.to_string())
}

fn default_queue_capacity() -> usize {
    100
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "hauptbahnhof-core".to_string()
}

fn default_keep_alive() -> u16 {
    60
}

fn default_reconnect_delay() -> u64 {
    10
}

/// WebSocket listener and authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Privileged listener (trusted network, no authentication)
    #[serde(default = "default_internal_host")]
    pub internal_host: String,
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,
    /// Unprivileged listener (authentication required)
    #[serde(default = "default_external_host")]
    pub external_host: String,
    #[serde(default = "default_external_port")]
    pub external_port: u16,
    /// PEM certificate chain for the unprivileged listener
    #[serde(default)]
    pub chainfile: Option<PathBuf>,
    /// PEM private key for the unprivileged listener
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default = "default_token_validity")]
    pub token_validity_seconds: u64,
    /// username -> password
    #[serde(default)]
    pub users: HashMap<String, String>,
}

fn default_internal_host() -> String {
    "127.0.0.1".to_string()
}

fn default_internal_port() -> u16 {
    8765
}

fn default_external_host() -> String {
    "0.0.0.0".to_string()
}

fn default_external_port() -> u16 {
    8766
}

fn default_token_validity() -> u64 {
    3600
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            internal_host: default_internal_host(),
            internal_port: default_internal_port(),
            external_host: default_external_host(),
            external_port: default_external_port(),
            chainfile: None,
            private_key: None,
            token_validity_seconds: default_token_validity(),
            users: HashMap::new(),
        }
    }
}

impl WebSocketConfig {
    pub fn internal_addr(&self) -> String {
        format!("{}:{}", self.internal_host, self.internal_port)
    }

    pub fn external_addr(&self) -> String {
        format!("{}:{}", self.external_host, self.external_port)
    }

    /// The external listener speaks TLS when both PEM files are configured
    pub fn tls_enabled(&self) -> bool {
        self.chainfile.is_some() && self.private_key.is_some()
    }
}

/// One physical device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeConfig {
    /// 8 channel dimmer driver
    Dfnode {
        topic: String,
        espid: String,
        mappings: BTreeMap<String, usize>,
    },
    /// On/off door lock
    Delock {
        topic: String,
        mappings: BTreeMap<String, usize>,
    },
}

impl NodeConfig {
    pub fn topic(&self) -> &str {
        match self {
            NodeConfig::Dfnode { topic, .. } | NodeConfig::Delock { topic, .. } => topic,
        }
    }

    pub fn mappings(&self) -> &BTreeMap<String, usize> {
        match self {
            NodeConfig::Dfnode { mappings, .. } | NodeConfig::Delock { mappings, .. } => mappings,
        }
    }
}

impl HubConfig {
    /// Load from a file; `.toml` files are parsed as TOML, everything else as JSON
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "could not find config file in {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the node and translation sections against each other.
    ///
    /// Bad node mappings are fatal. Translation targets that neither expand
    /// further nor reach a node are only reported, the hub still runs.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("no nodes configured".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".into()));
        }

        let nodes = build_nodes(&self.nodes)?;
        let translation = Translation::new(self.translation.clone());

        for (source, targets) in &self.translation {
            for target in targets {
                if translation.is_virtual(target) {
                    continue;
                }
                if !nodes.iter().any(|n: &Node| n.maps(target)) {
                    warn!(
                        "Cannot translate output path {} for translating from {}",
                        target, source
                    );
                }
            }
        }

        for source in self.translation.keys() {
            translation.translate(source)?;
        }

        Ok(())
    }
}
