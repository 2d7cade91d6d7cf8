//! Broker configuration.
//!
//! Spec §6: "a single string for broker URL is the only contract the core
//! requires from its host." Everything else here is an internal default a
//! host application may override, the same shape as the teacher's
//! `NatsConfig` (one required field, a page of tunables with `Default`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage backend for JetStream streams and the Soil KV bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    File,
    Memory,
}

/// Configuration for connecting to the broker and materializing the
/// River/Humus streams and the Soil KV bucket (spec §6 "Persisted state
/// layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Broker connection URL — the one contract the core requires.
    pub url: String,

    /// Stream name for River (default `RIVER`).
    #[serde(default = "default_river_stream")]
    pub river_stream: String,

    /// Stream name for Humus (default `HUMUS`).
    #[serde(default = "default_humus_stream")]
    pub humus_stream: String,

    /// KV bucket name for Soil (default `SOIL`).
    #[serde(default = "default_soil_bucket")]
    pub soil_bucket: String,

    /// River/Humus stream storage type.
    #[serde(default = "default_storage")]
    pub storage: StorageType,

    /// Max age retention for River/Humus, seconds. 0 means unbounded.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Max message count retention for River/Humus. 0 means unbounded.
    #[serde(default)]
    pub max_messages: i64,

    /// Max byte retention for River/Humus. 0 means unbounded.
    #[serde(default)]
    pub max_bytes: i64,

    /// Soil KV history depth per key (spec §4.4 "finite history, ten a
    /// reasonable default").
    #[serde(default = "default_soil_history")]
    pub soil_history: i64,

    /// Decomposer bounded CAS retry count (spec §9 retry budgets).
    #[serde(default = "default_decomposer_retries")]
    pub decomposer_retries: u32,

    /// Decomposer CAS retry starting backoff (exponential from here).
    #[serde(default = "default_decomposer_backoff")]
    pub decomposer_backoff: Duration,

    /// Consumer ack-wait window before redelivery (spec §9 default 30s).
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Grace period handlers get to finish in-flight work on Stop (spec §9
    /// default 5s).
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Connection timeout, seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Request timeout, seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl BrokerConfig {
    /// Construct a config with every default except the broker URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn river_subjects(&self) -> Vec<String> {
        vec!["river.>".to_string()]
    }

    pub fn humus_subjects(&self) -> Vec<String> {
        vec!["humus.>".to_string()]
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            river_stream: default_river_stream(),
            humus_stream: default_humus_stream(),
            soil_bucket: default_soil_bucket(),
            storage: default_storage(),
            max_age_secs: default_max_age_secs(),
            max_messages: 0,
            max_bytes: 0,
            soil_history: default_soil_history(),
            decomposer_retries: default_decomposer_retries(),
            decomposer_backoff: default_decomposer_backoff(),
            ack_wait_secs: default_ack_wait_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            token: None,
        }
    }
}

fn default_river_stream() -> String {
    "RIVER".to_string()
}
fn default_humus_stream() -> String {
    "HUMUS".to_string()
}
fn default_soil_bucket() -> String {
    "SOIL".to_string()
}
fn default_storage() -> StorageType {
    StorageType::File
}
fn default_max_age_secs() -> u64 {
    0
}
fn default_soil_history() -> i64 {
    10
}
fn default_decomposer_retries() -> u32 {
    5
}
fn default_decomposer_backoff() -> Duration {
    Duration::from_millis(50)
}
fn default_ack_wait_secs() -> u64 {
    30
}
fn default_stop_grace_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_retry_budgets() {
        let config = BrokerConfig::new("nats://localhost:4222");
        assert_eq!(config.decomposer_retries, 5);
        assert_eq!(config.decomposer_backoff, Duration::from_millis(50));
        assert_eq!(config.ack_wait_secs, 30);
        assert_eq!(config.stop_grace_secs, 5);
        assert_eq!(config.soil_history, 10);
    }

    #[test]
    fn stream_names_match_reserved_namespace() {
        let config = BrokerConfig::default();
        assert_eq!(config.river_stream, "RIVER");
        assert_eq!(config.humus_stream, "HUMUS");
        assert_eq!(config.soil_bucket, "SOIL");
    }
}
