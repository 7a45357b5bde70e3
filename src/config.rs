/// Client configuration
///
/// Everything `Client::new` needs that is not storage or transport. Every
/// field has a default so a config file only has to name what it changes.
///
use std::time::Duration;

use alloy::hex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ACK_TIMEOUT, DEFAULT_INITIAL_BACKOFF, DEFAULT_KEYSERVER_URL,
    DEFAULT_PUBLISH_ATTEMPTS, DEFAULT_RELAY_AUDIENCE, DEFAULT_RELAY_RPC_URL,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
};
use crate::error::{Error, Result};
use crate::events::BackpressurePolicy;
use crate::types::{Metadata, Relay};
use crate::utils::random_bytes32;

/// Durations are written as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// How a publish is retried when the relay does not acknowledge it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Doubled after every failed attempt.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, `attempt` counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_id: String,
    pub relay_rpc_url: String,
    pub relay_audience: String,
    pub metadata: Metadata,
    pub relay: Relay,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub backpressure: BackpressurePolicy,
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    pub keyserver_url: String,
    /// Hex encoded ed25519 seed of the relay identity. A random one is used
    /// when absent, which gives the client a new id on every start.
    pub client_seed: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            relay_rpc_url: DEFAULT_RELAY_RPC_URL.to_string(),
            relay_audience: DEFAULT_RELAY_AUDIENCE.to_string(),
            metadata: Metadata::default(),
            relay: Relay::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            backpressure: BackpressurePolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            keyserver_url: DEFAULT_KEYSERVER_URL.to_string(),
            client_seed: None,
        }
    }
}

impl Config {
    pub fn new(project_id: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            project_id: project_id.into(),
            metadata,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn client_seed(&self) -> Result<[u8; 32]> {
        match &self.client_seed {
            Some(seed) => hex::decode(seed)?
                .try_into()
                .map_err(|_| Error::InternalError("client seed must be 32 bytes".into())),
            None => Ok(random_bytes32()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.backpressure, BackpressurePolicy::Unbounded);
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(
            r#"{
                "project_id": "abc",
                "request_timeout": 1500,
                "retry": { "max_attempts": 5 },
                "backpressure": { "drop_oldest": 64 },
                "client_seed": "0000000000000000000000000000000000000000000000000000000000000000"
            }"#,
        )
        .unwrap();
        assert_eq!(config.project_id, "abc");
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.ack_timeout, DEFAULT_ACK_TIMEOUT);
        assert_eq!(config.backpressure, BackpressurePolicy::DropOldest(64));
        assert_eq!(config.client_seed().unwrap(), [0; 32]);
    }

    #[test]
    fn test_bad_seed() {
        let config = Config {
            client_seed: Some("abcd".to_string()),
            ..Default::default()
        };
        assert!(config.client_seed().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            ack_timeout: Duration::from_secs(1),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }
}
