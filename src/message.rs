/// JSON-RPC 2.0 envelope exchanged between peers inside an encrypted
/// envelope.
///
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::JSONRPC_VERSION;
use crate::error::PeerError;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Millisecond clock scaled by 1000 plus a random suffix, forced to be
/// strictly greater than the previous id handed out by this process.
pub fn payload_id() -> u64 {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let candidate = now_ms * 1000 + rand::thread_rng().gen_range(0..1000);
    let mut previous = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(previous + 1);
        match LAST_ID.compare_exchange_weak(
            previous,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => previous = actual,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&PeerError> for ErrorObject {
    fn from(e: &PeerError) -> Self {
        ErrorObject {
            code: e.code(),
            message: e.to_string(),
            data: None,
        }
    }
}

impl From<ErrorObject> for PeerError {
    fn from(e: ErrorObject) -> Self {
        PeerError::from_code(e.code, e.message)
    }
}

impl Message {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Message {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn result(id: u64, result: Value) -> Self {
        Message {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: &PeerError) -> Self {
        Message {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            params: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }
}

/// Peers send ids either as JSON numbers or as decimal strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = u64;

        fn expecting(
            &self,
            formatter: &mut std::fmt::Formatter,
        ) -> std::fmt::Result {
            formatter.write_str("a json-rpc id as number or string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IdVisitor)
}
