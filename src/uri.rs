/// Pairing uri
///
/// `wc:<topic>@<version>?relay-protocol=<proto>&relay-data=<data>&symKey=<hex>`
/// with optional `expiryTimestamp` and `methods` parameters.
///
use std::fmt::{self, Display};

use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::constants::URI_VERSION;
use crate::key_management::SymmetricKey;
use crate::types::Relay;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConnectUri {
    pub topic: String,
    pub version: u32,
    pub sym_key: SymmetricKey,
    pub relay: Relay,
    pub expiry_timestamp: Option<u64>,
    pub methods: Option<Vec<String>>,
}

impl WalletConnectUri {
    pub fn new(topic: String, sym_key: SymmetricKey, relay: Relay) -> Self {
        Self {
            topic,
            version: URI_VERSION,
            sym_key,
            relay,
            expiry_timestamp: None,
            methods: None,
        }
    }

    /// Returns `None` for anything malformed instead of an error.
    pub fn parse(uri: &str) -> Option<Self> {
        validate_wc_uri(uri)
    }
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

impl Display for WalletConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wc:{}@{}?relay-protocol={}",
            self.topic,
            self.version,
            encode(&self.relay.protocol)
        )?;
        if let Some(data) = &self.relay.data {
            write!(f, "&relay-data={}", encode(data))?;
        }
        write!(f, "&symKey={}", self.sym_key.to_hex())?;
        if let Some(expiry) = self.expiry_timestamp {
            write!(f, "&expiryTimestamp={expiry}")?;
        }
        if let Some(methods) = &self.methods {
            write!(f, "&methods={}", encode(&methods.join(",")))?;
        }
        Ok(())
    }
}

pub fn validate_wc_uri(uri: &str) -> Option<WalletConnectUri> {
    if !uri.starts_with("wc:") {
        return None;
    }
    let normalized = if uri.starts_with("wc://") {
        uri.to_string()
    } else if let Some(rest) = uri.strip_prefix("wc:/") {
        format!("wc://{rest}")
    } else {
        format!("wc://{}", &uri[3..])
    };

    let url = Url::parse(&normalized).ok()?;
    let topic = url.username();
    if topic.is_empty() {
        return None;
    }
    let version = url
        .host_str()
        .and_then(|v| v.parse().ok())
        .unwrap_or(URI_VERSION);

    let mut protocol = None;
    let mut data = None;
    let mut sym_key = None;
    let mut expiry_timestamp = None;
    let mut methods = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "relay-protocol" => protocol = Some(value.into_owned()),
            "relay-data" => data = Some(value.into_owned()),
            "symKey" => sym_key = Some(value.into_owned()),
            "expiryTimestamp" => expiry_timestamp = value.parse().ok(),
            "methods" => {
                methods = Some(
                    value
                        .split(',')
                        .filter(|m| !m.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            _ => {}
        }
    }

    let protocol = protocol.filter(|p| !p.is_empty())?;
    let sym_key = sym_key.filter(|k| !k.is_empty())?;
    Some(WalletConnectUri {
        topic: topic.to_string(),
        version,
        sym_key: SymmetricKey::from_hex(&sym_key).ok()?,
        relay: Relay { protocol, data },
        expiry_timestamp,
        methods,
    })
}
