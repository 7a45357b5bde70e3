/// The closed set of `wc_*` methods this engine speaks, their relay tags and
/// ttls, and the typed params of each one.
///
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, PeerError, Result};
use crate::message::{ErrorObject, Message};
use crate::types::{
    DeleteParams, EmptyParams, NotifyDeleteParams, NotifyMessageParams,
    NotifySubscribeParams, SessionAuthenticateParams, SessionEventParams,
    SessionExtendParams, SessionProposeParams, SessionRequestParams,
    SessionSettleParams, SessionUpdateParams,
};
use crate::utils::{DAYS, HOURS, MINUTES, MONTHS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WcMethod {
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete,

    #[serde(rename = "wc_pairingPing")]
    PairingPing,

    #[serde(rename = "wc_sessionPropose")]
    SessionPropose,

    #[serde(rename = "wc_sessionSettle")]
    SessionSettle,

    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate,

    #[serde(rename = "wc_sessionExtend")]
    SessionExtend,

    #[serde(rename = "wc_sessionRequest")]
    SessionRequest,

    #[serde(rename = "wc_sessionEvent")]
    SessionEvent,

    #[serde(rename = "wc_sessionDelete")]
    SessionDelete,

    #[serde(rename = "wc_sessionPing")]
    SessionPing,

    #[serde(rename = "wc_sessionAuthenticate")]
    SessionAuthenticate,

    #[serde(rename = "wc_notifySubscribe")]
    NotifySubscribe,

    #[serde(rename = "wc_notifyMessage")]
    NotifyMessage,

    #[serde(rename = "wc_notifyDelete")]
    NotifyDelete,
}

impl Display for WcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_plain::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{name}")
    }
}

impl FromStr for WcMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s).map_err(|_| Error::UnknownMethod(s.to_string()))
    }
}

/// Relay publish parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IrnParams {
    pub tag: u32,
    pub ttl: u64,
    pub prompt: bool,
}

impl IrnParams {
    pub const fn new(tag: u32, ttl: u64, prompt: bool) -> Self {
        IrnParams { tag, ttl, prompt }
    }
}

/// Used to answer requests whose method is unknown or not registered.
pub const UNREGISTERED_METHOD_IRN: IrnParams = IrnParams::new(0, DAYS, false);

impl WcMethod {
    // https://specs.walletconnect.com/2.0/specs/clients/sign/rpc-methods#methods
    pub fn request_irn(&self) -> IrnParams {
        match self {
            WcMethod::PairingDelete => IrnParams::new(1000, DAYS, false),
            WcMethod::PairingPing => IrnParams::new(1002, 30, false),
            WcMethod::SessionPropose => IrnParams::new(1100, 5 * MINUTES, true),
            WcMethod::SessionSettle => IrnParams::new(1102, 5 * MINUTES, false),
            WcMethod::SessionUpdate => IrnParams::new(1104, DAYS, false),
            WcMethod::SessionExtend => IrnParams::new(1106, DAYS, false),
            WcMethod::SessionRequest => IrnParams::new(1108, 5 * MINUTES, true),
            WcMethod::SessionEvent => IrnParams::new(1110, 5 * MINUTES, true),
            WcMethod::SessionDelete => IrnParams::new(1112, DAYS, false),
            WcMethod::SessionPing => IrnParams::new(1114, 30, false),
            WcMethod::SessionAuthenticate => IrnParams::new(1116, HOURS, true),
            WcMethod::NotifySubscribe => IrnParams::new(4000, 30, false),
            WcMethod::NotifyMessage => IrnParams::new(4002, MONTHS, true),
            WcMethod::NotifyDelete => IrnParams::new(4004, DAYS, false),
        }
    }

    pub fn response_irn(&self) -> IrnParams {
        let request = self.request_irn();
        IrnParams::new(request.tag + 1, request.ttl, false)
    }

    /// Rejections of proposals and authenticate requests carry their own
    /// tags.
    pub fn reject_irn(&self) -> IrnParams {
        match self {
            WcMethod::SessionPropose => IrnParams::new(1120, 5 * MINUTES, false),
            WcMethod::SessionAuthenticate => IrnParams::new(1118, HOURS, false),
            _ => self.response_irn(),
        }
    }

    pub fn is_pairing_method(&self) -> bool {
        matches!(self, WcMethod::PairingPing | WcMethod::PairingDelete)
    }

    pub fn is_notify_method(&self) -> bool {
        matches!(
            self,
            WcMethod::NotifySubscribe
                | WcMethod::NotifyMessage
                | WcMethod::NotifyDelete
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WcParams {
    PairingDelete(DeleteParams),
    PairingPing,
    SessionPropose(SessionProposeParams),
    SessionSettle(SessionSettleParams),
    SessionUpdate(SessionUpdateParams),
    SessionExtend(SessionExtendParams),
    SessionRequest(SessionRequestParams),
    SessionEvent(SessionEventParams),
    SessionDelete(DeleteParams),
    SessionPing,
    SessionAuthenticate(SessionAuthenticateParams),
    NotifySubscribe(NotifySubscribeParams),
    NotifyMessage(NotifyMessageParams),
    NotifyDelete(NotifyDeleteParams),
}

impl WcParams {
    pub fn method(&self) -> WcMethod {
        match self {
            Self::PairingDelete(_) => WcMethod::PairingDelete,
            Self::PairingPing => WcMethod::PairingPing,
            Self::SessionPropose(_) => WcMethod::SessionPropose,
            Self::SessionSettle(_) => WcMethod::SessionSettle,
            Self::SessionUpdate(_) => WcMethod::SessionUpdate,
            Self::SessionExtend(_) => WcMethod::SessionExtend,
            Self::SessionRequest(_) => WcMethod::SessionRequest,
            Self::SessionEvent(_) => WcMethod::SessionEvent,
            Self::SessionDelete(_) => WcMethod::SessionDelete,
            Self::SessionPing => WcMethod::SessionPing,
            Self::SessionAuthenticate(_) => WcMethod::SessionAuthenticate,
            Self::NotifySubscribe(_) => WcMethod::NotifySubscribe,
            Self::NotifyMessage(_) => WcMethod::NotifyMessage,
            Self::NotifyDelete(_) => WcMethod::NotifyDelete,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Self::PairingDelete(p) | Self::SessionDelete(p) => {
                serde_json::to_value(p)?
            }
            Self::PairingPing | Self::SessionPing => {
                serde_json::to_value(EmptyParams::default())?
            }
            Self::SessionPropose(p) => serde_json::to_value(p)?,
            Self::SessionSettle(p) => serde_json::to_value(p)?,
            Self::SessionUpdate(p) => serde_json::to_value(p)?,
            Self::SessionExtend(p) => serde_json::to_value(p)?,
            Self::SessionRequest(p) => serde_json::to_value(p)?,
            Self::SessionEvent(p) => serde_json::to_value(p)?,
            Self::SessionAuthenticate(p) => serde_json::to_value(p)?,
            Self::NotifySubscribe(p) => serde_json::to_value(p)?,
            Self::NotifyMessage(p) => serde_json::to_value(p)?,
            Self::NotifyDelete(p) => serde_json::to_value(p)?,
        })
    }

    pub fn from_value(method: WcMethod, params: Value) -> Result<Self> {
        Ok(match method {
            WcMethod::PairingDelete => {
                Self::PairingDelete(serde_json::from_value(params)?)
            }
            WcMethod::PairingPing => Self::PairingPing,
            WcMethod::SessionPropose => {
                Self::SessionPropose(serde_json::from_value(params)?)
            }
            WcMethod::SessionSettle => {
                Self::SessionSettle(serde_json::from_value(params)?)
            }
            WcMethod::SessionUpdate => {
                Self::SessionUpdate(serde_json::from_value(params)?)
            }
            WcMethod::SessionExtend => {
                Self::SessionExtend(serde_json::from_value(params)?)
            }
            WcMethod::SessionRequest => {
                Self::SessionRequest(serde_json::from_value(params)?)
            }
            WcMethod::SessionEvent => {
                Self::SessionEvent(serde_json::from_value(params)?)
            }
            WcMethod::SessionDelete => {
                Self::SessionDelete(serde_json::from_value(params)?)
            }
            WcMethod::SessionPing => Self::SessionPing,
            WcMethod::SessionAuthenticate => {
                Self::SessionAuthenticate(serde_json::from_value(params)?)
            }
            WcMethod::NotifySubscribe => {
                Self::NotifySubscribe(serde_json::from_value(params)?)
            }
            WcMethod::NotifyMessage => {
                Self::NotifyMessage(serde_json::from_value(params)?)
            }
            WcMethod::NotifyDelete => {
                Self::NotifyDelete(serde_json::from_value(params)?)
            }
        })
    }

    pub fn to_message(&self, id: u64) -> Result<Message> {
        Ok(Message::request(id, self.method().to_string(), self.to_value()?))
    }
}

/// Parses a request body. Unknown methods fail with `UnknownMethod`.
pub fn decode_request(message: &Message) -> Result<WcParams> {
    let method = message
        .method
        .as_deref()
        .ok_or(Error::InvalidEnvelope("request without method"))?;
    let method = WcMethod::from_str(method)?;
    let params = message.params.clone().unwrap_or(Value::Null);
    WcParams::from_value(method, params)
}

#[derive(Clone, Debug, PartialEq)]
pub enum JsonRpcResult {
    Result(Value),
    Error(ErrorObject),
}

impl JsonRpcResult {
    pub fn into_result(self) -> Result<Value> {
        match self {
            JsonRpcResult::Result(value) => Ok(value),
            JsonRpcResult::Error(error) => Err(PeerError::from(error).into()),
        }
    }
}

/// Inbound request after decryption and decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct WcRequest {
    pub id: u64,
    pub topic: String,
    pub params: WcParams,
}

impl WcRequest {
    pub fn method(&self) -> WcMethod {
        self.params.method()
    }
}

/// Inbound response matched to the request this client sent.
#[derive(Clone, Debug, PartialEq)]
pub struct WcResponse {
    pub id: u64,
    pub topic: String,
    /// Params of the original request, read back from history.
    pub params: WcParams,
    pub response: JsonRpcResult,
}

impl WcResponse {
    pub fn method(&self) -> WcMethod {
        self.params.method()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(WcMethod::SessionPropose.to_string(), "wc_sessionPropose");
        assert_eq!(
            WcMethod::from_str("wc_notifySubscribe").unwrap(),
            WcMethod::NotifySubscribe
        );
        assert!(matches!(
            WcMethod::from_str("wc_sessionFoo"),
            Err(Error::UnknownMethod(m)) if m == "wc_sessionFoo"
        ));
    }

    #[test]
    fn test_irn_tags() {
        // first message from dapp to wallet, tag 1100
        assert_eq!(WcMethod::SessionPropose.request_irn().tag, 1100);
        // propose response from wallet, tag 1101
        assert_eq!(WcMethod::SessionPropose.response_irn().tag, 1101);
        // settle from wallet, tag 1102
        assert_eq!(WcMethod::SessionSettle.request_irn().tag, 1102);
        assert_eq!(WcMethod::SessionPing.response_irn().tag, 1115);
        assert_eq!(WcMethod::SessionAuthenticate.response_irn().tag, 1117);
        assert_eq!(WcMethod::SessionAuthenticate.reject_irn().tag, 1118);
        assert_eq!(WcMethod::SessionAuthenticate.request_irn().ttl, 3600);
        assert_eq!(WcMethod::SessionDelete.request_irn().ttl, 86400);
    }

    #[test]
    fn test_decode_wc_session_authenticate() {
        let req = "{\"id\":1743510684985985,\"jsonrpc\":\"2.0\",\"method\":\"wc_sessionAuthenticate\",\"params\":{\"authPayload\":{\"type\":\"caip122\",\"chains\":[\"eip155:137\",\"eip155:1\"],\"statement\":\"Please sign with your account\",\"aud\":\"https://appkit-lab.reown.com\",\"domain\":\"appkit-lab.reown.com\",\"version\":\"1\",\"nonce\":\"cfab4ebf5b80e510b9812b06fb62af56ca7e2c0115d4b88bdeec024313451e6f\",\"iat\":\"2025-04-01T12:31:24.985Z\",\"resources\":[\"urn:recap:eyJhdHQiOnsiZWlwMTU1Ijp7InJlcXVlc3QvcGVyc29uYWxfc2lnbiI6W3t9XX19fQ\"]},\"requester\":{\"publicKey\":\"04f1c07b7205c273b6af5b85ac267cbe28c22d036873ffe4621abc4d9213430e\",\"metadata\":{\"name\":\"AppKit Lab\",\"description\":\"AppKit Lab is the test environment for Reown's AppKit\",\"url\":\"https://appkit-lab.reown.com\",\"icons\":[\"https://appkit-lab.reown.com/favicon.svg\"]}},\"expiryTimestamp\":1743514284}}";

        let message: Message = serde_json::from_str(req).unwrap();
        assert_eq!(message.id, 1743510684985985);
        let WcParams::SessionAuthenticate(params) = decode_request(&message).unwrap()
        else {
            panic!("expected wc_sessionAuthenticate");
        };
        assert_eq!(
            params.requester.public_key,
            "04f1c07b7205c273b6af5b85ac267cbe28c22d036873ffe4621abc4d9213430e"
        );
        assert_eq!(params.auth_payload.chains.len(), 2);
    }

    #[test]
    fn test_unknown_method_is_classified() {
        let message = Message::request(1, "wc_somethingNew", json!({}));
        assert!(matches!(
            decode_request(&message),
            Err(Error::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_ping_params_are_empty_object() {
        let message = WcParams::SessionPing.to_message(5).unwrap();
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "id": 5,
                "jsonrpc": "2.0",
                "method": "wc_sessionPing",
                "params": {}
            })
        );
    }

    #[test]
    fn test_error_result_maps_to_peer_error() {
        let result = JsonRpcResult::Error(ErrorObject {
            code: 5000,
            message: "User rejected.".to_string(),
            data: None,
        });
        assert!(matches!(
            result.into_result(),
            Err(Error::Peer(PeerError::UserRejected(_)))
        ));
    }
}
