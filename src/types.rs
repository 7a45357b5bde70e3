/// Types
///
/// Wire params of every `wc_*` method and the records the engines persist.
/// Field names follow the JSON the other WalletConnect SDKs put on the wire.
///
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cacao::Cacao;
use crate::constants::RELAY_PROTOCOL;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for Relay {
    fn default() -> Self {
        Relay {
            protocol: RELAY_PROTOCOL.to_string(),
            data: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub metadata: Metadata,
}

/// Common view over proposal and session namespaces.
pub trait NamespaceScope {
    fn chains(&self) -> Option<&[String]>;
    fn methods(&self) -> &[String];
    fn events(&self) -> &[String];

    fn accounts(&self) -> Option<&[String]> {
        None
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl NamespaceScope for ProposalNamespace {
    fn chains(&self) -> Option<&[String]> {
        self.chains.as_deref()
    }

    fn methods(&self) -> &[String] {
        &self.methods
    }

    fn events(&self) -> &[String] {
        &self.events
    }
}

impl NamespaceScope for SessionNamespace {
    fn chains(&self) -> Option<&[String]> {
        self.chains.as_deref()
    }

    fn methods(&self) -> &[String] {
        &self.methods
    }

    fn events(&self) -> &[String] {
        &self.events
    }

    fn accounts(&self) -> Option<&[String]> {
        Some(&self.accounts)
    }
}

pub type ProposalNamespaces = HashMap<String, ProposalNamespace>;
pub type SessionNamespaces = HashMap<String, SessionNamespace>;
pub type SessionProperties = HashMap<String, String>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyParams {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionProposeParams {
    #[serde(rename = "requiredNamespaces", default)]
    pub required_namespaces: ProposalNamespaces,
    #[serde(
        rename = "optionalNamespaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub relays: Vec<Relay>,
    pub proposer: Participant,
    #[serde(
        rename = "sessionProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_properties: Option<SessionProperties>,
    #[serde(
        rename = "expiryTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_timestamp: Option<u64>,
    #[serde(
        rename = "pairingTopic",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pairing_topic: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionProposeResponse {
    pub relay: Relay,
    #[serde(rename = "responderPublicKey")]
    pub responder_public_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSettleParams {
    pub relay: Relay,
    pub controller: Participant,
    pub namespaces: SessionNamespaces,
    #[serde(
        rename = "sessionProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_properties: Option<SessionProperties>,
    pub expiry: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRequestParams {
    pub request: SessionRequest,
    #[serde(rename = "chainId")]
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub method: String,
    pub params: Value,
    #[serde(
        rename = "expiryTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_timestamp: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEventParams {
    pub event: SessionEvent,
    #[serde(rename = "chainId")]
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub name: String,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: SessionNamespaces,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionAuthenticateParams {
    #[serde(rename = "authPayload")]
    pub auth_payload: AuthPayload,
    pub requester: Participant,
    #[serde(rename = "expiryTimestamp")]
    pub expiry_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
    pub chains: Vec<String>,
    pub domain: String,
    pub aud: String,
    pub version: String,
    pub nonce: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionAuthenticateResponse {
    pub cacaos: Vec<Cacao>,
    pub responder: Participant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySubscribeParams {
    #[serde(rename = "subscriptionAuth")]
    pub subscription_auth: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessageParams {
    #[serde(rename = "messageAuth")]
    pub message_auth: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyDeleteParams {
    #[serde(rename = "deleteAuth")]
    pub delete_auth: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponseParams {
    #[serde(rename = "responseAuth")]
    pub response_auth: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingState {
    Proposed,
    Active,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: String,
    pub relay: Relay,
    pub expiry: u64,
    pub state: PairingState,
    /// Methods advertised in the pairing uri.
    pub methods: Option<Vec<String>>,
    pub peer_metadata: Option<Metadata>,
    pub uri: String,
}

impl Pairing {
    pub fn is_active(&self) -> bool {
        self.state == PairingState::Active
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub pairing_topic: String,
    pub proposer: Participant,
    pub required_namespaces: ProposalNamespaces,
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub properties: Option<SessionProperties>,
    pub relays: Vec<Relay>,
    pub expiry: u64,
    /// Set on the dapp for its own outgoing proposals.
    pub is_self_proposed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    pub pairing_topic: String,
    pub relay: Relay,
    pub expiry: u64,
    pub self_participant: Participant,
    pub peer_participant: Participant,
    pub controller_key: String,
    pub namespaces: SessionNamespaces,
    pub required_namespaces: ProposalNamespaces,
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub properties: Option<SessionProperties>,
    pub is_acknowledged: bool,
    pub last_update_id: u64,
}

impl Session {
    pub fn is_self_controller(&self) -> bool {
        self.controller_key == self.self_participant.public_key
    }

    pub fn is_peer_controller(&self) -> bool {
        self.controller_key == self.peer_participant.public_key
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub account: String,
    pub relay: Relay,
    pub expiry: u64,
    pub request_id: u64,
    pub scopes: Vec<String>,
    pub dapp_authentication_key: String,
    pub dapp_metadata: Option<Metadata>,
    pub dapp_domain: String,
    /// Flipped once the dapp answered `wc_notifySubscribe`.
    pub is_confirmed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub topic: String,
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub sent_at: u64,
}
