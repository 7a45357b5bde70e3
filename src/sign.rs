/// Sign
///
/// Session lifecycle on top of a pairing. The dapp proposes, the wallet
/// approves and settles, and from then on both sides exchange requests and
/// events on the session topic until it is deleted or expires.
///
/// ```text
///  dapp                         pairing topic                      wallet
///   | -- wc_sessionPropose ----------------------------------------> |
///   | <-------------------------------- propose response (pub key) - |
///   |                            session topic                       |
///   | <---------------------------------------- wc_sessionSettle --- |
///   | -- settle response ------------------------------------------> |
/// ```
///
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::cacao::{Cacao, CacaoVerifier};
use crate::codec::Participants;
use crate::constants::{AUTHENTICATE_REQUEST_TTL, PROPOSAL_TTL, SESSION_TTL};
use crate::error::{Error, PeerError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::key_management::{KeyManagement, PublicKey};
use crate::pairing::PairingEngine;
use crate::relay_interactor::{PublishOptions, RelayInteractor};
use crate::storage::Repository;
use crate::types::{
    AuthPayload, DeleteParams, Metadata, Participant, Proposal,
    ProposalNamespaces, Relay, Session, SessionAuthenticateParams,
    SessionAuthenticateResponse, SessionEventParams, SessionExtendParams,
    SessionNamespace, SessionNamespaces, SessionProperties,
    SessionProposeParams, SessionProposeResponse, SessionRequestParams,
    SessionSettleParams, SessionUpdateParams,
};
use crate::utils::unix_timestamp;
use crate::validator::{
    NAMESPACE_CHAINS_CAIP_2, ValidationError, chain_from_account,
    is_chain_id_caip2_compliant, namespace_from_chain_id,
    validate_chain_id_with_event_authorisation,
    validate_chain_id_with_method_authorisation, validate_event,
    validate_properties, validate_proposal_namespaces, validate_session_extend,
    validate_session_namespace, validate_session_request,
    validate_supported_namespace,
};
use crate::wc_message::{JsonRpcResult, WcMethod, WcParams, WcRequest, WcResponse};

const SEQUENCE: &str = "session";

/// Events granted to sessions that come out of `wc_sessionAuthenticate`.
const AUTHENTICATED_EVENTS: [&str; 2] = ["chainChanged", "accountsChanged"];

/// Authenticate request the dapp sent and still waits on.
#[derive(Clone, Debug)]
struct PendingAuthenticate {
    pairing_topic: String,
    response_topic: String,
    self_public_key: PublicKey,
    expiry: u64,
}

/// Authenticate request a wallet received and has not answered.
#[derive(Clone, Debug)]
struct ReceivedAuthenticate {
    pairing_topic: String,
    params: SessionAuthenticateParams,
}

#[derive(Default)]
struct Pending {
    /// Session topic to the proposal it settles, dapp side.
    settles: HashMap<String, u64>,
    authenticate: HashMap<u64, PendingAuthenticate>,
    received_authenticate: HashMap<u64, ReceivedAuthenticate>,
}

pub struct SignEngine {
    keys: Arc<KeyManagement>,
    interactor: Arc<RelayInteractor>,
    pairing: Arc<PairingEngine>,
    sessions: Arc<dyn Repository<String, Session>>,
    proposals: Arc<dyn Repository<u64, Proposal>>,
    events: Arc<EventBus<EngineEvent>>,
    metadata: Metadata,
    relay: Relay,
    request_timeout: Duration,
    pending: Mutex<Pending>,
}

fn delete_params(reason: &PeerError) -> DeleteParams {
    DeleteParams {
        code: reason.code(),
        message: reason.to_string(),
    }
}

/// Namespaces granted by a set of signed CACAOs: every signer account, the
/// chains they live on and the ReCap methods they approved.
pub fn namespaces_from_cacaos(cacaos: &[Cacao]) -> Result<SessionNamespaces> {
    let mut namespaces: SessionNamespaces = HashMap::new();
    for cacao in cacaos {
        let account = cacao.payload.account()?;
        let chain = chain_from_account(&account);
        let key = namespace_from_chain_id(&chain);
        let namespace = namespaces.entry(key).or_insert_with(|| SessionNamespace {
            chains: Some(Vec::new()),
            accounts: Vec::new(),
            methods: Vec::new(),
            events: AUTHENTICATED_EVENTS.iter().map(|e| e.to_string()).collect(),
        });
        if let Some(chains) = namespace.chains.as_mut() {
            if !chains.contains(&chain) {
                chains.push(chain);
            }
        }
        if !namespace.accounts.contains(&account) {
            namespace.accounts.push(account);
        }
        let methods: BTreeSet<String> = namespace
            .methods
            .drain(..)
            .chain(cacao.payload.recap_methods())
            .collect();
        namespace.methods = methods.into_iter().collect();
    }
    Ok(namespaces)
}

impl SignEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: Arc<KeyManagement>,
        interactor: Arc<RelayInteractor>,
        pairing: Arc<PairingEngine>,
        sessions: Arc<dyn Repository<String, Session>>,
        proposals: Arc<dyn Repository<u64, Proposal>>,
        events: Arc<EventBus<EngineEvent>>,
        metadata: Metadata,
        relay: Relay,
        request_timeout: Duration,
    ) -> Self {
        pairing.register(&[WcMethod::SessionPropose, WcMethod::SessionAuthenticate]);
        Self {
            keys,
            interactor,
            pairing,
            sessions,
            proposals,
            events,
            metadata,
            relay,
            request_timeout,
            pending: Mutex::new(Pending::default()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn self_participant(&self, public_key: &PublicKey) -> Participant {
        Participant {
            public_key: public_key.to_hex(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn get_session(&self, topic: &str) -> Option<Session> {
        self.sessions.get(&topic.to_string())
    }

    pub fn get_sessions(&self) -> Vec<Session> {
        self.sessions.values()
    }

    pub fn get_proposal(&self, id: u64) -> Option<Proposal> {
        self.proposals.get(&id)
    }

    /// Live session on `topic`, `NoMatchingTopic` otherwise.
    fn existing(&self, topic: &str) -> Result<Session> {
        let now = unix_timestamp()?;
        self.get_session(topic)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| Error::NoMatchingTopic {
                sequence: SEQUENCE,
                topic: topic.to_string(),
            })
    }

    fn no_matching_session(topic: &str) -> PeerError {
        PeerError::NoMatchingTopic {
            sequence: SEQUENCE,
            topic: topic.to_string(),
        }
    }

    async fn remove_session(&self, topic: &str) {
        self.sessions.delete(&topic.to_string());
        self.pending().settles.remove(topic);
        if let Err(e) = self.interactor.unsubscribe(topic).await {
            warn!("unsubscribe from session {topic} failed: {e}");
        }
        if let Err(e) = self.keys.remove_keys(topic) {
            debug!("no keys to remove for {topic}: {e}");
        }
    }

    /// Dapp: proposes a session over `pairing_topic`, or over a new pairing
    /// whose uri is returned alongside the proposal.
    pub async fn connect(
        &self,
        required_namespaces: ProposalNamespaces,
        optional_namespaces: Option<ProposalNamespaces>,
        properties: Option<SessionProperties>,
        pairing_topic: Option<&str>,
    ) -> Result<(Proposal, String)> {
        validate_proposal_namespaces(&required_namespaces)?;
        if let Some(optional) = &optional_namespaces {
            validate_proposal_namespaces(optional)?;
        }
        if let Some(properties) = &properties {
            validate_properties(properties)?;
        }

        let pairing = match pairing_topic {
            Some(topic) => self.pairing.get_pairing(topic).ok_or_else(|| {
                Error::NoMatchingTopic {
                    sequence: "pairing",
                    topic: topic.to_string(),
                }
            })?,
            None => self.pairing.create(None).await?.0,
        };

        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        let expiry = unix_timestamp()? + PROPOSAL_TTL;
        let params = SessionProposeParams {
            required_namespaces: required_namespaces.clone(),
            optional_namespaces: optional_namespaces.clone(),
            relays: vec![self.relay.clone()],
            proposer: self.self_participant(&self_public_key),
            session_properties: properties.clone(),
            expiry_timestamp: Some(expiry),
            pairing_topic: Some(pairing.topic.clone()),
        };
        let id = self
            .interactor
            .publish_json_rpc_request(
                &pairing.topic,
                &WcParams::SessionPropose(params.clone()),
                PublishOptions::default(),
            )
            .await?;

        let proposal = Proposal {
            id,
            pairing_topic: pairing.topic.clone(),
            proposer: params.proposer,
            required_namespaces,
            optional_namespaces,
            properties,
            relays: params.relays,
            expiry,
            is_self_proposed: true,
        };
        self.proposals.upsert(id, proposal.clone());
        info!("proposed session {id} on pairing {}", pairing.topic);
        Ok((proposal, pairing.uri))
    }

    /// Wallet: approves a received proposal with the given namespaces and
    /// settles the session.
    pub async fn approve(
        &self,
        proposal_id: u64,
        namespaces: SessionNamespaces,
        properties: Option<SessionProperties>,
    ) -> Result<Session> {
        let proposal = self
            .proposals
            .get(&proposal_id)
            .ok_or_else(|| Error::NotFound(format!("proposal {proposal_id}")))?;
        let now = unix_timestamp()?;
        if proposal.expiry <= now {
            self.proposals.delete(&proposal_id);
            return Err(PeerError::SessionRequestExpired.into());
        }
        validate_supported_namespace(&namespaces, &proposal.required_namespaces)?;
        if let Some(properties) = &properties {
            validate_properties(properties)?;
        }

        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        let peer_public_key = PublicKey::from_hex(&proposal.proposer.public_key)?;
        let session_topic = self
            .keys
            .generate_topic_from_key_agreement(&self_public_key, &peer_public_key)?;
        let relay = proposal.relays.first().cloned().unwrap_or_default();
        let response = serde_json::to_value(SessionProposeResponse {
            relay: relay.clone(),
            responder_public_key: self_public_key.to_hex(),
        })?;
        self.interactor.subscribe(&session_topic).await?;

        if let Err(e) = self
            .interactor
            .respond_with_params(
                &proposal.pairing_topic,
                proposal.id,
                WcMethod::SessionPropose,
                response,
                PublishOptions::default(),
            )
            .await
        {
            self.remove_session(&session_topic).await;
            return Err(e);
        }

        let session = Session {
            topic: session_topic.clone(),
            pairing_topic: proposal.pairing_topic.clone(),
            relay: relay.clone(),
            expiry: now + SESSION_TTL,
            self_participant: self.self_participant(&self_public_key),
            peer_participant: proposal.proposer.clone(),
            controller_key: self_public_key.to_hex(),
            namespaces: namespaces.clone(),
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            properties: properties.clone(),
            is_acknowledged: false,
            last_update_id: 0,
        };
        self.sessions.upsert(session_topic.clone(), session.clone());

        let settle = SessionSettleParams {
            relay,
            controller: session.self_participant.clone(),
            namespaces,
            session_properties: properties,
            expiry: session.expiry,
        };
        if let Err(e) = self
            .interactor
            .publish_json_rpc_request(
                &session_topic,
                &WcParams::SessionSettle(settle),
                PublishOptions::default(),
            )
            .await
        {
            self.remove_session(&session_topic).await;
            return Err(e);
        }

        self.proposals.delete(&proposal_id);
        if let Err(e) = self.pairing.activate(&proposal.pairing_topic) {
            debug!("pairing not activated: {e}");
        }
        info!("approved proposal {proposal_id}, session {session_topic}");
        Ok(session)
    }

    /// Wallet: declines a received proposal.
    pub async fn reject(&self, proposal_id: u64, reason: PeerError) -> Result<()> {
        let proposal = self
            .proposals
            .delete(&proposal_id)
            .ok_or_else(|| Error::NotFound(format!("proposal {proposal_id}")))?;
        self.interactor
            .respond_with_error_on(
                &proposal.pairing_topic,
                proposal.id,
                Some(WcMethod::SessionPropose),
                &reason,
                PublishOptions::default(),
            )
            .await?;
        info!("rejected proposal {proposal_id}: {reason}");
        Ok(())
    }

    /// Dapp: sends a request and waits for the wallet's answer.
    pub async fn request(&self, topic: &str, params: SessionRequestParams) -> Result<Value> {
        let session = self.existing(topic)?;
        validate_session_request(topic, &params)?;
        validate_chain_id_with_method_authorisation(
            &params.chain_id,
            &params.request.method,
            &session.namespaces,
        )?;
        let response = self
            .interactor
            .request(
                topic,
                &WcParams::SessionRequest(params),
                PublishOptions::default(),
                self.request_timeout,
            )
            .await?;
        response.response.into_result()
    }

    /// Wallet: answers a `wc_sessionRequest` it received.
    pub async fn respond(
        &self,
        topic: &str,
        id: u64,
        result: std::result::Result<Value, PeerError>,
    ) -> Result<()> {
        self.existing(topic)?;
        self.interactor
            .history()
            .get_record(id)
            .filter(|r| r.is_pending() && r.topic == topic)
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        match result {
            Ok(value) => {
                self.interactor
                    .respond_with_params(
                        topic,
                        id,
                        WcMethod::SessionRequest,
                        value,
                        PublishOptions::default(),
                    )
                    .await
            }
            Err(error) => {
                self.interactor
                    .respond_with_error_on(
                        topic,
                        id,
                        Some(WcMethod::SessionRequest),
                        &error,
                        PublishOptions::default(),
                    )
                    .await
            }
        }
    }

    /// Wallet: emits an event to the dapp.
    pub async fn emit(&self, topic: &str, params: SessionEventParams) -> Result<()> {
        let session = self.existing(topic)?;
        if !session.is_self_controller() {
            return Err(Error::Unauthorized("only the controller can emit events"));
        }
        validate_event(&params)?;
        validate_chain_id_with_event_authorisation(
            &params.chain_id,
            &params.event.name,
            &session.namespaces,
        )?;
        self.interactor
            .publish_json_rpc_request(
                topic,
                &WcParams::SessionEvent(params),
                PublishOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Controller: replaces the session namespaces once the peer accepted.
    pub async fn update(&self, topic: &str, namespaces: SessionNamespaces) -> Result<Session> {
        let session = self.existing(topic)?;
        if !session.is_self_controller() {
            return Err(Error::Unauthorized("only the controller can update a session"));
        }
        validate_supported_namespace(&namespaces, &session.required_namespaces)?;
        let response = self
            .interactor
            .request(
                topic,
                &WcParams::SessionUpdate(SessionUpdateParams {
                    namespaces: namespaces.clone(),
                }),
                PublishOptions::default(),
                self.request_timeout,
            )
            .await?;
        let id = response.id;
        response.response.into_result()?;
        self.sessions.update(&topic.to_string(), &mut |s| {
            s.namespaces = namespaces.clone();
            s.last_update_id = id;
        })
    }

    /// Controller: pushes the expiry one session ttl past now.
    pub async fn extend(&self, topic: &str) -> Result<Session> {
        let session = self.existing(topic)?;
        if !session.is_self_controller() {
            return Err(Error::Unauthorized("only the controller can extend a session"));
        }
        let expiry = unix_timestamp()? + SESSION_TTL;
        validate_session_extend(expiry, session.expiry)?;
        self.interactor
            .request(
                topic,
                &WcParams::SessionExtend(SessionExtendParams { expiry }),
                PublishOptions::default(),
                self.request_timeout,
            )
            .await?
            .response
            .into_result()?;
        self.sessions
            .update(&topic.to_string(), &mut |s| s.expiry = expiry)
    }

    pub async fn ping(&self, topic: &str) -> Result<()> {
        self.existing(topic)?;
        self.interactor
            .request(
                topic,
                &WcParams::SessionPing,
                PublishOptions::default(),
                self.request_timeout,
            )
            .await?
            .response
            .into_result()
            .map(|_| ())
    }

    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        self.existing(topic)?;
        self.interactor
            .publish_json_rpc_request(
                topic,
                &WcParams::SessionDelete(delete_params(&PeerError::UserDisconnected)),
                PublishOptions::default(),
            )
            .await?;
        self.remove_session(topic).await;
        info!("disconnected session {topic}");
        Ok(())
    }

    /// Dapp: asks the wallet to sign in with CACAOs over a pairing. The
    /// answer arrives in a type 1 envelope on `sha256(self public key)`.
    /// Returns the request id and the pairing uri.
    pub async fn authenticate(
        &self,
        auth_payload: AuthPayload,
        pairing_topic: Option<&str>,
    ) -> Result<(u64, String)> {
        if auth_payload.chains.is_empty()
            || !auth_payload.chains.iter().all(|c| is_chain_id_caip2_compliant(c))
        {
            return Err(ValidationError::UnsupportedChains(NAMESPACE_CHAINS_CAIP_2).into());
        }
        let pairing = match pairing_topic {
            Some(topic) => self.pairing.get_pairing(topic).ok_or_else(|| {
                Error::NoMatchingTopic {
                    sequence: "pairing",
                    topic: topic.to_string(),
                }
            })?,
            None => {
                self.pairing
                    .create(Some(vec![WcMethod::SessionAuthenticate.to_string()]))
                    .await?
                    .0
            }
        };

        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        let response_topic = self_public_key.topic();
        self.keys.set_self_participant(&response_topic, self_public_key);
        self.interactor.subscribe(&response_topic).await?;

        let expiry = unix_timestamp()? + AUTHENTICATE_REQUEST_TTL;
        let params = SessionAuthenticateParams {
            auth_payload,
            requester: self.self_participant(&self_public_key),
            expiry_timestamp: expiry,
        };
        let id = match self
            .interactor
            .publish_json_rpc_request(
                &pairing.topic,
                &WcParams::SessionAuthenticate(params),
                PublishOptions::default().with_response_topic(&response_topic),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(unsubscribe) = self.interactor.unsubscribe(&response_topic).await {
                    debug!("unsubscribe from {response_topic} failed: {unsubscribe}");
                }
                return Err(e);
            }
        };
        self.pending().authenticate.insert(
            id,
            PendingAuthenticate {
                pairing_topic: pairing.topic.clone(),
                response_topic,
                self_public_key,
                expiry,
            },
        );
        info!("sent authenticate request {id} on pairing {}", pairing.topic);
        Ok((id, pairing.uri))
    }

    fn received_authenticate(&self, id: u64) -> Result<ReceivedAuthenticate> {
        self.pending()
            .received_authenticate
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("authenticate request {id}")))
    }

    /// Wallet: answers an authenticate request with signed CACAOs and opens
    /// the session they grant.
    pub async fn approve_session_authenticate(
        &self,
        id: u64,
        cacaos: Vec<Cacao>,
    ) -> Result<Session> {
        let received = self.received_authenticate(id)?;
        let now = unix_timestamp()?;
        if cacaos.is_empty()
            || !cacaos.iter().all(|c| CacaoVerifier::verify_at(c, now))
        {
            return Err(Error::InvalidCacao);
        }
        let namespaces = namespaces_from_cacaos(&cacaos)?;

        let requester = &received.params.requester;
        let peer_public_key = PublicKey::from_hex(&requester.public_key)?;
        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        let session_topic = self
            .keys
            .generate_topic_from_key_agreement(&self_public_key, &peer_public_key)?;
        let responder = self.self_participant(&self_public_key);
        let response = serde_json::to_value(SessionAuthenticateResponse {
            cacaos: cacaos.clone(),
            responder: responder.clone(),
        })?;
        self.interactor.subscribe(&session_topic).await?;

        if let Err(e) = self
            .interactor
            .respond_with_params(
                &peer_public_key.topic(),
                id,
                WcMethod::SessionAuthenticate,
                response,
                PublishOptions::type_one(Participants {
                    sender: self_public_key,
                    receiver: peer_public_key,
                }),
            )
            .await
        {
            self.remove_session(&session_topic).await;
            return Err(e);
        }

        let session = Session {
            topic: session_topic.clone(),
            pairing_topic: received.pairing_topic.clone(),
            relay: self.relay.clone(),
            expiry: unix_timestamp()? + SESSION_TTL,
            self_participant: responder,
            peer_participant: requester.clone(),
            controller_key: self_public_key.to_hex(),
            namespaces,
            required_namespaces: ProposalNamespaces::new(),
            optional_namespaces: None,
            properties: None,
            is_acknowledged: true,
            last_update_id: 0,
        };
        self.sessions.upsert(session_topic.clone(), session.clone());
        self.pending().received_authenticate.remove(&id);
        if let Err(e) = self.pairing.activate(&received.pairing_topic) {
            debug!("pairing not activated: {e}");
        }
        info!("approved authenticate request {id}, session {session_topic}");
        Ok(session)
    }

    /// Wallet: declines an authenticate request.
    pub async fn reject_session_authenticate(&self, id: u64, reason: PeerError) -> Result<()> {
        let received = self.received_authenticate(id)?;
        let peer_public_key = PublicKey::from_hex(&received.params.requester.public_key)?;
        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        self.interactor
            .respond_with_error_on(
                &peer_public_key.topic(),
                id,
                Some(WcMethod::SessionAuthenticate),
                &reason,
                PublishOptions::type_one(Participants {
                    sender: self_public_key,
                    receiver: peer_public_key,
                }),
            )
            .await?;
        self.pending().received_authenticate.remove(&id);
        info!("rejected authenticate request {id}: {reason}");
        Ok(())
    }

    /// Routes a sign request. Methods owned by other engines are ignored.
    pub async fn on_request(&self, request: &WcRequest) -> Result<()> {
        match &request.params {
            WcParams::SessionPropose(params) => self.on_session_propose(request, params).await,
            WcParams::SessionSettle(params) => self.on_session_settle(request, params).await,
            WcParams::SessionRequest(params) => self.on_session_request(request, params).await,
            WcParams::SessionEvent(params) => self.on_session_event(request, params).await,
            WcParams::SessionUpdate(params) => self.on_session_update(request, params).await,
            WcParams::SessionExtend(params) => self.on_session_extend(request, params).await,
            WcParams::SessionPing => self.on_session_ping(request).await,
            WcParams::SessionDelete(params) => self.on_session_delete(request, params).await,
            WcParams::SessionAuthenticate(params) => {
                self.on_session_authenticate(request, params).await
            }
            _ => Ok(()),
        }
    }

    pub async fn on_response(&self, response: &WcResponse) -> Result<()> {
        match response.method() {
            WcMethod::SessionPropose => self.on_propose_response(response).await,
            WcMethod::SessionSettle => self.on_settle_response(response).await,
            WcMethod::SessionAuthenticate => self.on_authenticate_response(response).await,
            WcMethod::SessionRequest => {
                self.events
                    .emit(EngineEvent::SessionResponse {
                        id: response.id,
                        topic: response.topic.clone(),
                        result: response.response.clone(),
                    })
                    .await;
                Ok(())
            }
            method => {
                debug!("{method} response {} on {}", response.id, response.topic);
                Ok(())
            }
        }
    }

    async fn reply_error(&self, request: &WcRequest, error: PeerError) -> Result<()> {
        warn!("{} {} on {} rejected: {error}", request.method(), request.id, request.topic);
        self.interactor.respond_with_error(request, &error).await
    }

    async fn on_session_propose(
        &self,
        request: &WcRequest,
        params: &SessionProposeParams,
    ) -> Result<()> {
        let now = unix_timestamp()?;
        let expiry = params.expiry_timestamp.unwrap_or(now + PROPOSAL_TTL);
        if expiry <= now {
            warn!("proposal {} arrived expired", request.id);
            self.events
                .emit(EngineEvent::ProposalExpired { id: request.id })
                .await;
            return Ok(());
        }
        let checks = validate_proposal_namespaces(&params.required_namespaces)
            .and_then(|_| match &params.optional_namespaces {
                Some(optional) => validate_proposal_namespaces(optional),
                None => Ok(()),
            })
            .and_then(|_| match &params.session_properties {
                Some(properties) => validate_properties(properties),
                None => Ok(()),
            });
        if let Err(e) = checks {
            return self.reply_error(request, e.to_peer_error()).await;
        }

        let proposal = Proposal {
            id: request.id,
            pairing_topic: request.topic.clone(),
            proposer: params.proposer.clone(),
            required_namespaces: params.required_namespaces.clone(),
            optional_namespaces: params.optional_namespaces.clone(),
            properties: params.session_properties.clone(),
            relays: params.relays.clone(),
            expiry,
            is_self_proposed: false,
        };
        self.proposals.upsert(proposal.id, proposal.clone());
        self.pairing
            .update_metadata(&request.topic, params.proposer.metadata.clone())?;
        info!("received proposal {} on {}", request.id, request.topic);
        self.events.emit(EngineEvent::SessionProposal(proposal)).await;
        Ok(())
    }

    async fn on_propose_response(&self, response: &WcResponse) -> Result<()> {
        let Some(proposal) = self.proposals.get(&response.id) else {
            return Err(Error::NotFound(format!("proposal {}", response.id)));
        };
        let value = match &response.response {
            JsonRpcResult::Result(value) => value.clone(),
            JsonRpcResult::Error(error) => {
                self.proposals.delete(&response.id);
                let reason = PeerError::from(error.clone());
                info!("proposal {} rejected: {reason}", response.id);
                self.events
                    .emit(EngineEvent::SessionRejected {
                        proposal_id: response.id,
                        reason,
                    })
                    .await;
                return Ok(());
            }
        };
        let answer: SessionProposeResponse = serde_json::from_value(value)?;
        let self_public_key = PublicKey::from_hex(&proposal.proposer.public_key)?;
        let peer_public_key = PublicKey::from_hex(&answer.responder_public_key)?;
        let session_topic = self
            .keys
            .generate_topic_from_key_agreement(&self_public_key, &peer_public_key)?;
        self.pending()
            .settles
            .insert(session_topic.clone(), proposal.id);
        self.interactor.subscribe(&session_topic).await?;
        if let Err(e) = self.pairing.activate(&proposal.pairing_topic) {
            debug!("pairing not activated: {e}");
        }
        debug!("proposal {} accepted, awaiting settle on {session_topic}", proposal.id);
        Ok(())
    }

    async fn on_session_settle(
        &self,
        request: &WcRequest,
        params: &SessionSettleParams,
    ) -> Result<()> {
        let proposal_id = self.pending().settles.get(&request.topic).copied();
        let Some(proposal) = proposal_id.and_then(|id| self.proposals.get(&id)) else {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        };
        let checks = validate_session_namespace(
            &params.namespaces,
            &proposal.required_namespaces,
        )
        .and_then(|_| match &params.session_properties {
            Some(properties) => validate_properties(properties),
            None => Ok(()),
        });
        if let Err(e) = checks {
            return self.reply_error(request, e.to_peer_error()).await;
        }

        let self_public_key = self
            .keys
            .get_self_public_from_key_agreement(&request.topic)?;
        let session = Session {
            topic: request.topic.clone(),
            pairing_topic: proposal.pairing_topic.clone(),
            relay: params.relay.clone(),
            expiry: params.expiry,
            self_participant: self.self_participant(&self_public_key),
            peer_participant: params.controller.clone(),
            controller_key: params.controller.public_key.clone(),
            namespaces: params.namespaces.clone(),
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            properties: params.session_properties.clone(),
            is_acknowledged: true,
            last_update_id: 0,
        };
        self.sessions.upsert(session.topic.clone(), session.clone());
        self.interactor.respond_with_success(request).await?;

        self.pending().settles.remove(&request.topic);
        self.proposals.delete(&proposal.id);
        if let Err(e) = self
            .pairing
            .update_metadata(&proposal.pairing_topic, params.controller.metadata.clone())
        {
            debug!("pairing metadata not updated: {e}");
        }
        info!("session {} settled", session.topic);
        self.events.emit(EngineEvent::SessionSettled(session)).await;
        Ok(())
    }

    async fn on_settle_response(&self, response: &WcResponse) -> Result<()> {
        match &response.response {
            JsonRpcResult::Result(_) => {
                let session = self
                    .sessions
                    .update(&response.topic, &mut |s| s.is_acknowledged = true)?;
                info!("session {} acknowledged", session.topic);
                self.events.emit(EngineEvent::SessionSettled(session)).await;
            }
            JsonRpcResult::Error(error) => {
                warn!("settle of {} refused: {}", response.topic, error.message);
                self.remove_session(&response.topic).await;
                self.events
                    .emit(EngineEvent::SessionDeleted {
                        topic: response.topic.clone(),
                    })
                    .await;
            }
        }
        Ok(())
    }

    async fn on_session_request(
        &self,
        request: &WcRequest,
        params: &SessionRequestParams,
    ) -> Result<()> {
        let Ok(session) = self.existing(&request.topic) else {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        };
        let checks = validate_session_request(&request.topic, params).and_then(|_| {
            validate_chain_id_with_method_authorisation(
                &params.chain_id,
                &params.request.method,
                &session.namespaces,
            )
        });
        if let Err(e) = checks {
            return self.reply_error(request, e.to_peer_error()).await;
        }
        if params
            .request
            .expiry_timestamp
            .is_some_and(|e| e <= unix_timestamp().unwrap_or(0))
        {
            return self
                .reply_error(request, PeerError::SessionRequestExpired)
                .await;
        }
        self.events
            .emit(EngineEvent::SessionRequest {
                id: request.id,
                topic: request.topic.clone(),
                params: params.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_session_event(
        &self,
        request: &WcRequest,
        params: &SessionEventParams,
    ) -> Result<()> {
        let Ok(session) = self.existing(&request.topic) else {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        };
        if !session.is_peer_controller() {
            let reason = format!("Unauthorized event: {}", params.event.name);
            return self
                .reply_error(request, PeerError::UnauthorizedEvent(reason))
                .await;
        }
        if !session.is_acknowledged {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        }
        let checks = validate_event(params).and_then(|_| {
            validate_chain_id_with_event_authorisation(
                &params.chain_id,
                &params.event.name,
                &session.namespaces,
            )
        });
        if let Err(e) = checks {
            return self.reply_error(request, e.to_peer_error()).await;
        }
        self.interactor.respond_with_success(request).await?;
        self.events
            .emit(EngineEvent::SessionEvent {
                topic: request.topic.clone(),
                params: params.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_session_update(
        &self,
        request: &WcRequest,
        params: &SessionUpdateParams,
    ) -> Result<()> {
        let Ok(session) = self.existing(&request.topic) else {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        };
        if !session.is_peer_controller() {
            return self
                .reply_error(request, PeerError::UnauthorizedUpdateRequest)
                .await;
        }
        if let Err(e) =
            validate_session_namespace(&params.namespaces, &session.required_namespaces)
        {
            return self
                .reply_error(request, PeerError::InvalidUpdateRequest(e.to_string()))
                .await;
        }
        if request.id <= session.last_update_id {
            return self
                .reply_error(
                    request,
                    PeerError::InvalidUpdateRequest("stale update request".to_string()),
                )
                .await;
        }
        self.sessions.update(&request.topic, &mut |s| {
            s.namespaces = params.namespaces.clone();
            s.last_update_id = request.id;
        })?;
        self.interactor.respond_with_success(request).await?;
        self.events
            .emit(EngineEvent::SessionUpdated {
                topic: request.topic.clone(),
                namespaces: params.namespaces.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_session_extend(
        &self,
        request: &WcRequest,
        params: &SessionExtendParams,
    ) -> Result<()> {
        let Ok(session) = self.existing(&request.topic) else {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        };
        if !session.is_peer_controller() {
            return self
                .reply_error(request, PeerError::UnauthorizedExtendRequest)
                .await;
        }
        if let Err(e) = validate_session_extend(params.expiry, session.expiry) {
            return self.reply_error(request, e.to_peer_error()).await;
        }
        self.sessions
            .update(&request.topic, &mut |s| s.expiry = params.expiry)?;
        self.interactor.respond_with_success(request).await?;
        self.events
            .emit(EngineEvent::SessionExtended {
                topic: request.topic.clone(),
                expiry: params.expiry,
            })
            .await;
        Ok(())
    }

    async fn on_session_ping(&self, request: &WcRequest) -> Result<()> {
        if self.existing(&request.topic).is_err() {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        }
        self.interactor.respond_with_success(request).await?;
        self.events
            .emit(EngineEvent::SessionPing {
                topic: request.topic.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_session_delete(&self, request: &WcRequest, params: &DeleteParams) -> Result<()> {
        if self.get_session(&request.topic).is_none() {
            return self
                .reply_error(request, Self::no_matching_session(&request.topic))
                .await;
        }
        self.interactor.respond_with_success(request).await?;
        self.remove_session(&request.topic).await;
        info!(
            "peer deleted session {}: {} {}",
            request.topic, params.code, params.message
        );
        self.events
            .emit(EngineEvent::SessionDeleted {
                topic: request.topic.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_session_authenticate(
        &self,
        request: &WcRequest,
        params: &SessionAuthenticateParams,
    ) -> Result<()> {
        if params.expiry_timestamp <= unix_timestamp()? {
            return self
                .reply_error(request, PeerError::SessionRequestExpired)
                .await;
        }
        let chains = &params.auth_payload.chains;
        if chains.is_empty() || !chains.iter().all(|c| is_chain_id_caip2_compliant(c)) {
            return self
                .reply_error(
                    request,
                    PeerError::UnsupportedChains(NAMESPACE_CHAINS_CAIP_2.to_string()),
                )
                .await;
        }
        self.pending().received_authenticate.insert(
            request.id,
            ReceivedAuthenticate {
                pairing_topic: request.topic.clone(),
                params: params.clone(),
            },
        );
        if let Err(e) = self
            .pairing
            .update_metadata(&request.topic, params.requester.metadata.clone())
        {
            debug!("pairing metadata not updated: {e}");
        }
        info!("received authenticate request {} on {}", request.id, request.topic);
        self.events
            .emit(EngineEvent::SessionAuthenticate {
                id: request.id,
                topic: request.topic.clone(),
                params: params.clone(),
            })
            .await;
        Ok(())
    }

    async fn on_authenticate_response(&self, response: &WcResponse) -> Result<()> {
        let Some(pending) = self.pending().authenticate.remove(&response.id) else {
            return Err(Error::NotFound(format!(
                "authenticate request {}",
                response.id
            )));
        };
        let outcome = self.settle_authenticated(response, &pending).await;
        if let Err(e) = self.interactor.unsubscribe(&pending.response_topic).await {
            debug!("unsubscribe from {} failed: {e}", pending.response_topic);
        }
        match outcome {
            Ok((session, cacaos)) => {
                info!("authenticated, session {}", session.topic);
                self.events
                    .emit(EngineEvent::SessionAuthenticated { session, cacaos })
                    .await;
                Ok(())
            }
            Err(Error::Peer(reason)) => {
                info!("authenticate request {} rejected: {reason}", response.id);
                self.events
                    .emit(EngineEvent::SessionAuthenticateRejected {
                        id: response.id,
                        reason,
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                self.events
                    .emit(EngineEvent::SessionAuthenticateRejected {
                        id: response.id,
                        reason: PeerError::Generic(e.to_string()),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn settle_authenticated(
        &self,
        response: &WcResponse,
        pending: &PendingAuthenticate,
    ) -> Result<(Session, Vec<Cacao>)> {
        let value = response.response.clone().into_result()?;
        let answer: SessionAuthenticateResponse = serde_json::from_value(value)?;
        let now = unix_timestamp()?;
        if answer.cacaos.is_empty()
            || !answer.cacaos.iter().all(|c| CacaoVerifier::verify_at(c, now))
        {
            return Err(Error::InvalidCacao);
        }
        let namespaces = namespaces_from_cacaos(&answer.cacaos)?;
        let peer_public_key = PublicKey::from_hex(&answer.responder.public_key)?;
        let session_topic = self
            .keys
            .generate_topic_from_key_agreement(&pending.self_public_key, &peer_public_key)?;
        self.interactor.subscribe(&session_topic).await?;

        let session = Session {
            topic: session_topic.clone(),
            pairing_topic: pending.pairing_topic.clone(),
            relay: self.relay.clone(),
            expiry: unix_timestamp()? + SESSION_TTL,
            self_participant: self.self_participant(&pending.self_public_key),
            peer_participant: answer.responder.clone(),
            controller_key: answer.responder.public_key.clone(),
            namespaces,
            required_namespaces: ProposalNamespaces::new(),
            optional_namespaces: None,
            properties: None,
            is_acknowledged: true,
            last_update_id: 0,
        };
        self.sessions.upsert(session_topic, session.clone());
        if let Err(e) = self.pairing.activate(&pending.pairing_topic) {
            debug!("pairing not activated: {e}");
        }
        Ok((session, answer.cacaos))
    }

    /// Drops expired sessions, proposals and authenticate requests.
    pub async fn expire_stale(&self, now: u64) {
        let sessions: Vec<String> = self
            .sessions
            .values()
            .into_iter()
            .filter(|s| s.is_expired(now))
            .map(|s| s.topic)
            .collect();
        for topic in sessions {
            self.remove_session(&topic).await;
            info!("session {topic} expired");
            self.events.emit(EngineEvent::SessionExpired { topic }).await;
        }

        let proposals: Vec<u64> = self
            .proposals
            .values()
            .into_iter()
            .filter(|p| p.expiry <= now)
            .map(|p| p.id)
            .collect();
        for id in proposals {
            self.proposals.delete(&id);
            debug!("proposal {id} expired");
            self.events.emit(EngineEvent::ProposalExpired { id }).await;
        }

        let expired_authenticate: Vec<PendingAuthenticate> = {
            let mut pending = self.pending();
            pending
                .received_authenticate
                .retain(|_, r| r.params.expiry_timestamp > now);
            let ids: Vec<u64> = pending
                .authenticate
                .iter()
                .filter(|(_, p)| p.expiry <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| pending.authenticate.remove(id))
                .collect()
        };
        for pending in expired_authenticate {
            if let Err(e) = self.interactor.unsubscribe(&pending.response_topic).await {
                debug!("unsubscribe from {} failed: {e}", pending.response_topic);
            }
        }
    }
}
