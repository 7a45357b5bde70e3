/// Relay interactor
///
/// Sits between the engines and the transport. Outbound it serialises,
/// encrypts, records and publishes JSON-RPC messages; inbound it decrypts,
/// de-duplicates and correlates them with history before handing them on.
///
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, warn};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use crate::codec::{Codec, EncodingType, EnvelopeType, Participants};
use crate::config::RetryPolicy;
use crate::error::{Error, PeerError, Result};
use crate::events::{BackpressurePolicy, EventBus, EventStream, SdkError};
use crate::history::{Direction, JsonRpcHistory};
use crate::message::{Message, payload_id};
use crate::transport::{EncryptedMessage, InboundMessage, InboundReceiver, RelayTransport};
use crate::utils::{sha256, unix_timestamp};
use crate::wc_message::{
    IrnParams, JsonRpcResult, UNREGISTERED_METHOD_IRN, WcMethod, WcParams,
    WcRequest, WcResponse, decode_request,
};

/// Hashes of recently seen payloads kept for de-duplication.
const SEEN_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, Default)]
pub struct PublishOptions<'a> {
    pub envelope: EnvelopeType,
    pub participants: Option<Participants>,
    /// Topic the answer arrives on when it is not the publish topic.
    pub response_topic: Option<&'a str>,
}

impl<'a> PublishOptions<'a> {
    pub fn type_one(participants: Participants) -> Self {
        Self {
            envelope: EnvelopeType::One,
            participants: Some(participants),
            response_topic: None,
        }
    }

    pub fn with_response_topic(mut self, topic: &'a str) -> Self {
        self.response_topic = Some(topic);
        self
    }
}

#[derive(Default)]
struct Seen {
    hashes: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl Seen {
    /// `false` when the hash was already there.
    fn insert(&mut self, hash: [u8; 32]) -> bool {
        if !self.hashes.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RelayInteractor {
    transport: Arc<dyn RelayTransport>,
    codec: Codec,
    history: Arc<JsonRpcHistory>,
    retry: RetryPolicy,
    topics: Mutex<HashSet<String>>,
    seen: Mutex<Seen>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<WcResponse>>>,
    client_sync_json_rpc: EventBus<WcRequest>,
    peer_response: EventBus<WcResponse>,
    internal_errors: EventBus<SdkError>,
}

impl RelayInteractor {
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        codec: Codec,
        history: Arc<JsonRpcHistory>,
        retry: RetryPolicy,
        backpressure: BackpressurePolicy,
    ) -> Self {
        Self {
            transport,
            codec,
            history,
            retry,
            topics: Mutex::new(HashSet::new()),
            seen: Mutex::new(Seen::default()),
            waiters: Mutex::new(HashMap::new()),
            client_sync_json_rpc: EventBus::new(backpressure),
            peer_response: EventBus::new(backpressure),
            internal_errors: EventBus::new(backpressure),
        }
    }

    pub fn history(&self) -> &JsonRpcHistory {
        &self.history
    }

    /// Decoded inbound requests.
    pub fn requests(&self) -> EventStream<WcRequest> {
        self.client_sync_json_rpc.subscribe()
    }

    /// Inbound responses that matched a pending request.
    pub fn responses(&self) -> EventStream<WcResponse> {
        self.peer_response.subscribe()
    }

    pub fn internal_errors(&self) -> EventStream<SdkError> {
        self.internal_errors.subscribe()
    }

    pub(crate) async fn report(&self, topic: Option<&str>, error: impl ToString) {
        self.internal_errors.emit(SdkError::new(topic, error)).await;
    }

    pub async fn subscribe(&self, topic: &str) -> Result<String> {
        let id = self.transport.subscribe(topic).await?;
        lock(&self.topics).insert(topic.to_string());
        debug!("subscribed to {topic}");
        Ok(id)
    }

    pub async fn batch_subscribe(&self, topics: &[String]) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }
        self.transport.batch_subscribe(topics).await?;
        lock(&self.topics).extend(topics.iter().cloned());
        debug!("subscribed to {} topics", topics.len());
        Ok(())
    }

    /// Also drops every history record bound to the topic.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.transport.unsubscribe(topic).await?;
        lock(&self.topics).remove(topic);
        let dropped = self.history.delete_records_by_topic(topic);
        debug!("unsubscribed from {topic}, {dropped} records dropped");
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        lock(&self.topics).contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.topics).iter().cloned().collect()
    }

    /// Encrypts and publishes, retrying until the relay acknowledges.
    async fn publish(
        &self,
        topic: &str,
        message: &Message,
        irn: IrnParams,
        options: &PublishOptions<'_>,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let bytes = self.codec.encrypt(
            topic,
            &payload,
            options.envelope,
            options.participants.as_ref(),
        )?;
        let encrypted = EncryptedMessage {
            topic: topic.to_string(),
            message: EncodingType::Base64.encode(&bytes),
            ttl: irn.ttl,
            tag: irn.tag,
            prompt: irn.prompt,
        };

        let attempts = self.retry.max_attempts.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            match timeout(
                self.retry.ack_timeout,
                self.transport.publish(encrypted.clone()),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!("published {} on {topic} (tag {})", message.id, irn.tag);
                    return Ok(());
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => {
                    reason = format!(
                        "not acknowledged within {:?}",
                        self.retry.ack_timeout
                    )
                }
            }
            warn!(
                "publish of {} on {topic} failed (attempt {attempt}/{attempts}): {reason}",
                message.id
            );
            if attempt < attempts {
                sleep(self.retry.backoff(attempt)).await;
            }
        }
        Err(Error::PublishFailed { attempts, reason })
    }

    /// Records and publishes a request, returning its id.
    pub async fn publish_json_rpc_request(
        &self,
        topic: &str,
        params: &WcParams,
        options: PublishOptions<'_>,
    ) -> Result<u64> {
        let id = payload_id();
        self.publish_request_with_id(id, topic, params, &options).await?;
        Ok(id)
    }

    async fn publish_request_with_id(
        &self,
        id: u64,
        topic: &str,
        params: &WcParams,
        options: &PublishOptions<'_>,
    ) -> Result<()> {
        let method = params.method();
        let irn = method.request_irn();
        let message = params.to_message(id)?;
        let body = serde_json::to_string(&message)?;
        self.history.set_request(
            id,
            topic,
            options.response_topic,
            &method.to_string(),
            &body,
            Some(unix_timestamp()? + irn.ttl),
            Direction::Outbound,
        )?;
        if let Err(e) = self.publish(topic, &message, irn, options).await {
            self.history.delete_record_by_id(id);
            return Err(e);
        }
        if self.history.update_record_to_acknowledged(id).is_err() {
            debug!("request {id} left history before its acknowledgement");
        }
        Ok(())
    }

    /// Publishes a request and waits for the matching response. `wait`
    /// bounds the publish and the wait together; on expiry the history record
    /// is dropped so a late answer is ignored.
    pub async fn request(
        &self,
        topic: &str,
        params: &WcParams,
        options: PublishOptions<'_>,
        wait: Duration,
    ) -> Result<WcResponse> {
        let id = payload_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters).insert(id, tx);

        let outcome = timeout(wait, async {
            self.publish_request_with_id(id, topic, params, &options)
                .await?;
            rx.await.map_err(|_| {
                Error::InternalError(format!("waiter for {id} dropped"))
            })
        })
        .await;

        lock(&self.waiters).remove(&id);
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.history.delete_record_by_id(id);
                warn!("request {id} on {topic} timed out after {wait:?}");
                Err(Error::Timeout { request_id: id, after: wait })
            }
        }
    }

    /// Answers request `id` received on `topic`.
    pub async fn respond_with_params(
        &self,
        topic: &str,
        id: u64,
        method: WcMethod,
        result: Value,
        options: PublishOptions<'_>,
    ) -> Result<()> {
        let message = Message::result(id, result);
        self.respond(topic, &message, method.response_irn(), &options)
            .await
    }

    pub async fn respond_with_success(&self, request: &WcRequest) -> Result<()> {
        self.respond_with_params(
            &request.topic,
            request.id,
            request.method(),
            Value::Bool(true),
            PublishOptions::default(),
        )
        .await
    }

    pub async fn respond_with_error(
        &self,
        request: &WcRequest,
        error: &PeerError,
    ) -> Result<()> {
        self.respond_with_error_on(
            &request.topic,
            request.id,
            Some(request.method()),
            error,
            PublishOptions::default(),
        )
        .await
    }

    /// `method` is `None` for requests whose method could not be decoded.
    pub async fn respond_with_error_on(
        &self,
        topic: &str,
        id: u64,
        method: Option<WcMethod>,
        error: &PeerError,
        options: PublishOptions<'_>,
    ) -> Result<()> {
        let irn = method.map_or(UNREGISTERED_METHOD_IRN, |m| m.reject_irn());
        debug!("rejecting {id} on {topic}: {} {error}", error.code());
        self.respond(topic, &Message::error(id, error), irn, &options)
            .await
    }

    async fn respond(
        &self,
        topic: &str,
        message: &Message,
        irn: IrnParams,
        options: &PublishOptions<'_>,
    ) -> Result<()> {
        self.publish(topic, message, irn, options).await?;
        let body = serde_json::to_string(message)?;
        if self
            .history
            .update_request_with_response(message.id, &body)
            .is_err()
        {
            debug!("no history record for response {}", message.id);
        }
        Ok(())
    }

    /// Drives the inbound stream until the transport closes it. Each message
    /// is handled in its own task; the next one starts only after it ends.
    pub async fn run(self: Arc<Self>, mut inbound: InboundReceiver) {
        while let Some(message) = inbound.recv().await {
            let topic = message.topic.clone();
            let this = self.clone();
            let outcome =
                tokio::spawn(async move { this.handle_inbound(message).await })
                    .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("inbound message on {topic} failed: {e}");
                    self.report(Some(&topic), e).await;
                }
                Err(e) => {
                    error!("inbound handler on {topic} panicked: {e}");
                    self.report(Some(&topic), e).await;
                }
            }
        }
        debug!("inbound stream closed");
    }

    /// A payload that fails to decrypt is not remembered, so a redelivery
    /// after its key arrives is still handled.
    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<()> {
        let bytes = EncodingType::Base64.decode(&inbound.message)?;
        let json = self.codec.decrypt(&inbound.topic, &bytes)?;
        if !lock(&self.seen).insert(sha256(&inbound.message)) {
            debug!("duplicate payload on {} dropped", inbound.topic);
            return Ok(());
        }
        let message: Message = serde_json::from_str(&json)?;
        if message.is_request() {
            self.on_request(&inbound.topic, message, &json).await
        } else {
            self.on_response(&inbound.topic, message, &json).await
        }
    }

    async fn on_request(&self, topic: &str, message: Message, json: &str) -> Result<()> {
        let method = message.method.clone().unwrap_or_default();
        let known = method.parse::<WcMethod>().ok();
        let expiry = match known {
            Some(m) => Some(unix_timestamp()? + m.request_irn().ttl),
            None => None,
        };
        if let Err(Error::DuplicateRecord(id)) = self.history.set_request(
            message.id,
            topic,
            None,
            &method,
            json,
            expiry,
            Direction::Inbound,
        ) {
            debug!("replayed request {id} on {topic} dropped");
            return Ok(());
        }

        let params = match decode_request(&message) {
            Ok(params) => params,
            Err(Error::UnknownMethod(method)) => {
                self.respond_with_error_on(
                    topic,
                    message.id,
                    None,
                    &PeerError::MethodUnsupported(method.clone()),
                    PublishOptions::default(),
                )
                .await?;
                return Err(Error::UnknownMethod(method));
            }
            Err(e) => {
                self.respond_with_error_on(
                    topic,
                    message.id,
                    known,
                    &PeerError::InvalidMethod,
                    PublishOptions::default(),
                )
                .await?;
                return Err(e);
            }
        };
        debug!("request {} {} on {topic}", message.id, params.method());
        self.client_sync_json_rpc
            .emit(WcRequest {
                id: message.id,
                topic: topic.to_string(),
                params,
            })
            .await;
        Ok(())
    }

    async fn on_response(&self, topic: &str, message: Message, json: &str) -> Result<()> {
        let Some(record) = self.history.get_pending_request(message.id, topic) else {
            warn!("response {} on {topic} matches no pending request", message.id);
            return Ok(());
        };
        self.history.update_request_with_response(message.id, json)?;

        let request: Message = serde_json::from_str(&record.body)?;
        let params = decode_request(&request)?;
        let response = match (message.result, message.error) {
            (_, Some(error)) => JsonRpcResult::Error(error),
            (Some(result), None) => JsonRpcResult::Result(result),
            (None, None) => {
                return Err(Error::InvalidEnvelope("response without result"));
            }
        };
        let response = WcResponse {
            id: message.id,
            topic: topic.to_string(),
            params,
            response,
        };
        debug!("response {} {} on {topic}", response.id, response.method());

        if let Some(waiter) = lock(&self.waiters).remove(&response.id) {
            let _ = waiter.send(response.clone());
        }
        self.peer_response.emit(response).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RecordStatus;
    use crate::key_management::KeyManagement;
    use crate::storage::{MemoryKeyStore, MemoryRepository};
    use crate::transport::{MemoryRelay, MemoryTransport};
    use crate::types::SessionExtendParams;

    struct Peer {
        keys: Arc<KeyManagement>,
        transport: Arc<MemoryTransport>,
        interactor: Arc<RelayInteractor>,
        inbound: Option<InboundReceiver>,
    }

    fn peer(relay: &MemoryRelay) -> Peer {
        let keys = Arc::new(KeyManagement::new(Arc::new(MemoryKeyStore::default())));
        let (transport, inbound) = relay.connect();
        let interactor = Arc::new(RelayInteractor::new(
            transport.clone(),
            Codec::new(keys.clone()),
            Arc::new(JsonRpcHistory::new(Arc::new(MemoryRepository::default()))),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(10),
                ack_timeout: Duration::from_millis(100),
            },
            BackpressurePolicy::Unbounded,
        ));
        Peer {
            keys,
            transport,
            interactor,
            inbound: Some(inbound),
        }
    }

    fn shared_topic(a: &Peer, b: &Peer) -> String {
        let (topic, key) = a.keys.generate_and_store_symmetric_key();
        b.keys.set_symmetric_key(&topic, key);
        topic
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let _ = env_logger::builder().is_test(true).try_init();
        let relay = MemoryRelay::new();
        let mut dapp = peer(&relay);
        let mut wallet = peer(&relay);
        let topic = shared_topic(&dapp, &wallet);

        dapp.interactor.subscribe(&topic).await.unwrap();
        wallet.interactor.subscribe(&topic).await.unwrap();
        tokio::spawn(dapp.interactor.clone().run(dapp.inbound.take().unwrap()));
        tokio::spawn(wallet.interactor.clone().run(wallet.inbound.take().unwrap()));

        let mut requests = wallet.interactor.requests();
        let responder = wallet.interactor.clone();
        tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.method(), WcMethod::SessionExtend);
            responder.respond_with_success(&request).await.unwrap();
        });

        let params = WcParams::SessionExtend(SessionExtendParams { expiry: 10 });
        let response = dapp
            .interactor
            .request(&topic, &params, PublishOptions::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.params, params);
        assert_eq!(response.response, JsonRpcResult::Result(Value::Bool(true)));

        let record = dapp.interactor.history().get_record(response.id).unwrap();
        assert!(!record.is_pending());
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let wallet = peer(&relay);
        let topic = shared_topic(&dapp, &wallet);

        let mut responses = dapp.interactor.responses();
        let bytes = wallet
            .interactor
            .codec
            .encrypt(
                &topic,
                &serde_json::to_string(&Message::result(42, Value::Bool(true))).unwrap(),
                EnvelopeType::Zero,
                None,
            )
            .unwrap();
        dapp.interactor
            .handle_inbound(InboundMessage {
                topic: topic.clone(),
                message: EncodingType::Base64.encode(&bytes),
                published_at: 0,
                tag: 0,
            })
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), responses.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_duplicate_payload_is_handled_once() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let wallet = peer(&relay);
        let topic = shared_topic(&dapp, &wallet);

        let mut requests = wallet.interactor.requests();
        let message = WcParams::SessionPing.to_message(7).unwrap();
        let bytes = dapp
            .interactor
            .codec
            .encrypt(&topic, &serde_json::to_string(&message).unwrap(), EnvelopeType::Zero, None)
            .unwrap();
        let inbound = InboundMessage {
            topic: topic.clone(),
            message: EncodingType::Base64.encode(&bytes),
            published_at: 0,
            tag: 0,
        };
        wallet.interactor.handle_inbound(inbound.clone()).await.unwrap();
        wallet.interactor.handle_inbound(inbound).await.unwrap();

        assert_eq!(requests.recv().await.unwrap().id, 7);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), requests.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_payload_is_handled_once_its_key_arrives() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let wallet = peer(&relay);
        let (topic, key) = dapp.keys.generate_and_store_symmetric_key();

        let mut requests = wallet.interactor.requests();
        let message = WcParams::SessionPing.to_message(11).unwrap();
        let bytes = dapp
            .interactor
            .codec
            .encrypt(&topic, &serde_json::to_string(&message).unwrap(), EnvelopeType::Zero, None)
            .unwrap();
        let inbound = InboundMessage {
            topic: topic.clone(),
            message: EncodingType::Base64.encode(&bytes),
            published_at: 0,
            tag: 0,
        };
        assert!(wallet.interactor.handle_inbound(inbound.clone()).await.is_err());

        wallet.keys.set_symmetric_key(&topic, key);
        wallet.interactor.handle_inbound(inbound).await.unwrap();
        assert_eq!(requests.recv().await.unwrap().id, 11);
    }

    #[tokio::test]
    async fn test_unknown_method_is_answered() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let wallet = peer(&relay);
        let topic = shared_topic(&dapp, &wallet);

        let message = Message::request(9, "wc_somethingNew", serde_json::json!({}));
        let bytes = dapp
            .interactor
            .codec
            .encrypt(&topic, &serde_json::to_string(&message).unwrap(), EnvelopeType::Zero, None)
            .unwrap();
        let result = wallet
            .interactor
            .handle_inbound(InboundMessage {
                topic: topic.clone(),
                message: EncodingType::Base64.encode(&bytes),
                published_at: 0,
                tag: 0,
            })
            .await;
        assert!(matches!(result, Err(Error::UnknownMethod(_))));

        let published = wallet.transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].tag, 0);
        let record = wallet.interactor.history().get_record(9).unwrap();
        assert!(record.response.unwrap().contains("10001"));
    }

    #[tokio::test]
    async fn test_acknowledged_request_stays_pending() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let (topic, _) = dapp.keys.generate_and_store_symmetric_key();

        let id = dapp
            .interactor
            .publish_json_rpc_request(&topic, &WcParams::SessionPing, PublishOptions::default())
            .await
            .unwrap();
        let record = dapp.interactor.history().get_record(id).unwrap();
        assert_eq!(record.status, RecordStatus::Acknowledged);
        assert!(dapp.interactor.history().get_pending_request(id, &topic).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_gives_up_after_retries() {
        let relay = MemoryRelay::new();
        let dapp = peer(&relay);
        let (topic, _) = dapp.keys.generate_and_store_symmetric_key();
        dapp.transport.set_acknowledge(false);

        let result = dapp
            .interactor
            .publish_json_rpc_request(&topic, &WcParams::SessionPing, PublishOptions::default())
            .await;
        assert!(matches!(result, Err(Error::PublishFailed { attempts: 2, .. })));
        assert_eq!(dapp.transport.published().len(), 2);
        assert!(dapp.interactor.history().get_pending_records().is_empty());
    }
}
