/// Transport
///
/// Publish/subscribe contract of the relay, an HTTP implementation that
/// speaks the `irn_*` JSON-RPC methods, and an in-process relay that several
/// clients can share in tests and demos.
///
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::message::ErrorObject;
use crate::relay_auth::RelayAuth;
use crate::utils::unix_timestamp;

/// Outbound relay message, `message` is the base64 encoded envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub topic: String,
    pub message: String,
    pub ttl: u64,
    pub tag: u32,
    pub prompt: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub message: String,
    #[serde(rename = "publishedAt", default)]
    pub published_at: u64,
    #[serde(default)]
    pub tag: u32,
}

pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Resolves once the relay acknowledged the message.
    async fn publish(&self, message: EncryptedMessage) -> Result<()>;

    /// Returns the relay's subscription id.
    async fn subscribe(&self, topic: &str) -> Result<String>;

    async fn batch_subscribe(&self, topics: &[String]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(topics.len());
        for topic in topics {
            ids.push(self.subscribe(topic).await?);
        }
        Ok(ids)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RelayMethod {
    #[serde(rename = "irn_publish")]
    Publish,

    #[serde(rename = "irn_subscribe")]
    Subscribe,

    #[serde(rename = "irn_batchSubscribe")]
    BatchSubscribe,

    #[serde(rename = "irn_unsubscribe")]
    Unsubscribe,

    #[serde(rename = "irn_fetchMessages")]
    FetchMessages,
}

#[derive(Serialize)]
struct RelayRequest {
    jsonrpc: &'static str,
    method: RelayMethod,
    params: Value,
    id: u64,
}

#[derive(Deserialize, Debug)]
struct RelayResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchMessageResult {
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    pub messages: Vec<InboundMessage>,
}

/// Relay reached over its HTTP JSON-RPC endpoint. There is no push channel,
/// so inbound messages are fetched by `poll`.
pub struct HttpRelay {
    rpc: String,
    project_id: String,
    jwt: String,
    client: Client,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<String, String>>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

impl HttpRelay {
    pub fn new(
        rpc: &str,
        jwt_audience: &str,
        project_id: &str,
        client_seed: [u8; 32],
    ) -> Result<(Self, InboundReceiver)> {
        let jwt = RelayAuth::new(client_seed).sign_jwt(jwt_audience)?;
        let (inbound, receiver) = mpsc::unbounded_channel();
        let initial: u16 = rand::thread_rng().r#gen();
        Ok((
            Self {
                rpc: rpc.to_string(),
                project_id: project_id.to_string(),
                jwt,
                client: Client::new(),
                next_id: AtomicU64::new(initial as u64),
                subscriptions: Mutex::new(HashMap::new()),
                inbound,
            },
            receiver,
        ))
    }

    fn get_id(&self) -> Result<u64> {
        let extra = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(unix_timestamp()? * 1_000_000 + extra % 1_000_000)
    }

    async fn request(&self, method: RelayMethod, params: Value) -> Result<Value> {
        let request = RelayRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.get_id()?,
        };
        let response = self
            .client
            .post(&self.rpc)
            .query(&[("projectId", &self.project_id)])
            .bearer_auth(&self.jwt)
            .json(&request)
            .send()
            .await?
            .json::<RelayResponse>()
            .await?;

        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(Error::Transport(format!(
                "relay error {}: {}",
                error.code, error.message
            ))),
            (None, None) => {
                Err(Error::Transport("relay response without result".into()))
            }
        }
    }

    pub async fn fetch_messages(&self, topic: &str) -> Result<FetchMessageResult> {
        let result = self
            .request(RelayMethod::FetchMessages, json!({ "topic": topic }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Fetches every subscribed topic once and forwards what arrived.
    pub async fn poll(&self) -> Result<usize> {
        let topics: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        let mut forwarded = 0;
        for topic in topics {
            loop {
                let fetched = self.fetch_messages(&topic).await?;
                forwarded += fetched.messages.len();
                for message in fetched.messages {
                    if self.inbound.send(message).is_err() {
                        return Err(Error::Transport("inbound closed".into()));
                    }
                }
                if !fetched.has_more {
                    break;
                }
            }
        }
        Ok(forwarded)
    }

    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while !self.inbound.is_closed() {
                ticker.tick().await;
                match self.poll().await {
                    Ok(0) => {}
                    Ok(count) => debug!("fetched {count} relay messages"),
                    Err(e) => warn!("relay poll failed: {e}"),
                }
            }
        })
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn publish(&self, message: EncryptedMessage) -> Result<()> {
        self.request(RelayMethod::Publish, serde_json::to_value(&message)?)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<String> {
        let id = self
            .request(RelayMethod::Subscribe, json!({ "topic": topic }))
            .await?;
        let id = id.as_str().unwrap_or_default().to_string();
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), id.clone());
        Ok(id)
    }

    async fn batch_subscribe(&self, topics: &[String]) -> Result<Vec<String>> {
        let ids = self
            .request(RelayMethod::BatchSubscribe, json!({ "topics": topics }))
            .await?;
        let ids: Vec<String> = serde_json::from_value(ids)?;
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (topic, id) in topics.iter().zip(&ids) {
            subscriptions.insert(topic.clone(), id.clone());
        }
        Ok(ids)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let id = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.request(
            RelayMethod::Unsubscribe,
            json!({ "topic": topic, "id": id }),
        )
        .await?;
        Ok(())
    }
}

struct Peer {
    topics: HashSet<String>,
    inbox: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct RelayState {
    next_peer: usize,
    peers: HashMap<usize, Peer>,
    /// Every message published so far with the peer that sent it, replayed
    /// to late subscribers like the real relay's mailbox.
    mailbox: Vec<(usize, InboundMessage)>,
}

/// In-process relay hub.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> (Arc<MemoryTransport>, InboundReceiver) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_peer;
        state.next_peer += 1;
        state.peers.insert(
            id,
            Peer {
                topics: HashSet::new(),
                inbox,
            },
        );
        (
            Arc::new(MemoryTransport {
                id,
                relay: self.clone(),
                acknowledge: AtomicBool::new(true),
                published: Mutex::new(Vec::new()),
            }),
            receiver,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MemoryTransport {
    id: usize,
    relay: MemoryRelay,
    acknowledge: AtomicBool,
    published: Mutex<Vec<EncryptedMessage>>,
}

impl MemoryTransport {
    /// With acknowledgements off, `publish` never resolves and delivers
    /// nothing.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.acknowledge.store(acknowledge, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.relay
            .lock()
            .peers
            .get(&self.id)
            .is_some_and(|peer| peer.topics.contains(topic))
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.relay
            .lock()
            .peers
            .get(&self.id)
            .map(|peer| peer.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages this peer handed to the relay, acknowledged or not.
    pub fn published(&self) -> Vec<EncryptedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn publish(&self, message: EncryptedMessage) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());

        if !self.acknowledge.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let inbound = InboundMessage {
            topic: message.topic.clone(),
            message: message.message,
            published_at: unix_timestamp()?,
            tag: message.tag,
        };
        let mut state = self.relay.lock();
        for (id, peer) in &state.peers {
            if *id != self.id && peer.topics.contains(&message.topic) {
                let _ = peer.inbox.send(inbound.clone());
            }
        }
        state.mailbox.push((self.id, inbound));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<String> {
        let mut state = self.relay.lock();
        let RelayState { peers, mailbox, .. } = &mut *state;
        let peer = peers
            .get_mut(&self.id)
            .ok_or_else(|| Error::Transport("peer disconnected".into()))?;
        if peer.topics.insert(topic.to_string()) {
            for (_, message) in mailbox
                .iter()
                .filter(|(from, m)| *from != self.id && m.topic == topic)
            {
                let _ = peer.inbox.send(message.clone());
            }
        }
        Ok(format!("{}:{topic}", self.id))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if let Some(peer) = self.relay.lock().peers.get_mut(&self.id) {
            peer.topics.remove(topic);
        }
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.relay.lock().peers.remove(&self.id);
    }
}
