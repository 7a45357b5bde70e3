/// Events
///
/// Fan-out bus the engines publish on. Every subscriber gets its own copy of
/// each event; what happens when a subscriber falls behind is decided by the
/// bus's `BackpressurePolicy`.
///
use std::sync::{Mutex, PoisonError};

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::cacao::Cacao;
use crate::error::PeerError;
use crate::types::{
    Notification, Proposal, Session, SessionAuthenticateParams,
    SessionEventParams, SessionNamespaces, SessionRequestParams, Subscription,
};
use crate::wc_message::JsonRpcResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Never drops and never blocks. A subscriber that stops reading grows
    /// its queue without limit.
    #[default]
    Unbounded,
    /// Slow subscribers lose the oldest events beyond `n`.
    DropOldest(usize),
    /// `emit` waits until every subscriber has room for the event.
    Block(usize),
}

enum Subscriber<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        match self {
            Subscriber::Unbounded(tx) => Subscriber::Unbounded(tx.clone()),
            Subscriber::Bounded(tx) => Subscriber::Bounded(tx.clone()),
        }
    }
}

impl<T> Subscriber<T> {
    fn is_closed(&self) -> bool {
        match self {
            Subscriber::Unbounded(tx) => tx.is_closed(),
            Subscriber::Bounded(tx) => tx.is_closed(),
        }
    }
}

enum Channel<T> {
    Broadcast(broadcast::Sender<T>),
    Fanout(Mutex<Vec<Subscriber<T>>>),
}

pub struct EventBus<T> {
    policy: BackpressurePolicy,
    channel: Channel<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(policy: BackpressurePolicy) -> Self {
        let channel = match policy {
            BackpressurePolicy::DropOldest(capacity) => {
                let (tx, _) = broadcast::channel(capacity.max(1));
                Channel::Broadcast(tx)
            }
            BackpressurePolicy::Unbounded | BackpressurePolicy::Block(_) => {
                Channel::Fanout(Mutex::new(Vec::new()))
            }
        };
        Self { policy, channel }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Only events emitted after this call are delivered to the stream.
    pub fn subscribe(&self) -> EventStream<T> {
        match &self.channel {
            Channel::Broadcast(tx) => EventStream::Broadcast(tx.subscribe()),
            Channel::Fanout(subscribers) => {
                let mut subscribers =
                    subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                match self.policy {
                    BackpressurePolicy::Block(capacity) => {
                        let (tx, rx) = mpsc::channel(capacity.max(1));
                        subscribers.push(Subscriber::Bounded(tx));
                        EventStream::Bounded(rx)
                    }
                    _ => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        subscribers.push(Subscriber::Unbounded(tx));
                        EventStream::Unbounded(rx)
                    }
                }
            }
        }
    }

    pub async fn emit(&self, event: T) {
        match &self.channel {
            Channel::Broadcast(tx) => {
                // no receivers is not an error
                let _ = tx.send(event);
            }
            Channel::Fanout(subscribers) => {
                let targets: Vec<Subscriber<T>> = subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for target in &targets {
                    match target {
                        Subscriber::Unbounded(tx) => {
                            let _ = tx.send(event.clone());
                        }
                        Subscriber::Bounded(tx) => {
                            let _ = tx.send(event.clone()).await;
                        }
                    }
                }
                subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|s| !s.is_closed());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match &self.channel {
            Channel::Broadcast(tx) => tx.receiver_count(),
            Channel::Fanout(subscribers) => subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|s| !s.is_closed())
                .count(),
        }
    }
}

pub enum EventStream<T> {
    Broadcast(broadcast::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

impl<T: Clone> EventStream<T> {
    /// `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            EventStream::Broadcast(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("event stream lagged, {count} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            EventStream::Unbounded(rx) => rx.recv().await,
            EventStream::Bounded(rx) => rx.recv().await,
        }
    }
}

/// Failure raised while handling inbound traffic, reported on the
/// internal error stream instead of ending the inbound loop.
#[derive(Clone, Debug, PartialEq)]
pub struct SdkError {
    pub topic: Option<String>,
    pub message: String,
}

impl SdkError {
    pub fn new(topic: Option<&str>, message: impl ToString) -> Self {
        Self {
            topic: topic.map(str::to_string),
            message: message.to_string(),
        }
    }
}

/// Everything the engines report to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    PairingPing { topic: String },
    PairingDeleted { topic: String },
    PairingExpired { topic: String },
    SessionProposal(Proposal),
    ProposalExpired { id: u64 },
    SessionRejected { proposal_id: u64, reason: PeerError },
    SessionSettled(Session),
    SessionRequest {
        id: u64,
        topic: String,
        params: SessionRequestParams,
    },
    SessionResponse {
        id: u64,
        topic: String,
        result: JsonRpcResult,
    },
    SessionEvent { topic: String, params: SessionEventParams },
    SessionUpdated { topic: String, namespaces: SessionNamespaces },
    SessionExtended { topic: String, expiry: u64 },
    SessionPing { topic: String },
    SessionDeleted { topic: String },
    SessionExpired { topic: String },
    RequestExpired { id: u64, topic: String },
    SessionAuthenticate {
        id: u64,
        topic: String,
        params: SessionAuthenticateParams,
    },
    SessionAuthenticated { session: Session, cacaos: Vec<Cacao> },
    SessionAuthenticateRejected { id: u64, reason: PeerError },
    NotifySubscribed(Subscription),
    NotifyMessage(Notification),
    NotifyDeleted { topic: String },
}
