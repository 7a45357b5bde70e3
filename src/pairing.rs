/// Pairing
///
/// Lifecycle of the symmetric-key channel a dapp and a wallet share before
/// any session exists: `Proposed` while only the uri is known, `Active` once
/// a session settled over it, and gone after a delete or expiry.
///
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::constants::{ACTIVE_PAIRING_TTL, PROPOSED_PAIRING_TTL};
use crate::error::{Error, PeerError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::key_management::KeyManagement;
use crate::relay_interactor::{PublishOptions, RelayInteractor};
use crate::storage::Repository;
use crate::types::{DeleteParams, Metadata, Pairing, PairingState, Relay};
use crate::uri::WalletConnectUri;
use crate::utils::unix_timestamp;
use crate::wc_message::{WcMethod, WcParams, WcRequest};

const SEQUENCE: &str = "pairing";

pub struct PairingEngine {
    keys: Arc<KeyManagement>,
    interactor: Arc<RelayInteractor>,
    pairings: Arc<dyn Repository<String, Pairing>>,
    events: Arc<EventBus<EngineEvent>>,
    relay: Relay,
    registered: Mutex<HashSet<WcMethod>>,
}

impl PairingEngine {
    pub fn new(
        keys: Arc<KeyManagement>,
        interactor: Arc<RelayInteractor>,
        pairings: Arc<dyn Repository<String, Pairing>>,
        events: Arc<EventBus<EngineEvent>>,
        relay: Relay,
    ) -> Self {
        Self {
            keys,
            interactor,
            pairings,
            events,
            relay,
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// Methods other engines accept on pairing topics. Registering twice is
    /// harmless.
    pub fn register(&self, methods: &[WcMethod]) {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(methods.iter().copied());
    }

    pub fn is_registered(&self, method: WcMethod) -> bool {
        method.is_pairing_method()
            || self
                .registered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&method)
    }

    /// Dapp side: new pairing plus the uri to show the wallet.
    pub async fn create(
        &self,
        methods: Option<Vec<String>>,
    ) -> Result<(Pairing, WalletConnectUri)> {
        let (topic, sym_key) = self.keys.generate_and_store_symmetric_key();
        let expiry = unix_timestamp()? + PROPOSED_PAIRING_TTL;

        let mut uri = WalletConnectUri::new(topic.clone(), sym_key, self.relay.clone());
        uri.expiry_timestamp = Some(expiry);
        uri.methods = methods.clone();

        let pairing = Pairing {
            topic: topic.clone(),
            relay: self.relay.clone(),
            expiry,
            state: PairingState::Proposed,
            methods,
            peer_metadata: None,
            uri: uri.to_string(),
        };
        self.pairings.insert(topic.clone(), pairing.clone())?;
        if let Err(e) = self.interactor.subscribe(&topic).await {
            self.pairings.delete(&topic);
            let _ = self.keys.remove_keys(&topic);
            return Err(e);
        }
        info!("created pairing {topic}");
        Ok((pairing, uri))
    }

    /// Wallet side: stores the uri's key and listens on its topic.
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let uri = WalletConnectUri::parse(uri).ok_or(Error::InvalidUri)?;
        let now = unix_timestamp()?;
        if uri.expiry_timestamp.is_some_and(|expiry| expiry <= now) {
            warn!("pairing uri for {} already expired", uri.topic);
            return Err(Error::InvalidUri);
        }
        if let Some(existing) = self.pairings.get(&uri.topic) {
            if existing.is_active() {
                return Err(Error::AlreadyExists(format!("pairing {}", uri.topic)));
            }
        }

        let pairing = Pairing {
            topic: uri.topic.clone(),
            relay: uri.relay.clone(),
            expiry: uri.expiry_timestamp.unwrap_or(now + PROPOSED_PAIRING_TTL),
            state: PairingState::Proposed,
            methods: uri.methods.clone(),
            peer_metadata: None,
            uri: uri.to_string(),
        };
        self.keys.set_symmetric_key(&uri.topic, uri.sym_key);
        self.pairings.upsert(uri.topic.clone(), pairing.clone());
        self.interactor.subscribe(&uri.topic).await?;
        info!("paired on {}", uri.topic);
        Ok(pairing)
    }

    fn existing(&self, topic: &str) -> Result<Pairing> {
        self.pairings.get(&topic.to_string()).ok_or_else(|| {
            Error::NoMatchingTopic {
                sequence: SEQUENCE,
                topic: topic.to_string(),
            }
        })
    }

    pub fn get_pairing(&self, topic: &str) -> Option<Pairing> {
        self.pairings.get(&topic.to_string())
    }

    /// Pairings that have not expired yet.
    pub fn get_pairings(&self) -> Result<Vec<Pairing>> {
        let now = unix_timestamp()?;
        Ok(self
            .pairings
            .values()
            .into_iter()
            .filter(|p| !p.is_expired(now))
            .collect())
    }

    /// Moves the pairing to `Active` and extends it to the active ttl.
    pub fn activate(&self, topic: &str) -> Result<Pairing> {
        self.existing(topic)?;
        let expiry = unix_timestamp()? + ACTIVE_PAIRING_TTL;
        let pairing = self.pairings.update(&topic.to_string(), &mut |p| {
            p.state = PairingState::Active;
            p.expiry = expiry;
        })?;
        debug!("pairing {topic} active until {expiry}");
        Ok(pairing)
    }

    pub fn update_expiry(&self, topic: &str, expiry: u64) -> Result<Pairing> {
        self.existing(topic)?;
        self.pairings
            .update(&topic.to_string(), &mut |p| p.expiry = expiry)
    }

    pub fn update_metadata(&self, topic: &str, metadata: Metadata) -> Result<Pairing> {
        self.existing(topic)?;
        self.pairings.update(&topic.to_string(), &mut |p| {
            p.peer_metadata = Some(metadata.clone())
        })
    }

    pub async fn ping(&self, topic: &str, wait: Duration) -> Result<()> {
        self.existing(topic)?;
        self.interactor
            .request(topic, &WcParams::PairingPing, PublishOptions::default(), wait)
            .await?
            .response
            .into_result()
            .map(|_| ())
    }

    /// Tells the peer the pairing is gone, then forgets it locally.
    pub async fn disconnect(&self, topic: &str) -> Result<()> {
        self.existing(topic)?;
        let reason = PeerError::UserDisconnected;
        let params = WcParams::PairingDelete(DeleteParams {
            code: reason.code(),
            message: reason.to_string(),
        });
        self.interactor
            .publish_json_rpc_request(topic, &params, PublishOptions::default())
            .await?;
        self.remove(topic).await;
        info!("disconnected pairing {topic}");
        Ok(())
    }

    async fn remove(&self, topic: &str) {
        self.pairings.delete(&topic.to_string());
        if let Err(e) = self.interactor.unsubscribe(topic).await {
            warn!("unsubscribe from pairing {topic} failed: {e}");
        }
        if let Err(e) = self.keys.remove_keys(topic) {
            debug!("no keys to remove for {topic}: {e}");
        }
    }

    /// Handles requests that arrived on a pairing topic. Returns `false` when
    /// the request belongs to another engine.
    pub async fn on_request(&self, request: &WcRequest) -> Result<bool> {
        if self.get_pairing(&request.topic).is_none() {
            return Ok(false);
        }
        match request.method() {
            WcMethod::PairingPing => {
                self.interactor.respond_with_success(request).await?;
                self.events
                    .emit(EngineEvent::PairingPing {
                        topic: request.topic.clone(),
                    })
                    .await;
                Ok(true)
            }
            WcMethod::PairingDelete => {
                self.remove(&request.topic).await;
                info!("peer deleted pairing {}", request.topic);
                self.events
                    .emit(EngineEvent::PairingDeleted {
                        topic: request.topic.clone(),
                    })
                    .await;
                Ok(true)
            }
            method if !self.is_registered(method) => {
                warn!("{method} is not registered on pairing {}", request.topic);
                self.interactor
                    .respond_with_error(
                        request,
                        &PeerError::MethodUnsupported(method.to_string()),
                    )
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drops every pairing whose expiry passed.
    pub async fn expire_stale(&self, now: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .pairings
            .values()
            .into_iter()
            .filter(|p| p.is_expired(now))
            .map(|p| p.topic)
            .collect();
        for topic in &expired {
            self.remove(topic).await;
            info!("pairing {topic} expired");
            self.events
                .emit(EngineEvent::PairingExpired {
                    topic: topic.clone(),
                })
                .await;
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::config::RetryPolicy;
    use crate::events::BackpressurePolicy;
    use crate::history::JsonRpcHistory;
    use crate::storage::{MemoryKeyStore, MemoryRepository};
    use crate::transport::{MemoryRelay, MemoryTransport};

    fn engine(relay: &MemoryRelay) -> (PairingEngine, Arc<MemoryTransport>) {
        let keys = Arc::new(KeyManagement::new(Arc::new(MemoryKeyStore::default())));
        let (transport, _inbound) = relay.connect();
        let interactor = Arc::new(RelayInteractor::new(
            transport.clone(),
            Codec::new(keys.clone()),
            Arc::new(JsonRpcHistory::new(Arc::new(MemoryRepository::default()))),
            RetryPolicy::default(),
            BackpressurePolicy::Unbounded,
        ));
        let engine = PairingEngine::new(
            keys,
            interactor,
            Arc::new(MemoryRepository::default()),
            Arc::new(EventBus::new(BackpressurePolicy::Unbounded)),
            Relay::default(),
        );
        (engine, transport)
    }

    #[tokio::test]
    async fn test_create_then_pair() {
        let relay = MemoryRelay::new();
        let (dapp, dapp_transport) = engine(&relay);
        let (wallet, wallet_transport) = engine(&relay);

        let (pairing, uri) = dapp
            .create(Some(vec!["wc_sessionAuthenticate".to_string()]))
            .await
            .unwrap();
        assert_eq!(pairing.state, PairingState::Proposed);
        assert!(dapp_transport.is_subscribed(&pairing.topic));

        let paired = wallet.pair(&uri.to_string()).await.unwrap();
        assert_eq!(paired.topic, pairing.topic);
        assert_eq!(paired.expiry, pairing.expiry);
        assert_eq!(paired.methods, pairing.methods);
        assert!(wallet_transport.is_subscribed(&pairing.topic));
        assert_eq!(
            wallet.keys.get_symmetric_key(&pairing.topic).unwrap(),
            dapp.keys.get_symmetric_key(&pairing.topic).unwrap()
        );

        let active = wallet.activate(&pairing.topic).unwrap();
        assert!(active.is_active());
        assert!(active.expiry > pairing.expiry);
        assert!(matches!(
            wallet.pair(&uri.to_string()).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_pair_rejects_bad_uri() {
        let relay = MemoryRelay::new();
        let (wallet, _) = engine(&relay);
        assert!(matches!(wallet.pair("wc:@2").await, Err(Error::InvalidUri)));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let relay = MemoryRelay::new();
        let (engine, _) = engine(&relay);
        assert!(!engine.is_registered(WcMethod::SessionPropose));
        engine.register(&[WcMethod::SessionPropose]);
        engine.register(&[WcMethod::SessionPropose, WcMethod::SessionAuthenticate]);
        assert!(engine.is_registered(WcMethod::SessionPropose));
        assert!(engine.is_registered(WcMethod::PairingPing));
        assert!(!engine.is_registered(WcMethod::SessionRequest));
    }

    #[tokio::test]
    async fn test_expire_stale() {
        let relay = MemoryRelay::new();
        let (dapp, transport) = engine(&relay);
        let mut events = dapp.events.subscribe();
        let (pairing, _) = dapp.create(None).await.unwrap();

        assert!(dapp.expire_stale(pairing.expiry - 1).await.is_empty());
        assert_eq!(dapp.expire_stale(pairing.expiry).await, vec![pairing.topic.clone()]);
        assert!(dapp.get_pairing(&pairing.topic).is_none());
        assert!(!transport.is_subscribed(&pairing.topic));
        assert!(dapp.keys.get_symmetric_key(&pairing.topic).is_err());
        assert_eq!(
            events.recv().await,
            Some(EngineEvent::PairingExpired { topic: pairing.topic })
        );
    }

    #[tokio::test]
    async fn test_disconnect_removes_state() {
        let relay = MemoryRelay::new();
        let (dapp, transport) = engine(&relay);
        let (pairing, _) = dapp.create(None).await.unwrap();

        dapp.disconnect(&pairing.topic).await.unwrap();
        assert_eq!(transport.published()[0].tag, 1000);
        assert!(dapp.get_pairing(&pairing.topic).is_none());
        assert!(matches!(
            dapp.disconnect(&pairing.topic).await,
            Err(Error::NoMatchingTopic { .. })
        ));
    }
}
