/// Client
///
/// Builds every component from a `Config`, a `Storage` and a transport, and
/// runs the loops that feed inbound traffic to the engines.
///
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::codec::Codec;
use crate::config::Config;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus, EventStream, SdkError};
use crate::history::{Direction, JsonRpcHistory};
use crate::key_management::KeyManagement;
use crate::notify::NotifyEngine;
use crate::pairing::PairingEngine;
use crate::relay_interactor::RelayInteractor;
use crate::sign::SignEngine;
use crate::storage::Storage;
use crate::transport::{HttpRelay, InboundReceiver, RelayTransport};
use crate::utils::unix_timestamp;
use crate::wc_message::{WcRequest, WcResponse};

#[derive(Clone)]
struct Engines {
    interactor: Arc<RelayInteractor>,
    pairing: Arc<PairingEngine>,
    sign: Arc<SignEngine>,
    notify: Arc<NotifyEngine>,
    events: Arc<EventBus<EngineEvent>>,
}

impl Engines {
    async fn dispatch_request(&self, request: WcRequest) -> Result<()> {
        if self.pairing.on_request(&request).await? {
            return Ok(());
        }
        if request.method().is_notify_method() {
            self.notify.on_request(&request).await
        } else {
            self.sign.on_request(&request).await
        }
    }

    async fn dispatch_response(&self, response: WcResponse) -> Result<()> {
        if response.method().is_notify_method() {
            // answered through the waiting `request` call
            return Ok(());
        }
        self.sign.on_response(&response).await
    }

    async fn sweep(&self) -> Result<()> {
        let now = unix_timestamp()?;
        for record in self.interactor.history().sweep_expired(now) {
            if record.direction == Direction::Outbound {
                self.events
                    .emit(EngineEvent::RequestExpired {
                        id: record.id,
                        topic: record.topic,
                    })
                    .await;
            }
        }
        self.pairing.expire_stale(now).await;
        self.sign.expire_stale(now).await;
        self.notify.expire_stale(now).await;
        Ok(())
    }
}

pub struct Client {
    config: Config,
    keys: Arc<KeyManagement>,
    storage: Storage,
    engines: Engines,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    pub fn new(
        config: Config,
        storage: Storage,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let keys = Arc::new(KeyManagement::new(storage.keys.clone()));
        let history = Arc::new(JsonRpcHistory::new(storage.history.clone()));
        let events = Arc::new(EventBus::new(config.backpressure));
        let interactor = Arc::new(RelayInteractor::new(
            transport,
            Codec::new(keys.clone()),
            history,
            config.retry,
            config.backpressure,
        ));
        let pairing = Arc::new(PairingEngine::new(
            keys.clone(),
            interactor.clone(),
            storage.pairings.clone(),
            events.clone(),
            config.relay.clone(),
        ));
        let sign = Arc::new(SignEngine::new(
            keys.clone(),
            interactor.clone(),
            pairing.clone(),
            storage.sessions.clone(),
            storage.proposals.clone(),
            events.clone(),
            config.metadata.clone(),
            config.relay.clone(),
            config.request_timeout,
        ));
        let notify = Arc::new(NotifyEngine::new(
            keys.clone(),
            interactor.clone(),
            storage.subscriptions.clone(),
            storage.notifications.clone(),
            events.clone(),
            config.relay.clone(),
            config.keyserver_url.clone(),
            config.request_timeout,
        ));
        Self {
            config,
            keys,
            storage,
            engines: Engines {
                interactor,
                pairing,
                sign,
                notify,
                events,
            },
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// HTTP relay configured from `config`. Its polling loop has to be
    /// started by the caller with `HttpRelay::spawn_polling`.
    pub fn http_relay(config: &Config) -> Result<(Arc<HttpRelay>, InboundReceiver)> {
        let (relay, inbound) = HttpRelay::new(
            &config.relay_rpc_url,
            &config.relay_audience,
            &config.project_id,
            config.client_seed()?,
        )?;
        Ok((Arc::new(relay), inbound))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyManagement> {
        &self.keys
    }

    pub fn interactor(&self) -> &Arc<RelayInteractor> {
        &self.engines.interactor
    }

    pub fn pairing(&self) -> &PairingEngine {
        &self.engines.pairing
    }

    pub fn sign(&self) -> &SignEngine {
        &self.engines.sign
    }

    pub fn notify(&self) -> &NotifyEngine {
        &self.engines.notify
    }

    /// Only events emitted after this call are delivered.
    pub fn events(&self) -> EventStream<EngineEvent> {
        self.engines.events.subscribe()
    }

    pub fn internal_errors(&self) -> EventStream<SdkError> {
        self.engines.interactor.internal_errors()
    }

    /// Subscribes again to every live pairing, session and subscription
    /// topic, e.g. after the transport reconnected.
    pub async fn resubscribe(&self) -> Result<()> {
        let now = unix_timestamp()?;
        let mut topics: Vec<String> = self
            .storage
            .pairings
            .values()
            .into_iter()
            .filter(|p| !p.is_expired(now))
            .map(|p| p.topic)
            .collect();
        topics.extend(
            self.storage
                .sessions
                .values()
                .into_iter()
                .filter(|s| !s.is_expired(now))
                .map(|s| s.topic),
        );
        topics.extend(
            self.storage
                .subscriptions
                .values()
                .into_iter()
                .filter(|s| s.is_confirmed && s.expiry > now)
                .map(|s| s.topic),
        );
        info!("resubscribing to {} topics", topics.len());
        self.engines.interactor.batch_subscribe(&topics).await
    }

    /// Runs one expiry pass over history, pairings, sessions and
    /// subscriptions.
    pub async fn sweep(&self) -> Result<()> {
        self.engines.sweep().await
    }

    /// Resubscribes and spawns the inbound, dispatch and sweeper tasks.
    pub async fn start(&self, inbound: InboundReceiver) -> Result<()> {
        self.resubscribe().await?;

        let mut requests = self.engines.interactor.requests();
        let mut responses = self.engines.interactor.responses();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(
            self.engines.interactor.clone().run(inbound),
        ));

        let engines = self.engines.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let topic = request.topic.clone();
                let handler = engines.clone();
                let outcome =
                    tokio::spawn(async move { handler.dispatch_request(request).await })
                        .await;
                report(&engines, &topic, outcome).await;
            }
        }));

        let engines = self.engines.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                let topic = response.topic.clone();
                let handler = engines.clone();
                let outcome =
                    tokio::spawn(async move { handler.dispatch_response(response).await })
                        .await;
                report(&engines, &topic, outcome).await;
            }
        }));

        let engines = self.engines.clone();
        let period = self.config.sweep_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = engines.sweep().await {
                    warn!("expiry sweep failed: {e}");
                }
            }
        }));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
        debug!("client started");
        Ok(())
    }

    /// Stops every task `start` spawned.
    pub fn shutdown(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        info!("client stopped");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

async fn report(
    engines: &Engines,
    topic: &str,
    outcome: std::result::Result<Result<()>, tokio::task::JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("handler on {topic} failed: {e}");
            engines.interactor.report(Some(topic), e).await;
        }
        Err(e) => {
            error!("handler on {topic} panicked: {e}");
            engines.interactor.report(Some(topic), e).await;
        }
    }
}
