/// Notify
///
/// Wallet side of notify subscriptions. A subscription is requested from the
/// dapp with a signed `notify_subscription` JWT; afterwards the dapp pushes
/// `wc_notifyMessage` requests on the subscription topic.
///
/// Dapp keys are handed in by the caller, resolving `did.json` and
/// registering identity keys with the keyserver happen elsewhere.
///
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::Participants;
use crate::constants::{
    DID_DELIMITER, DID_METHOD_WEB, DID_PREFIX, NOTIFY_ACT_DELETE,
    NOTIFY_ACT_MESSAGE, NOTIFY_ACT_MESSAGE_RESPONSE, NOTIFY_ACT_SUBSCRIPTION,
    NOTIFY_ACT_SUBSCRIPTION_RESPONSE, NOTIFY_JWT_TTL, SUBSCRIPTION_TTL,
};
use crate::error::{Error, PeerError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::jwt::{NotifyClaims, decode_did_jwt, encode_did_jwt};
use crate::key_management::{KeyManagement, PublicKey};
use crate::relay_interactor::{PublishOptions, RelayInteractor};
use crate::storage::Repository;
use crate::types::{
    Metadata, Notification, NotifyDeleteParams, NotifyMessageParams,
    NotifyResponseParams, NotifySubscribeParams, Relay, Subscription,
};
use crate::utils::{encode_did_pkh, encode_ed25519_did_key, unix_timestamp};
use crate::wc_message::{WcMethod, WcParams, WcRequest};

const SEQUENCE: &str = "subscription";

/// Public keys a dapp publishes in its `did.json`.
#[derive(Clone, Debug, PartialEq)]
pub struct DappIdentity {
    pub domain: String,
    pub key_agreement: PublicKey,
    /// `did:key` of the dapp's ed25519 authentication key.
    pub authentication_key: String,
    pub metadata: Option<Metadata>,
}

fn did_web(domain: &str) -> String {
    format!("{DID_PREFIX}{DID_DELIMITER}{DID_METHOD_WEB}{DID_DELIMITER}{domain}")
}

pub struct NotifyEngine {
    keys: Arc<KeyManagement>,
    interactor: Arc<RelayInteractor>,
    subscriptions: Arc<dyn Repository<String, Subscription>>,
    notifications: Arc<dyn Repository<String, Notification>>,
    events: Arc<EventBus<EngineEvent>>,
    relay: Relay,
    keyserver_url: String,
    request_timeout: Duration,
    /// Account to the ed25519 identity key that signs on its behalf.
    identities: Mutex<HashMap<String, PublicKey>>,
}

impl NotifyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: Arc<KeyManagement>,
        interactor: Arc<RelayInteractor>,
        subscriptions: Arc<dyn Repository<String, Subscription>>,
        notifications: Arc<dyn Repository<String, Notification>>,
        events: Arc<EventBus<EngineEvent>>,
        relay: Relay,
        keyserver_url: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            keys,
            interactor,
            subscriptions,
            notifications,
            events,
            relay,
            keyserver_url,
            request_timeout,
            identities: Mutex::new(HashMap::new()),
        }
    }

    fn identities(&self) -> std::sync::MutexGuard<'_, HashMap<String, PublicKey>> {
        self.identities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the identity key `account` signs notify JWTs with.
    pub fn register_identity(&self, account: &str) -> PublicKey {
        let public_key = self.keys.generate_and_store_ed25519_key_pair();
        self.identities().insert(account.to_string(), public_key);
        public_key
    }

    /// Uses an identity key already held in the key store.
    pub fn set_identity(&self, account: &str, public_key: PublicKey) {
        self.identities().insert(account.to_string(), public_key);
    }

    fn identity(&self, account: &str) -> Result<PublicKey> {
        self.identities()
            .get(account)
            .copied()
            .ok_or_else(|| Error::MissingKey(format!("identity of {account}")))
    }

    fn sign(&self, account: &str, claims: &NotifyClaims) -> Result<String> {
        let signing_key = self.keys.get_signing_key(&self.identity(account)?)?;
        encode_did_jwt(claims, &signing_key)
    }

    fn claims(&self, account: &str, act: &str, aud: &str, app: &str) -> Result<NotifyClaims> {
        let identity = self.identity(account)?;
        let mut claims = NotifyClaims::new(
            encode_ed25519_did_key(identity.as_bytes()),
            act,
            unix_timestamp()?,
            NOTIFY_JWT_TTL,
        );
        claims.sub = Some(encode_did_pkh(account));
        claims.aud = Some(aud.to_string());
        claims.ksu = Some(self.keyserver_url.clone());
        claims.app = Some(app.to_string());
        Ok(claims)
    }

    pub fn get_subscription(&self, topic: &str) -> Option<Subscription> {
        self.subscriptions.get(&topic.to_string())
    }

    pub fn get_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.values()
    }

    pub fn get_notifications(&self, topic: &str) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .values()
            .into_iter()
            .filter(|n| n.topic == topic)
            .collect();
        notifications.sort_by_key(|n| n.sent_at);
        notifications
    }

    /// Asks the dapp for a subscription and waits up to `wait` (the client's
    /// request timeout when `None`) for its answer. Local state is only kept
    /// when the dapp confirmed.
    pub async fn subscribe_to_dapp(
        &self,
        dapp: &DappIdentity,
        account: &str,
        scopes: Vec<String>,
        wait: Option<Duration>,
    ) -> Result<Subscription> {
        let mut claims = self.claims(
            account,
            NOTIFY_ACT_SUBSCRIPTION,
            &dapp.authentication_key,
            &did_web(&dapp.domain),
        )?;
        claims.scp = Some(scopes.join(" "));
        let subscription_auth = self.sign(account, &claims)?;

        let subscribe_topic = dapp.key_agreement.topic();
        let self_public_key = self.keys.generate_and_store_x25519_key_pair();
        let response_topic = self
            .keys
            .generate_topic_from_key_agreement(&self_public_key, &dapp.key_agreement)?;

        let subscription = Subscription {
            topic: response_topic.clone(),
            account: account.to_string(),
            relay: self.relay.clone(),
            expiry: unix_timestamp()? + SUBSCRIPTION_TTL,
            request_id: 0,
            scopes,
            dapp_authentication_key: dapp.authentication_key.clone(),
            dapp_metadata: dapp.metadata.clone(),
            dapp_domain: dapp.domain.clone(),
            is_confirmed: false,
        };
        self.subscriptions
            .insert(response_topic.clone(), subscription)?;

        let wait = wait.unwrap_or(self.request_timeout);
        let outcome = async {
            self.interactor.subscribe(&response_topic).await?;
            let response = self
                .interactor
                .request(
                    &subscribe_topic,
                    &WcParams::NotifySubscribe(NotifySubscribeParams {
                        subscription_auth,
                    }),
                    PublishOptions::type_one(Participants {
                        sender: self_public_key,
                        receiver: dapp.key_agreement,
                    })
                    .with_response_topic(&response_topic),
                    wait,
                )
                .await?;
            let id = response.id;
            let answer: NotifyResponseParams =
                serde_json::from_value(response.response.into_result()?)?;
            self.verify_dapp_jwt(
                &answer.response_auth,
                NOTIFY_ACT_SUBSCRIPTION_RESPONSE,
                &dapp.authentication_key,
            )?;
            Ok::<u64, Error>(id)
        }
        .await;

        match outcome {
            Ok(id) => {
                let subscription = self.subscriptions.update(&response_topic, &mut |s| {
                    s.request_id = id;
                    s.is_confirmed = true;
                })?;
                info!("subscribed {account} to {} on {response_topic}", dapp.domain);
                self.events
                    .emit(EngineEvent::NotifySubscribed(subscription.clone()))
                    .await;
                Ok(subscription)
            }
            Err(e) => {
                warn!("subscription to {} failed, rolling back: {e}", dapp.domain);
                self.rollback(&response_topic).await;
                Err(e)
            }
        }
    }

    async fn rollback(&self, topic: &str) {
        if let Err(e) = self.interactor.unsubscribe(topic).await {
            debug!("unsubscribe from {topic} failed: {e}");
        }
        self.subscriptions.delete(&topic.to_string());
        self.interactor.history().delete_records_by_topic(topic);
        if let Err(e) = self.keys.remove_keys(topic) {
            debug!("no keys to remove for {topic}: {e}");
        }
    }

    fn verify_dapp_jwt(&self, jwt: &str, act: &str, issuer: &str) -> Result<NotifyClaims> {
        let claims: NotifyClaims = decode_did_jwt(jwt)?;
        claims.verify(act, unix_timestamp()?)?;
        if claims.iss != issuer {
            return Err(Error::InvalidJwt(format!(
                "issued by {} instead of {issuer}",
                claims.iss
            )));
        }
        Ok(claims)
    }

    /// Ends a subscription on both sides.
    pub async fn delete_subscription(&self, topic: &str) -> Result<()> {
        let subscription = self.get_subscription(topic).ok_or_else(|| {
            Error::NoMatchingTopic {
                sequence: SEQUENCE,
                topic: topic.to_string(),
            }
        })?;
        let claims = self.claims(
            &subscription.account,
            NOTIFY_ACT_DELETE,
            &subscription.dapp_authentication_key,
            &did_web(&subscription.dapp_domain),
        )?;
        let delete_auth = self.sign(&subscription.account, &claims)?;
        self.interactor
            .publish_json_rpc_request(
                topic,
                &WcParams::NotifyDelete(NotifyDeleteParams { delete_auth }),
                PublishOptions::default(),
            )
            .await?;
        self.remove(topic).await;
        info!("deleted subscription {topic}");
        Ok(())
    }

    async fn remove(&self, topic: &str) {
        self.rollback(topic).await;
        for notification in self.get_notifications(topic) {
            self.notifications.delete(&notification.id);
        }
        self.events
            .emit(EngineEvent::NotifyDeleted {
                topic: topic.to_string(),
            })
            .await;
    }

    pub async fn on_request(&self, request: &WcRequest) -> Result<()> {
        match &request.params {
            WcParams::NotifyMessage(params) => self.on_notify_message(request, params).await,
            WcParams::NotifyDelete(_) => {
                if self.get_subscription(&request.topic).is_none() {
                    return self.reply_no_subscription(request).await;
                }
                self.interactor.respond_with_success(request).await?;
                self.remove(&request.topic).await;
                Ok(())
            }
            WcParams::NotifySubscribe(_) => {
                self.interactor
                    .respond_with_error(
                        request,
                        &PeerError::MethodUnsupported(request.method().to_string()),
                    )
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn reply_no_subscription(&self, request: &WcRequest) -> Result<()> {
        self.interactor
            .respond_with_error(
                request,
                &PeerError::NoMatchingTopic {
                    sequence: SEQUENCE,
                    topic: request.topic.clone(),
                },
            )
            .await
    }

    async fn on_notify_message(
        &self,
        request: &WcRequest,
        params: &NotifyMessageParams,
    ) -> Result<()> {
        let Some(subscription) = self.get_subscription(&request.topic) else {
            return self.reply_no_subscription(request).await;
        };
        let message = self
            .verify_dapp_jwt(
                &params.message_auth,
                NOTIFY_ACT_MESSAGE,
                &subscription.dapp_authentication_key,
            )
            .and_then(|claims| {
                let sent_at = claims.iat;
                claims
                    .msg
                    .map(|msg| (msg, sent_at))
                    .ok_or_else(|| Error::InvalidJwt("message claim missing".into()))
            });
        let (message, sent_at) = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("notify message {} rejected: {e}", request.id);
                self.interactor
                    .respond_with_error(request, &PeerError::Generic(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        let notification = Notification {
            id: message.id,
            topic: request.topic.clone(),
            title: message.title,
            body: message.body,
            icon: message.icon,
            url: message.url,
            notification_type: message.notification_type,
            sent_at,
        };
        self.notifications
            .upsert(notification.id.clone(), notification.clone());

        let claims = self.claims(
            &subscription.account,
            NOTIFY_ACT_MESSAGE_RESPONSE,
            &subscription.dapp_authentication_key,
            &did_web(&subscription.dapp_domain),
        )?;
        let response_auth = self.sign(&subscription.account, &claims)?;
        self.interactor
            .respond_with_params(
                &request.topic,
                request.id,
                WcMethod::NotifyMessage,
                serde_json::to_value(NotifyResponseParams { response_auth })?,
                PublishOptions::default(),
            )
            .await?;
        debug!("notification {} on {}", notification.id, request.topic);
        self.events.emit(EngineEvent::NotifyMessage(notification)).await;
        Ok(())
    }

    /// Drops subscriptions whose expiry passed.
    pub async fn expire_stale(&self, now: u64) {
        let expired: Vec<String> = self
            .subscriptions
            .values()
            .into_iter()
            .filter(|s| s.expiry <= now)
            .map(|s| s.topic)
            .collect();
        for topic in expired {
            info!("subscription {topic} expired");
            self.remove(&topic).await;
        }
    }
}
