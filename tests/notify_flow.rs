mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use walletconnect_engine::codec::Codec;
use walletconnect_engine::config::RetryPolicy;
use walletconnect_engine::constants::{
    NOTIFY_ACT_MESSAGE, NOTIFY_ACT_MESSAGE_RESPONSE, NOTIFY_ACT_SUBSCRIPTION,
    NOTIFY_ACT_SUBSCRIPTION_RESPONSE,
};
use walletconnect_engine::events::BackpressurePolicy;
use walletconnect_engine::history::JsonRpcHistory;
use walletconnect_engine::jwt::{NotifyClaims, NotifyMessage, decode_did_jwt, encode_did_jwt};
use walletconnect_engine::key_management::{KeyManagement, PublicKey};
use walletconnect_engine::notify::DappIdentity;
use walletconnect_engine::relay_interactor::{PublishOptions, RelayInteractor};
use walletconnect_engine::transport::MemoryRelay;
use walletconnect_engine::types::{NotifyMessageParams, NotifyResponseParams};
use walletconnect_engine::utils::{encode_ed25519_did_key, unix_timestamp};
use walletconnect_engine::wc_message::{WcMethod, WcParams};
use walletconnect_engine::{EngineEvent, Error, Storage};

use common::{ACCOUNT, WAIT, init_logger, next_event, peer};

const DOMAIN: &str = "app.example.com";

/// Dapp end of a notify subscription, driven by hand.
struct Dapp {
    keys: Arc<KeyManagement>,
    interactor: Arc<RelayInteractor>,
    authentication: PublicKey,
    identity: DappIdentity,
}

impl Dapp {
    async fn connect(relay: &MemoryRelay) -> Self {
        let (transport, inbound) = relay.connect();
        let storage = Storage::in_memory();
        let keys = Arc::new(KeyManagement::new(storage.keys.clone()));
        let interactor = Arc::new(RelayInteractor::new(
            transport,
            Codec::new(keys.clone()),
            Arc::new(JsonRpcHistory::new(storage.history.clone())),
            RetryPolicy::default(),
            BackpressurePolicy::Unbounded,
        ));
        tokio::spawn(interactor.clone().run(inbound));

        let key_agreement = keys.generate_and_store_x25519_key_pair();
        keys.set_self_participant(&key_agreement.topic(), key_agreement);
        interactor.subscribe(&key_agreement.topic()).await.unwrap();

        let authentication = keys.generate_and_store_ed25519_key_pair();
        let identity = DappIdentity {
            domain: DOMAIN.to_string(),
            key_agreement,
            authentication_key: encode_ed25519_did_key(authentication.as_bytes()),
            metadata: None,
        };
        Self {
            keys,
            interactor,
            authentication,
            identity,
        }
    }

    fn jwt(&self, act: &str, msg: Option<NotifyMessage>) -> String {
        let mut claims = NotifyClaims::new(
            self.identity.authentication_key.clone(),
            act,
            unix_timestamp().unwrap(),
            3600,
        );
        claims.msg = msg;
        let signing_key = self.keys.get_signing_key(&self.authentication).unwrap();
        encode_did_jwt(&claims, &signing_key).unwrap()
    }
}

#[tokio::test]
async fn test_subscribe_receive_and_delete() {
    init_logger();
    let relay = MemoryRelay::new();
    let mut wallet = peer(&relay, "wallet").await;
    let dapp = Arc::new(Dapp::connect(&relay).await);
    let mut dapp_requests = dapp.interactor.requests();
    wallet.client.notify().register_identity(ACCOUNT);

    let answering = dapp.clone();
    let wallet_client = wallet.client.clone();
    let answer = tokio::spawn(async move {
        let request = dapp_requests.recv().await.unwrap();
        let WcParams::NotifySubscribe(params) = &request.params else {
            panic!("unexpected request {:?}", request.method());
        };
        let claims: NotifyClaims = decode_did_jwt(&params.subscription_auth).unwrap();
        assert_eq!(claims.act, NOTIFY_ACT_SUBSCRIPTION);
        assert_eq!(claims.aud.as_deref(), Some(answering.identity.authentication_key.as_str()));
        assert_eq!(claims.app.as_deref(), Some("did:web:app.example.com"));
        assert_eq!(claims.scp.as_deref(), Some("alerts promotions"));

        // the wallet keeps the pending subscription under the response topic
        let topic = wallet_client.notify().get_subscriptions()[0].topic.clone();
        let key = wallet_client.keys().get_symmetric_key(&topic).unwrap();
        answering.keys.set_symmetric_key(&topic, key);
        answering.interactor.subscribe(&topic).await.unwrap();

        let response_auth = answering.jwt(NOTIFY_ACT_SUBSCRIPTION_RESPONSE, None);
        answering
            .interactor
            .respond_with_params(
                &topic,
                request.id,
                WcMethod::NotifySubscribe,
                json!({ "responseAuth": response_auth }),
                PublishOptions::default(),
            )
            .await
            .unwrap();
        (topic, dapp_requests)
    });

    let subscription = wallet
        .client
        .notify()
        .subscribe_to_dapp(
            &dapp.identity,
            ACCOUNT,
            vec!["alerts".to_string(), "promotions".to_string()],
            Some(WAIT),
        )
        .await
        .unwrap();
    let (topic, mut dapp_requests) = answer.await.unwrap();
    assert_eq!(subscription.topic, topic);
    assert!(subscription.is_confirmed);
    assert_eq!(subscription.dapp_domain, DOMAIN);
    next_event(&mut wallet.events, |event| match event {
        EngineEvent::NotifySubscribed(s) => Some(s),
        _ => None,
    })
    .await;

    let message = NotifyMessage {
        id: "n-1".to_string(),
        notification_type: "alerts".to_string(),
        title: "Price alert".to_string(),
        body: "ETH crossed 4000".to_string(),
        icon: None,
        url: Some("https://app.example.com/alerts".to_string()),
    };
    let response = dapp
        .interactor
        .request(
            &topic,
            &WcParams::NotifyMessage(NotifyMessageParams {
                message_auth: dapp.jwt(NOTIFY_ACT_MESSAGE, Some(message)),
            }),
            PublishOptions::default(),
            WAIT,
        )
        .await
        .unwrap();
    let receipt: NotifyResponseParams =
        serde_json::from_value(response.response.into_result().unwrap()).unwrap();
    let receipt: NotifyClaims = decode_did_jwt(&receipt.response_auth).unwrap();
    assert_eq!(receipt.act, NOTIFY_ACT_MESSAGE_RESPONSE);

    let notification = next_event(&mut wallet.events, |event| match event {
        EngineEvent::NotifyMessage(n) => Some(n),
        _ => None,
    })
    .await;
    assert_eq!(notification.title, "Price alert");
    assert_eq!(wallet.client.notify().get_notifications(&topic).len(), 1);

    wallet.client.notify().delete_subscription(&topic).await.unwrap();
    assert!(wallet.client.notify().get_subscription(&topic).is_none());
    assert!(wallet.client.notify().get_notifications(&topic).is_empty());
    assert!(!wallet.transport.is_subscribed(&topic));

    let delete = tokio::time::timeout(WAIT, dapp_requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delete.method(), WcMethod::NotifyDelete);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_subscription_is_rolled_back() {
    init_logger();
    let relay = MemoryRelay::new();
    let wallet = peer(&relay, "wallet").await;
    let dapp = Dapp::connect(&relay).await;
    wallet.client.notify().register_identity(ACCOUNT);
    wallet.transport.set_acknowledge(false);

    let started = tokio::time::Instant::now();
    let err = wallet
        .client
        .notify()
        .subscribe_to_dapp(
            &dapp.identity,
            ACCOUNT,
            vec!["alerts".to_string()],
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));
    assert!(wallet.client.notify().get_subscriptions().is_empty());
    assert!(wallet.transport.subscriptions().is_empty());
    assert!(wallet.client.interactor().history().get_pending_records().is_empty());
}

#[tokio::test]
async fn test_subscription_requires_registered_identity() {
    init_logger();
    let relay = MemoryRelay::new();
    let wallet = peer(&relay, "wallet").await;
    let dapp = Dapp::connect(&relay).await;

    let err = wallet
        .client
        .notify()
        .subscribe_to_dapp(&dapp.identity, ACCOUNT, vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingKey(_)));
    assert!(wallet.transport.published().is_empty());
}
