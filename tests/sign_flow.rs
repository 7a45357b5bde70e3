mod common;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use walletconnect_engine::transport::MemoryRelay;
use walletconnect_engine::types::{
    ProposalNamespaces, SessionEvent, SessionEventParams, SessionNamespaces,
    SessionRequest, SessionRequestParams,
};
use walletconnect_engine::relay_interactor::PublishOptions;
use walletconnect_engine::validator::ValidationError;
use walletconnect_engine::wc_message::{JsonRpcResult, WcParams};
use walletconnect_engine::{
    EngineEvent, Error, PeerError, ProposalNamespace, SessionNamespace,
};

use common::{ACCOUNT, Peer, WAIT, init_logger, next_event, peer};

fn required() -> ProposalNamespaces {
    HashMap::from([(
        "eip155".to_string(),
        ProposalNamespace {
            chains: Some(vec!["eip155:1".to_string()]),
            methods: vec!["eth_sign".to_string()],
            events: vec!["chainChanged".to_string()],
        },
    )])
}

fn granted() -> SessionNamespaces {
    HashMap::from([(
        "eip155".to_string(),
        SessionNamespace {
            chains: Some(vec!["eip155:1".to_string()]),
            accounts: vec![ACCOUNT.to_string()],
            methods: vec!["eth_sign".to_string()],
            events: vec!["chainChanged".to_string()],
        },
    )])
}

fn eth_sign(chain_id: &str) -> SessionRequestParams {
    SessionRequestParams {
        request: SessionRequest {
            method: "eth_sign".to_string(),
            params: json!(["0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb", "0xdeadbeef"]),
            expiry_timestamp: None,
        },
        chain_id: chain_id.to_string(),
    }
}

fn chain_changed() -> SessionEventParams {
    SessionEventParams {
        event: SessionEvent {
            name: "chainChanged".to_string(),
            data: json!(1),
        },
        chain_id: "eip155:1".to_string(),
    }
}

/// Settles a session proposed by `dapp` and approved by `wallet`, returning
/// once both sides hold it.
async fn settle(dapp: &mut Peer, wallet: &mut Peer) -> String {
    let (_, uri) = dapp
        .client
        .sign()
        .connect(required(), None, None, None)
        .await
        .unwrap();
    wallet.client.pairing().pair(&uri).await.unwrap();
    let received = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionProposal(p) => Some(p),
        _ => None,
    })
    .await;
    wallet
        .client
        .sign()
        .approve(received.id, granted(), None)
        .await
        .unwrap();
    next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionSettled(s) if s.is_acknowledged => Some(()),
        _ => None,
    })
    .await;
    next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionSettled(s) => Some(s.topic),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn test_propose_settle_request_and_disconnect() {
    init_logger();
    let relay = MemoryRelay::new();
    let mut dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;

    let (proposal, uri) = dapp
        .client
        .sign()
        .connect(required(), None, None, None)
        .await
        .unwrap();
    wallet.client.pairing().pair(&uri).await.unwrap();

    let received = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionProposal(p) => Some(p),
        _ => None,
    })
    .await;
    assert_eq!(received.id, proposal.id);
    assert_eq!(received.proposer.metadata.name, "dapp");

    let wallet_session = wallet
        .client
        .sign()
        .approve(received.id, granted(), None)
        .await
        .unwrap();
    assert!(!wallet_session.is_acknowledged);

    let dapp_session = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionSettled(s) => Some(s),
        _ => None,
    })
    .await;
    assert_eq!(dapp_session.topic, wallet_session.topic);
    assert_eq!(dapp_session.peer_participant.metadata.name, "wallet");
    assert!(dapp_session.is_peer_controller());

    let acknowledged = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionSettled(s) => Some(s),
        _ => None,
    })
    .await;
    assert!(acknowledged.is_acknowledged);
    assert!(
        dapp.client
            .pairing()
            .get_pairing(&proposal.pairing_topic)
            .unwrap()
            .is_active()
    );

    let topic = dapp_session.topic.clone();
    let wallet_client = wallet.client.clone();
    let mut wallet_events = wallet.events;
    let responder = tokio::spawn(async move {
        loop {
            match wallet_events.recv().await {
                Some(EngineEvent::SessionRequest { id, topic, .. }) => {
                    wallet_client
                        .sign()
                        .respond(&topic, id, Ok(json!("0xsigned")))
                        .await
                        .unwrap();
                }
                Some(EngineEvent::SessionDeleted { topic }) => return topic,
                Some(_) => {}
                None => panic!("wallet event bus closed"),
            }
        }
    });

    let result = dapp
        .client
        .sign()
        .request(&topic, eth_sign("eip155:1"))
        .await
        .unwrap();
    assert_eq!(result, json!("0xsigned"));

    let unauthorized = dapp
        .client
        .sign()
        .request(&topic, eth_sign("eip155:137"))
        .await
        .unwrap_err();
    assert!(matches!(
        unauthorized,
        Error::Validation(ValidationError::UnauthorizedMethod)
    ));

    wallet
        .client
        .sign()
        .emit(
            &topic,
            SessionEventParams {
                event: SessionEvent {
                    name: "chainChanged".to_string(),
                    data: json!(1),
                },
                chain_id: "eip155:1".to_string(),
            },
        )
        .await
        .unwrap();
    let event = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionEvent { params, .. } => Some(params),
        _ => None,
    })
    .await;
    assert_eq!(event.event.name, "chainChanged");

    let mut widened = granted();
    widened
        .get_mut("eip155")
        .unwrap()
        .methods
        .push("personal_sign".to_string());
    let updated = wallet
        .client
        .sign()
        .update(&topic, widened.clone())
        .await
        .unwrap();
    assert_eq!(updated.namespaces, widened);
    let namespaces = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionUpdated { namespaces, .. } => Some(namespaces),
        _ => None,
    })
    .await;
    assert_eq!(namespaces, widened);

    let not_controller = dapp.client.sign().update(&topic, granted()).await;
    assert!(matches!(not_controller, Err(Error::Unauthorized(_))));
    let not_controller = dapp.client.sign().extend(&topic).await;
    assert!(matches!(not_controller, Err(Error::Unauthorized(_))));

    dapp.client.sign().ping(&topic).await.unwrap();

    dapp.client.sign().disconnect(&topic).await.unwrap();
    let deleted = tokio::time::timeout(common::WAIT, responder)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deleted, topic);
    assert!(dapp.client.sign().get_session(&topic).is_none());
    assert!(wallet.client.sign().get_session(&topic).is_none());
    assert!(!wallet.transport.is_subscribed(&topic));
}

#[tokio::test]
async fn test_rejected_proposal_reaches_dapp() {
    init_logger();
    let relay = MemoryRelay::new();
    let mut dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;

    let (proposal, uri) = dapp
        .client
        .sign()
        .connect(required(), None, None, None)
        .await
        .unwrap();
    wallet.client.pairing().pair(&uri).await.unwrap();
    let received = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionProposal(p) => Some(p),
        _ => None,
    })
    .await;

    wallet
        .client
        .sign()
        .reject(received.id, PeerError::UserRejected("not today".to_string()))
        .await
        .unwrap();

    let (id, reason) = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionRejected {
            proposal_id,
            reason,
        } => Some((proposal_id, reason)),
        _ => None,
    })
    .await;
    assert_eq!(id, proposal.id);
    assert_eq!(reason.code(), 5000);
    assert!(dapp.client.sign().get_proposal(proposal.id).is_none());
}

#[tokio::test]
async fn test_approve_must_cover_required_namespaces() {
    init_logger();
    let relay = MemoryRelay::new();
    let dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;

    let (_, uri) = dapp
        .client
        .sign()
        .connect(required(), None, None, None)
        .await
        .unwrap();
    wallet.client.pairing().pair(&uri).await.unwrap();
    let received = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionProposal(p) => Some(p),
        _ => None,
    })
    .await;

    let mut partial = granted();
    partial.get_mut("eip155").unwrap().methods.clear();
    let err = wallet
        .client
        .sign()
        .approve(received.id, partial, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(wallet.client.sign().get_sessions().is_empty());
}

#[tokio::test]
async fn test_pairing_ping_between_peers() {
    init_logger();
    let relay = MemoryRelay::new();
    let dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;

    let (pairing, uri) = dapp.client.pairing().create(None).await.unwrap();
    wallet.client.pairing().pair(&uri.to_string()).await.unwrap();

    dapp.client
        .pairing()
        .ping(&pairing.topic, common::WAIT)
        .await
        .unwrap();
    let topic = next_event(&mut wallet.events, |event| match event {
        EngineEvent::PairingPing { topic } => Some(topic),
        _ => None,
    })
    .await;
    assert_eq!(topic, pairing.topic);
}

#[tokio::test]
async fn test_events_only_flow_from_the_controller() {
    init_logger();
    let relay = MemoryRelay::new();
    let mut dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;
    let topic = settle(&mut dapp, &mut wallet).await;

    let local = dapp.client.sign().emit(&topic, chain_changed()).await;
    assert!(matches!(local, Err(Error::Unauthorized(_))));

    // bypass the local check; the wallet must still refuse
    let response = dapp
        .client
        .interactor()
        .request(
            &topic,
            &WcParams::SessionEvent(chain_changed()),
            PublishOptions::default(),
            WAIT,
        )
        .await
        .unwrap();
    let JsonRpcResult::Error(error) = response.response else {
        panic!("event from the non-controller was accepted");
    };
    assert_eq!(error.code, 3002);

    wallet.client.sign().emit(&topic, chain_changed()).await.unwrap();
    let params = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionEvent { params, .. } => Some(params),
        _ => None,
    })
    .await;
    assert_eq!(params.event.name, "chainChanged");
    assert!(
        tokio::time::timeout(Duration::from_millis(100), async {
            while let Some(event) = wallet.events.recv().await {
                if matches!(event, EngineEvent::SessionEvent { .. }) {
                    return;
                }
            }
        })
        .await
        .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn test_unpublished_approval_leaves_no_session_topic() {
    init_logger();
    let relay = MemoryRelay::new();
    let dapp = peer(&relay, "dapp").await;
    let mut wallet = peer(&relay, "wallet").await;

    let (proposal, uri) = dapp
        .client
        .sign()
        .connect(required(), None, None, None)
        .await
        .unwrap();
    wallet.client.pairing().pair(&uri).await.unwrap();
    let received = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionProposal(p) => Some(p),
        _ => None,
    })
    .await;

    wallet.transport.set_acknowledge(false);
    let err = wallet
        .client
        .sign()
        .approve(received.id, granted(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PublishFailed { .. }), "{err}");
    assert_eq!(wallet.transport.subscriptions(), vec![proposal.pairing_topic]);
    assert!(wallet.client.sign().get_sessions().is_empty());
    // still answerable once the relay is back
    assert!(wallet.client.sign().get_proposal(received.id).is_some());
}
