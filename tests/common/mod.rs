#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use walletconnect_engine::transport::{MemoryRelay, MemoryTransport};
use walletconnect_engine::{Client, Config, EngineEvent, EventStream, Metadata, Storage};

pub const WAIT: Duration = Duration::from_secs(5);

pub const ACCOUNT: &str = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        description: format!("{name} test peer"),
        url: format!("https://{name}.example.com"),
        icons: vec![],
    }
}

pub struct Peer {
    pub client: Arc<Client>,
    pub transport: Arc<MemoryTransport>,
    pub events: EventStream<EngineEvent>,
}

pub async fn peer(relay: &MemoryRelay, name: &str) -> Peer {
    let (transport, inbound) = relay.connect();
    let mut config = Config::new("test-project", metadata(name));
    config.request_timeout = WAIT;
    let client = Arc::new(Client::new(
        config,
        Storage::in_memory(),
        transport.clone(),
    ));
    let events = client.events();
    client.start(inbound).await.unwrap();
    Peer {
        client,
        transport,
        events,
    }
}

/// Waits for the first event `pick` accepts, skipping the others.
pub async fn next_event<T>(
    events: &mut EventStream<EngineEvent>,
    mut pick: impl FnMut(EngineEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if let Some(picked) = pick(event) {
                return picked;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}
