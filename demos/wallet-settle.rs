use std::collections::HashMap;
use std::time::Duration;

use walletconnect_engine::{
    Client, Config, EngineEvent, Metadata, SessionNamespace, Storage,
};

/// Pairs with a dApp, approves its session proposal with a fixed account and
/// prints everything the dApp sends afterwards. Does not require private key.
#[tokio::main]
async fn main() -> walletconnect_engine::Result<()> {
    env_logger::init();

    // ProjectId is required to prevent DOS on the relay. In case following
    // cause rate limits, you can create your own from https://cloud.reown.com
    let mut config = Config::new(
        "35d44d49c2dee217a3eb24bb4410acc7",
        Metadata {
            name: "WalletConnect Rust Engine".to_string(),
            description: "Wallet side of a WalletConnect session".to_string(),
            url: "https://github.com/zemse/walletconnect-sdk".to_string(),
            icons: vec![],
        },
    );
    // Used to sign relay JWTs. Same seed should be reused for all connections.
    config.client_seed = Some(
        "7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b7b"
            .to_string(),
    );

    let (relay, inbound) = Client::http_relay(&config)?;
    relay.clone().spawn_polling(Duration::from_secs(2));
    let client = Client::new(config, Storage::in_memory(), relay);
    let mut events = client.events();
    client.start(inbound).await?;

    // WalletConnect URI - you can get it by visiting any dApp and clicking on
    // "Connect Wallet" and select WalletConnect
    let uri_from_dapp = std::env::args()
        .nth(1)
        .expect("usage: wallet-settle <wc: uri>");
    client.pairing().pair(&uri_from_dapp).await?;

    let address = "0x0000000000000000000000000000000000000123";
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::SessionProposal(proposal) => {
                let namespaces: HashMap<String, SessionNamespace> = proposal
                    .required_namespaces
                    .iter()
                    .map(|(key, required)| {
                        let chains = required.chains.clone().unwrap_or_default();
                        let namespace = SessionNamespace {
                            accounts: chains
                                .iter()
                                .map(|chain| format!("{chain}:{address}"))
                                .collect(),
                            chains: Some(chains),
                            methods: required.methods.clone(),
                            events: required.events.clone(),
                        };
                        (key.clone(), namespace)
                    })
                    .collect();
                let session =
                    client.sign().approve(proposal.id, namespaces, None).await?;
                println!("session: {}", session.topic);
            }
            event => println!("event: {event:?}"),
        }
    }
    Ok(())
}
