use std::time::Duration;

use alloy::hex;
use alloy::signers::{SignerSync, local::PrivateKeySigner};
use walletconnect_engine::cacao::{Cacao, CacaoPayload, CacaoSignature, SignatureType};
use walletconnect_engine::{Client, Config, EngineEvent, Metadata, Storage};

/// Answers a one-click authentication request with CACAOs signed by a fresh
/// random key.
#[tokio::main]
async fn main() -> walletconnect_engine::Result<()> {
    env_logger::init();

    // ProjectId is required to prevent DOS on the relay. In case following
    // cause rate limits, you can create your own from https://cloud.reown.com
    let config = Config::new(
        "35d44d49c2dee217a3eb24bb4410acc7",
        Metadata {
            name: "WalletConnect Rust Engine".to_string(),
            description: "Wallet side of a WalletConnect session".to_string(),
            url: "https://github.com/zemse/walletconnect-sdk".to_string(),
            icons: vec![],
        },
    );

    let (relay, inbound) = Client::http_relay(&config)?;
    relay.clone().spawn_polling(Duration::from_secs(2));
    let client = Client::new(config, Storage::in_memory(), relay);
    let mut events = client.events();
    client.start(inbound).await?;

    // WalletConnect URI with methods=wc_sessionAuthenticate
    let uri_from_dapp = std::env::args()
        .nth(1)
        .expect("usage: wallet-auth <wc: uri>");
    client.pairing().pair(&uri_from_dapp).await?;

    let signer = PrivateKeySigner::random();
    while let Some(event) = events.recv().await {
        let EngineEvent::SessionAuthenticate { id, params, .. } = event else {
            continue;
        };
        // inspect the request if it looks good
        println!("auth: {:?}", params.auth_payload);

        let mut cacaos = Vec::new();
        for chain in &params.auth_payload.chains {
            let account = format!("{chain}:{}", signer.address());
            let payload =
                CacaoPayload::from_auth_payload(&params.auth_payload, &account);
            let message = payload.caip122_message()?;
            let signature = signer
                .sign_message_sync(message.as_bytes())
                .map_err(|e| walletconnect_engine::Error::InternalError(e.to_string()))?;
            cacaos.push(Cacao::new(
                payload,
                CacaoSignature {
                    signature_type: SignatureType::Eip191,
                    signature: hex::encode_prefixed(signature.as_bytes()),
                    message: None,
                },
            ));
        }
        let session = client.sign().approve_session_authenticate(id, cacaos).await?;
        println!("session: {}", session.topic);
    }
    Ok(())
}
