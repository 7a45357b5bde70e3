//! # walletconnect-engine
//!
//! A Rust implementation of the [WalletConnect v2 protocol](https://specs.walletconnect.com/2.0/)
//! client engine.
//!
//! ## Features
//! - Pairing: create, pair from `wc:` uri, ping, delete, expiry
//! - Sign: propose, approve, reject, session requests, events, update,
//!   extend, ping, delete
//! - One-click authentication (`wc_sessionAuthenticate`) with EIP-191 CACAOs
//! - Notify subscriptions with `did:key` JWT claims
//! - Type 0 / type 1 envelopes with ChaCha20-Poly1305
//! - Pluggable relay transport and storage
//!
//! ## Example
//! Wallet side: pair with a dapp uri and approve its proposal.
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use walletconnect_engine::{
//!     Client, Config, EngineEvent, Metadata, SessionNamespace, Storage,
//! };
//!
//! # async fn run() -> walletconnect_engine::Result<()> {
//! // Get project_id from https://cloud.reown.com
//! let config = Config::new(
//!     "xxxx",
//!     Metadata {
//!         name: "My Wallet Name".to_string(),
//!         description: "My wallet interacts with dapp".to_string(),
//!         url: "https://my-wallet-site.com".to_string(),
//!         icons: vec![],
//!     },
//! );
//!
//! let (relay, inbound) = Client::http_relay(&config)?;
//! relay.clone().spawn_polling(std::time::Duration::from_secs(2));
//!
//! let client = Client::new(config, Storage::in_memory(), relay);
//! let mut events = client.events();
//! client.start(inbound).await?;
//!
//! let uri_from_dapp = "wc:e4b9eb7a1372bf88abc46c37acac3687301afdfd0d2a4c2355945d66a1164464@2?relay-protocol=irn&symKey=d7430284e1b70853829a010518a088cde0e163bcad5f24425e3b17578b2b402d&expiryTimestamp=1749783095";
//! client.pairing().pair(uri_from_dapp).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let EngineEvent::SessionProposal(proposal) = event {
//!         let namespace = SessionNamespace {
//!             chains: Some(vec!["eip155:1".to_string()]),
//!             accounts: vec![
//!                 "eip155:1:0x0000000000000000000000000000000000000123"
//!                     .to_string(),
//!             ],
//!             methods: vec!["personal_sign".to_string()],
//!             events: vec!["chainChanged".to_string()],
//!         };
//!         let namespaces = HashMap::from([("eip155".to_string(), namespace)]);
//!         client.sign().approve(proposal.id, namespaces, None).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//! MIT OR Apache-2.0

pub mod cacao;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod history;
pub mod jwt;
pub mod key_management;
pub mod message;
pub mod notify;
pub mod pairing;
pub mod relay_auth;
pub mod relay_interactor;
pub mod sign;
pub mod storage;
pub mod transport;
pub mod types;
pub mod uri;
pub mod utils;
pub mod validator;
pub mod wc_message;

/// Exposed for easy access
pub use client::Client;
pub use config::Config;
pub use error::{Error, PeerError, Result};
pub use events::{EngineEvent, EventStream};
pub use storage::Storage;
pub use types::{Metadata, Pairing, ProposalNamespace, Session, SessionNamespace};
