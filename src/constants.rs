use std::time::Duration;

use crate::utils::{DAYS, MINUTES, MONTHS, WEEKS};

pub const JWT_ALG: &str = "EdDSA";
pub const JWT_TYP: &str = "JWT";
pub const JWT_DELIMITER: &str = ".";

pub const DID_DELIMITER: &str = ":";
pub const DID_PREFIX: &str = "did";
pub const DID_METHOD_KEY: &str = "key";
pub const DID_METHOD_PKH: &str = "pkh";
pub const DID_METHOD_WEB: &str = "web";

pub const MULTICODEC_ED25519_BASE: &str = "z";
pub const MULTICODEC_ED25519_HEADER: [u8; 2] = [0xed, 0x01];
pub const MULTICODEC_ED25519_LENGTH: usize = 32;

// https://github.com/WalletConnect/walletconnect-monorepo/blob/b39a5d4e62f5517ef47a70b5b93f27585b7132e8/packages/core/src/controllers/crypto.ts
pub const CRYPTO_JWT_TTL: u64 = DAYS;

pub const RELAY_PROTOCOL: &str = "irn";
pub const JSONRPC_VERSION: &str = "2.0";
pub const URI_VERSION: u32 = 2;

pub const PROPOSED_PAIRING_TTL: u64 = 5 * MINUTES;
pub const ACTIVE_PAIRING_TTL: u64 = MONTHS;
pub const PROPOSAL_TTL: u64 = 5 * MINUTES;
pub const SESSION_TTL: u64 = WEEKS;
pub const AUTHENTICATE_REQUEST_TTL: u64 = 60 * MINUTES;
pub const SUBSCRIPTION_TTL: u64 = MONTHS;

/// Allowed skew when checking `iat` and `exp` of a JWT.
pub const JWT_CLOCK_SKEW: u64 = 5 * MINUTES;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_RELAY_RPC_URL: &str = "https://relay.walletconnect.org/rpc";
pub const DEFAULT_RELAY_AUDIENCE: &str = "https://relay.walletconnect.org";
pub const DEFAULT_KEYSERVER_URL: &str = "https://keys.walletconnect.com";

pub const NOTIFY_JWT_VERSION: &str = "1";

/// Lifetime of the JWTs the notify engine signs.
pub const NOTIFY_JWT_TTL: u64 = MONTHS;
pub const NOTIFY_ACT_SUBSCRIPTION: &str = "notify_subscription";
pub const NOTIFY_ACT_SUBSCRIPTION_RESPONSE: &str = "notify_subscription_response";
pub const NOTIFY_ACT_MESSAGE: &str = "notify_message";
pub const NOTIFY_ACT_MESSAGE_RESPONSE: &str = "notify_message_response";
pub const NOTIFY_ACT_DELETE: &str = "notify_delete";
