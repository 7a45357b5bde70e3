/// Relay Auth
///
/// Signs the JWT that authorizes this client with the relay RPC
///
use alloy::hex;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::constants::CRYPTO_JWT_TTL;
use crate::error::Result;
use crate::jwt::encode_did_jwt;
use crate::utils::{encode_ed25519_did_key, random_bytes32, unix_timestamp};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct RelayAuth {
    signing_key: SigningKey,
}

impl RelayAuth {
    /// The same seed always yields the same client id; keep it stored.
    pub fn new(client_seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&client_seed),
        }
    }

    // https://github.com/WalletConnect/walletconnect-monorepo/blob/1e618504de2c1802359ffec486120784c04bd240/packages/core/src/controllers/crypto.ts#L59
    pub fn client_id(&self) -> String {
        encode_ed25519_did_key(&self.signing_key.verifying_key().to_bytes())
    }

    // https://github.com/WalletConnect/walletconnect-monorepo/blob/b39a5d4e62f5517ef47a70b5b93f27585b7132e8/packages/core/src/controllers/crypto.ts#L73
    pub fn sign_jwt(&self, aud: &str) -> Result<String> {
        let sub = hex::encode(random_bytes32()); // random session identifier
        self.sign_jwt_at(&sub, aud, unix_timestamp()?)
    }

    pub fn sign_jwt_at(&self, sub: &str, aud: &str, iat: u64) -> Result<String> {
        let claims = RelayClaims {
            iss: self.client_id(),
            sub: sub.to_string(),
            aud: aud.to_string(),
            iat,
            exp: iat + CRYPTO_JWT_TTL,
        };
        encode_did_jwt(&claims, &self.signing_key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jwt::decode_did_jwt;

    #[test]
    fn test_client_id_from_zero_seed() {
        let auth = RelayAuth::new([0; 32]);
        let client_id = auth.client_id();
        assert_eq!(
            client_id,
            "did:key:z6MkiTBz1ymuepAQ4HEHYSF1H8quG5GLVVQR3djdX3mDooWp"
        );
    }

    #[test]
    fn test_client_id_from_seed() {
        let auth = RelayAuth::new([
            23, 113, 199, 94, 246, 41, 119, 10, 250, 248, 253, 136, 173, 241,
            191, 149, 165, 249, 17, 42, 46, 189, 120, 175, 78, 88, 53, 83, 254,
            16, 32, 150,
        ]);
        let client_id = auth.client_id();
        assert_eq!(
            client_id,
            "did:key:z6MkriJMhx6cLMiwwfuJ3NCGw8C8UjB9KoVHB7QSBaBxMx3y"
        );
    }

    #[test]
    fn test_jwt_claims() {
        let auth = RelayAuth::new([0; 32]);
        let jwt = auth
            .sign_jwt_at("abc", "https://relay.walletconnect.org", 1_000)
            .unwrap();
        let claims: RelayClaims = decode_did_jwt(&jwt).unwrap();
        assert_eq!(claims.iss, auth.client_id());
        assert_eq!(claims.aud, "https://relay.walletconnect.org");
        assert_eq!(claims.exp - claims.iat, CRYPTO_JWT_TTL);
        assert!(jwt.starts_with("eyJhbGciOiJFZERTQSIsInR5cCI6IkpXVCJ9."));
    }
}
