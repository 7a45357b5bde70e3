/// Key management
///
/// X25519 key pairs for key agreement, Ed25519 key pairs for identity and
/// JWT signing, and the symmetric keys that encrypt each topic. Everything
/// generated or derived here is persisted in the key store before it is
/// returned.
///
use std::fmt::{self, Display};
use std::sync::Arc;

use alloy::hex;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use alloy::signers::k256::sha2::Sha256;

use crate::error::{Error, Result};
use crate::storage::KeyStore;
use crate::utils::{random_bytes32, sha256};

const KEY_AGREEMENT_CONTEXT: &str = "key_agreement";
const SELF_PARTICIPANT_CONTEXT: &str = "self_participant";
const KEY_PAIR_CONTEXT: &str = "key_pair";

macro_rules! key_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn from_hex(value: &str) -> Result<Self> {
                Ok(Self(hex::decode_to_array::<_, 32>(value)?))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }
    };
}

key_type!(PublicKey);
key_type!(PrivateKey);
key_type!(SymmetricKey);

impl Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(..)")
    }
}

impl PublicKey {
    /// Topic on which a peer listens for type 1 envelopes addressed to
    /// this key.
    pub fn topic(&self) -> String {
        hex::encode(sha256(self.0))
    }
}

impl SymmetricKey {
    pub fn topic(&self) -> String {
        hex::encode(sha256(self.0))
    }
}

pub struct KeyManagement {
    store: Arc<dyn KeyStore>,
}

impl KeyManagement {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    fn get_32(&self, tag: &str) -> Result<[u8; 32]> {
        let value = self
            .store
            .get(tag)
            .ok_or_else(|| Error::MissingKey(tag.to_string()))?;
        value
            .try_into()
            .map_err(|_| Error::MissingKey(format!("{tag} (corrupt)")))
    }

    fn get_64(&self, tag: &str) -> Result<([u8; 32], [u8; 32])> {
        let value = self
            .store
            .get(tag)
            .filter(|v| v.len() == 64)
            .ok_or_else(|| Error::MissingKey(tag.to_string()))?;
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        first.copy_from_slice(&value[..32]);
        second.copy_from_slice(&value[32..]);
        Ok((first, second))
    }

    pub fn set_symmetric_key(&self, topic: &str, key: SymmetricKey) {
        self.store.set(topic, key.0.to_vec());
    }

    pub fn get_symmetric_key(&self, topic: &str) -> Result<SymmetricKey> {
        self.get_32(topic).map(SymmetricKey)
    }

    /// Fresh random key stored under its own topic, `sha256(key)`.
    pub fn generate_and_store_symmetric_key(&self) -> (String, SymmetricKey) {
        let key = SymmetricKey(random_bytes32());
        let topic = key.topic();
        self.set_symmetric_key(&topic, key);
        (topic, key)
    }

    pub fn set_key_pair(&self, public_key: PublicKey, private_key: PrivateKey) {
        let mut value = public_key.0.to_vec();
        value.extend_from_slice(&private_key.0);
        self.store
            .set(&format!("{KEY_PAIR_CONTEXT}:{public_key}"), value);
    }

    pub fn get_key_pair(
        &self,
        public_key: &PublicKey,
    ) -> Result<(PublicKey, PrivateKey)> {
        let (public, private) =
            self.get_64(&format!("{KEY_PAIR_CONTEXT}:{public_key}"))?;
        Ok((PublicKey(public), PrivateKey(private)))
    }

    pub fn generate_and_store_x25519_key_pair(&self) -> PublicKey {
        self.derive_and_store_x25519_key_pair(PrivateKey(random_bytes32()))
    }

    pub fn derive_and_store_x25519_key_pair(
        &self,
        private_key: PrivateKey,
    ) -> PublicKey {
        let secret = StaticSecret::from(private_key.0);
        let public_key = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        self.set_key_pair(public_key, private_key);
        public_key
    }

    pub fn generate_and_store_ed25519_key_pair(&self) -> PublicKey {
        self.derive_and_store_ed25519_key_pair(PrivateKey(random_bytes32()))
    }

    pub fn derive_and_store_ed25519_key_pair(
        &self,
        private_key: PrivateKey,
    ) -> PublicKey {
        let signing_key = SigningKey::from_bytes(&private_key.0);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        self.set_key_pair(public_key, private_key);
        public_key
    }

    pub fn get_signing_key(&self, public_key: &PublicKey) -> Result<SigningKey> {
        let (_, private_key) = self.get_key_pair(public_key)?;
        Ok(SigningKey::from_bytes(&private_key.0))
    }

    pub fn set_key_agreement(
        &self,
        topic: &str,
        self_public_key: PublicKey,
        peer_public_key: PublicKey,
    ) {
        let mut value = self_public_key.0.to_vec();
        value.extend_from_slice(&peer_public_key.0);
        self.store
            .set(&format!("{KEY_AGREEMENT_CONTEXT}:{topic}"), value);
    }

    pub fn get_key_agreement(
        &self,
        topic: &str,
    ) -> Result<(PublicKey, PublicKey)> {
        let (self_public, peer_public) =
            self.get_64(&format!("{KEY_AGREEMENT_CONTEXT}:{topic}"))?;
        Ok((PublicKey(self_public), PublicKey(peer_public)))
    }

    pub fn get_self_public_from_key_agreement(
        &self,
        topic: &str,
    ) -> Result<PublicKey> {
        self.get_key_agreement(topic).map(|(self_public, _)| self_public)
    }

    /// Marks `public_key` as the receiving key for type 1 envelopes that
    /// arrive on `topic`.
    pub fn set_self_participant(&self, topic: &str, public_key: PublicKey) {
        self.store.set(
            &format!("{SELF_PARTICIPANT_CONTEXT}:{topic}"),
            public_key.0.to_vec(),
        );
    }

    pub fn get_self_participant(&self, topic: &str) -> Result<PublicKey> {
        self.get_32(&format!("{SELF_PARTICIPANT_CONTEXT}:{topic}"))
            .map(PublicKey)
    }

    /// X25519 shared secret expanded with HKDF-SHA256 (no salt, no info).
    /// The key is stored under the topic it derives.
    pub fn generate_symmetric_key_from_key_agreement(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<SymmetricKey> {
        let (_, private_key) = self.get_key_pair(self_public_key)?;
        let secret = StaticSecret::from(private_key.0);
        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer_public_key.0));

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(&[], &mut okm)
            .map_err(|e| Error::InternalError(format!("hkdf: {e}")))?;

        let key = SymmetricKey(okm);
        self.set_symmetric_key(&key.topic(), key);
        Ok(key)
    }

    pub fn generate_topic_from_key_agreement(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<String> {
        let key = self.generate_symmetric_key_from_key_agreement(
            self_public_key,
            peer_public_key,
        )?;
        let topic = key.topic();
        self.set_key_agreement(&topic, *self_public_key, *peer_public_key);
        Ok(topic)
    }

    /// Removes the symmetric key, key agreement and self key pair that are
    /// bound to `tag`. Fails with `MissingKey` when nothing was stored.
    pub fn remove_keys(&self, tag: &str) -> Result<()> {
        let mut removed = false;
        if let Ok((self_public, _)) = self.get_key_agreement(tag) {
            removed |= self
                .store
                .delete(&format!("{KEY_PAIR_CONTEXT}:{self_public}"));
        }
        removed |= self
            .store
            .delete(&format!("{KEY_AGREEMENT_CONTEXT}:{tag}"));
        removed |= self
            .store
            .delete(&format!("{SELF_PARTICIPANT_CONTEXT}:{tag}"));
        removed |= self.store.delete(tag);
        if removed {
            Ok(())
        } else {
            Err(Error::MissingKey(tag.to_string()))
        }
    }
}
