/// Codec
///
/// Envelope framing and ChaCha20-Poly1305 sealing of JSON-RPC payloads.
///
/// ```text
/// type 0: 0x00 | iv (12) | sealed
/// type 1: 0x01 | sender public key (32) | iv (12) | sealed
/// type 2: 0x02 | payload (not encrypted)
/// ```
///
use std::sync::Arc;

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::{Error, Result};
use crate::key_management::{KeyManagement, PublicKey, SymmetricKey};
use crate::utils::random_bytes12;

pub const IV_LENGTH: usize = 12;
pub const KEY_LENGTH: usize = 32;
pub const TYPE_LENGTH: usize = 1;
pub const TYPE_0: u8 = 0;
pub const TYPE_1: u8 = 1;
pub const TYPE_2: u8 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvelopeType {
    #[default]
    Zero,
    One,
    Two,
}

impl EnvelopeType {
    pub fn as_byte(&self) -> u8 {
        match self {
            EnvelopeType::Zero => TYPE_0,
            EnvelopeType::One => TYPE_1,
            EnvelopeType::Two => TYPE_2,
        }
    }
}

/// Sender and receiver of a type 1 envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Participants {
    pub sender: PublicKey,
    pub receiver: PublicKey,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum EncodingType {
    #[default]
    Base64,
    Base64Url,
}

impl EncodingType {
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            EncodingType::Base64 => Base64::encode_string(bytes),
            EncodingType::Base64Url => Base64UrlUnpadded::encode_string(bytes),
        }
    }

    pub fn decode(&self, encoded: &str) -> Result<Vec<u8>> {
        Ok(match self {
            EncodingType::Base64 => Base64::decode_vec(encoded)?,
            EncodingType::Base64Url => Base64UrlUnpadded::decode_vec(encoded)?,
        })
    }
}

#[derive(Debug, PartialEq)]
pub struct EncryptedEnvelope {
    pub envelope_type: EnvelopeType,
    pub sealed: Vec<u8>,
    pub iv: [u8; IV_LENGTH],
    // only for type 1 envelopes, lets the receiver derive the key
    pub sender_public_key: Option<PublicKey>,
}

impl EncryptedEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![self.envelope_type.as_byte()];
        match self.envelope_type {
            EnvelopeType::Two => {}
            EnvelopeType::One => {
                let sender = self.sender_public_key.ok_or(
                    Error::InvalidEnvelope("type 1 without sender public key"),
                )?;
                bytes.extend_from_slice(sender.as_bytes());
                bytes.extend_from_slice(&self.iv);
            }
            EnvelopeType::Zero => bytes.extend_from_slice(&self.iv),
        }
        bytes.extend_from_slice(&self.sealed);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (type_byte, rest) = bytes
            .split_first()
            .ok_or(Error::InvalidEnvelope("empty envelope"))?;

        match *type_byte {
            TYPE_0 => {
                if rest.len() < IV_LENGTH {
                    return Err(Error::InvalidEnvelope("truncated type 0"));
                }
                let (iv, sealed) = rest.split_at(IV_LENGTH);
                Ok(EncryptedEnvelope {
                    envelope_type: EnvelopeType::Zero,
                    sealed: sealed.to_vec(),
                    iv: iv.try_into().map_err(|_| {
                        Error::InvalidEnvelope("truncated type 0")
                    })?,
                    sender_public_key: None,
                })
            }
            TYPE_1 => {
                if rest.len() < KEY_LENGTH + IV_LENGTH {
                    return Err(Error::InvalidEnvelope("truncated type 1"));
                }
                let (sender, rest) = rest.split_at(KEY_LENGTH);
                let (iv, sealed) = rest.split_at(IV_LENGTH);
                let mut sender_public_key = [0u8; KEY_LENGTH];
                sender_public_key.copy_from_slice(sender);
                Ok(EncryptedEnvelope {
                    envelope_type: EnvelopeType::One,
                    sealed: sealed.to_vec(),
                    iv: iv.try_into().map_err(|_| {
                        Error::InvalidEnvelope("truncated type 1")
                    })?,
                    sender_public_key: Some(PublicKey(sender_public_key)),
                })
            }
            TYPE_2 => Ok(EncryptedEnvelope {
                envelope_type: EnvelopeType::Two,
                sealed: rest.to_vec(),
                iv: [0u8; IV_LENGTH],
                sender_public_key: None,
            }),
            _ => Err(Error::InvalidEnvelope("unknown envelope type")),
        }
    }
}

fn seal(key: &SymmetricKey, iv: &[u8; IV_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    Ok(cipher.encrypt(Nonce::from_slice(iv), plaintext)?)
}

fn open(key: &SymmetricKey, iv: &[u8; IV_LENGTH], sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| Error::Decryption)
}

pub struct Codec {
    keys: Arc<KeyManagement>,
}

impl Codec {
    pub fn new(keys: Arc<KeyManagement>) -> Self {
        Self { keys }
    }

    /// Type 0 uses the symmetric key stored for `topic`. Type 1 derives the
    /// key from the participants' key agreement instead.
    pub fn encrypt(
        &self,
        topic: &str,
        payload: &str,
        envelope_type: EnvelopeType,
        participants: Option<&Participants>,
    ) -> Result<Vec<u8>> {
        let iv = random_bytes12();
        let envelope = match envelope_type {
            EnvelopeType::Zero => {
                let key = self.keys.get_symmetric_key(topic)?;
                EncryptedEnvelope {
                    envelope_type,
                    sealed: seal(&key, &iv, payload.as_bytes())?,
                    iv,
                    sender_public_key: None,
                }
            }
            EnvelopeType::One => {
                let participants = participants.ok_or(Error::InvalidEnvelope(
                    "type 1 requires participants",
                ))?;
                let key = self.keys.generate_symmetric_key_from_key_agreement(
                    &participants.sender,
                    &participants.receiver,
                )?;
                EncryptedEnvelope {
                    envelope_type,
                    sealed: seal(&key, &iv, payload.as_bytes())?,
                    iv,
                    sender_public_key: Some(participants.sender),
                }
            }
            EnvelopeType::Two => EncryptedEnvelope {
                envelope_type,
                sealed: payload.as_bytes().to_vec(),
                iv,
                sender_public_key: None,
            },
        };
        envelope.to_bytes()
    }

    pub fn decrypt(&self, topic: &str, bytes: &[u8]) -> Result<String> {
        let envelope = EncryptedEnvelope::from_bytes(bytes)?;
        let plaintext = match envelope.envelope_type {
            EnvelopeType::Zero => {
                let key = self.keys.get_symmetric_key(topic)?;
                open(&key, &envelope.iv, &envelope.sealed)?
            }
            EnvelopeType::One => {
                let receiver = self.keys.get_self_participant(topic)?;
                let sender = envelope.sender_public_key.ok_or(
                    Error::InvalidEnvelope("type 1 without sender public key"),
                )?;
                let key = self
                    .keys
                    .generate_symmetric_key_from_key_agreement(&receiver, &sender)?;
                open(&key, &envelope.iv, &envelope.sealed)?
            }
            EnvelopeType::Two => envelope.sealed,
        };
        Ok(String::from_utf8(plaintext)?)
    }
}
