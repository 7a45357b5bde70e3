use std::time::{SystemTime, UNIX_EPOCH};

use alloy::signers::k256::sha2::{Digest, Sha256};
use rand::{RngCore, rngs::OsRng};

use crate::constants::{
    DID_DELIMITER, DID_METHOD_KEY, DID_METHOD_PKH, DID_PREFIX,
    MULTICODEC_ED25519_BASE, MULTICODEC_ED25519_HEADER,
    MULTICODEC_ED25519_LENGTH,
};
use crate::error::{Error, Result};

pub const MINUTES: u64 = 60;
pub const HOURS: u64 = 60 * MINUTES;
pub const DAYS: u64 = 24 * HOURS;
pub const WEEKS: u64 = 7 * DAYS;
pub const MONTHS: u64 = 30 * DAYS;

pub fn random_bytes32() -> [u8; 32] {
    let mut random_value = [0u8; 32];
    OsRng.fill_bytes(&mut random_value);
    random_value
}

pub fn random_bytes12() -> [u8; 12] {
    let mut random_value = [0u8; 12];
    OsRng.fill_bytes(&mut random_value);
    random_value
}

pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::digest(data.as_ref()).into()
}

pub fn unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// `did:key:z<base58btc(0xed01 || public_key)>`
pub fn encode_ed25519_did_key(public_key: &[u8; 32]) -> String {
    let mut bytes = MULTICODEC_ED25519_HEADER.to_vec();
    bytes.extend_from_slice(public_key);
    let multicodec = format!(
        "{}{}",
        MULTICODEC_ED25519_BASE,
        bs58::encode(bytes).into_string()
    );
    [DID_PREFIX, DID_METHOD_KEY, &multicodec].join(DID_DELIMITER)
}

pub fn decode_ed25519_did_key(did: &str) -> Result<[u8; 32]> {
    let prefix = format!(
        "{DID_PREFIX}{DID_DELIMITER}{DID_METHOD_KEY}{DID_DELIMITER}{MULTICODEC_ED25519_BASE}"
    );
    let encoded = did
        .strip_prefix(&prefix)
        .ok_or_else(|| Error::InvalidJwt(format!("not an ed25519 did:key {did}")))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidJwt(e.to_string()))?;
    let key = bytes
        .strip_prefix(&MULTICODEC_ED25519_HEADER)
        .filter(|key| key.len() == MULTICODEC_ED25519_LENGTH)
        .ok_or_else(|| Error::InvalidJwt(format!("bad multicodec in {did}")))?;
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(key);
    Ok(public_key)
}

/// `did:pkh:<caip-10 account>`
pub fn encode_did_pkh(account: &str) -> String {
    [DID_PREFIX, DID_METHOD_PKH, account].join(DID_DELIMITER)
}

pub fn decode_did_pkh(did: &str) -> Result<String> {
    let prefix = format!("{DID_PREFIX}{DID_DELIMITER}{DID_METHOD_PKH}{DID_DELIMITER}");
    did.strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidJwt(format!("not a did:pkh {did}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_key_roundtrip() {
        let key = [7u8; 32];
        let did = encode_ed25519_did_key(&key);
        assert!(did.starts_with("did:key:z6Mk"));
        assert_eq!(decode_ed25519_did_key(&did).unwrap(), key);
    }

    #[test]
    fn test_did_key_rejects_other_methods() {
        assert!(decode_ed25519_did_key("did:pkh:eip155:1:0xabc").is_err());
        assert!(decode_ed25519_did_key("did:key:z111").is_err());
    }

    #[test]
    fn test_did_pkh() {
        let did = encode_did_pkh("eip155:1:0xabc");
        assert_eq!(did, "did:pkh:eip155:1:0xabc");
        assert_eq!(decode_did_pkh(&did).unwrap(), "eip155:1:0xabc");
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            alloy::hex::encode(sha256([])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
