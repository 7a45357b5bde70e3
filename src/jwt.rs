/// JWT
///
/// EdDSA JWTs whose issuer is an Ed25519 `did:key`. The relay auth token and
/// every notify message body use this format; the signature is always
/// checked against the key embedded in `iss`.
///
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    JWT_ALG, JWT_CLOCK_SKEW, JWT_DELIMITER, JWT_TYP, NOTIFY_JWT_VERSION,
};
use crate::error::{Error, Result};
use crate::utils::decode_ed25519_did_key;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for JwtHeader {
    fn default() -> Self {
        Self {
            alg: JWT_ALG.to_string(),
            typ: JWT_TYP.to_string(),
        }
    }
}

fn encode_json<T: ?Sized + Serialize>(value: &T) -> Result<String> {
    Ok(Base64UrlUnpadded::encode_string(&serde_json::to_vec(value)?))
}

fn decode_json<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = Base64UrlUnpadded::decode_vec(segment)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn encode_did_jwt<C: Serialize>(
    claims: &C,
    signing_key: &SigningKey,
) -> Result<String> {
    let header = encode_json(&JwtHeader::default())?;
    let payload = encode_json(claims)?;
    let data = format!("{header}{JWT_DELIMITER}{payload}");
    let signature = signing_key.sign(data.as_bytes());
    Ok(format!(
        "{data}{JWT_DELIMITER}{}",
        Base64UrlUnpadded::encode_string(&signature.to_bytes())
    ))
}

/// Verifies the signature against the `iss` did:key and returns the claims.
/// Time and action checks are left to the caller.
pub fn decode_did_jwt<C: DeserializeOwned>(jwt: &str) -> Result<C> {
    let segments: Vec<&str> = jwt.split(JWT_DELIMITER).collect();
    let [raw_header, raw_payload, raw_signature] = segments.as_slice() else {
        return Err(Error::InvalidJwt("expected three segments".to_string()));
    };

    let header: JwtHeader = decode_json(raw_header)?;
    if header.alg != JWT_ALG {
        return Err(Error::InvalidJwt(format!("unsupported alg {}", header.alg)));
    }

    let claims: Value = decode_json(raw_payload)?;
    let iss = claims
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidJwt("missing iss".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&decode_ed25519_did_key(iss)?)?;

    let signature =
        Signature::from_slice(&Base64UrlUnpadded::decode_vec(raw_signature)?)?;
    let data = format!("{raw_header}{JWT_DELIMITER}{raw_payload}");
    verifying_key.verify_strict(data.as_bytes(), &signature)?;

    serde_json::from_value(claims)
        .map_err(|e| Error::InvalidJwt(format!("claims: {e}")))
}

/// Claims shared by every notify JWT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotifyClaims {
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub act: String,
    pub mjv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Keyserver url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksu: Option<String>,
    /// Dapp domain as a `did:web`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Space separated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<NotifyMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl NotifyClaims {
    pub fn new(iss: String, act: &str, now: u64, ttl: u64) -> Self {
        Self {
            iss,
            iat: now,
            exp: now + ttl,
            act: act.to_string(),
            mjv: NOTIFY_JWT_VERSION.to_string(),
            sub: None,
            aud: None,
            ksu: None,
            app: None,
            scp: None,
            msg: None,
        }
    }

    /// `iat` may be at most five minutes ahead of `now` and `exp` at most
    /// five minutes behind it.
    pub fn verify(&self, expected_act: &str, now: u64) -> Result<()> {
        if self.iat > now + JWT_CLOCK_SKEW {
            return Err(Error::InvalidJwt(format!(
                "iat {} is after {}",
                self.iat,
                now + JWT_CLOCK_SKEW
            )));
        }
        if self.exp < now.saturating_sub(JWT_CLOCK_SKEW) {
            return Err(Error::InvalidJwt(format!(
                "exp {} is before {}",
                self.exp,
                now.saturating_sub(JWT_CLOCK_SKEW)
            )));
        }
        if self.act != expected_act {
            return Err(Error::InvalidJwt(format!(
                "act {} instead of {expected_act}",
                self.act
            )));
        }
        if self.mjv != NOTIFY_JWT_VERSION {
            return Err(Error::InvalidJwt(format!(
                "mjv {} instead of {NOTIFY_JWT_VERSION}",
                self.mjv
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::encode_ed25519_did_key;

    const NOW: u64 = 1_750_000_000;

    fn signer() -> (SigningKey, String) {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let did = encode_ed25519_did_key(&key.verifying_key().to_bytes());
        (key, did)
    }

    #[test]
    fn test_sign_and_verify() {
        let (key, did) = signer();
        let claims = NotifyClaims::new(did, "notify_subscription", NOW, 30);
        let jwt = encode_did_jwt(&claims, &key).unwrap();
        let decoded: NotifyClaims = decode_did_jwt(&jwt).unwrap();
        assert_eq!(decoded, claims);
        decoded.verify("notify_subscription", NOW).unwrap();
    }

    #[test]
    fn test_signature_bound_to_issuer() {
        let (key, _) = signer();
        let other = SigningKey::from_bytes(&[8u8; 32]);
        let other_did = encode_ed25519_did_key(&other.verifying_key().to_bytes());
        // claims name another issuer than the key that signed them
        let claims = NotifyClaims::new(other_did, "notify_message", NOW, 30);
        let jwt = encode_did_jwt(&claims, &key).unwrap();
        assert!(decode_did_jwt::<NotifyClaims>(&jwt).is_err());
    }

    #[test]
    fn test_time_window() {
        let (_, did) = signer();
        let mut claims = NotifyClaims::new(did, "notify_message", NOW, 30);

        claims.iat = NOW + JWT_CLOCK_SKEW;
        assert!(claims.verify("notify_message", NOW).is_ok());
        claims.iat = NOW + JWT_CLOCK_SKEW + 1;
        assert!(claims.verify("notify_message", NOW).is_err());

        claims.iat = NOW - 100;
        claims.exp = NOW - JWT_CLOCK_SKEW;
        assert!(claims.verify("notify_message", NOW).is_ok());
        claims.exp = NOW - JWT_CLOCK_SKEW - 1;
        assert!(claims.verify("notify_message", NOW).is_err());
    }

    #[test]
    fn test_literal_claims() {
        let (_, did) = signer();
        let mut claims = NotifyClaims::new(did, "notify_message", NOW, 30);
        assert!(matches!(
            claims.verify("notify_delete", NOW),
            Err(Error::InvalidJwt(_))
        ));
        claims.mjv = "2".to_string();
        assert!(claims.verify("notify_message", NOW).is_err());
    }

    #[test]
    fn test_malformed_jwt() {
        assert!(matches!(
            decode_did_jwt::<NotifyClaims>("a.b"),
            Err(Error::InvalidJwt(_))
        ));
    }
}
