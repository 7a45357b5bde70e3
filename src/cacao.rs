/// CACAO (CAIP-74) objects exchanged by `wc_sessionAuthenticate` and their
/// verification.
///
use std::fmt::Write;
use std::str::FromStr;

use alloy::primitives::{Address, Signature};
use base64ct::{Base64, Base64Url, Base64UrlUnpadded, Encoding};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::types::AuthPayload;
use crate::utils::{decode_did_pkh, encode_did_pkh};

const RECAP_PREFIX: &str = "urn:recap:";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cacao {
    #[serde(rename = "h")]
    pub header: CacaoHeader,
    #[serde(rename = "p")]
    pub payload: CacaoPayload,
    #[serde(rename = "s")]
    pub signature: CacaoSignature,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacaoHeader {
    #[serde(rename = "t")]
    pub header_type: String, // "caip122"
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacaoPayload {
    pub iss: String,
    pub domain: String,
    pub aud: String,
    pub version: String,
    pub nonce: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureType {
    Eip191,
    Eip1271,
    Unknown(String),
}

impl From<String> for SignatureType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "eip191" => SignatureType::Eip191,
            "eip1271" => SignatureType::Eip1271,
            _ => SignatureType::Unknown(value),
        }
    }
}

impl From<SignatureType> for String {
    fn from(value: SignatureType) -> Self {
        match value {
            SignatureType::Eip191 => "eip191".to_string(),
            SignatureType::Eip1271 => "eip1271".to_string(),
            SignatureType::Unknown(t) => t,
        }
    }
}

impl Serialize for SignatureType {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from(self.clone()))
    }
}

impl<'de> Deserialize<'de> for SignatureType {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        Ok(String::deserialize(deserializer)?.into())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacaoSignature {
    #[serde(rename = "t")]
    pub signature_type: SignatureType,
    #[serde(rename = "s")]
    pub signature: String,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CacaoPayload {
    /// Payload a wallet signs in answer to `wc_sessionAuthenticate`.
    /// `account` is a CAIP-10 account id.
    pub fn from_auth_payload(payload: &AuthPayload, account: &str) -> Self {
        CacaoPayload {
            iss: encode_did_pkh(account),
            domain: payload.domain.clone(),
            aud: payload.aud.clone(),
            version: payload.version.clone(),
            nonce: payload.nonce.clone(),
            iat: payload.iat.clone(),
            nbf: payload.nbf.clone(),
            exp: payload.exp.clone(),
            statement: payload.statement.clone(),
            request_id: payload.request_id.clone(),
            resources: payload.resources.clone(),
        }
    }

    /// CAIP-10 account of the signer, e.g. `eip155:137:0x93a0...`.
    pub fn account(&self) -> Result<String> {
        decode_did_pkh(&self.iss)
    }

    fn account_parts(&self) -> Result<(String, String, Address)> {
        let account = self.account()?;
        let parts: Vec<&str> = account.split(':').collect();
        match parts.as_slice() {
            [namespace, reference, address] => Ok((
                namespace.to_string(),
                reference.to_string(),
                Address::from_str(address).map_err(|_| Error::InvalidCacao)?,
            )),
            _ => Err(Error::InvalidCacao),
        }
    }

    pub fn address(&self) -> Result<Address> {
        self.account_parts().map(|(_, _, address)| address)
    }

    /// CAIP-122 "Sign in with X" message, byte for byte what the wallet
    /// signed.
    pub fn caip122_message(&self) -> Result<String> {
        let chain_name = "Ethereum";
        let (_, chain_id, address) = self.account_parts()?;

        let mut message = format!(
            "{} wants you to sign in with your {} account:\n{}\n\n",
            self.domain, chain_name, address
        );

        if let Some(statement) = &self.statement {
            writeln!(message, "{statement}\n")?;
        }

        write!(
            message,
            "URI: {}\nVersion: {}\nChain ID: {}",
            self.aud, self.version, chain_id,
        )?;

        write!(message, "\nNonce: {}", self.nonce)?;
        write!(message, "\nIssued At: {}", self.iat)?;

        if let Some(expiration_time) = &self.exp {
            write!(message, "\nExpiration Time: {expiration_time}")?;
        }

        if let Some(not_before) = &self.nbf {
            write!(message, "\nNot Before: {not_before}")?;
        }

        if let Some(request_id) = &self.request_id {
            write!(message, "\nRequest ID: {request_id}")?;
        }

        if let Some(resources) = self.resources.as_ref().filter(|r| !r.is_empty())
        {
            write!(message, "\nResources:")?;
            for resource in resources {
                write!(message, "\n- {resource}")?;
            }
        }

        Ok(message)
    }

    /// Whether `now` lies outside the `nbf`..`exp` window of the payload.
    pub fn is_outside_validity(&self, now: u64) -> Result<bool> {
        if let Some(exp) = &self.exp {
            if parse_timestamp(exp)? <= now {
                return Ok(true);
            }
        }
        if let Some(nbf) = &self.nbf {
            if parse_timestamp(nbf)? > now {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Methods granted through a ReCap resource, `request/<method>` keys of
    /// the `eip155` attenuation.
    pub fn recap_methods(&self) -> Vec<String> {
        let Some(resources) = &self.resources else {
            return Vec::new();
        };
        let mut methods: Vec<String> = resources
            .iter()
            .filter_map(|r| r.strip_prefix(RECAP_PREFIX))
            .filter_map(decode_recap)
            .filter_map(|recap| recap.get("att")?.get("eip155").cloned())
            .filter_map(|abilities| abilities.as_object().cloned())
            .flat_map(|abilities| {
                abilities
                    .keys()
                    .filter_map(|k| k.strip_prefix("request/"))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }
}

fn parse_timestamp(value: &str) -> Result<u64> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)?;
    Ok(parsed.unix_timestamp().max(0) as u64)
}

fn decode_recap(encoded: &str) -> Option<Value> {
    let bytes = Base64UrlUnpadded::decode_vec(encoded)
        .or_else(|_| Base64Url::decode_vec(encoded))
        .or_else(|_| Base64::decode_vec(encoded))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

impl Cacao {
    pub fn new(payload: CacaoPayload, signature: CacaoSignature) -> Self {
        Cacao {
            header: CacaoHeader {
                header_type: "caip122".to_string(),
            },
            payload,
            signature,
        }
    }
}

/// Checks CACAO signatures. Only EIP-191 personal-sign signatures can pass;
/// every other scheme fails closed.
pub struct CacaoVerifier;

impl CacaoVerifier {
    pub fn verify(cacao: &Cacao) -> bool {
        match &cacao.signature.signature_type {
            SignatureType::Eip191 => match verify_eip191(cacao) {
                Ok(valid) => valid,
                Err(e) => {
                    debug!("eip191 cacao rejected: {e}");
                    false
                }
            },
            SignatureType::Eip1271 => {
                debug!("eip1271 cacao rejected, contract signatures unsupported");
                false
            }
            SignatureType::Unknown(t) => {
                debug!("cacao with unknown signature type {t} rejected");
                false
            }
        }
    }

    /// `verify` plus the `exp`/`nbf` window checked against `now`.
    pub fn verify_at(cacao: &Cacao, now: u64) -> bool {
        match cacao.payload.is_outside_validity(now) {
            Ok(false) => Self::verify(cacao),
            Ok(true) => {
                debug!("cacao for {} outside its validity window", cacao.payload.iss);
                false
            }
            Err(e) => {
                debug!("cacao with unreadable timestamps rejected: {e}");
                false
            }
        }
    }
}

fn verify_eip191(cacao: &Cacao) -> Result<bool> {
    let message = cacao.payload.caip122_message()?;
    let expected = cacao.payload.address()?;
    let recovered = Signature::from_str(&cacao.signature.signature)?
        .recover_address_from_msg(message)?;
    Ok(recovered == expected)
}
