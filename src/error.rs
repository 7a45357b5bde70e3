use std::fmt::{self, Display};
use std::time::Duration;

use crate::validator::ValidationError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    InvalidUri,
    InvalidEnvelope(&'static str),
    Decryption,
    MissingKey(String),
    DuplicateRecord(u64),
    AlreadyExists(String),
    NotFound(String),
    NoMatchingTopic { sequence: &'static str, topic: String },
    Unauthorized(&'static str),
    UnknownMethod(String),
    Validation(ValidationError),
    Peer(PeerError),
    InvalidCacao,
    InvalidJwt(String),
    Transport(String),
    PublishFailed { attempts: u32, reason: String },
    Timeout { request_id: u64, after: Duration },
    InternalError(String),
    Reqwest(reqwest::Error),
    SerdeJsonError(serde_json::Error),
    FromHexError(alloy::hex::FromHexError),
    AeadError(chacha20poly1305::Error),
    FromUtf8Error(std::string::FromUtf8Error),
    FmtError(std::fmt::Error),
    SignatureError(alloy::primitives::SignatureError),
    Ed25519Error(ed25519_dalek::SignatureError),
    Base64Error(base64ct::Error),
    TimeError(time::error::Parse),
    SystemTimeError(std::time::SystemTimeError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUri => write!(f, "invalid pairing uri"),
            Error::InvalidEnvelope(reason) => {
                write!(f, "invalid envelope: {reason}")
            }
            Error::Decryption => write!(f, "failed to decrypt envelope"),
            Error::MissingKey(tag) => write!(f, "no key stored for {tag}"),
            Error::DuplicateRecord(id) => {
                write!(f, "json-rpc record {id} already exists")
            }
            Error::AlreadyExists(key) => write!(f, "{key} already exists"),
            Error::NotFound(key) => write!(f, "{key} not found"),
            Error::NoMatchingTopic { sequence, topic } => {
                write!(f, "no matching {sequence} for topic {topic}")
            }
            Error::Unauthorized(what) => write!(f, "unauthorized: {what}"),
            Error::UnknownMethod(method) => {
                write!(f, "unknown method {method}")
            }
            Error::Validation(e) => write!(f, "{e}"),
            Error::Peer(e) => write!(f, "peer error {}: {}", e.code(), e),
            Error::InvalidCacao => write!(f, "cacao signature is invalid"),
            Error::InvalidJwt(reason) => write!(f, "invalid jwt: {reason}"),
            Error::Transport(reason) => write!(f, "transport: {reason}"),
            Error::PublishFailed { attempts, reason } => {
                write!(f, "publish failed after {attempts} attempts: {reason}")
            }
            Error::Timeout { request_id, after } => {
                write!(f, "request {request_id} timed out after {after:?}")
            }
            Error::InternalError(e) => write!(f, "{e}"),
            Error::Reqwest(e) => write!(f, "{e}"),
            Error::SerdeJsonError(e) => write!(f, "{e}"),
            Error::FromHexError(e) => write!(f, "{e}"),
            Error::AeadError(e) => write!(f, "{e}"),
            Error::FromUtf8Error(e) => write!(f, "{e}"),
            Error::FmtError(e) => write!(f, "{e}"),
            Error::SignatureError(e) => write!(f, "{e}"),
            Error::Ed25519Error(e) => write!(f, "{e}"),
            Error::Base64Error(e) => write!(f, "{e}"),
            Error::TimeError(e) => write!(f, "{e}"),
            Error::SystemTimeError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

/// Errors sent back to the remote peer as the `error` member of a JSON-RPC
/// response. Codes follow the WalletConnect sign/core error tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerError {
    InvalidMethod,
    InvalidEvent(String),
    InvalidUpdateRequest(String),
    InvalidExtendRequest(String),
    InvalidSessionSettleRequest(String),
    InvalidSessionRequest(String),
    NoMatchingTopic { sequence: &'static str, topic: String },
    UnauthorizedMethod(String),
    UnauthorizedEvent(String),
    UnauthorizedUpdateRequest,
    UnauthorizedExtendRequest,
    UserRejected(String),
    UserRejectedChains(String),
    UserRejectedMethods(String),
    UserRejectedEvents(String),
    UnsupportedChains(String),
    UnsupportedNamespaceKey(String),
    UserDisconnected,
    SessionSettlementFailed(String),
    SessionRequestExpired,
    MethodUnsupported(String),
    Generic(String),
    /// Any code received from a peer that this crate does not classify.
    Other { code: i64, message: String },
}

impl PeerError {
    pub fn code(&self) -> i64 {
        match self {
            PeerError::InvalidMethod => 1001,
            PeerError::InvalidEvent(_) => 1002,
            PeerError::InvalidUpdateRequest(_) => 1003,
            PeerError::InvalidExtendRequest(_) => 1004,
            PeerError::InvalidSessionSettleRequest(_) => 1005,
            PeerError::InvalidSessionRequest(_) => 1001,
            PeerError::NoMatchingTopic { .. } => 1301,
            PeerError::UnauthorizedMethod(_) => 3001,
            PeerError::UnauthorizedEvent(_) => 3002,
            PeerError::UnauthorizedUpdateRequest => 3003,
            PeerError::UnauthorizedExtendRequest => 3004,
            PeerError::UserRejected(_) => 5000,
            PeerError::UserRejectedChains(_) => 5001,
            PeerError::UserRejectedMethods(_) => 5002,
            PeerError::UserRejectedEvents(_) => 5003,
            PeerError::UnsupportedChains(_) => 5100,
            PeerError::UnsupportedNamespaceKey(_) => 5104,
            PeerError::UserDisconnected => 6000,
            PeerError::SessionSettlementFailed(_) => 7000,
            PeerError::SessionRequestExpired => 8000,
            PeerError::MethodUnsupported(_) => 10001,
            PeerError::Generic(_) => 0,
            PeerError::Other { code, .. } => *code,
        }
    }

    /// Maps a received error object back onto the known variants when the
    /// code is one the engine itself emits without a free-form message.
    pub fn from_code(code: i64, message: String) -> Self {
        match code {
            3003 => PeerError::UnauthorizedUpdateRequest,
            3004 => PeerError::UnauthorizedExtendRequest,
            5000 => PeerError::UserRejected(message),
            6000 => PeerError::UserDisconnected,
            8000 => PeerError::SessionRequestExpired,
            _ => PeerError::Other { code, message },
        }
    }
}

impl Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::InvalidMethod => write!(f, "Invalid method"),
            PeerError::InvalidEvent(m)
            | PeerError::InvalidUpdateRequest(m)
            | PeerError::InvalidExtendRequest(m)
            | PeerError::InvalidSessionSettleRequest(m)
            | PeerError::InvalidSessionRequest(m)
            | PeerError::UnauthorizedMethod(m)
            | PeerError::UnauthorizedEvent(m)
            | PeerError::UserRejected(m)
            | PeerError::UserRejectedChains(m)
            | PeerError::UserRejectedMethods(m)
            | PeerError::UserRejectedEvents(m)
            | PeerError::UnsupportedChains(m)
            | PeerError::UnsupportedNamespaceKey(m)
            | PeerError::SessionSettlementFailed(m)
            | PeerError::Generic(m) => write!(f, "{m}"),
            PeerError::NoMatchingTopic { sequence, topic } => write!(
                f,
                "No matching key. {sequence} topic doesn't exist: {topic}"
            ),
            PeerError::UnauthorizedUpdateRequest => {
                write!(f, "Unauthorized update request")
            }
            PeerError::UnauthorizedExtendRequest => {
                write!(f, "Unauthorized extend request")
            }
            PeerError::UserDisconnected => write!(f, "User disconnected"),
            PeerError::SessionRequestExpired => {
                write!(f, "Session request expired")
            }
            PeerError::MethodUnsupported(method) => {
                write!(f, "Unsupported wc_ method. {method}")
            }
            PeerError::Other { message, .. } => write!(f, "{message}"),
        }
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::InternalError(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<PeerError> for Error {
    fn from(e: PeerError) -> Self {
        Error::Peer(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Reqwest(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerdeJsonError(e)
    }
}

impl From<alloy::hex::FromHexError> for Error {
    fn from(e: alloy::hex::FromHexError) -> Self {
        Error::FromHexError(e)
    }
}

impl From<chacha20poly1305::Error> for Error {
    fn from(e: chacha20poly1305::Error) -> Self {
        Error::AeadError(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::FromUtf8Error(e)
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Error::FmtError(e)
    }
}

impl From<alloy::primitives::SignatureError> for Error {
    fn from(e: alloy::primitives::SignatureError) -> Self {
        Error::SignatureError(e)
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::Ed25519Error(e)
    }
}

impl From<base64ct::Error> for Error {
    fn from(e: base64ct::Error) -> Self {
        Error::Base64Error(e)
    }
}

impl From<time::error::Parse> for Error {
    fn from(e: time::error::Parse) -> Self {
        Error::TimeError(e)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(e: std::time::SystemTimeError) -> Self {
        Error::SystemTimeError(e)
    }
}
