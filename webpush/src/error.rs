use thiserror::Error;

use crate::base64url::DecodeError;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("malformed base64url: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(&'static str),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("missing configuration: {}", .0.join(", "))]
    MissingConfiguration(Vec<&'static str>),
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("payload of {0} bytes does not fit in a single record")]
    PayloadTooLarge(usize),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("could not serialize: {0}")]
    Json(#[from] serde_json::Error),
}
