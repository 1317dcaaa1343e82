//! Unpadded base64url, the encoding used for VAPID keys, subscription keys
//! and every JWT segment.

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use thiserror::Error;

const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty input")]
    Empty,
    #[error(transparent)]
    Malformed(#[from] base64::DecodeError),
}

pub fn encode_text(s: &str) -> String {
    encode_bytes(s.as_bytes())
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    ENGINE.encode(bytes)
}

/// Decodes base64url with or without trailing `=` padding.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    if s.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(ENGINE.decode(s)?)
}
