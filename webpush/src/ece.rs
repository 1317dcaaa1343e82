//! `aes128gcm` content encoding for Web Push messages (RFC 8188 / RFC 8291).
//!
//! Only single-record messages are produced: the plaintext, one `0x02`
//! delimiter and the GCM tag must fit in [`RECORD_SIZE`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use hkdf::Hkdf;
use p256::{
    ecdh::EphemeralSecret,
    elliptic_curve::{
        rand_core::{OsRng, RngCore},
        sec1::ToEncodedPoint,
    },
    PublicKey,
};
use sha2::Sha256;

use crate::{base64url, error::PushError};

const WEBPUSH_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const AES128GCM_KEY_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const AES128GCM_NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

pub const RECORD_SIZE: u32 = 4096;
pub const SALT_LENGTH: usize = 16;
pub const PUBLIC_KEY_LENGTH: usize = 65;
pub const AUTH_SECRET_LENGTH: usize = 16;
pub const HEADER_LENGTH: usize = SALT_LENGTH + 4 + 1;

const IKM_LENGTH: usize = 32;
const KEY_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const LAST_RECORD_DELIMITER: u8 = 0x02;

/// Largest plaintext that fits a single record.
pub const MAX_PLAINTEXT_LENGTH: usize = RECORD_SIZE as usize - TAG_LENGTH - 1;

/// Decoded `p256dh` and `auth` values of a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberKeys {
    pub p256dh: Vec<u8>,
    pub auth: Vec<u8>,
}

impl SubscriberKeys {
    pub fn from_base64url(p256dh: &str, auth: &str) -> Result<Self, PushError> {
        let p256dh = base64url::decode(p256dh)
            .map_err(|e| PushError::InvalidKeyMaterial(format!("p256dh: {e}")))?;
        let auth = base64url::decode(auth)
            .map_err(|e| PushError::InvalidKeyMaterial(format!("auth: {e}")))?;

        if p256dh.len() != PUBLIC_KEY_LENGTH || p256dh[0] != 0x04 {
            return Err(PushError::InvalidKeyMaterial(
                "p256dh must be a 65-byte uncompressed P-256 point".into(),
            ));
        }
        if auth.len() != AUTH_SECRET_LENGTH {
            return Err(PushError::InvalidKeyMaterial(format!(
                "auth secret must be 16 bytes, got {}",
                auth.len()
            )));
        }

        Ok(Self { p256dh, auth })
    }
}

/// Encrypts `plaintext` for the subscriber, returning
/// `salt || rs || idlen || ephemeral public key || ciphertext`.
pub fn encrypt(keys: &SubscriberKeys, plaintext: &[u8]) -> Result<Vec<u8>, PushError> {
    if plaintext.len() > MAX_PLAINTEXT_LENGTH {
        return Err(PushError::PayloadTooLarge(plaintext.len()));
    }

    let server_secret = EphemeralSecret::random(&mut OsRng);
    let server_public_key = server_secret.public_key().to_encoded_point(false);
    let server_public_key = server_public_key.as_bytes();

    let client_public_key = PublicKey::from_sec1_bytes(&keys.p256dh)
        .map_err(|_| PushError::InvalidKeyMaterial("p256dh is not on the P-256 curve".into()))?;
    let shared_secret = server_secret.diffie_hellman(&client_public_key);

    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);

    let mut ikm = [0u8; IKM_LENGTH];
    hkdf_sha256(
        &keys.auth,
        shared_secret.raw_secret_bytes().as_slice(),
        &key_info(&keys.p256dh, server_public_key),
        &mut ikm,
    )?;

    let mut key = [0u8; KEY_LENGTH];
    hkdf_sha256(&salt, &ikm, AES128GCM_KEY_INFO, &mut key)?;
    let mut nonce = [0u8; NONCE_LENGTH];
    hkdf_sha256(&salt, &ikm, AES128GCM_NONCE_INFO, &mut nonce)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let ciphertext = Aes128Gcm::new_from_slice(&key)
        .map_err(|e| PushError::Encryption(e.to_string()))?
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| PushError::Encryption(e.to_string()))?;

    let mut output =
        Vec::with_capacity(HEADER_LENGTH + server_public_key.len() + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    output.push(server_public_key.len() as u8);
    output.extend_from_slice(server_public_key);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// `"WebPush: info\0" || ua_public || as_public`
fn key_info(client_public_key: &[u8], server_public_key: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(
        WEBPUSH_INFO_PREFIX.len() + client_public_key.len() + server_public_key.len(),
    );
    info.extend_from_slice(WEBPUSH_INFO_PREFIX);
    info.extend_from_slice(client_public_key);
    info.extend_from_slice(server_public_key);
    info
}

fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), PushError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|e| PushError::Encryption(e.to_string()))
}
