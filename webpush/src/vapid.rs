//! VAPID (RFC 8292) identification of this sender to push services.

use std::fmt;

use p256::{
    ecdsa::{signature::Signer, Signature, SigningKey},
    elliptic_curve::rand_core::OsRng,
};
use serde::{Deserialize, Serialize};

use crate::{
    base64url,
    error::PushError,
    jose::{self, P256_JOSE_LENGTH},
};

/// Tokens are valid for twelve hours after issue.
pub const VAPID_TOKEN_LIFETIME_SECS: u64 = 12 * 60 * 60;

const PUBLIC_KEY_LENGTH: usize = 65;
const PRIVATE_KEY_LENGTH: usize = 32;
const UNCOMPRESSED_POINT: u8 = 0x04;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct JwtHeader {
    pub typ: String,
    pub alg: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct VapidClaims {
    pub aud: String,
    pub exp: u64,
    pub sub: String,
}

/// P-256 key pair: the raw 32-byte private scalar and the 65-byte
/// uncompressed public point browsers receive as `applicationServerKey`.
#[derive(Clone)]
pub struct VapidKeyPair {
    signing_key: SigningKey,
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl fmt::Debug for VapidKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeyPair")
            .field("public_key", &self.public_key_base64url())
            .finish_non_exhaustive()
    }
}

impl VapidKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
        public_key.copy_from_slice(signing_key.verifying_key().to_encoded_point(false).as_bytes());

        Self {
            signing_key,
            public_key,
        }
    }

    pub fn from_base64url(public_key: &str, private_key: &str) -> Result<Self, PushError> {
        let public_key = base64url::decode(public_key)
            .map_err(|e| PushError::InvalidKeyMaterial(format!("public key: {e}")))?;
        let private_key = base64url::decode(private_key)
            .map_err(|e| PushError::InvalidKeyMaterial(format!("private key: {e}")))?;
        Self::from_bytes(&public_key, &private_key)
    }

    /// Rebuilds the signing key from the scalar and checks it against the public point.
    pub fn from_bytes(public_key: &[u8], private_key: &[u8]) -> Result<Self, PushError> {
        if public_key.len() != PUBLIC_KEY_LENGTH || public_key[0] != UNCOMPRESSED_POINT {
            return Err(PushError::InvalidKeyMaterial(
                "public key must be a 65-byte uncompressed P-256 point".into(),
            ));
        }
        if private_key.len() != PRIVATE_KEY_LENGTH {
            return Err(PushError::InvalidKeyMaterial(format!(
                "private key must be a 32-byte P-256 scalar, got {} bytes",
                private_key.len()
            )));
        }

        let signing_key = SigningKey::from_bytes(private_key.into()).map_err(|_| {
            PushError::InvalidKeyMaterial("private key is not a valid P-256 scalar".into())
        })?;
        if signing_key.verifying_key().to_encoded_point(false).as_bytes() != public_key {
            return Err(PushError::InvalidKeyMaterial(
                "public key does not belong to the private key".into(),
            ));
        }

        let mut point = [0u8; PUBLIC_KEY_LENGTH];
        point.copy_from_slice(public_key);
        Ok(Self {
            signing_key,
            public_key: point,
        })
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    pub fn public_key_base64url(&self) -> String {
        base64url::encode_bytes(&self.public_key)
    }

    pub fn private_key_base64url(&self) -> String {
        base64url::encode_bytes(self.signing_key.to_bytes().as_slice())
    }

    /// Signs a compact ES256 JWT `header.claims.signature` for `audience`,
    /// expiring [`VAPID_TOKEN_LIFETIME_SECS`] after `now`.
    pub fn sign(&self, audience: &str, subject: &str, now: u64) -> Result<String, PushError> {
        let header = JwtHeader {
            typ: "JWT".into(),
            alg: "ES256".into(),
        };
        let claims = VapidClaims {
            aud: audience.to_owned(),
            exp: now + VAPID_TOKEN_LIFETIME_SECS,
            sub: subject.to_owned(),
        };

        let signing_input = format!(
            "{}.{}",
            base64url::encode_text(&serde_json::to_string(&header)?),
            base64url::encode_text(&serde_json::to_string(&claims)?),
        );

        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());
        let der = signature.to_der();
        let jose = jose::der_to_jose(der.as_bytes(), P256_JOSE_LENGTH)?;

        Ok(format!("{signing_input}.{}", base64url::encode_bytes(&jose)))
    }
}

/// Sender identity: key pair plus the contact URI placed in `sub`.
#[derive(Clone, Debug)]
pub struct VapidConfig {
    pub keys: VapidKeyPair,
    pub subject: String,
}

impl VapidConfig {
    /// Validates configuration values, reporting every absent one at once.
    pub fn from_parts(
        public_key: Option<&str>,
        private_key: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Self, PushError> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.filter(|v| !v.trim().is_empty())
        }

        let mut missing = Vec::new();
        for (name, value) in [
            ("VAPID_PUBLIC_KEY", public_key),
            ("VAPID_PRIVATE_KEY", private_key),
            ("VAPID_SUBJECT", subject),
        ] {
            if present(value).is_none() {
                missing.push(name);
            }
        }

        match (present(public_key), present(private_key), present(subject)) {
            (Some(public_key), Some(private_key), Some(subject)) => Ok(Self {
                keys: VapidKeyPair::from_base64url(public_key.trim(), private_key.trim())?,
                subject: subject.trim().to_owned(),
            }),
            _ => Err(PushError::MissingConfiguration(missing)),
        }
    }

    pub fn public_key_base64url(&self) -> String {
        self.keys.public_key_base64url()
    }
}
