use serde::{Deserialize, Serialize};

/// Encryption material a browser hands out with its push subscription.
///
/// Both halves are kept optional so that a partially populated object coming
/// from storage still parses; payload encryption needs both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p256dh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

/// A browser `PushSubscription` as serialized by `subscription.toJSON()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeData {
    pub endpoint: String,
    #[serde(
        rename = "expirationTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Keys>,
}

impl SubscribeData {
    /// Subscription without encryption keys; only payload-less pushes are possible.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            expiration_time: None,
            keys: None,
        }
    }

    pub fn with_keys(endpoint: impl Into<String>, p256dh: &str, auth: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            expiration_time: None,
            keys: Some(Keys {
                p256dh: Some(p256dh.to_owned()),
                auth: Some(auth.to_owned()),
            }),
        }
    }

    /// Returns `(p256dh, auth)` when both are present and non-empty.
    pub fn encryption_keys(&self) -> Option<(&str, &str)> {
        let keys = self.keys.as_ref()?;
        match (keys.p256dh.as_deref(), keys.auth.as_deref()) {
            (Some(p256dh), Some(auth)) if !p256dh.is_empty() && !auth.is_empty() => {
                Some((p256dh, auth))
            }
            _ => None,
        }
    }
}
