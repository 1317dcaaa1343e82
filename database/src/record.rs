use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::subscribe_data::{Keys, SubscribeData};

/// Key prefix shared by every stored subscription.
pub const SUBSCRIPTION_PREFIX: &str = "sub:";

/// Delivery hours a subscriber may opt into.
pub const DELIVERY_HOURS: [u8; 2] = [18, 21];

/// Storage key for a subscription: `sub:` followed by the hex SHA-256 of the endpoint.
pub fn subscription_key(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    let mut key = String::with_capacity(SUBSCRIPTION_PREFIX.len() + digest.len() * 2);
    key.push_str(SUBSCRIPTION_PREFIX);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    All,
    Selected,
}

impl DeliveryMode {
    /// Anything other than `"selected"` means every place.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("selected") => DeliveryMode::Selected,
            _ => DeliveryMode::All,
        }
    }
}

/// A stored subscription together with the subscriber's delivery preferences.
///
/// Records have been written in two shapes over time, `{subscription: {endpoint, keys}, ...}`
/// and a bare `{endpoint, keys}`. Both deserialize into this one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredRecord")]
pub struct SubscriptionRecord {
    pub subscription: SubscribeData,
    pub mode: DeliveryMode,
    pub places: Vec<String>,
    pub hour: Option<u8>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Builds a record from subscriber input. Mode `all` drops any place list.
    pub fn new(
        subscription: SubscribeData,
        mode: DeliveryMode,
        places: Vec<String>,
        hour: Option<u8>,
    ) -> Self {
        let places = match mode {
            DeliveryMode::All => Vec::new(),
            DeliveryMode::Selected => places,
        };

        SubscriptionRecord {
            subscription,
            mode,
            places,
            hour: hour.filter(|h| DELIVERY_HOURS.contains(h)),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.subscription.endpoint
    }

    pub fn key(&self) -> String {
        subscription_key(&self.subscription.endpoint)
    }
}

#[derive(Deserialize)]
struct StoredSubscription {
    endpoint: Option<String>,
    #[serde(rename = "expirationTime")]
    expiration_time: Option<i64>,
    keys: Option<Keys>,
}

#[derive(Deserialize)]
struct StoredRecord {
    subscription: Option<StoredSubscription>,
    endpoint: Option<String>,
    keys: Option<Keys>,
    mode: Option<String>,
    places: Option<Value>,
    hour: Option<Value>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<String>,
}

impl TryFrom<StoredRecord> for SubscriptionRecord {
    type Error = String;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let (nested_endpoint, expiration_time, nested_keys) = match stored.subscription {
            Some(s) => (s.endpoint, s.expiration_time, s.keys),
            None => (None, None, None),
        };

        let endpoint = nested_endpoint
            .or(stored.endpoint)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| "record has no endpoint".to_string())?;

        let places = match stored.places {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        };

        let hour = stored
            .hour
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|h| u8::try_from(h).ok())
            .filter(|h| DELIVERY_HOURS.contains(h));

        let updated_at = stored
            .updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(SubscriptionRecord {
            subscription: SubscribeData {
                endpoint,
                expiration_time,
                keys: nested_keys.or(stored.keys),
            },
            mode: DeliveryMode::parse(stored.mode.as_deref()),
            places,
            hour,
            updated_at,
        })
    }
}
