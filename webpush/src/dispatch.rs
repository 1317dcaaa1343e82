use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use database::{Notification, SubscribeData};
use reqwest::Url;

use crate::{
    ece::{self, SubscriberKeys},
    error::PushError,
    transport::{PushRequest, PushResponse, PushTransport},
    vapid::VapidConfig,
};

/// Seconds the push service should hold an undelivered message.
pub const DEFAULT_TTL_SECS: u32 = 60;

const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Delivered,
    /// The subscription no longer exists (404 or 410).
    Gone,
    /// The push service answered with another error status.
    Rejected,
    /// No response was obtained.
    TransportFailure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub verdict: Verdict,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn from_response(response: PushResponse) -> Self {
        let verdict = match response.status {
            404 | 410 => Verdict::Gone,
            200..=299 => Verdict::Delivered,
            _ => Verdict::Rejected,
        };
        let detail = (verdict == Verdict::Rejected)
            .then(|| truncate(&response.body, BODY_SNIPPET_CHARS).to_owned());

        DeliveryOutcome {
            verdict,
            status: Some(response.status),
            detail,
        }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        DeliveryOutcome {
            verdict: Verdict::TransportFailure,
            status: None,
            detail: Some(message.into()),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.verdict == Verdict::Delivered
    }
}

/// Sends one message to one subscription and classifies the result.
/// Never touches subscription storage.
pub struct Dispatcher {
    vapid: VapidConfig,
    transport: Arc<dyn PushTransport>,
    ttl: u32,
}

impl Dispatcher {
    pub fn new(vapid: VapidConfig, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            vapid,
            transport,
            ttl: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn vapid(&self) -> &VapidConfig {
        &self.vapid
    }

    pub async fn send_one(
        &self,
        subscription: &SubscribeData,
        payload: Option<&Notification>,
    ) -> DeliveryOutcome {
        let request = match self.prepare(subscription, payload, unix_now()) {
            Ok(request) => request,
            Err(err) => return DeliveryOutcome::transport_failure(err.to_string()),
        };

        match self.transport.post(request).await {
            Ok(response) => DeliveryOutcome::from_response(response),
            Err(err) => DeliveryOutcome::transport_failure(format!("{err:#}")),
        }
    }

    /// Builds the signed (and, when possible, encrypted) request for `subscription`.
    ///
    /// The payload is encrypted only when the subscription carries both
    /// `p256dh` and `auth`; otherwise an empty body is sent.
    pub fn prepare(
        &self,
        subscription: &SubscribeData,
        payload: Option<&Notification>,
        now: u64,
    ) -> Result<PushRequest, PushError> {
        let audience = audience_of(&subscription.endpoint)?;
        let token = self.vapid.keys.sign(&audience, &self.vapid.subject, now)?;

        let mut headers = vec![
            ("TTL", self.ttl.to_string()),
            (
                "Authorization",
                format!("vapid t={token}, k={}", self.vapid.public_key_base64url()),
            ),
        ];

        let body = match (payload, subscription.encryption_keys()) {
            (Some(notification), Some((p256dh, auth))) => {
                let keys = SubscriberKeys::from_base64url(p256dh, auth)?;
                let body = ece::encrypt(&keys, &notification.to_bytes()?)?;
                headers.push(("Content-Encoding", "aes128gcm".into()));
                headers.push(("Content-Type", "application/octet-stream".into()));
                body
            }
            _ => {
                headers.push(("Content-Length", "0".into()));
                Vec::new()
            }
        };

        Ok(PushRequest {
            endpoint: subscription.endpoint.clone(),
            headers,
            body,
        })
    }
}

/// Scheme and host (plus non-default port) of a push endpoint, the VAPID `aud`.
pub fn audience_of(endpoint: &str) -> Result<String, PushError> {
    let invalid = |reason: String| PushError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(invalid("endpoint has no origin".into()));
    }
    Ok(origin.ascii_serialization())
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
