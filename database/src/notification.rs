use serde::{Deserialize, Serialize};

/// Content shown by the service worker when a push arrives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, url: impl Into<String>) -> Self {
        Notification {
            title: title.into(),
            body: body.into(),
            url: url.into(),
        }
    }

    /// UTF-8 JSON bytes, the plaintext handed to payload encryption.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
