use std::fmt::Display;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

/// A fully prepared push message: everything the push service needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub endpoint: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl PushRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    pub body: String,
}

/// Sends push messages. An `Err` means no HTTP response was obtained.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn post(&self, request: PushRequest) -> anyhow::Result<PushResponse>;
}

/// HTTP transport over a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PushTransport for ReqwestTransport {
    async fn post(&self, request: PushRequest) -> anyhow::Result<PushResponse> {
        let mut builder = self.client.post(&request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .context("Web push HTTP request failed")?;

        let status = response.status().as_u16();
        let body = body_or_empty(&request.endpoint, response.text().await);

        Ok(PushResponse { status, body })
    }
}

/// The status alone decides the verdict, so an unreadable body becomes empty.
fn body_or_empty<E: Display>(endpoint: &str, body: Result<String, E>) -> String {
    body.unwrap_or_else(|err| {
        debug!("Could not read push service response from {}: {}", endpoint, err);
        String::new()
    })
}
