//! The outbound send primitive.
//!
//! The dispatcher treats the provider as a function: payload in,
//! `(accepted, status, raw body)` out. Transport failures are folded
//! into that triple (`accepted = false`, `status = 0`) instead of
//! surfacing as errors, so the retry loop sees exactly one shape of
//! failure.

use std::time::Duration;

use async_trait::async_trait;

use crate::parser::truncate_chars;

/// Per-attempt network timeout.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

/// One fully-resolved push request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub user: String,
    pub title: String,
    pub message: String,
    pub priority: Option<i64>,
    pub sound: Option<String>,
    pub url: Option<String>,
    pub url_title: Option<String>,
    pub device: Option<String>,
}

/// What came back from one send attempt.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub accepted: bool,
    /// HTTP status, or 0 when the request never completed.
    pub status: u16,
    /// Raw response body, or the transport error text.
    pub body: String,
}

/// The seam between the dispatcher and the notification API.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn send(&self, payload: &PushPayload) -> ProviderResponse;
}

/// Pushover message API client.
///
/// Success is HTTP 200 with a JSON body whose `status` field equals 1;
/// anything else counts as a failed attempt.
#[derive(Debug, Clone)]
pub struct PushoverClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl PushoverClient {
    /// # Errors
    /// If the underlying HTTP client cannot be constructed.
    pub fn new(token: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT)
    }

    /// Point the client at a non-default endpoint (tests, proxies).
    ///
    /// # Errors
    /// If the underlying HTTP client cannot be constructed.
    pub fn with_endpoint(
        token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: endpoint.into(),
            token: token.into(),
            client: reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?,
        })
    }
}

#[async_trait]
impl Provider for PushoverClient {
    async fn send(&self, payload: &PushPayload) -> ProviderResponse {
        let mut form: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("user", payload.user.clone()),
            ("title", truncate_chars(&payload.title, 250).to_string()),
            ("message", truncate_chars(&payload.message, 1024).to_string()),
        ];

        if let Some(priority) = payload.priority {
            form.push(("priority", priority.to_string()));
        }
        if let Some(sound) = &payload.sound {
            form.push(("sound", sound.clone()));
        }
        if let Some(url) = &payload.url {
            form.push(("url", url.clone()));
        }
        if let Some(url_title) = &payload.url_title {
            form.push(("url_title", url_title.clone()));
        }
        if let Some(device) = &payload.device {
            form.push(("device", device.clone()));
        }

        let response = match self.client.post(&self.endpoint).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                return ProviderResponse {
                    accepted: false,
                    status: 0,
                    body: err.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => ProviderResponse {
                accepted: status == 200 && status_field_is_one(&body),
                status,
                body,
            },
            Err(err) => ProviderResponse {
                accepted: false,
                status,
                body: err.to_string(),
            },
        }
    }
}

fn status_field_is_one(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("status").and_then(serde_json::Value::as_i64))
        == Some(1)
}
