//! Outbound notification transports for jobwatch.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "jobwatch-notify";

pub const PUSHOVER_MESSAGES_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover rejects messages longer than this.
pub const PUSHOVER_MAX_MESSAGE_CHARS: usize = 1024;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("building notification client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("notification request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("notification endpoint returned http {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Delivers one free-text message. Callers treat delivery as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct PushoverCredentials {
    pub app_token: String,
    pub user_key: String,
}

impl PushoverCredentials {
    pub fn new(app_token: impl Into<String>, user_key: impl Into<String>) -> Self {
        Self {
            app_token: app_token.into(),
            user_key: user_key.into(),
        }
    }
}

impl fmt::Debug for PushoverCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushoverCredentials")
            .field("app_token", &"<redacted>")
            .field("user_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct PushoverForm<'a> {
    token: &'a str,
    user: &'a str,
    message: String,
}

#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: reqwest::Client,
    endpoint: String,
    credentials: PushoverCredentials,
}

impl PushoverNotifier {
    pub fn new(credentials: PushoverCredentials) -> Result<Self, NotifyError> {
        Self::with_timeout(credentials, Duration::from_secs(10))
    }

    pub fn with_timeout(
        credentials: PushoverCredentials,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            client,
            endpoint: PUSHOVER_MESSAGES_URL.to_string(),
            credentials,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form<'a>(&'a self, message: &str) -> PushoverForm<'a> {
        PushoverForm {
            token: &self.credentials.app_token,
            user: &self.credentials.user_key,
            message: truncate_chars(message, PUSHOVER_MAX_MESSAGE_CHARS),
        }
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&self.form(message))
            .send()
            .await
            .map_err(NotifyError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        debug!("pushover notification accepted");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them; used when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "jobwatch::notify", %message, "notification");
        Ok(())
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().await.push(message.to_string());
        Ok(())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
