use log::{ info, warn };
use reqwest::Client as HttpClient;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::RelayError;
use crate::console::request::with_timeout;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookKind {
    Message,
    Media,
}

impl WebhookKind {
    fn label(self) -> &'static str {
        match self {
            WebhookKind::Message => "message webhook",
            WebhookKind::Media => "media webhook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Plain JSON passthrough to the workflow-automation webhooks.
pub struct WebhookRelay {
    http: HttpClient,
    message_url: Option<String>,
    media_url: Option<String>,
    timeout: Duration,
}

impl WebhookRelay {
    pub fn new(message_url: Option<String>, media_url: Option<String>, timeout: Duration) -> Self {
        let message_url = message_url.filter(|u| !u.trim().is_empty());
        let media_url = media_url.filter(|u| !u.trim().is_empty());
        if message_url.is_none() {
            warn!("No message webhook configured; agent replies will only be stored.");
        }
        Self {
            http: HttpClient::new(),
            message_url,
            media_url,
            timeout,
        }
    }

    pub fn is_configured(&self, kind: WebhookKind) -> bool {
        self.target(kind).is_some()
    }

    fn target(&self, kind: WebhookKind) -> Option<&str> {
        match kind {
            WebhookKind::Message => self.message_url.as_deref(),
            // Media falls back to the message hook when no dedicated one is set.
            WebhookKind::Media => self.media_url.as_deref().or(self.message_url.as_deref()),
        }
    }

    pub async fn forward(&self, kind: WebhookKind, payload: &JsonValue) -> Result<RelayResponse, RelayError> {
        let url = self.target(kind).ok_or(RelayError::NotConfigured(kind.label()))?;
        info!("Relaying payload to {}", kind.label());

        with_timeout(
            self.timeout,
            async {
                let resp = self.http.post(url).json(payload).send().await?;
                let status = resp.status().as_u16();
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let body = resp.text().await?;
                if status >= 400 {
                    warn!("{} answered {}: {}", kind.label(), status, body);
                }
                Ok::<RelayResponse, RelayError>(RelayResponse { status, content_type, body })
            },
            |_| RelayError::Timeout
        ).await
    }
}
