//! Stateless forwarders: agent messages out to the automation webhooks and
//! attachment images in from the storage host.

mod image_proxy;
mod webhook;

pub use image_proxy::{ ImageProxy, ProxiedImage };
pub use webhook::{ RelayResponse, WebhookKind, WebhookRelay };

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no webhook configured for {0}")]
    NotConfigured(&'static str),
    #[error("missing url parameter")]
    MissingUrl,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),
    #[error("too many requests")]
    RateLimited,
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("upstream returned {0}")]
    UpstreamStatus(u16),
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream body exceeds {0} bytes")]
    TooLarge(u64),
}
