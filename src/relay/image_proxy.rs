use log::{ debug, warn };
use reqwest::header::AUTHORIZATION;
use reqwest::redirect::Policy;
use reqwest::Client as HttpClient;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::RelayError;
use crate::console::request::with_timeout;

const MAX_REDIRECTS: usize = 5;

pub struct ProxiedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Fetches attachment images on behalf of the browser, adding the storage
/// credentials the browser does not hold.
pub struct ImageProxy {
    http: HttpClient,
    allowed_hosts: Arc<Vec<String>>,
    storage_key: Option<String>,
    timeout: Duration,
    max_bytes: u64,
}

/// Accepts http(s) urls whose host is an allowed host or a subdomain of one.
fn check_host(allowed_hosts: &[String], url: &Url) -> Result<(), RelayError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidUrl(format!("unsupported scheme {}", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| RelayError::InvalidUrl("url has no host".into()))?
        .to_lowercase();
    let allowed = allowed_hosts
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)));
    if !allowed {
        return Err(RelayError::HostNotAllowed(host));
    }
    Ok(())
}

impl ImageProxy {
    pub fn new(
        allowed_hosts: Vec<String>,
        storage_key: Option<String>,
        timeout: Duration,
        max_bytes: u64
    ) -> Result<Self, RelayError> {
        let allowed_hosts = Arc::new(
            allowed_hosts
                .into_iter()
                .map(|h| h.trim().trim_start_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>()
        );
        if allowed_hosts.is_empty() {
            warn!("Image proxy has an empty allow-list; every request will be rejected.");
        }

        // Every redirect hop goes through the allow-list again.
        let redirect_hosts = Arc::clone(&allowed_hosts);
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match check_host(&redirect_hosts, attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => {
                    warn!("Image proxy refused redirect to {}: {}", attempt.url(), e);
                    attempt.stop()
                }
            }
        });
        let http = HttpClient::builder().redirect(policy).build()?;

        Ok(Self {
            http,
            allowed_hosts,
            storage_key: storage_key.filter(|k| !k.is_empty()),
            timeout,
            max_bytes,
        })
    }

    /// Parses the target and checks it against the allow-list.
    pub fn check_url(&self, raw: Option<&str>) -> Result<Url, RelayError> {
        let raw = raw.map(str::trim).filter(|r| !r.is_empty()).ok_or(RelayError::MissingUrl)?;
        let url = Url::parse(raw).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
        check_host(&self.allowed_hosts, &url)?;
        Ok(url)
    }

    pub async fn fetch(&self, raw: Option<&str>) -> Result<ProxiedImage, RelayError> {
        let url = self.check_url(raw)?;
        debug!("Proxying image {}", url);

        with_timeout(
            self.timeout,
            async {
                let mut req = self.http.get(url.clone());
                if let Some(key) = &self.storage_key {
                    req = req.header(AUTHORIZATION, format!("Bearer {}", key));
                }
                let mut resp = req.send().await?;
                if !resp.status().is_success() {
                    return Err(RelayError::UpstreamStatus(resp.status().as_u16()));
                }
                if resp.content_length().is_some_and(|len| len > self.max_bytes) {
                    return Err(RelayError::TooLarge(self.max_bytes));
                }
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let mut bytes = Vec::new();
                while let Some(chunk) = resp.chunk().await? {
                    if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                        return Err(RelayError::TooLarge(self.max_bytes));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok::<ProxiedImage, RelayError>(ProxiedImage { content_type, bytes })
            },
            |_| RelayError::Timeout
        ).await
    }
}
