use clap::{ ArgAction, Parser };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional shared secret. When set, console and relay requests must carry
    /// X-Api-Ts and X-Api-Sign headers (HMAC-SHA256 of the timestamp).
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    // --- Backend Args ---
    /// Data store implementation (rest, memory)
    #[arg(long, env = "BACKEND_TYPE", default_value = "rest")]
    pub backend_type: String,

    /// Base URL of the hosted backend (e.g., https://project.example.co)
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,

    /// API key sent as `apikey` and bearer token to the hosted backend.
    #[arg(long, env = "BACKEND_KEY", default_value = "")]
    pub backend_key: String,

    /// Subscribe to the realtime change feed of the hosted backend.
    #[arg(long, env = "REALTIME_ENABLED", default_value = "true", action = ArgAction::Set)]
    pub realtime_enabled: bool,

    /// Timeout in milliseconds for every outbound HTTP request.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    // --- Console Args ---
    /// Quiet period before a conversation search is sent.
    #[arg(long, env = "SEARCH_DEBOUNCE_MS", default_value = "300")]
    pub search_debounce_ms: u64,

    /// Quiet period before the messages of a newly opened conversation are fetched.
    #[arg(long, env = "MESSAGE_DEBOUNCE_MS", default_value = "150")]
    pub message_debounce_ms: u64,

    /// Keep list positions still while the agent is scrolling.
    #[arg(long, env = "PAUSE_REORDER_ON_SCROLL", default_value = "true", action = ArgAction::Set)]
    pub pause_reorder_on_scroll: bool,

    // --- Relay Args ---
    /// Workflow webhook receiving agent text messages.
    #[arg(long, env = "WEBHOOK_MESSAGE_URL")]
    pub webhook_message_url: Option<String>,

    /// Workflow webhook receiving agent media messages. Defaults to the message webhook.
    #[arg(long, env = "WEBHOOK_MEDIA_URL")]
    pub webhook_media_url: Option<String>,

    /// Comma separated hosts the image proxy may fetch from.
    #[arg(long, env = "IMAGE_PROXY_ALLOWED_HOSTS", value_delimiter = ',')]
    pub image_proxy_allowed_hosts: Vec<String>,

    /// Largest image body the proxy will pass through, in bytes.
    #[arg(long, env = "IMAGE_PROXY_MAX_BYTES", default_value = "10485760")]
    pub image_proxy_max_bytes: u64,

    /// Bearer token added to proxied image requests.
    #[arg(long, env = "STORAGE_KEY")]
    pub storage_key: Option<String>,

    /// Image proxy requests allowed per second across all clients.
    #[arg(long, env = "PROXY_RATE_LIMIT", default_value = "20")]
    pub proxy_rate_limit: u32,
}
