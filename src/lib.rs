pub mod backend;
pub mod cli;
pub mod console;
pub mod models;
pub mod realtime;
pub mod relay;
pub mod server;

use backend::create_backend;
use cli::Args;
use console::{ Console, ConsoleConfig };
use log::{ info, warn };
use realtime::FeedSubscriber;
use relay::{ ImageProxy, WebhookRelay };
use server::api::AppState;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const FEED_BUFFER: usize = 256;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Backend Type: {}", args.backend_type);
    info!("Backend URL: {}", args.backend_url.as_deref().unwrap_or("<unset>"));
    info!("Realtime Enabled: {}", args.realtime_enabled);
    info!("Request Timeout: {}ms", args.request_timeout_ms);
    info!("Search Debounce: {}ms", args.search_debounce_ms);
    info!("Message Debounce: {}ms", args.message_debounce_ms);
    info!("Pause Reorder On Scroll: {}", args.pause_reorder_on_scroll);
    info!("Message Webhook: {}", if args.webhook_message_url.is_some() { "configured" } else { "<unset>" });
    info!("Media Webhook: {}", if args.webhook_media_url.is_some() { "configured" } else { "<unset>" });
    info!("Image Proxy Hosts: {:?}", args.image_proxy_allowed_hosts);
    info!("Image Proxy Max Bytes: {}", args.image_proxy_max_bytes);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let timeout = Duration::from_millis(args.request_timeout_ms);
    let backend = create_backend(&args)?;
    let relay = Arc::new(
        WebhookRelay::new(args.webhook_message_url.clone(), args.webhook_media_url.clone(), timeout)
    );
    let proxy = Arc::new(
        ImageProxy::new(
            args.image_proxy_allowed_hosts.clone(),
            args.storage_key.clone(),
            timeout,
            args.image_proxy_max_bytes
        )?
    );

    let config = ConsoleConfig {
        pause_reorder_on_scroll: args.pause_reorder_on_scroll,
        search_debounce: Duration::from_millis(args.search_debounce_ms),
        message_debounce: Duration::from_millis(args.message_debounce_ms),
        ..ConsoleConfig::default()
    };
    let console = Arc::new(Console::new(backend, Some(Arc::clone(&relay)), config));

    match console.load().await {
        Ok(count) => info!("Loaded {} conversations", count),
        Err(e) => warn!("Initial conversation load failed, continuing with an empty list: {}", e),
    }

    let feed_task = match (&args.backend_url, args.realtime_enabled, args.backend_type.as_str()) {
        (Some(url), true, "rest") => {
            let subscriber = FeedSubscriber::new(url, &args.backend_key)?;
            let (tx, rx) = mpsc::channel(FEED_BUFFER);
            console.attach_feed(rx);
            Some(tokio::spawn(subscriber.run(tx)))
        }
        _ => {
            info!("Realtime change feed disabled.");
            None
        }
    };

    let state = AppState::new(
        Arc::clone(&console),
        relay,
        proxy,
        args.proxy_rate_limit,
        args.server_api_key.clone()
    )?;
    let server = Server::new(args.server_addr.clone(), state, args.clone());
    let result = server.run().await;

    if let Some(task) = feed_task {
        task.abort();
    }
    console.shutdown();
    result
}
