pub mod protocol;

use crate::models::realtime::ChangeEvent;
use futures::{ SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use protocol::{ decode_frame, heartbeat_frame, is_join_ack, join_frame, Frame };
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid realtime url: {0}")]
    Url(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("change without a record")]
    MissingRecord,
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("connection closed by server")]
    Closed,
    #[error("event consumer went away")]
    ConsumerGone,
}

/// Exponential reconnect delay, doubling up to a ceiling. Never gives up.
#[derive(Debug)]
pub struct ReconnectBackoff {
    current: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL_RECONNECT_DELAY,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt += 1;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_RECONNECT_DELAY;
        self.attempt = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the websocket endpoint of the realtime service from the REST base url.
pub fn realtime_url(base_url: &str, api_key: &str) -> Result<Url, FeedError> {
    let mut url = Url::parse(base_url).map_err(|e| FeedError::Url(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(FeedError::Url(format!("unsupported scheme {}", other)));
        }
    };
    url.set_scheme(scheme).map_err(|_| FeedError::Url(format!("cannot use scheme {}", scheme)))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut().clear().append_pair("apikey", api_key).append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Long-lived subscription to row changes on the watched tables.
pub struct FeedSubscriber {
    url: Url,
    access_token: Option<String>,
    heartbeat: Duration,
}

impl FeedSubscriber {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, FeedError> {
        Ok(Self {
            url: realtime_url(base_url, api_key)?,
            access_token: Some(api_key.to_string()).filter(|k| !k.is_empty()),
            heartbeat: HEARTBEAT_INTERVAL,
        })
    }

    /// Runs until the receiving side of `tx` is dropped. After every
    /// reconnect a `Resubscribed` event is sent so the consumer can refresh.
    /// The reconnect delay only starts over once a join is acknowledged.
    pub async fn run(self, tx: mpsc::Sender<ChangeEvent>) {
        let mut backoff = ReconnectBackoff::new();
        let mut connected_before = false;

        loop {
            match self.session(&tx, &mut backoff, &mut connected_before).await {
                Err(FeedError::ConsumerGone) => {
                    info!("Change feed consumer stopped; closing subscription.");
                    return;
                }
                Err(e) => {
                    warn!("Change feed session ended: {}", e);
                }
                Ok(()) => {}
            }
            if tx.is_closed() {
                return;
            }
            let delay = backoff.next_delay();
            info!("Reconnecting to change feed in {:?} (attempt {})", delay, backoff.attempt());
            tokio::time::sleep(delay).await;
        }
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<ChangeEvent>,
        backoff: &mut ReconnectBackoff,
        connected_before: &mut bool
    ) -> Result<(), FeedError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("Connected to change feed at {}", self.url.host_str().unwrap_or("?"));
        let (mut sink, mut stream) = ws.split();

        let mut reference: u64 = 1;
        let join_ref = reference.to_string();
        let join = serde_json::to_string(&join_frame(reference, self.access_token.as_deref()))?;
        sink.send(WsMessage::Text(join)).await?;

        if *connected_before {
            tx.send(ChangeEvent::Resubscribed).await.map_err(|_| FeedError::ConsumerGone)?;
        }
        *connected_before = true;

        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    reference += 1;
                    let beat = serde_json::to_string(&heartbeat_frame(reference))?;
                    sink.send(WsMessage::Text(beat)).await?;
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let frame: Frame = match serde_json::from_str(&text) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    warn!("Skipping unreadable feed frame: {}", e);
                                    continue;
                                }
                            };
                            match decode_frame(&frame) {
                                Ok(Some(event)) => {
                                    backoff.reset();
                                    tx.send(event).await.map_err(|_| FeedError::ConsumerGone)?;
                                }
                                Ok(None) if is_join_ack(&frame, &join_ref) => {
                                    info!("Change feed subscription confirmed.");
                                    backoff.reset();
                                }
                                Ok(None) => debug!("Ignoring {} frame on {}", frame.event, frame.topic),
                                Err(FeedError::Rejected(reason)) => {
                                    error!("Change feed subscription rejected: {}", reason);
                                    return Err(FeedError::Rejected(reason));
                                }
                                Err(e) => warn!("Skipping change that could not be decoded: {}", e),
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            sink.send(WsMessage::Pong(payload)).await?;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(FeedError::Closed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }
}
