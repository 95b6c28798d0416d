use crate::backend::BackendError;
use crate::console::reconcile::ConversationEntry;
use crate::console::Console;
use crate::models::chat::{ AgentIdentity, Attachment, Conversation };
use crate::relay::{ ImageProxy, RelayError, WebhookKind, WebhookRelay };
use super::auth::require_signature;

use axum::{
    extract::{ Path, Query, State },
    http::{ header, HeaderValue, StatusCode },
    middleware,
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ error, warn };
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Value as JsonValue };
use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

type ProxyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub console: Arc<Console>,
    pub relay: Arc<WebhookRelay>,
    pub proxy: Arc<ImageProxy>,
    pub proxy_limiter: Arc<ProxyLimiter>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(
        console: Arc<Console>,
        relay: Arc<WebhookRelay>,
        proxy: Arc<ImageProxy>,
        proxy_rate_limit: u32,
        api_key: Option<String>
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let per_second = NonZeroU32::new(proxy_rate_limit).ok_or("PROXY_RATE_LIMIT must be greater than zero")?;
        Ok(Self {
            console,
            relay,
            proxy,
            proxy_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        let status = match &err {
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BackendError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        if status != StatusCode::NOT_FOUND {
            error!("Backend error: {}", err);
        }
        Self { status, message: err.to_string() }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = match &err {
            RelayError::MissingUrl | RelayError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            RelayError::HostNotAllowed(_) => StatusCode::FORBIDDEN,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Upstream(_) | RelayError::UpstreamStatus(_) | RelayError::TooLarge(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        warn!("Relay error: {}", err);
        Self { status, message: err.to_string() }
    }
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationEntry>,
    scrolling: bool,
}

#[derive(Serialize)]
struct SearchResponse {
    superseded: bool,
    conversations: Vec<Conversation>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct ImageProxyQuery {
    pub url: Option<String>,
}

#[derive(Deserialize)]
pub struct ScrollRequest {
    pub active: bool,
}

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub agent: AgentIdentity,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}/messages", get(conversation_messages))
        .route("/api/conversations/{id}/open", post(open_conversation))
        .route("/api/conversations/{id}/claim", post(claim_conversation))
        .route("/api/conversations/{id}/close", post(close_conversation))
        .route("/api/conversations/{id}/reply", post(reply))
        .route("/api/scrolling", post(set_scrolling))
        .route("/api/search", get(search))
        .route("/api/send-message", post(send_message))
        .route("/api/send-media", post(send_media))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_signature));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/image-proxy", get(image_proxy))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_conversations(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConversationListResponse {
        conversations: state.console.snapshot().await,
        scrolling: state.console.is_scrolling().await,
    })
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.console.messages(&id).await?))
}

async fn open_conversation(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.console.open_conversation(&id).await;
    StatusCode::ACCEPTED
}

async fn claim_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(agent): Json<AgentIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    if agent.id.is_none() && agent.email.is_none() {
        return Err(ApiError::bad_request("agent id or email is required"));
    }
    Ok(Json(state.console.claim(&id, &agent).await?))
}

async fn close_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.console.close(&id).await?))
}

async fn reply(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() && req.attachment.is_none() {
        return Err(ApiError::bad_request("reply needs content or an attachment"));
    }
    let stored = state.console.send_reply(&id, &req.agent, &req.content, req.attachment.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn set_scrolling(State(state): State<AppState>, Json(req): Json<ScrollRequest>) -> StatusCode {
    state.console.set_scrolling(req.active).await;
    StatusCode::NO_CONTENT
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let q = query.q.unwrap_or_default();
    let response = match state.console.search(&q).await? {
        Some(conversations) => SearchResponse { superseded: false, conversations },
        None => SearchResponse { superseded: true, conversations: Vec::new() },
    };
    Ok(Json(response))
}

async fn relay_to(state: &AppState, kind: WebhookKind, payload: JsonValue) -> Result<Response, ApiError> {
    let upstream = state.relay.forward(kind, &payload).await?;
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut resp = (status, upstream.body).into_response();
    if let Some(ct) = upstream.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        resp.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(resp)
}

async fn send_message(State(state): State<AppState>, Json(payload): Json<JsonValue>) -> Result<Response, ApiError> {
    relay_to(&state, WebhookKind::Message, payload).await
}

async fn send_media(State(state): State<AppState>, Json(payload): Json<JsonValue>) -> Result<Response, ApiError> {
    relay_to(&state, WebhookKind::Media, payload).await
}

async fn image_proxy(
    State(state): State<AppState>,
    Query(query): Query<ImageProxyQuery>,
) -> Result<Response, ApiError> {
    if state.proxy_limiter.check().is_err() {
        return Err(RelayError::RateLimited.into());
    }
    let image = state.proxy.fetch(query.url.as_deref()).await?;
    Ok(
        (
            [
                (header::CONTENT_TYPE, image.content_type),
                (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
            ],
            image.bytes,
        ).into_response()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::console::ConsoleConfig;
    use crate::server::auth::sign;
    use axum::body::{ to_bytes, Body };
    use axum::http::Request;
    use chrono::Utc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state_with(conversations: Vec<Conversation>, api_key: Option<&str>) -> AppState {
        let backend = Arc::new(MemoryBackend::with_conversations(conversations));
        let relay = Arc::new(WebhookRelay::new(None, None, Duration::from_secs(1)));
        let console = Arc::new(Console::new(backend, Some(Arc::clone(&relay)), ConsoleConfig::default()));
        let proxy = Arc::new(ImageProxy::new(vec!["storage.example.com".into()], None, Duration::from_secs(1), 1024).unwrap());
        AppState::new(console, relay, proxy, 5, api_key.map(str::to_owned)).unwrap()
    }

    fn conv(id: &str, status: &str) -> Conversation {
        serde_json::from_value(json!({ "id": id, "status": status })).unwrap()
    }

    async fn request_json(app: Router, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("response bytes");
        let json = serde_json::from_slice(&body).unwrap_or(JsonValue::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(state_with(Vec::new(), Some("secret")));
        let (status, body) = request_json(app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn conversations_are_listed_in_priority_order() {
        let state = state_with(vec![conv("bot", "ai_active"), conv("help", "pending_human")], None);
        state.console.load().await.unwrap();
        let (status, body) = request_json(router(state), get("/api/conversations")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversations"][0]["id"], "help");
        assert_eq!(body["conversations"][0]["state"], "confirmed");
        assert_eq!(body["conversations"][1]["id"], "bot");
        assert_eq!(body["scrolling"], false);
    }

    #[tokio::test]
    async fn signed_requests_pass_and_unsigned_are_rejected() {
        let state = state_with(Vec::new(), Some("secret"));
        let (status, _) = request_json(router(state.clone()), get("/api/conversations")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let ts = Utc::now().timestamp().to_string();
        let request = Request::builder()
            .uri("/api/conversations")
            .header("X-Api-Ts", &ts)
            .header("X-Api-Sign", sign("secret", &ts))
            .body(Body::empty())
            .unwrap();
        let (status, _) = request_json(router(state), request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn image_proxy_validates_target() {
        let state = state_with(Vec::new(), None);
        let (status, _) = request_json(router(state.clone()), get("/api/image-proxy")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = request_json(
            router(state),
            get("/api/image-proxy?url=https%3A%2F%2Fevil.example.org%2Fa.png")
        ).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn relay_without_webhook_is_unavailable() {
        let app = router(state_with(Vec::new(), None));
        let (status, _) = request_json(app, post_json("/api/send-message", json!({ "text": "hi" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn claim_then_reply_through_the_api() {
        let state = state_with(vec![conv("c1", "pending_human")], None);
        state.console.load().await.unwrap();
        let agent = json!({ "id": "a1", "email": "ana@example.com", "name": "Ana" });

        let (status, body) = request_json(
            router(state.clone()),
            post_json("/api/conversations/c1/claim", agent.clone())
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "human_active");

        let (status, _) = request_json(
            router(state.clone()),
            post_json("/api/conversations/c1/reply", json!({ "agent": agent, "content": "  " }))
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = request_json(
            router(state),
            post_json("/api/conversations/c1/reply", json!({ "agent": agent, "content": "Hello!" }))
        ).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["sender"], "agent");
        assert_eq!(body["content"], "Hello!");
    }

    #[tokio::test]
    async fn claim_unknown_conversation_is_not_found() {
        let app = router(state_with(Vec::new(), None));
        let (status, _) = request_json(app, post_json("/api/conversations/nope/claim", json!({ "id": "a1" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn scrolling_flag_is_reported() {
        let state = state_with(Vec::new(), None);
        let (status, _) = request_json(router(state.clone()), post_json("/api/scrolling", json!({ "active": true }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = request_json(router(state), get("/api/conversations")).await;
        assert_eq!(body["scrolling"], true);
    }
}
