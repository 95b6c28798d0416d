use async_trait::async_trait;
use log::debug;
use reqwest::header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE };
use reqwest::{ Client as HttpClient, RequestBuilder };
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{ Backend, BackendError };
use crate::console::request::with_timeout;
use crate::models::chat::{ Conversation, ConversationPatch, Message, NewMessage };

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

/// Client for the hosted Postgres REST interface (PostgREST dialect).
pub struct RestBackend {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let key = HeaderValue::from_str(api_key)
                .map_err(|e| BackendError::Config(format!("Invalid API key: {}", e)))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| BackendError::Config(format!("Invalid API key: {}", e)))?;
            headers.insert("apikey", key);
            headers.insert(AUTHORIZATION, bearer);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        with_timeout(
            self.timeout,
            async {
                let resp = req.send().await?;
                let status = resp.status();
                let body = resp.text().await?;
                if !status.is_success() {
                    return Err(BackendError::Status { status: status.as_u16(), body });
                }
                Ok::<T, BackendError>(serde_json::from_str(&body)?)
            },
            BackendError::Timeout
        ).await
    }
}

/// Characters that would break out of a PostgREST `or=(...)` filter.
fn sanitize_search(query: &str) -> String {
    query
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn search_filter(query: &str) -> String {
    let term = sanitize_search(query);
    format!(
        "(name.ilike.*{t}*,phone_number.ilike.*{t}*,user_id.ilike.*{t}*,last_message_content.ilike.*{t}*)",
        t = term
    )
}

#[async_trait]
impl Backend for RestBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, BackendError> {
        let req = self.http
            .get(self.table_url(CONVERSATIONS))
            .query(&[("select", "*"), ("order", "updated_at.desc")]);
        self.send_json(req).await
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Option<Conversation>, BackendError> {
        let id_filter = format!("eq.{}", id);
        let req = self.http
            .get(self.table_url(CONVERSATIONS))
            .query(&[("select", "*"), ("id", id_filter.as_str()), ("limit", "1")]);
        let rows: Vec<Conversation> = self.send_json(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, BackendError> {
        let id_filter = format!("eq.{}", conversation_id);
        let req = self.http
            .get(self.table_url(MESSAGES))
            .query(
                &[
                    ("select", "*"),
                    ("conversation_id", id_filter.as_str()),
                    ("order", "created_at.asc"),
                ]
            );
        self.send_json(req).await
    }

    async fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, BackendError> {
        if sanitize_search(query).is_empty() {
            return self.list_conversations().await;
        }
        let filter = search_filter(query);
        debug!("Searching conversations with filter {}", filter);
        let req = self.http
            .get(self.table_url(CONVERSATIONS))
            .query(&[("select", "*"), ("or", filter.as_str()), ("order", "updated_at.desc")]);
        self.send_json(req).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch
    ) -> Result<Conversation, BackendError> {
        let req = self.http
            .patch(self.table_url(CONVERSATIONS))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);
        let rows: Vec<Conversation> = self.send_json(req).await?;
        rows.into_iter().next().ok_or_else(|| BackendError::NotFound(format!("conversation {}", id)))
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, BackendError> {
        let req = self.http
            .post(self.table_url(MESSAGES))
            .header("Prefer", "return=representation")
            .json(message);
        let rows: Vec<Message> = self.send_json(req).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound("inserted message row".into()))
    }
}
