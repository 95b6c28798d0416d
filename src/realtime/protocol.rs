use serde::{ Serialize, Deserialize };
use serde_json::{ json, Value as JsonValue };

use super::FeedError;
use crate::models::chat::{ Conversation, Message };
use crate::models::realtime::ChangeEvent;

pub const CHANNEL_TOPIC: &str = "realtime:public";
const WATCHED_TABLES: [&str; 2] = ["conversations", "messages"];

/// Channel frame of the hosted realtime service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

pub fn join_frame(reference: u64, access_token: Option<&str>) -> Frame {
    let changes: Vec<JsonValue> = WATCHED_TABLES
        .iter()
        .map(|table| json!({ "event": "*", "schema": "public", "table": table }))
        .collect();
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": changes,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = JsonValue::String(token.to_string());
    }
    Frame {
        topic: CHANNEL_TOPIC.to_string(),
        event: "phx_join".to_string(),
        payload,
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// True for the server's positive reply to the join sent with `join_ref`.
pub fn is_join_ack(frame: &Frame, join_ref: &str) -> bool {
    frame.event == "phx_reply" &&
        frame.reference.as_deref() == Some(join_ref) &&
        frame.payload.get("status").and_then(|s| s.as_str()) == Some("ok")
}

#[derive(Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    change_type: String,
    #[serde(default)]
    record: Option<JsonValue>,
    #[serde(default)]
    old_record: Option<JsonValue>,
}

/// Turns an incoming frame into a change event. Frames that carry no row
/// change (replies, heartbeats, presence, other tables) yield `None`.
pub fn decode_frame(frame: &Frame) -> Result<Option<ChangeEvent>, FeedError> {
    match frame.event.as_str() {
        "postgres_changes" => {}
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("error") {
                return Err(FeedError::Rejected(frame.payload.to_string()));
            }
            return Ok(None);
        }
        "phx_error" | "system" if frame.payload.get("status").and_then(|s| s.as_str()) == Some("error") => {
            return Err(FeedError::Rejected(frame.payload.to_string()));
        }
        _ => {
            return Ok(None);
        }
    }

    let payload: ChangePayload = serde_json::from_value(frame.payload.clone())?;
    let data = payload.data;
    let record = || data.record.clone().ok_or(FeedError::MissingRecord);

    let event = match (data.table.as_str(), data.change_type.as_str()) {
        ("messages", "INSERT") => {
            let message: Message = serde_json::from_value(record()?)?;
            Some(ChangeEvent::MessageInserted { message })
        }
        ("conversations", "INSERT" | "UPDATE") => {
            let conversation: Conversation = serde_json::from_value(record()?)?;
            Some(ChangeEvent::ConversationChanged { conversation })
        }
        ("conversations", "DELETE") => {
            let id = data.old_record
                .as_ref()
                .and_then(|r| r.get("id"))
                .and_then(|id| id.as_str())
                .ok_or(FeedError::MissingRecord)?;
            Some(ChangeEvent::ConversationDeleted { id: id.to_string() })
        }
        _ => None,
    };
    Ok(event)
}
