use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;

pub type Timestamp = DateTime<Utc>;

/// Lifecycle of a conversation as stored in the `conversations` table.
/// Unknown values coming from the store are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConversationStatus {
    #[default]
    AiActive,
    HumanActive,
    PendingHuman,
    PendingResponse,
    Closed,
    Other(String),
}

impl From<String> for ConversationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ai_active" => ConversationStatus::AiActive,
            "human_active" => ConversationStatus::HumanActive,
            "pending_human" => ConversationStatus::PendingHuman,
            "pending_response" => ConversationStatus::PendingResponse,
            "closed" => ConversationStatus::Closed,
            _ => ConversationStatus::Other(value),
        }
    }
}

impl From<ConversationStatus> for String {
    fn from(value: ConversationStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationStatus::AiActive => "ai_active",
            ConversationStatus::HumanActive => "human_active",
            ConversationStatus::PendingHuman => "pending_human",
            ConversationStatus::PendingResponse => "pending_response",
            ConversationStatus::Closed => "closed",
            ConversationStatus::Other(other) => other.as_str(),
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SenderRole {
    User,
    Ai,
    Agent,
    Other(String),
}

impl From<String> for SenderRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => SenderRole::User,
            "ai" => SenderRole::Ai,
            "agent" => SenderRole::Agent,
            _ => SenderRole::Other(value),
        }
    }
}

impl From<SenderRole> for String {
    fn from(value: SenderRole) -> Self {
        match value {
            SenderRole::User => "user".to_string(),
            SenderRole::Ai => "ai".to_string(),
            SenderRole::Agent => "agent".to_string(),
            SenderRole::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub assigned_agent_email: Option<String>,
    #[serde(default)]
    pub assigned_agent_name: Option<String>,
    #[serde(default)]
    pub last_message_sender: Option<SenderRole>,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Conversation {
    /// Minimal record standing in for a conversation that has not been fetched yet.
    pub fn placeholder(message: &Message) -> Self {
        Self {
            id: message.conversation_id.clone(),
            user_id: None,
            name: None,
            phone_number: None,
            channel: None,
            status: ConversationStatus::default(),
            assigned_agent_id: None,
            assigned_agent_email: None,
            assigned_agent_name: None,
            last_message_sender: Some(message.sender.clone()),
            last_message_at: message.created_at,
            last_message_content: Some(message.preview()),
            created_at: message.created_at,
            updated_at: message.created_at,
        }
    }

    pub fn recency(&self) -> Option<Timestamp> {
        self.last_message_at.or(self.updated_at)
    }

    pub fn assigned_agent(&self) -> AgentIdentity {
        AgentIdentity {
            id: self.assigned_agent_id.clone(),
            email: self.assigned_agent_email.clone(),
            name: self.assigned_agent_name.clone(),
        }
    }
}

/// Local delivery state of a message row. Rows read from the store are
/// always `Confirmed`; agent replies start as `Pending`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
    pub sender: SenderRole,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_email: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_type: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<i64>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub delivery: DeliveryState,
}

const PREVIEW_CHARS: usize = 120;

impl Message {
    pub fn attachment(&self) -> Option<Attachment> {
        self.attachment_url.as_ref().map(|url| Attachment {
            url: url.clone(),
            kind: self.attachment_type.clone(),
            name: self.attachment_name.clone(),
            size: self.attachment_size,
        })
    }

    /// Text used for the conversation's denormalized last-message column.
    pub fn preview(&self) -> String {
        if self.content.trim().is_empty() {
            if let Some(name) = self.attachment_name.as_ref().or(self.attachment_url.as_ref()) {
                return format!("[attachment] {}", name);
            }
        }
        self.content.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Row shape sent to the store when an agent replies.
#[derive(Clone, Debug, Serialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub content: String,
    pub sender: SenderRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_size: Option<i64>,
}

impl NewMessage {
    pub fn from_agent(
        conversation_id: &str,
        agent: &AgentIdentity,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            sender: SenderRole::Agent,
            agent_id: agent.id.clone(),
            agent_email: agent.email.clone(),
            agent_name: agent.name.clone(),
            attachment_url: attachment.map(|a| a.url.clone()),
            attachment_type: attachment.and_then(|a| a.kind.clone()),
            attachment_name: attachment.and_then(|a| a.name.clone()),
            attachment_size: attachment.and_then(|a| a.size),
        }
    }

    /// Local copy shown immediately while the insert is in flight.
    pub fn to_pending(&self, local_id: String, now: Timestamp) -> Message {
        Message {
            id: local_id,
            conversation_id: self.conversation_id.clone(),
            content: self.content.clone(),
            sender: self.sender.clone(),
            agent_id: self.agent_id.clone(),
            agent_email: self.agent_email.clone(),
            agent_name: self.agent_name.clone(),
            attachment_url: self.attachment_url.clone(),
            attachment_type: self.attachment_type.clone(),
            attachment_name: self.attachment_name.clone(),
            attachment_size: self.attachment_size,
            created_at: Some(now),
            delivery: DeliveryState::Pending,
        }
    }
}

/// Partial update applied to a conversation row.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl ConversationPatch {
    pub fn claim(agent: &AgentIdentity, now: Timestamp) -> Self {
        Self {
            status: Some(ConversationStatus::HumanActive),
            assigned_agent_id: agent.id.clone(),
            assigned_agent_email: agent.email.clone(),
            assigned_agent_name: agent.name.clone(),
            updated_at: Some(now),
        }
    }

    pub fn close(now: Timestamp) -> Self {
        Self {
            status: Some(ConversationStatus::Closed),
            updated_at: Some(now),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(status) = &self.status {
            conversation.status = status.clone();
        }
        if self.assigned_agent_id.is_some() {
            conversation.assigned_agent_id = self.assigned_agent_id.clone();
        }
        if self.assigned_agent_email.is_some() {
            conversation.assigned_agent_email = self.assigned_agent_email.clone();
        }
        if self.assigned_agent_name.is_some() {
            conversation.assigned_agent_name = self.assigned_agent_name.clone();
        }
        if self.updated_at.is_some() {
            conversation.updated_at = self.updated_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_known_and_unknown_values() {
        let known: ConversationStatus = serde_json::from_str("\"pending_human\"").unwrap();
        assert_eq!(known, ConversationStatus::PendingHuman);

        let unknown: ConversationStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(unknown, ConversationStatus::Other("archived".to_string()));
        assert_eq!(serde_json::to_string(&unknown).unwrap(), "\"archived\"");
    }

    #[test]
    fn conversation_row_with_missing_columns_deserializes() {
        let row = serde_json::json!({
            "id": "c1",
            "status": "human_active",
            "last_message_sender": "user",
            "last_message_at": "2024-05-01T10:00:00.123456+00:00"
        });
        let conv: Conversation = serde_json::from_value(row).unwrap();
        assert_eq!(conv.status, ConversationStatus::HumanActive);
        assert_eq!(conv.last_message_sender, Some(SenderRole::User));
        assert!(conv.name.is_none());
        assert!(conv.recency().is_some());
    }

    #[test]
    fn preview_falls_back_to_attachment_name() {
        let msg = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            content: "   ".into(),
            sender: SenderRole::User,
            agent_id: None,
            agent_email: None,
            agent_name: None,
            attachment_url: Some("https://files.example.com/a.png".into()),
            attachment_type: Some("image/png".into()),
            attachment_name: Some("a.png".into()),
            attachment_size: Some(42),
            created_at: None,
            delivery: DeliveryState::Confirmed,
        };
        assert_eq!(msg.preview(), "[attachment] a.png");
        assert_eq!(msg.attachment().unwrap().size, Some(42));
    }

    #[test]
    fn claim_patch_marks_conversation_human_active() {
        let mut conv: Conversation = serde_json::from_value(serde_json::json!({ "id": "c1" })).unwrap();
        let agent = AgentIdentity {
            id: Some("a1".into()),
            email: Some("a1@example.com".into()),
            name: Some("Ana".into()),
        };
        ConversationPatch::claim(&agent, Utc::now()).apply_to(&mut conv);
        assert_eq!(conv.status, ConversationStatus::HumanActive);
        assert_eq!(conv.assigned_agent(), agent);
    }
}
