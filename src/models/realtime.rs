use crate::models::chat::{ Conversation, Message };
use serde::{ Serialize, Deserialize };

/// Row-level change delivered by the hosted change feed, already decoded
/// into the console's own types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    #[serde(rename = "message_inserted")] MessageInserted {
        message: Message,
    },
    #[serde(rename = "conversation_changed")] ConversationChanged {
        conversation: Conversation,
    },
    #[serde(rename = "conversation_deleted")] ConversationDeleted {
        id: String,
    },
    /// The feed reconnected; anything sent while offline was missed.
    #[serde(rename = "resubscribed")]
    Resubscribed,
}
