use crate::backend::{ Backend, BackendError };
use crate::console::reconcile::ConversationList;
use crate::console::request::retry_with_backoff;
use log::{ error, info, warn };
use std::time::Duration;
use tokio::sync::Mutex;

/// Delays before each fetch attempt for a placeholder's parent row.
pub const BACKFILL_DELAYS_MS: [u64; 4] = [0, 300, 900, 2000];

pub fn default_schedule() -> Vec<Duration> {
    BACKFILL_DELAYS_MS.iter().map(|ms| Duration::from_millis(*ms)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    Replaced,
    /// Every attempt failed; the list was reloaded instead.
    Refreshed,
    Failed,
}

/// Replaces the placeholder `id` with the stored row, retrying on the given
/// schedule. Falls back to a full list reload when the row never shows up.
pub async fn backfill_conversation(
    backend: &dyn Backend,
    list: &Mutex<ConversationList>,
    id: &str,
    schedule: &[Duration]
) -> BackfillOutcome {
    let label = format!("Backfill of conversation {}", id);
    let fetched = retry_with_backoff(&label, schedule, move || async move {
        match backend.fetch_conversation(id).await {
            Ok(Some(conversation)) => Ok(conversation),
            Ok(None) => Err(BackendError::NotFound(format!("conversation {}", id))),
            Err(e) => Err(e),
        }
    }).await;

    match fetched {
        Ok(conversation) => {
            list.lock().await.apply_conversation_update(conversation);
            info!("Placeholder {} replaced with stored conversation", id);
            BackfillOutcome::Replaced
        }
        Err(e) => {
            warn!("Giving up on conversation {} after {} attempts: {}", id, schedule.len(), e);
            list.lock().await.mark_stale(id);
            refresh(backend, list).await.map_or(BackfillOutcome::Failed, |_| BackfillOutcome::Refreshed)
        }
    }
}

/// Reloads the whole list from the store. Changes applied while the
/// snapshot was in flight are kept.
pub async fn refresh(backend: &dyn Backend, list: &Mutex<ConversationList>) -> Result<usize, BackendError> {
    let since = list.lock().await.revision();
    match backend.list_conversations().await {
        Ok(conversations) => {
            let count = list.lock().await.replace_since(conversations, since);
            info!("Conversation list refreshed ({} entries)", count);
            Ok(count)
        }
        Err(e) => {
            error!("Full refresh failed: {}", e);
            Err(e)
        }
    }
}
