pub mod backfill;
pub mod priority;
pub mod reconcile;
pub mod request;

use crate::backend::{ Backend, BackendError };
use crate::models::chat::{ AgentIdentity, Attachment, Conversation, ConversationPatch, Message, NewMessage };
use crate::models::realtime::ChangeEvent;
use crate::relay::{ WebhookKind, WebhookRelay };
use backfill::{ backfill_conversation, refresh };
use chrono::Utc;
use log::{ debug, info, warn };
use reconcile::{ ConversationEntry, ConversationList, MergeOutcome };
use request::{ Debouncer, InFlight, RequestSequencer };
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ mpsc, Mutex };
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub pause_reorder_on_scroll: bool,
    pub search_debounce: Duration,
    pub message_debounce: Duration,
    pub backfill_schedule: Vec<Duration>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            pause_reorder_on_scroll: true,
            search_debounce: Duration::from_millis(300),
            message_debounce: Duration::from_millis(150),
            backfill_schedule: backfill::default_schedule(),
        }
    }
}

/// Agent console state: the reconciled conversation list, the open
/// conversation and the background work keeping them current.
///
/// Constructed once at startup and passed down; `shutdown` stops every
/// task it started.
pub struct Console {
    backend: Arc<dyn Backend>,
    relay: Option<Arc<WebhookRelay>>,
    list: Arc<Mutex<ConversationList>>,
    backfills: InFlight,
    message_requests: Arc<RequestSequencer>,
    search_requests: RequestSequencer,
    message_debouncer: Debouncer,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    config: ConsoleConfig,
}

impl Console {
    pub fn new(backend: Arc<dyn Backend>, relay: Option<Arc<WebhookRelay>>, config: ConsoleConfig) -> Self {
        Self {
            backend,
            relay,
            list: Arc::new(Mutex::new(ConversationList::new(config.pause_reorder_on_scroll))),
            backfills: InFlight::new(),
            message_requests: Arc::new(RequestSequencer::new()),
            search_requests: RequestSequencer::new(),
            message_debouncer: Debouncer::new(config.message_debounce),
            tasks: std::sync::Mutex::new(Vec::new()),
            config,
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Full reload of the conversation list.
    pub async fn load(&self) -> Result<usize, BackendError> {
        refresh(self.backend.as_ref(), &self.list).await
    }

    pub async fn snapshot(&self) -> Vec<ConversationEntry> {
        self.list.lock().await.entries().to_vec()
    }

    pub async fn is_scrolling(&self) -> bool {
        self.list.lock().await.is_scrolling()
    }

    pub async fn handle_event(&self, event: ChangeEvent) -> MergeOutcome {
        let outcome = match event {
            ChangeEvent::MessageInserted { message } => {
                self.list.lock().await.apply_message_insert(message)
            }
            ChangeEvent::ConversationChanged { conversation } => {
                self.list.lock().await.apply_conversation_update(conversation)
            }
            ChangeEvent::ConversationDeleted { id } => {
                self.list.lock().await.apply_conversation_delete(&id)
            }
            ChangeEvent::Resubscribed => {
                info!("Change feed resubscribed; reloading conversations.");
                if let Err(e) = self.load().await {
                    warn!("Reload after resubscribe failed: {}", e);
                }
                return MergeOutcome::Unchanged;
            }
        };
        if let MergeOutcome::PlaceholderCreated(id) = &outcome {
            self.spawn_backfill(id);
        }
        outcome
    }

    /// Returns false when a backfill for `id` is already running.
    pub fn spawn_backfill(&self, id: &str) -> bool {
        let Some(guard) = self.backfills.try_begin(id) else {
            debug!("Backfill for {} already in flight", id);
            return false;
        };
        let backend = Arc::clone(&self.backend);
        let list = Arc::clone(&self.list);
        let schedule = self.config.backfill_schedule.clone();
        let id = id.to_string();
        self.track(
            tokio::spawn(async move {
                let _guard = guard;
                let outcome = backfill_conversation(backend.as_ref(), &list, &id, &schedule).await;
                debug!("Backfill for {} finished: {:?}", id, outcome);
            })
        );
        true
    }

    /// Consumes change events in arrival order until the sender side closes.
    pub fn attach_feed(self: &Arc<Self>, mut events: mpsc::Receiver<ChangeEvent>) {
        let console = Arc::clone(self);
        self.track(
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    console.handle_event(event).await;
                }
                info!("Change feed closed.");
            })
        );
    }

    /// Marks `id` open right away and fetches its messages after the
    /// debounce delay. A fetch superseded by a later open is discarded.
    pub async fn open_conversation(&self, id: &str) {
        self.list.lock().await.open_conversation(id);

        let request_id = self.message_requests.next();
        let sequencer = Arc::clone(&self.message_requests);
        let backend = Arc::clone(&self.backend);
        let list = Arc::clone(&self.list);
        let id = id.to_string();
        self.message_debouncer.call(async move {
            let fetched = backend.fetch_messages(&id).await;
            if !sequencer.is_current(request_id) {
                debug!("Dropping superseded message fetch for {}", id);
                return;
            }
            match fetched {
                Ok(messages) => {
                    list.lock().await.set_open_messages(&id, messages);
                }
                Err(e) => warn!("Failed to load messages for {}: {}", id, e),
            }
        });
    }

    pub async fn close_open_conversation(&self) {
        self.message_debouncer.cancel();
        self.list.lock().await.close_conversation();
    }

    /// Messages of `id` when it is the open conversation, otherwise straight
    /// from the store.
    pub async fn messages(&self, id: &str) -> Result<Vec<Message>, BackendError> {
        if let Some(open) = self.list.lock().await.open().filter(|o| o.id == id) {
            return Ok(open.messages.clone());
        }
        self.backend.fetch_messages(id).await
    }

    /// Debounced search. Returns `None` when a newer search superseded this one.
    pub async fn search(&self, query: &str) -> Result<Option<Vec<Conversation>>, BackendError> {
        let request_id = self.search_requests.next();
        tokio::time::sleep(self.config.search_debounce).await;
        if !self.search_requests.is_current(request_id) {
            return Ok(None);
        }
        let mut results = self.backend.search_conversations(query).await?;
        if !self.search_requests.is_current(request_id) {
            return Ok(None);
        }
        priority::sort_conversations(&mut results);
        Ok(Some(results))
    }

    pub async fn set_scrolling(&self, active: bool) {
        if self.list.lock().await.set_scrolling(active) {
            debug!("Scrolling stopped; list re-sorted");
        }
    }

    pub async fn claim(&self, id: &str, agent: &AgentIdentity) -> Result<Conversation, BackendError> {
        let patch = ConversationPatch::claim(agent, Utc::now());
        let updated = self.backend.update_conversation(id, &patch).await?;
        info!("Conversation {} claimed by {}", id, agent.email.as_deref().or(agent.id.as_deref()).unwrap_or("unknown agent"));
        self.list.lock().await.apply_conversation_update(updated.clone());
        Ok(updated)
    }

    pub async fn close(&self, id: &str) -> Result<Conversation, BackendError> {
        let updated = self.backend.update_conversation(id, &ConversationPatch::close(Utc::now())).await?;
        self.list.lock().await.apply_conversation_update(updated.clone());
        Ok(updated)
    }

    /// Shows the reply immediately, stores it, then hands it to the
    /// automation webhook for delivery on the user's channel.
    pub async fn send_reply(
        &self,
        id: &str,
        agent: &AgentIdentity,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Result<Message, BackendError> {
        let new_message = NewMessage::from_agent(id, agent, content, attachment);
        let local_id = format!("local-{}", Uuid::new_v4());
        let outcome = self.list
            .lock().await
            .add_pending_message(new_message.to_pending(local_id.clone(), Utc::now()));
        if let MergeOutcome::PlaceholderCreated(parent) = &outcome {
            self.spawn_backfill(parent);
        }

        let stored = match self.backend.insert_message(&new_message).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Reply to {} failed: {}", id, e);
                self.list.lock().await.mark_failed(&local_id);
                return Err(e);
            }
        };
        self.list.lock().await.confirm_pending(&local_id, stored.clone());

        if let Some(relay) = &self.relay {
            let kind = if attachment.is_some() { WebhookKind::Media } else { WebhookKind::Message };
            if relay.is_configured(kind) {
                let channel = self.list
                    .lock().await
                    .get(id)
                    .and_then(|e| e.conversation.channel.clone());
                let payload = json!({
                    "conversation_id": id,
                    "message_id": stored.id,
                    "channel": channel,
                    "content": stored.content,
                    "agent": agent,
                    "attachment": stored.attachment(),
                });
                if let Err(e) = relay.forward(kind, &payload).await {
                    warn!("Webhook delivery for message {} failed: {}", stored.id, e);
                }
            }
        }
        Ok(stored)
    }

    pub fn shutdown(&self) {
        self.message_debouncer.cancel();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Console background tasks stopped.");
    }
}
