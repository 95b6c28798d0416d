use crate::console::priority::compare;
use crate::models::chat::{ Conversation, DeliveryState, Message, SenderRole };
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Synthesized from a message whose parent was not in the list yet.
    Placeholder,
    Confirmed,
    /// A placeholder that could not be backfilled.
    Stale,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationEntry {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub state: EntryState,
    /// Set on entries that arrived at the bottom while the agent was scrolling.
    pub is_new: bool,
    /// List revision of the last local change to this entry.
    #[serde(skip)]
    revision: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Unchanged,
    Patched,
    Reordered,
    Inserted,
    Removed,
    /// The parent of an inserted message was missing; a placeholder with this
    /// id now sits in the list and needs a backfill.
    PlaceholderCreated(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenConversation {
    pub id: String,
    pub messages: Vec<Message>,
}

impl OpenConversation {
    fn merge_message(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        if message.sender == SenderRole::Agent {
            let optimistic = self.messages.iter().position(|m| {
                m.delivery == DeliveryState::Pending &&
                    m.sender == SenderRole::Agent &&
                    m.content == message.content
            });
            if let Some(idx) = optimistic {
                debug!("Feed echo {} confirmed local message {}", message.id, self.messages[idx].id);
                self.messages[idx] = message;
                return true;
            }
        }
        self.messages.push(message);
        true
    }

    /// Oldest first; rows without a timestamp go last.
    fn sort_by_time(&mut self) {
        self.messages.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }
}

/// Keeps the locally known last-message fields when the incoming row has
/// none or older ones.
fn carry_last_message(existing: &Conversation, incoming: &mut Conversation) {
    let incoming_lacks_last = incoming.last_message_at.is_none() && incoming.last_message_content.is_none();
    if existing.last_message_at > incoming.last_message_at || incoming_lacks_last {
        incoming.last_message_sender = existing.last_message_sender.clone();
        incoming.last_message_at = existing.last_message_at;
        incoming.last_message_content = existing.last_message_content.clone();
    }
}

/// Locally cached, priority-ordered conversation list plus the messages of
/// the conversation the agent has open.
#[derive(Debug)]
pub struct ConversationList {
    entries: Vec<ConversationEntry>,
    open: Option<OpenConversation>,
    scrolling: bool,
    pause_on_scroll: bool,
    revision: u64,
    /// Ids deleted locally, with the revision of the delete.
    deleted: HashMap<String, u64>,
}

impl ConversationList {
    pub fn new(pause_on_scroll: bool) -> Self {
        Self {
            entries: Vec::new(),
            open: None,
            scrolling: false,
            pause_on_scroll,
            revision: 0,
            deleted: HashMap::new(),
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| e.conversation.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_scrolling(&self) -> bool {
        self.scrolling
    }

    pub fn open(&self) -> Option<&OpenConversation> {
        self.open.as_ref()
    }

    /// Counter bumped by every local change. Take it before fetching a
    /// snapshot and hand it to `replace_since`.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.conversation.id == id)
    }

    fn holds_position(&self) -> bool {
        self.scrolling && self.pause_on_scroll
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| compare(&a.conversation, &b.conversation));
    }

    /// Moves the entry to the front, then lets the priority order place it.
    /// Among equal-priority entries it ends up first.
    fn bring_forward(&mut self, idx: usize) {
        let entry = self.entries.remove(idx);
        self.entries.insert(0, entry);
        self.sort();
    }

    fn insert_entry(&mut self, mut entry: ConversationEntry) {
        entry.revision = self.touch();
        self.deleted.remove(&entry.conversation.id);
        if entry.is_new {
            self.entries.push(entry);
        } else {
            self.entries.insert(0, entry);
            self.sort();
        }
    }

    /// Re-establishes priority order and clears the "new" markers.
    pub fn resort(&mut self) {
        for entry in &mut self.entries {
            entry.is_new = false;
        }
        self.sort();
    }

    /// Returns true when the list was re-sorted because scrolling stopped.
    pub fn set_scrolling(&mut self, active: bool) -> bool {
        let was_scrolling = self.scrolling;
        self.scrolling = active;
        if was_scrolling && !active {
            self.resort();
            return true;
        }
        false
    }

    pub fn replace_all(&mut self, conversations: Vec<Conversation>) -> usize {
        let since = self.revision;
        self.replace_since(conversations, since)
    }

    /// Installs a snapshot fetched after revision `since`. Local changes
    /// made while the snapshot was in flight survive it: newer rows keep
    /// their fields, entries deleted meanwhile stay deleted, and entries
    /// added meanwhile or still waiting for a backfill are kept.
    pub fn replace_since(&mut self, conversations: Vec<Conversation>, since: u64) -> usize {
        let mut previous: Vec<ConversationEntry> = self.entries.drain(..).collect();
        let mut entries: Vec<ConversationEntry> = Vec::with_capacity(conversations.len());
        for mut incoming in conversations {
            if entries.iter().any(|e| e.conversation.id == incoming.id) {
                continue;
            }
            if self.deleted.get(&incoming.id).is_some_and(|rev| *rev > since) {
                continue;
            }
            let mut revision = 0;
            if let Some(idx) = previous.iter().position(|e| e.conversation.id == incoming.id) {
                let existing = previous.remove(idx);
                revision = existing.revision;
                let keeps_local =
                    existing.state != EntryState::Placeholder &&
                    existing.conversation.updated_at > incoming.updated_at;
                if keeps_local {
                    incoming = existing.conversation;
                } else {
                    carry_last_message(&existing.conversation, &mut incoming);
                }
            }
            entries.push(ConversationEntry {
                conversation: incoming,
                state: EntryState::Confirmed,
                is_new: false,
                revision,
            });
        }
        for mut entry in previous {
            if entry.state == EntryState::Placeholder || entry.revision > since {
                debug!("Keeping {} across refresh", entry.conversation.id);
                entry.is_new = false;
                entries.push(entry);
            }
        }
        self.deleted.retain(|_, rev| *rev > since);
        self.entries = entries;
        self.sort();
        self.entries.len()
    }

    pub fn apply_message_insert(&mut self, message: Message) -> MergeOutcome {
        let open_changed = match self.open.as_mut() {
            Some(open) if open.id == message.conversation_id => open.merge_message(message.clone()),
            _ => false,
        };
        let touched = if open_changed { MergeOutcome::Patched } else { MergeOutcome::Unchanged };

        let Some(idx) = self.position(&message.conversation_id) else {
            let entry = ConversationEntry {
                conversation: Conversation::placeholder(&message),
                state: EntryState::Placeholder,
                is_new: self.holds_position(),
                revision: 0,
            };
            self.insert_entry(entry);
            return MergeOutcome::PlaceholderCreated(message.conversation_id);
        };

        let conversation = &mut self.entries[idx].conversation;
        let preview = message.preview();
        let already_reflected =
            (message.created_at.is_none() || conversation.last_message_at == message.created_at) &&
            conversation.last_message_content.as_deref() == Some(preview.as_str()) &&
            conversation.last_message_sender.as_ref() == Some(&message.sender);
        let older = matches!(
            (message.created_at, conversation.last_message_at),
            (Some(incoming), Some(current)) if incoming < current
        );
        if already_reflected || older {
            return touched;
        }

        conversation.last_message_sender = Some(message.sender.clone());
        conversation.last_message_content = Some(preview);
        if message.created_at.is_some() {
            conversation.last_message_at = message.created_at;
            if conversation.updated_at < message.created_at {
                conversation.updated_at = message.created_at;
            }
        }
        let revision = self.touch();
        self.entries[idx].revision = revision;

        if self.holds_position() {
            MergeOutcome::Patched
        } else {
            self.bring_forward(idx);
            MergeOutcome::Reordered
        }
    }

    pub fn apply_conversation_update(&mut self, conversation: Conversation) -> MergeOutcome {
        let Some(idx) = self.position(&conversation.id) else {
            let entry = ConversationEntry {
                conversation,
                state: EntryState::Confirmed,
                is_new: self.holds_position(),
                revision: 0,
            };
            self.insert_entry(entry);
            return MergeOutcome::Inserted;
        };

        let entry = &mut self.entries[idx];
        let mut incoming = conversation;
        carry_last_message(&entry.conversation, &mut incoming);
        if entry.conversation == incoming && entry.state == EntryState::Confirmed {
            return MergeOutcome::Unchanged;
        }
        entry.conversation = incoming;
        entry.state = EntryState::Confirmed;
        let revision = self.touch();
        self.entries[idx].revision = revision;

        if self.holds_position() {
            MergeOutcome::Patched
        } else {
            self.bring_forward(idx);
            MergeOutcome::Reordered
        }
    }

    pub fn apply_conversation_delete(&mut self, id: &str) -> MergeOutcome {
        if self.open.as_ref().is_some_and(|o| o.id == id) {
            self.open = None;
        }
        match self.position(id) {
            Some(idx) => {
                self.entries.remove(idx);
                let revision = self.touch();
                self.deleted.insert(id.to_string(), revision);
                MergeOutcome::Removed
            }
            None => MergeOutcome::Unchanged,
        }
    }

    /// Returns false when there is no placeholder with this id.
    pub fn mark_stale(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.conversation.id == id) {
            Some(entry) if entry.state == EntryState::Placeholder => {
                entry.state = EntryState::Stale;
                true
            }
            _ => false,
        }
    }

    pub fn open_conversation(&mut self, id: &str) {
        if self.open.as_ref().is_some_and(|o| o.id == id) {
            return;
        }
        self.open = Some(OpenConversation {
            id: id.to_string(),
            messages: Vec::new(),
        });
    }

    pub fn close_conversation(&mut self) {
        self.open = None;
    }

    /// Merges fetched messages into the open conversation by id. Rows the
    /// fetch does not know about (feed deliveries, pending or failed
    /// replies) are kept.
    pub fn set_open_messages(&mut self, id: &str, fetched: Vec<Message>) -> bool {
        let Some(open) = self.open.as_mut().filter(|o| o.id == id) else {
            return false;
        };
        for message in fetched {
            open.merge_message(message);
        }
        open.sort_by_time();
        true
    }

    /// Shows an agent reply immediately, before the store has accepted it.
    pub fn add_pending_message(&mut self, message: Message) -> MergeOutcome {
        self.apply_message_insert(message)
    }

    /// Swaps the optimistic row for the stored one. If the feed already
    /// delivered the stored row, the optimistic row is simply dropped.
    pub fn confirm_pending(&mut self, local_id: &str, stored: Message) -> MergeOutcome {
        if let Some(open) = self.open.as_mut().filter(|o| o.id == stored.conversation_id) {
            let echoed = open.messages.iter().any(|m| m.id == stored.id);
            if echoed {
                open.messages.retain(|m| m.id != local_id);
            } else if let Some(row) = open.messages.iter_mut().find(|m| m.id == local_id) {
                *row = stored.clone();
            }
        }
        self.apply_message_insert(stored)
    }

    pub fn mark_failed(&mut self, local_id: &str) -> bool {
        let Some(open) = self.open.as_mut() else {
            return false;
        };
        match open.messages.iter_mut().find(|m| m.id == local_id) {
            Some(row) => {
                row.delivery = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ConversationStatus;
    use chrono::{ TimeZone, Utc };

    fn conv(id: &str, status: ConversationStatus, t: i64) -> Conversation {
        let mut c: Conversation = serde_json::from_value(serde_json::json!({ "id": id })).unwrap();
        c.status = status;
        c.last_message_at = Some(Utc.timestamp_opt(t, 0).unwrap());
        c
    }

    fn msg(id: &str, conversation_id: &str, sender: SenderRole, content: &str, t: i64) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            sender,
            agent_id: None,
            agent_email: None,
            agent_name: None,
            attachment_url: None,
            attachment_type: None,
            attachment_name: None,
            attachment_size: None,
            created_at: Some(Utc.timestamp_opt(t, 0).unwrap()),
            delivery: DeliveryState::Confirmed,
        }
    }

    fn ids(list: &ConversationList) -> Vec<String> {
        list.entries().iter().map(|e| e.conversation.id.clone()).collect()
    }

    fn seeded() -> ConversationList {
        let mut list = ConversationList::new(true);
        list.replace_all(vec![
            conv("a", ConversationStatus::AiActive, 30),
            conv("b", ConversationStatus::AiActive, 20),
            conv("c", ConversationStatus::AiActive, 10),
        ]);
        list
    }

    #[test]
    fn message_insert_moves_parent_forward() {
        let mut list = seeded();
        let outcome = list.apply_message_insert(msg("m1", "c", SenderRole::User, "hi", 40));
        assert_eq!(outcome, MergeOutcome::Reordered);
        assert_eq!(ids(&list), vec!["c", "a", "b"]);
        let c = &list.get("c").unwrap().conversation;
        assert_eq!(c.last_message_content.as_deref(), Some("hi"));
        assert_eq!(c.last_message_sender, Some(SenderRole::User));
    }

    #[test]
    fn applying_the_same_insert_twice_is_idempotent() {
        let mut list = seeded();
        list.open_conversation("b");
        let event = msg("m1", "b", SenderRole::User, "hello", 50);

        list.apply_message_insert(event.clone());
        let entries_once = list.entries().to_vec();
        let open_once = list.open().cloned();

        assert_eq!(list.apply_message_insert(event), MergeOutcome::Unchanged);
        assert_eq!(list.entries(), entries_once.as_slice());
        assert_eq!(list.open().cloned(), open_once);
        assert_eq!(list.open().unwrap().messages.len(), 1);
    }

    #[test]
    fn insert_while_scrolling_patches_in_place() {
        let mut list = seeded();
        list.set_scrolling(true);
        let outcome = list.apply_message_insert(msg("m1", "c", SenderRole::User, "hi", 40));
        assert_eq!(outcome, MergeOutcome::Patched);
        assert_eq!(ids(&list), vec!["a", "b", "c"]);

        assert!(list.set_scrolling(false));
        assert_eq!(ids(&list), vec!["c", "a", "b"]);
    }

    #[test]
    fn older_message_does_not_overwrite_newer_preview() {
        let mut list = seeded();
        list.apply_message_insert(msg("m2", "a", SenderRole::Ai, "newer", 100));
        let outcome = list.apply_message_insert(msg("m1", "a", SenderRole::User, "older", 90));
        assert_eq!(outcome, MergeOutcome::Unchanged);
        let a = &list.get("a").unwrap().conversation;
        assert_eq!(a.last_message_content.as_deref(), Some("newer"));
    }

    #[test]
    fn user_reply_on_human_conversation_raises_priority() {
        let mut list = ConversationList::new(true);
        list.replace_all(vec![
            conv("pending", ConversationStatus::PendingResponse, 50),
            conv("human", ConversationStatus::HumanActive, 10),
        ]);
        list.apply_message_insert(msg("m1", "human", SenderRole::User, "are you there?", 60));
        assert_eq!(ids(&list), vec!["human", "pending"]);
    }

    #[test]
    fn missing_parent_gets_one_placeholder() {
        let mut list = seeded();
        let event = msg("m1", "x", SenderRole::User, "first", 5);
        let outcome = list.apply_message_insert(event.clone());
        assert_eq!(outcome, MergeOutcome::PlaceholderCreated("x".into()));
        let placeholder = list.get("x").unwrap();
        assert_eq!(placeholder.state, EntryState::Placeholder);
        assert_eq!(placeholder.conversation.last_message_content.as_deref(), Some("first"));

        assert_eq!(list.apply_message_insert(event), MergeOutcome::Unchanged);

        let mut fetched = conv("x", ConversationStatus::PendingHuman, 5);
        fetched.name = Some("Maria".into());
        list.apply_conversation_update(fetched);

        let xs: Vec<_> = list.entries().iter().filter(|e| e.conversation.id == "x").collect();
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].state, EntryState::Confirmed);
        assert_eq!(xs[0].conversation.name.as_deref(), Some("Maria"));
        assert_eq!(ids(&list)[0], "x");
    }

    #[test]
    fn placeholder_goes_to_bottom_while_scrolling() {
        let mut list = seeded();
        list.set_scrolling(true);
        list.apply_message_insert(msg("m1", "x", SenderRole::User, "first", 99));
        assert_eq!(ids(&list), vec!["a", "b", "c", "x"]);
        assert!(list.get("x").unwrap().is_new);

        list.set_scrolling(false);
        assert_eq!(ids(&list)[0], "x");
        assert!(!list.get("x").unwrap().is_new);
    }

    #[test]
    fn update_for_unknown_id_inserts_exactly_once() {
        let mut list = seeded();
        let fresh = conv("d", ConversationStatus::PendingHuman, 1);
        assert_eq!(list.apply_conversation_update(fresh.clone()), MergeOutcome::Inserted);
        assert_eq!(list.apply_conversation_update(fresh), MergeOutcome::Unchanged);
        assert_eq!(list.len(), 4);
        assert_eq!(ids(&list)[0], "d");
    }

    #[test]
    fn update_keeps_newer_local_last_message() {
        let mut list = seeded();
        list.apply_message_insert(msg("m1", "b", SenderRole::User, "latest", 500));
        let mut row = conv("b", ConversationStatus::HumanActive, 20);
        row.last_message_content = Some("stale".into());
        list.apply_conversation_update(row);

        let b = &list.get("b").unwrap().conversation;
        assert_eq!(b.status, ConversationStatus::HumanActive);
        assert_eq!(b.last_message_content.as_deref(), Some("latest"));
    }

    #[test]
    fn update_while_scrolling_inserts_unknown_at_bottom() {
        let mut list = seeded();
        list.set_scrolling(true);
        list.apply_conversation_update(conv("d", ConversationStatus::PendingHuman, 1));
        assert_eq!(ids(&list), vec!["a", "b", "c", "d"]);
        assert!(list.get("d").unwrap().is_new);
    }

    #[test]
    fn scroll_pause_can_be_disabled() {
        let mut list = ConversationList::new(false);
        list.replace_all(vec![
            conv("a", ConversationStatus::AiActive, 30),
            conv("b", ConversationStatus::AiActive, 20),
        ]);
        list.set_scrolling(true);
        assert_eq!(
            list.apply_message_insert(msg("m1", "b", SenderRole::User, "hi", 40)),
            MergeOutcome::Reordered
        );
        assert_eq!(ids(&list), vec!["b", "a"]);
    }

    #[test]
    fn delete_removes_entry_and_closes_it() {
        let mut list = seeded();
        list.open_conversation("a");
        assert_eq!(list.apply_conversation_delete("a"), MergeOutcome::Removed);
        assert!(list.get("a").is_none());
        assert!(list.open().is_none());
        assert_eq!(list.apply_conversation_delete("a"), MergeOutcome::Unchanged);
    }

    #[test]
    fn pending_reply_is_confirmed_by_feed_echo() {
        let mut list = seeded();
        list.open_conversation("a");
        let mut pending = msg("local-1", "a", SenderRole::Agent, "on it", 100);
        pending.delivery = DeliveryState::Pending;
        list.add_pending_message(pending);

        list.apply_message_insert(msg("srv-1", "a", SenderRole::Agent, "on it", 101));
        let open = list.open().unwrap();
        assert_eq!(open.messages.len(), 1);
        assert_eq!(open.messages[0].id, "srv-1");

        list.confirm_pending("local-1", msg("srv-1", "a", SenderRole::Agent, "on it", 101));
        assert_eq!(list.open().unwrap().messages.len(), 1);
    }

    #[test]
    fn pending_reply_confirmed_before_echo_is_not_duplicated() {
        let mut list = seeded();
        list.open_conversation("a");
        let mut pending = msg("local-1", "a", SenderRole::Agent, "on it", 100);
        pending.delivery = DeliveryState::Pending;
        list.add_pending_message(pending);

        let stored = msg("srv-1", "a", SenderRole::Agent, "on it", 101);
        list.confirm_pending("local-1", stored.clone());
        list.apply_message_insert(stored);

        let open = list.open().unwrap();
        assert_eq!(open.messages.len(), 1);
        assert_eq!(open.messages[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn failed_reply_stays_visible_across_refetch() {
        let mut list = seeded();
        list.open_conversation("a");
        let mut pending = msg("local-1", "a", SenderRole::Agent, "hello?", 100);
        pending.delivery = DeliveryState::Pending;
        list.add_pending_message(pending);
        assert!(list.mark_failed("local-1"));

        list.set_open_messages("a", vec![msg("m0", "a", SenderRole::User, "hi", 1)]);
        let open = list.open().unwrap();
        assert_eq!(open.messages.len(), 2);
        assert_eq!(open.messages[1].delivery, DeliveryState::Failed);
    }

    #[test]
    fn fetched_messages_for_another_conversation_are_ignored() {
        let mut list = seeded();
        list.open_conversation("a");
        assert!(!list.set_open_messages("b", vec![msg("m0", "b", SenderRole::User, "hi", 1)]));
        assert!(list.open().unwrap().messages.is_empty());
    }

    #[test]
    fn feed_message_survives_an_older_fetch() {
        let mut list = seeded();
        list.open_conversation("a");
        list.apply_message_insert(msg("m1", "a", SenderRole::User, "just now", 40));

        assert!(list.set_open_messages("a", Vec::new()));
        assert_eq!(list.open().unwrap().messages.len(), 1);

        list.set_open_messages("a", vec![
            msg("m1", "a", SenderRole::User, "just now", 40),
            msg("m0", "a", SenderRole::User, "earlier", 1),
        ]);
        let ids: Vec<&str> = list.open().unwrap().messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1"]);
    }

    #[test]
    fn fetched_copy_replaces_pending_reply() {
        let mut list = seeded();
        list.open_conversation("a");
        let mut pending = msg("local-1", "a", SenderRole::Agent, "on it", 100);
        pending.delivery = DeliveryState::Pending;
        list.add_pending_message(pending);

        list.set_open_messages("a", vec![msg("srv-1", "a", SenderRole::Agent, "on it", 101)]);
        let open = list.open().unwrap();
        assert_eq!(open.messages.len(), 1);
        assert_eq!(open.messages[0].id, "srv-1");
    }

    #[test]
    fn untimed_message_applied_twice_is_unchanged() {
        let mut list = seeded();
        let mut event = msg("m1", "c", SenderRole::User, "no clock", 0);
        event.created_at = None;
        assert_eq!(list.apply_message_insert(event.clone()), MergeOutcome::Reordered);
        let entries_once = list.entries().to_vec();

        assert_eq!(list.apply_message_insert(event), MergeOutcome::Unchanged);
        assert_eq!(list.entries(), entries_once.as_slice());
    }

    #[test]
    fn snapshot_keeps_changes_made_while_it_was_in_flight() {
        let mut list = seeded();
        let since = list.revision();
        list.apply_message_insert(msg("m1", "b", SenderRole::User, "latest", 500));
        list.apply_message_insert(msg("m2", "x", SenderRole::User, "new here", 400));
        list.apply_conversation_update(conv("d", ConversationStatus::PendingHuman, 300));
        list.apply_conversation_delete("c");

        let mut old_b = conv("b", ConversationStatus::AiActive, 20);
        old_b.last_message_content = Some("stale".into());
        list.replace_since(
            vec![
                conv("a", ConversationStatus::AiActive, 30),
                old_b,
                conv("c", ConversationStatus::AiActive, 10)
            ],
            since
        );

        assert_eq!(list.len(), 4);
        assert!(list.get("c").is_none());
        assert_eq!(list.get("b").unwrap().conversation.last_message_content.as_deref(), Some("latest"));
        assert_eq!(list.get("x").unwrap().state, EntryState::Placeholder);
        assert_eq!(list.get("d").unwrap().state, EntryState::Confirmed);
    }

    #[test]
    fn snapshot_drops_rows_it_no_longer_has() {
        let mut list = seeded();
        list.apply_message_insert(msg("m1", "x", SenderRole::User, "first", 5));
        list.mark_stale("x");

        list.replace_all(vec![conv("a", ConversationStatus::AiActive, 30)]);
        assert_eq!(ids(&list), vec!["a"]);
    }

    #[test]
    fn stale_only_applies_to_placeholders() {
        let mut list = seeded();
        assert!(!list.mark_stale("a"));
        list.apply_message_insert(msg("m1", "x", SenderRole::User, "first", 5));
        assert!(list.mark_stale("x"));
        assert_eq!(list.get("x").unwrap().state, EntryState::Stale);
    }
}
