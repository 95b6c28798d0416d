use crate::models::chat::{ Conversation, ConversationStatus, SenderRole };
use std::cmp::Ordering;

/// Urgency rank of a conversation, lower is more urgent.
///
/// A human-active conversation whose last message came from the end user is
/// waiting on the agent, so it ranks right after conversations that asked
/// for a human.
pub fn rank(conversation: &Conversation) -> u8 {
    match &conversation.status {
        ConversationStatus::PendingHuman => 1,
        ConversationStatus::HumanActive
            if conversation.last_message_sender == Some(SenderRole::User) => 2,
        ConversationStatus::PendingResponse => 3,
        ConversationStatus::HumanActive => 4,
        ConversationStatus::AiActive => 5,
        ConversationStatus::Closed => 6,
        ConversationStatus::Other(_) => 7,
    }
}

/// Total order: rank first, then most recent activity first. Conversations
/// without any timestamp go after those with one.
pub fn compare(a: &Conversation, b: &Conversation) -> Ordering {
    rank(a)
        .cmp(&rank(b))
        .then_with(|| match (a.recency(), b.recency()) {
            (Some(ta), Some(tb)) => tb.cmp(&ta),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Stable sort, ties keep their input order.
pub fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ TimeZone, Utc };

    fn conv(id: &str, status: ConversationStatus, last: Option<SenderRole>, t: i64) -> Conversation {
        let mut c: Conversation = serde_json::from_value(serde_json::json!({ "id": id })).unwrap();
        c.status = status;
        c.last_message_sender = last;
        c.last_message_at = Some(Utc.timestamp_opt(t, 0).unwrap());
        c
    }

    fn ids(list: &[Conversation]) -> Vec<&str> {
        list.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn pending_human_outranks_every_other_status() {
        let pending = conv("p", ConversationStatus::PendingHuman, None, 0);
        assert_eq!(rank(&pending), 1);

        let others = [
            conv("a", ConversationStatus::HumanActive, Some(SenderRole::User), 0),
            conv("b", ConversationStatus::HumanActive, Some(SenderRole::Agent), 0),
            conv("c", ConversationStatus::PendingResponse, None, 0),
            conv("d", ConversationStatus::AiActive, None, 0),
            conv("e", ConversationStatus::Closed, None, 0),
            conv("f", ConversationStatus::Other("archived".into()), None, 0),
        ];
        for other in &others {
            assert!(rank(&pending) < rank(other), "{} should rank after pending", other.id);
        }
        let ranks: Vec<u8> = others.iter().map(rank).collect();
        assert_eq!(ranks, vec![2, 4, 3, 5, 6, 7]);
    }

    #[test]
    fn sorts_by_rank_regardless_of_input_order() {
        let a = conv("A", ConversationStatus::PendingHuman, None, 10);
        let b = conv("B", ConversationStatus::HumanActive, Some(SenderRole::User), 20);
        let c = conv("C", ConversationStatus::AiActive, None, 30);

        for input in [
            vec![c.clone(), b.clone(), a.clone()],
            vec![b.clone(), a.clone(), c.clone()],
            vec![a.clone(), c.clone(), b.clone()],
        ] {
            let mut list = input;
            sort_conversations(&mut list);
            assert_eq!(ids(&list), vec!["A", "B", "C"]);
        }
    }

    #[test]
    fn newer_activity_wins_within_a_rank() {
        let mut list = vec![
            conv("old", ConversationStatus::AiActive, None, 10),
            conv("new", ConversationStatus::AiActive, None, 50),
        ];
        sort_conversations(&mut list);
        assert_eq!(ids(&list), vec!["new", "old"]);
    }

    #[test]
    fn equal_rank_and_time_keep_input_order() {
        let mut list = vec![
            conv("x", ConversationStatus::Closed, None, 5),
            conv("y", ConversationStatus::Closed, None, 5),
            conv("z", ConversationStatus::Closed, None, 5),
        ];
        sort_conversations(&mut list);
        assert_eq!(ids(&list), vec!["x", "y", "z"]);
    }

    #[test]
    fn falls_back_to_updated_at_and_puts_undated_last() {
        let mut dated = conv("dated", ConversationStatus::AiActive, None, 0);
        dated.last_message_at = None;
        dated.updated_at = Some(Utc.timestamp_opt(100, 0).unwrap());
        let mut undated = conv("undated", ConversationStatus::AiActive, None, 0);
        undated.last_message_at = None;

        let mut list = vec![undated, dated];
        sort_conversations(&mut list);
        assert_eq!(ids(&list), vec!["dated", "undated"]);
    }
}
