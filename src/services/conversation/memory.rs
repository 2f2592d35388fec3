use crate::database::StoredMessage;
use crate::models::chat::Role;

/// One completed exchange: what the user said and what the assistant replied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTurn {
    pub input: String,
    pub output: String,
}

/// In-process conversational memory for one live connection.
///
/// Always a pure, re-derivable view of the durable message log: rebuilt at
/// connection start, appended per completed turn, dropped on disconnect.
/// Never persisted itself.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<MemoryTurn>,
}

impl ConversationMemory {
    /// Rebuild memory from a timestamp-ordered message log.
    ///
    /// Single pass with a pending-user slot: a user message overwrites the
    /// slot (last writer wins for consecutive user turns), an assistant
    /// message pairs with the slot or is ignored as an orphan. A trailing
    /// unpaired user message is not included.
    pub fn reconstruct(messages: &[StoredMessage]) -> Self {
        let mut turns = Vec::new();
        let mut pending_input: Option<String> = None;

        for message in messages {
            match Role::parse(&message.role) {
                Some(Role::User) => {
                    pending_input = Some(message.content.clone());
                }
                Some(Role::Assistant) => {
                    if let Some(input) = pending_input.take() {
                        turns.push(MemoryTurn {
                            input,
                            output: message.content.clone(),
                        });
                    }
                }
                None => {}
            }
        }

        Self { turns }
    }

    pub fn push_turn(&mut self, input: String, output: String) {
        self.turns.push(MemoryTurn { input, output });
    }

    pub fn turns(&self) -> &[MemoryTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn message(id: i64, role: &str, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            session_id: 1,
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
                + Duration::seconds(id),
        }
    }

    #[test]
    fn pairs_user_with_following_assistant() {
        let log = vec![
            message(1, "user", "hi"),
            message(2, "assistant", "hello"),
            message(3, "user", "how are you?"),
            message(4, "assistant", "fine"),
        ];
        let memory = ConversationMemory::reconstruct(&log);
        assert_eq!(
            memory.turns(),
            &[
                MemoryTurn {
                    input: "hi".to_string(),
                    output: "hello".to_string()
                },
                MemoryTurn {
                    input: "how are you?".to_string(),
                    output: "fine".to_string()
                },
            ]
        );
    }

    #[test]
    fn trailing_user_message_is_held_out() {
        // [user:"hi", assistant:"hello", user:"bye"] yields exactly one pair.
        let log = vec![
            message(1, "user", "hi"),
            message(2, "assistant", "hello"),
            message(3, "user", "bye"),
        ];
        let memory = ConversationMemory::reconstruct(&log);
        assert_eq!(memory.turns().len(), 1);
        assert_eq!(memory.turns()[0].input, "hi");
        assert_eq!(memory.turns()[0].output, "hello");
    }

    #[test]
    fn orphan_assistant_message_is_ignored() {
        let log = vec![
            message(1, "assistant", "stray"),
            message(2, "user", "hi"),
            message(3, "assistant", "hello"),
        ];
        let memory = ConversationMemory::reconstruct(&log);
        assert_eq!(memory.turns().len(), 1);
        assert_eq!(memory.turns()[0].input, "hi");
    }

    #[test]
    fn consecutive_user_messages_keep_the_last() {
        let log = vec![
            message(1, "user", "first"),
            message(2, "user", "second"),
            message(3, "assistant", "reply"),
        ];
        let memory = ConversationMemory::reconstruct(&log);
        assert_eq!(memory.turns().len(), 1);
        assert_eq!(memory.turns()[0].input, "second");
    }

    #[test]
    fn reconstruct_is_deterministic_and_idempotent() {
        let log = vec![
            message(1, "user", "a"),
            message(2, "assistant", "b"),
            message(3, "user", "c"),
            message(4, "assistant", "d"),
            message(5, "user", "dangling"),
        ];
        let first = ConversationMemory::reconstruct(&log);
        let second = ConversationMemory::reconstruct(&log);
        assert_eq!(first.turns(), second.turns());
    }

    #[test]
    fn empty_log_yields_empty_memory() {
        let memory = ConversationMemory::reconstruct(&[]);
        assert!(memory.is_empty());
    }
}
