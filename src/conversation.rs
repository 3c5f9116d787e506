//! The ordered message history of a chat.
//!
//! A conversation holds at most one system message and, when present, it is
//! always the first message.  Every mutation writes the full history through
//! the [`PersistenceGateway`].

use crate::persistence::{PersistenceGateway, StateKey};
use crate::types::{Message, Role};

/// Owns the conversation and keeps durable storage in step with it.
#[derive(Debug)]
pub struct ConversationStore {
    messages: Vec<Message>,
    gateway: PersistenceGateway,
}

impl ConversationStore {
    /// Creates a store seeded from `system_prompt` and persists it.
    pub fn new(gateway: PersistenceGateway, system_prompt: &str) -> Self {
        let mut store = Self {
            messages: Vec::new(),
            gateway,
        };
        store.reset(system_prompt);
        store
    }

    /// Restores the persisted conversation, or seeds a fresh one when nothing
    /// usable was stored.
    pub fn restore(gateway: PersistenceGateway, system_prompt: &str) -> Self {
        let stored: Vec<Message> = gateway.load_json(StateKey::Conversation, Vec::new());
        let messages = normalize(stored);
        if messages.is_empty() {
            return Self::new(gateway, system_prompt);
        }
        tracing::debug!(messages = messages.len(), "restored conversation");
        Self { messages, gateway }
    }

    /// Replaces the conversation with `[]` or `[system_prompt]`.
    pub fn reset(&mut self, system_prompt: &str) {
        self.messages.clear();
        if !system_prompt.trim().is_empty() {
            self.messages.push(Message::system(system_prompt));
        }
        self.persist();
    }

    /// Appends a user or assistant message.
    ///
    /// System messages only enter through [`reset`](Self::reset); a system
    /// role passed here is recorded as a user message so the leading-system
    /// invariant holds.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        let role = match role {
            Role::System => {
                tracing::warn!("system message appended mid-conversation; storing as user");
                Role::User
            }
            other => other,
        };
        self.messages.push(Message::new(role, content));
        self.persist();
    }

    /// Whether the conversation holds anything beyond the system prompt.
    pub fn has_started(&self) -> bool {
        match self.messages.as_slice() {
            [] => false,
            [only] => only.role != Role::System,
            _ => true,
        }
    }

    /// A copy of the conversation for transmission.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Borrow the messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages, including the system prompt.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true when the conversation holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The system prompt in effect, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }

    fn persist(&self) {
        self.gateway.save_json(StateKey::Conversation, &self.messages);
    }
}

/// Drops system messages that are not in the leading position.
fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let before = messages.len();
    let normalized: Vec<Message> = messages
        .into_iter()
        .enumerate()
        .filter(|(index, message)| *index == 0 || message.role != Role::System)
        .map(|(_, message)| message)
        .collect();
    if normalized.len() != before {
        tracing::warn!(
            dropped = before - normalized.len(),
            "dropped misplaced system messages from stored conversation"
        );
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::persistence::{KeyValueStore, MemoryStore};

    fn stored(gateway: &PersistenceGateway) -> Vec<Message> {
        gateway.load_json(StateKey::Conversation, Vec::new())
    }

    fn assert_leading_system(messages: &[Message]) {
        let systems: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, message)| message.role == Role::System)
            .map(|(index, _)| index)
            .collect();
        assert!(systems.is_empty() || systems == vec![0], "{messages:?}");
    }

    #[test]
    fn reset_without_prompt_is_empty() {
        let store = ConversationStore::new(PersistenceGateway::in_memory(), "");
        assert!(store.is_empty());
        assert!(!store.has_started());
        assert_eq!(store.system_prompt(), None);
    }

    #[test]
    fn reset_with_prompt_seeds_system_message() {
        let gateway = PersistenceGateway::in_memory();
        let mut store = ConversationStore::new(gateway.clone(), "Be brief.");
        assert_eq!(store.snapshot(), vec![Message::system("Be brief.")]);
        assert!(!store.has_started());

        store.append(Role::User, "hi");
        store.reset("Be verbose.");
        assert_eq!(store.snapshot(), vec![Message::system("Be verbose.")]);
        assert_eq!(stored(&gateway), store.snapshot());
    }

    #[test]
    fn has_started_shapes() {
        let gateway = PersistenceGateway::in_memory();

        let mut store = ConversationStore::new(gateway.clone(), "");
        store.append(Role::User, "hi");
        assert!(store.has_started());

        let mut store = ConversationStore::new(gateway.clone(), "");
        store.append(Role::Assistant, "hello");
        assert!(store.has_started());

        let mut store = ConversationStore::new(gateway, "sys");
        assert!(!store.has_started());
        store.append(Role::User, "hi");
        assert!(store.has_started());
    }

    #[test]
    fn every_mutation_persists_full_snapshot() {
        let gateway = PersistenceGateway::in_memory();
        let mut store = ConversationStore::new(gateway.clone(), "sys");
        assert_eq!(stored(&gateway), vec![Message::system("sys")]);

        store.append(Role::User, "hi");
        assert_eq!(stored(&gateway), store.snapshot());

        store.append(Role::Assistant, "");
        assert_eq!(
            stored(&gateway),
            vec![
                Message::system("sys"),
                Message::user("hi"),
                Message::assistant("")
            ]
        );
    }

    #[test]
    fn system_role_never_lands_mid_conversation() {
        let mut store = ConversationStore::new(PersistenceGateway::in_memory(), "sys");
        let script = [
            (Role::User, "a"),
            (Role::System, "sneaky"),
            (Role::Assistant, "b"),
            (Role::System, "again"),
        ];
        for (role, content) in script {
            store.append(role, content);
            assert_leading_system(store.messages());
        }
        store.reset("");
        store.append(Role::System, "late");
        assert_leading_system(store.messages());
        store.reset("fresh");
        assert_leading_system(store.messages());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn restore_prefers_persisted_history() {
        let gateway = PersistenceGateway::in_memory();
        {
            let mut store = ConversationStore::new(gateway.clone(), "old prompt");
            store.append(Role::User, "hi");
            store.append(Role::Assistant, "hello");
        }
        let store = ConversationStore::restore(gateway, "new prompt");
        assert_eq!(
            store.snapshot(),
            vec![
                Message::system("old prompt"),
                Message::user("hi"),
                Message::assistant("hello")
            ]
        );
    }

    #[test]
    fn restore_falls_back_to_system_prompt() {
        let store = Arc::new(MemoryStore::new());
        store.set("conversation", "[{\"broken\":").unwrap();
        let gateway = PersistenceGateway::new(store);
        let restored = ConversationStore::restore(gateway.clone(), "sys");
        assert_eq!(restored.snapshot(), vec![Message::system("sys")]);
        assert_eq!(stored(&gateway), vec![Message::system("sys")]);

        let restored = ConversationStore::restore(PersistenceGateway::in_memory(), "");
        assert!(restored.is_empty());
    }

    #[test]
    fn restore_drops_misplaced_system_messages() {
        let gateway = PersistenceGateway::in_memory();
        gateway.save_json(
            StateKey::Conversation,
            &vec![
                Message::user("hi"),
                Message::system("misplaced"),
                Message::assistant("hello"),
            ],
        );
        let store = ConversationStore::restore(gateway, "");
        assert_eq!(
            store.snapshot(),
            vec![Message::user("hi"), Message::assistant("hello")]
        );
    }
}
