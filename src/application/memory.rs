use crate::types::{ChatMessage, MemoryMessage, MessageRole};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Bounded, ordered log of conversation turns. Oldest messages are evicted
/// first once the capacity is exceeded; a capacity of zero disables memory
/// rather than erroring.
#[derive(Debug)]
pub struct ConversationMemory {
    capacity: usize,
    messages: Vec<MemoryMessage>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Vec::new(),
        }
    }

    pub fn add(&mut self, role: MessageRole, content: impl Into<String>) {
        let content = content.into();
        if content.is_empty() {
            return;
        }
        self.messages.push(MemoryMessage::new(role, content));
        self.trim();
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add(MessageRole::User, content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add(MessageRole::Assistant, content);
    }

    /// Tool invocations are folded into the transcript as assistant turns so
    /// the model sees its own tool history as ordinary context.
    pub fn add_tool_call(&mut self, tool: &str, arguments: &Value) {
        self.add(
            MessageRole::Assistant,
            format!("Tool call: {tool} | arguments: {arguments}"),
        );
    }

    pub fn add_tool_result(&mut self, tool: &str, result: &str) {
        self.add(
            MessageRole::Assistant,
            format!("Tool result: {tool} | {result}"),
        );
    }

    pub fn get_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|message| ChatMessage::new(message.role, message.content.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn trim(&mut self) {
        if self.capacity == 0 {
            self.messages.clear();
            return;
        }
        let overflow = self.messages.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.messages.drain(..overflow);
        }
    }
}

/// Per-session memories plus one shared default instance for callers that do
/// not supply a session id. Callers needing isolation must pass distinct ids.
pub struct SessionStore {
    capacity: usize,
    default: Arc<Mutex<ConversationMemory>>,
    sessions: Mutex<HashMap<String, Arc<Mutex<ConversationMemory>>>>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            default: Arc::new(Mutex::new(ConversationMemory::new(capacity))),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn memory(&self, session_id: Option<&str>) -> Arc<Mutex<ConversationMemory>> {
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return Arc::clone(&self.default);
        };
        let mut sessions = self.sessions.lock().await;
        let memory = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "Creating conversation memory for new session");
            Arc::new(Mutex::new(ConversationMemory::new(self.capacity)))
        });
        Arc::clone(memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_never_exceeded() {
        let mut memory = ConversationMemory::new(3);
        for index in 0..10 {
            memory.add_user(format!("message {index}"));
            assert!(memory.get_messages().len() <= 3);
        }
        let messages = memory.get_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "message 7");
        assert_eq!(messages[2].content, "message 9");
    }

    #[test]
    fn zero_capacity_disables_memory() {
        let mut memory = ConversationMemory::new(0);
        memory.add_user("hello");
        memory.add_assistant("world");
        assert!(memory.get_messages().is_empty());
    }

    #[test]
    fn empty_content_is_ignored() {
        let mut memory = ConversationMemory::new(5);
        memory.add_user("");
        memory.add_assistant(String::new());
        assert!(memory.get_messages().is_empty());
    }

    #[test]
    fn tool_records_use_fixed_templates() {
        let mut memory = ConversationMemory::new(5);
        memory.add_tool_call("codex_edit", &serde_json::json!({"repo_path": "."}));
        memory.add_tool_result("codex_edit", "done");

        let messages = memory.get_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(
            messages[0].content,
            r#"Tool call: codex_edit | arguments: {"repo_path":"."}"#
        );
        assert_eq!(messages[1].content, "Tool result: codex_edit | done");
    }

    #[test]
    fn clear_empties_the_log() {
        let mut memory = ConversationMemory::new(5);
        memory.add_user("hello");
        memory.clear();
        assert!(memory.get_messages().is_empty());
    }

    #[tokio::test]
    async fn store_returns_same_instance_per_session() {
        let store = SessionStore::new(5);
        let first = store.memory(Some("alpha")).await;
        let second = store.memory(Some("alpha")).await;
        let other = store.memory(Some("beta")).await;

        first.lock().await.add_user("hi");
        assert_eq!(second.lock().await.get_messages().len(), 1);
        assert!(other.lock().await.get_messages().is_empty());
    }

    #[tokio::test]
    async fn missing_session_id_shares_the_default_memory() {
        let store = SessionStore::new(5);
        let first = store.memory(None).await;
        let second = store.memory(Some("")).await;

        first.lock().await.add_user("hi");
        assert_eq!(second.lock().await.get_messages().len(), 1);
    }
}
