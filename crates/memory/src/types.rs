use std::fmt;

use serde::{Deserialize, Serialize};

use memnet_store::Metadata;

/// Role tag on a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
            Self::System => write!(f, "System"),
        }
    }
}

/// A single message of the conversation handed to `add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything `add` needs: the transcript plus the partition the
/// resulting memories belong to. Partition keys never change after the
/// memories are created.
#[derive(Debug, Clone, Default)]
pub struct AddMemoryRequest {
    pub messages: Vec<Message>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: Metadata,
}

impl AddMemoryRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What happened to one extracted statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryEvent {
    Add,
    Update,
}

/// One line of the `add` outcome: the affected memory's final id, final
/// text, and whether it was created or merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEventResult {
    pub id: String,
    pub memory: String,
    pub event: MemoryEvent,
}

/// Outcome of an `add` call, one entry per extracted statement in
/// extractor order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddMemoryResponse {
    pub results: Vec<MemoryEventResult>,
}

/// Search request; `limit` defaults to 100.
#[derive(Debug, Clone)]
pub struct SearchMemoryRequest {
    pub query: String,
    pub user_id: Option<String>,
    pub limit: usize,
}

impl SearchMemoryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: None,
            limit: crate::service::DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_to_lowercase_tags() {
        assert_eq!(serde_json::to_value(MemoryEvent::Add).unwrap(), "add");
        assert_eq!(serde_json::to_value(MemoryEvent::Update).unwrap(), "update");
    }

    #[test]
    fn search_request_defaults_limit_to_100() {
        let request = SearchMemoryRequest::new("query");
        assert_eq!(request.limit, 100);
        assert!(request.user_id.is_none());
    }

    #[test]
    fn roles_render_as_transcript_tags() {
        assert_eq!(MessageRole::User.to_string(), "User");
        assert_eq!(MessageRole::Assistant.to_string(), "Assistant");
    }
}
