use agentdesk_protocol::{AgentId, ConversationId, MessageId};

/// Storage-local message role, intentionally decoupled from the wire role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub api_url: String,
    pub auth_token: String,
    pub project_id: String,
    pub created_at_unix_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgentRecord {
    pub name: String,
    pub api_url: String,
    pub auth_token: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub title: Option<String>,
    pub created_at_unix_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub agent_id: AgentId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    // Tool calls are opaque to storage; callers own the JSON encoding.
    pub tool_calls_json: Option<String>,
    pub created_at_unix_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub tool_calls_json: Option<String>,
}

impl NewMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls_json: None,
        }
    }
}
