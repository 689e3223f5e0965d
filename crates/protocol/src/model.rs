use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::{AgentId, ConversationId, MessageKey};

/// Title shown for conversations whose title is still unset.
pub const UNTITLED_CONVERSATION_TITLE: &str = "Untitled Conversation";

/// A configured remote conversational endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub api_url: String,
    pub auth_token: String,
    pub project_id: String,
    pub created_at: i64,
}

/// Input for creating an agent. The id and timestamp are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub api_url: String,
    pub auth_token: String,
    pub project_id: String,
}

impl NewAgent {
    pub fn new(
        name: impl Into<String>,
        api_url: impl Into<String>,
        auth_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            api_url: api_url.into().trim().to_string(),
            auth_token: auth_token.into().trim().to_string(),
            project_id: project_id.into().trim().to_string(),
        }
    }

    /// Boundary check for user-entered agent settings.
    ///
    /// Returns the name of the first missing field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("name");
        }
        if self.api_url.is_empty() {
            return Err("api_url");
        }
        if self.auth_token.is_empty() {
            return Err("auth_token");
        }
        if self.project_id.is_empty() {
            return Err("project_id");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub title: Option<String>,
    pub created_at: i64,
}

impl Conversation {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(UNTITLED_CONVERSATION_TITLE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Success,
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Moves to `next` unless that would take a finished call back to `Running`.
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() && !next.is_terminal() {
            self
        } else {
            next
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub tool_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    pub status: ToolCallStatus,
}

impl ToolCall {
    pub fn running(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            tool_input: tool_input.into(),
            tool_output: None,
            status: ToolCallStatus::Running,
        }
    }

    /// Applies a newer snapshot of the same call without regressing its status.
    pub fn merge(&mut self, newer: ToolCall) {
        let status = self.status.advance(newer.status);
        let keep_output = status == self.status && newer.tool_output.is_none();
        self.tool_name = newer.tool_name;
        self.tool_input = newer.tool_input;
        if !keep_output {
            self.tool_output = newer.tool_output;
        }
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageKey,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: i64,
}

impl Message {
    /// Optimistic user message shown before the backend confirms it.
    pub fn user_placeholder(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageKey::new_local(),
            conversation_id,
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            created_at: unix_timestamp_seconds(),
        }
    }

    /// Empty assistant message that streamed content is written into.
    pub fn assistant_placeholder(conversation_id: ConversationId) -> Self {
        Self {
            id: MessageKey::new_local(),
            conversation_id,
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Vec::new(),
            created_at: unix_timestamp_seconds(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder()
    }
}

pub fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}
