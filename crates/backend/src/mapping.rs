use agentdesk_protocol::{Agent, Conversation, Message, MessageKey, NewAgent, Role, ToolCall};
use agentdesk_storage::{
    AgentRecord, ConversationRecord, MessageRecord, MessageRole, NewAgentRecord,
};
use snafu::ResultExt;

use super::error::{EncodeToolCallsSnafu, ServiceResult};

pub(crate) fn agent_from_record(record: AgentRecord) -> Agent {
    Agent {
        id: record.id,
        name: record.name,
        api_url: record.api_url,
        auth_token: record.auth_token,
        project_id: record.project_id,
        created_at: record.created_at_unix_seconds,
    }
}

pub(crate) fn agent_to_record(agent: Agent) -> AgentRecord {
    AgentRecord {
        id: agent.id,
        name: agent.name,
        api_url: agent.api_url,
        auth_token: agent.auth_token,
        project_id: agent.project_id,
        created_at_unix_seconds: agent.created_at,
    }
}

pub(crate) fn new_agent_record(input: NewAgent) -> NewAgentRecord {
    NewAgentRecord {
        name: input.name,
        api_url: input.api_url,
        auth_token: input.auth_token,
        project_id: input.project_id,
    }
}

pub(crate) fn conversation_from_record(record: ConversationRecord) -> Conversation {
    Conversation {
        id: record.id,
        agent_id: record.agent_id,
        title: record.title,
        created_at: record.created_at_unix_seconds,
    }
}

pub(crate) fn message_from_record(record: MessageRecord) -> Message {
    let tool_calls = record
        .tool_calls_json
        .as_deref()
        .map(|raw| decode_tool_calls(record.id.to_string().as_str(), raw))
        .unwrap_or_default();

    Message {
        id: MessageKey::Stored(record.id),
        conversation_id: record.conversation_id,
        role: role_from_storage(record.role),
        content: record.content,
        tool_calls,
        created_at: record.created_at_unix_seconds,
    }
}

pub(crate) fn role_to_storage(role: Role) -> MessageRole {
    match role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    }
}

fn role_from_storage(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

pub(crate) fn encode_tool_calls(tool_calls: &[ToolCall]) -> ServiceResult<Option<String>> {
    if tool_calls.is_empty() {
        return Ok(None);
    }

    serde_json::to_string(tool_calls)
        .map(Some)
        .context(EncodeToolCallsSnafu {
            stage: "encode-tool-calls",
        })
}

// A corrupt payload must not hide the message itself.
fn decode_tool_calls(message_id: &str, raw: &str) -> Vec<ToolCall> {
    match serde_json::from_str::<Vec<ToolCall>>(raw) {
        Ok(tool_calls) => tool_calls,
        Err(error) => {
            tracing::warn!(
                message_id,
                error = %error,
                "dropping undecodable stored tool calls"
            );
            Vec::new()
        }
    }
}
