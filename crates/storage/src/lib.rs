pub mod error;
pub mod sqlite;
pub mod types;

use agentdesk_protocol::{AgentId, BoxFuture, ConversationId};

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStorage;
pub use types::{
    AgentRecord, ConversationRecord, MessageRecord, MessageRole, NewAgentRecord, NewConversation,
    NewMessage,
};

pub trait AgentStore: Send + Sync {
    fn create_agent(&self, input: NewAgentRecord) -> BoxFuture<'_, StorageResult<AgentRecord>>;
    fn list_agents(&self) -> BoxFuture<'_, StorageResult<Vec<AgentRecord>>>;
    fn get_agent(&self, agent_id: AgentId) -> BoxFuture<'_, StorageResult<Option<AgentRecord>>>;
    fn update_agent(&self, agent: AgentRecord) -> BoxFuture<'_, StorageResult<AgentRecord>>;
    /// Deletes the agent together with its conversations and messages.
    fn delete_agent(&self, agent_id: AgentId) -> BoxFuture<'_, StorageResult<()>>;
}

pub trait ConversationStore: Send + Sync {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>>;
    /// Lists an agent's conversations, newest first.
    fn list_conversations(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>>;
    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Option<ConversationRecord>>>;
    fn set_conversation_title(
        &self,
        conversation_id: ConversationId,
        title: Option<String>,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>>;
    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<()>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>>;
    /// Lists a conversation's messages in insertion order.
    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;
}

pub trait Storage: AgentStore + ConversationStore + MessageStore {}

impl<T> Storage for T where T: AgentStore + ConversationStore + MessageStore {}
