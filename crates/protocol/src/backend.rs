use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

use super::event::Subscription;
use super::ids::{AgentId, ConversationId};
use super::model::{Agent, Conversation, Message, NewAgent, Role};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported across the client/backend boundary.
///
/// Causes are flattened to messages here because the boundary is a transport
/// contract; the backend logs the full source chain before converting.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("{entity} '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("invalid request on `{stage}`: {details}"))]
    InvalidRequest {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("storage failed on `{stage}`: {message}"))]
    Storage {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("remote agent failed on `{stage}`: {message}"))]
    Remote {
        stage: &'static str,
        message: String,
    },
}

/// Payload of the long-running send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub agent_id: AgentId,
    pub conversation_id: ConversationId,
    pub message: String,
}

impl SendRequest {
    pub fn new(
        agent_id: AgentId,
        conversation_id: ConversationId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            conversation_id,
            message: message.into(),
        }
    }
}

/// Persistence and messaging service consumed by the client core.
pub trait Backend: Send + Sync {
    fn list_agents(&self) -> BoxFuture<'_, BackendResult<Vec<Agent>>>;
    fn get_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<Option<Agent>>>;
    fn create_agent(&self, input: NewAgent) -> BoxFuture<'_, BackendResult<Agent>>;
    fn update_agent(&self, agent: Agent) -> BoxFuture<'_, BackendResult<()>>;
    fn delete_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<()>>;

    fn list_conversations(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, BackendResult<Vec<Conversation>>>;
    fn create_conversation(
        &self,
        agent_id: AgentId,
        title: Option<String>,
    ) -> BoxFuture<'_, BackendResult<Conversation>>;
    fn update_conversation(&self, conversation: Conversation)
    -> BoxFuture<'_, BackendResult<()>>;
    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<()>>;

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<Vec<Message>>>;
    fn append_message(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: String,
    ) -> BoxFuture<'_, BackendResult<Message>>;

    /// Runs one exchange against the agent. Progress arrives on the event
    /// channel; completion of this future is the only reconciliation trigger.
    fn send_message(&self, request: SendRequest) -> BoxFuture<'_, BackendResult<String>>;

    /// Opens a listener for progress events of one conversation.
    fn subscribe(&self, conversation_id: ConversationId) -> Subscription;
}
