//! Data model and contracts shared by the agentdesk backend and client core.

pub mod backend;
pub mod event;
pub mod ids;
pub mod model;

pub use backend::{
    Backend, BackendError, BackendResult, BoxFuture, InvalidRequestSnafu, NotFoundSnafu,
    RemoteSnafu, SendRequest, StorageSnafu,
};
pub use event::{
    CHAT_STREAM_CHANNEL, ChannelEvent, EventChannel, StreamEvent, StreamEventKind, Subscription,
};
pub use ids::{
    AgentId, ConversationId, IdError, LOCAL_KEY_PREFIX, LocalMessageId, MessageId, MessageKey,
};
pub use model::{
    Agent, Conversation, Message, NewAgent, Role, ToolCall, ToolCallStatus,
    UNTITLED_CONVERSATION_TITLE, unix_timestamp_seconds,
};
