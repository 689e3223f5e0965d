use agentdesk_protocol::{BackendError, ConversationId};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("sending to conversation {conversation_id} failed: {source}"))]
    SendFailed {
        stage: &'static str,
        conversation_id: ConversationId,
        source: BackendError,
    },
    #[snafu(display("agent setting '{field}' must not be empty"))]
    IncompleteAgent {
        stage: &'static str,
        field: &'static str,
    },
    #[snafu(display("conversation title must not be empty"))]
    EmptyTitle { stage: &'static str },
    #[snafu(display("no agent is selected"))]
    NoAgentSelected { stage: &'static str },
}

impl ClientError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Backend { stage, .. }
            | Self::SendFailed { stage, .. }
            | Self::IncompleteAgent { stage, .. }
            | Self::EmptyTitle { stage }
            | Self::NoAgentSelected { stage } => stage,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
