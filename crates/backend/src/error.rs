use agentdesk_protocol::BackendError;
use agentdesk_remote::RemoteError;
use agentdesk_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("{entity} '{id}' does not exist"))]
    Missing {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("invalid request: {details}"))]
    Invalid {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to encode tool calls on `{stage}`: {source}"))]
    EncodeToolCalls {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to open agent stream on `{stage}`: {source}"))]
    OpenStream {
        stage: &'static str,
        source: RemoteError,
    },
    #[snafu(display("{message}"))]
    AgentStream {
        stage: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Missing { stage, .. }
            | Self::Invalid { stage, .. }
            | Self::Store { stage, .. }
            | Self::EncodeToolCalls { stage, .. }
            | Self::OpenStream { stage, .. }
            | Self::AgentStream { stage, .. } => stage,
        }
    }
}

impl From<ServiceError> for BackendError {
    fn from(error: ServiceError) -> Self {
        let stage = error.stage();
        match error {
            ServiceError::Missing { entity, id, .. } => BackendError::NotFound { stage, entity, id },
            ServiceError::Store {
                source: StorageError::NotFound { entity, id, .. },
                ..
            } => BackendError::NotFound { stage, entity, id },
            ServiceError::Invalid { details, .. } => BackendError::InvalidRequest { stage, details },
            error @ (ServiceError::Store { .. } | ServiceError::EncodeToolCalls { .. }) => {
                BackendError::Storage {
                    stage,
                    message: error.to_string(),
                }
            }
            error @ (ServiceError::OpenStream { .. } | ServiceError::AgentStream { .. }) => {
                BackendError::Remote {
                    stage,
                    message: error.to_string(),
                }
            }
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_keeps_its_kind_across_the_boundary() {
        let error = ServiceError::Store {
            stage: "conversation-delete",
            source: StorageError::NotFound {
                stage: "conversation-delete-missing",
                entity: "conversation",
                id: "c-1".to_string(),
            },
        };

        assert_eq!(
            BackendError::from(error),
            BackendError::NotFound {
                stage: "conversation-delete",
                entity: "conversation",
                id: "c-1".to_string(),
            }
        );
    }

    #[test]
    fn stream_failures_map_to_remote_errors() {
        let error = ServiceError::AgentStream {
            stage: "send-stream",
            message: "API request failed: 500".to_string(),
        };

        assert!(matches!(
            BackendError::from(error),
            BackendError::Remote { message, .. } if message == "API request failed: 500"
        ));
    }
}
