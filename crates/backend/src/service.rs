use std::sync::Arc;

use agentdesk_protocol::{
    Agent, AgentId, Backend, BackendError, BackendResult, BoxFuture, Conversation,
    ConversationId, EventChannel, Message, NewAgent, Role, SendRequest, StreamEvent,
    Subscription,
};
use agentdesk_remote::{AgentClient, AgentEndpoint, QueryRequest, RemoteStreamHandle};
use agentdesk_storage::{MessageRole, NewConversation, NewMessage, Storage};
use snafu::{OptionExt, ResultExt, ensure};

use super::error::{
    AgentStreamSnafu, InvalidSnafu, MissingSnafu, ServiceError, ServiceResult, StoreSnafu,
};
use super::exchange::{ExchangeAccumulator, ExchangeStep, resolve_title};
use super::mapping::{
    agent_from_record, agent_to_record, conversation_from_record, encode_tool_calls,
    message_from_record, new_agent_record, role_to_storage,
};

/// [`Backend`] over local storage and a remote agent client.
pub struct AgentService {
    storage: Arc<dyn Storage>,
    agent_client: Arc<dyn AgentClient>,
    events: Arc<EventChannel>,
}

impl AgentService {
    pub fn new(storage: Arc<dyn Storage>, agent_client: Arc<dyn AgentClient>) -> Self {
        Self::with_event_channel(storage, agent_client, Arc::new(EventChannel::default()))
    }

    pub fn with_event_channel(
        storage: Arc<dyn Storage>,
        agent_client: Arc<dyn AgentClient>,
        events: Arc<EventChannel>,
    ) -> Self {
        Self {
            storage,
            agent_client,
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    fn publish(&self, conversation_id: ConversationId, event: StreamEvent) {
        self.events.publish(conversation_id, event);
    }

    async fn require_agent(&self, agent_id: AgentId, stage: &'static str) -> ServiceResult<Agent> {
        let record = self
            .storage
            .get_agent(agent_id)
            .await
            .context(StoreSnafu { stage })?
            .context(MissingSnafu {
                stage,
                entity: "agent",
                id: agent_id.to_string(),
            })?;
        Ok(agent_from_record(record))
    }

    async fn require_conversation(
        &self,
        conversation_id: ConversationId,
        stage: &'static str,
    ) -> ServiceResult<Conversation> {
        let record = self
            .storage
            .get_conversation(conversation_id)
            .await
            .context(StoreSnafu { stage })?
            .context(MissingSnafu {
                stage,
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
        Ok(conversation_from_record(record))
    }

    async fn run_send(&self, request: SendRequest) -> ServiceResult<String> {
        let message = request.message.trim().to_string();
        ensure!(
            !message.is_empty(),
            InvalidSnafu {
                stage: "send-validate",
                details: "message is empty".to_string(),
            }
        );

        let agent = self.require_agent(request.agent_id, "send-load-agent").await?;
        let conversation = self
            .require_conversation(request.conversation_id, "send-load-conversation")
            .await?;
        ensure!(
            conversation.agent_id == agent.id,
            InvalidSnafu {
                stage: "send-validate-owner",
                details: format!(
                    "conversation '{}' does not belong to agent '{}'",
                    conversation.id, agent.id
                ),
            }
        );

        self.storage
            .append_message(
                conversation.id,
                NewMessage::text(MessageRole::User, message.clone()),
            )
            .await
            .context(StoreSnafu {
                stage: "send-persist-user",
            })?;

        let query = QueryRequest::new(
            AgentEndpoint::new(agent.api_url, agent.auth_token, agent.project_id),
            message.clone(),
        );
        let exchange = self.stream_exchange(conversation.id, query).await?;
        let (full_response, remote_title, tool_calls) = exchange.into_parts();

        self.storage
            .append_message(
                conversation.id,
                NewMessage {
                    role: MessageRole::Assistant,
                    content: full_response.clone(),
                    tool_calls_json: encode_tool_calls(&tool_calls)?,
                },
            )
            .await
            .context(StoreSnafu {
                stage: "send-persist-assistant",
            })?;

        if let Some(title) = resolve_title(
            remote_title.as_deref(),
            conversation.title.as_deref(),
            &message,
        ) {
            self.storage
                .set_conversation_title(conversation.id, Some(title))
                .await
                .context(StoreSnafu {
                    stage: "send-persist-title",
                })?;
        }

        tracing::info!(
            conversation_id = %conversation.id,
            response_len = full_response.len(),
            tool_call_count = tool_calls.len(),
            "exchange completed"
        );
        Ok(full_response)
    }

    /// Drives the remote stream to its end, publishing progress as it goes.
    ///
    /// Every failure publishes an `error` event before it is returned.
    async fn stream_exchange(
        &self,
        conversation_id: ConversationId,
        query: QueryRequest,
    ) -> ServiceResult<ExchangeAccumulator> {
        let RemoteStreamHandle { mut stream, worker } =
            match self.agent_client.stream_query(query) {
                Ok(handle) => handle,
                Err(source) => {
                    self.publish(conversation_id, StreamEvent::error(source.to_string()));
                    return Err(ServiceError::OpenStream {
                        stage: "send-open-stream",
                        source,
                    });
                }
            };
        let worker = tokio::spawn(worker);

        let mut exchange = ExchangeAccumulator::new();
        let outcome = loop {
            let Some(event) = stream.recv().await else {
                break Err("agent stream ended before a terminal event".to_string());
            };

            match exchange.apply(event) {
                ExchangeStep::Publish(events) => {
                    for event in events {
                        self.publish(conversation_id, event);
                    }
                }
                ExchangeStep::Finished => break Ok(()),
                ExchangeStep::Failed(message) => break Err(message),
            }
        };

        drop(stream);
        if let Err(error) = worker.await {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %error,
                "agent stream worker did not finish cleanly"
            );
        }

        match outcome {
            Ok(()) => {
                self.publish(conversation_id, exchange.done_event());
                Ok(exchange)
            }
            Err(message) => {
                self.publish(conversation_id, StreamEvent::error(message.clone()));
                AgentStreamSnafu {
                    stage: "send-stream",
                    message,
                }
                .fail()
            }
        }
    }
}

fn report(operation: &'static str, error: ServiceError) -> BackendError {
    tracing::warn!(operation, stage = error.stage(), error = %error, "backend operation failed");
    error.into()
}

impl Backend for AgentService {
    fn list_agents(&self) -> BoxFuture<'_, BackendResult<Vec<Agent>>> {
        Box::pin(async move {
            let records = self
                .storage
                .list_agents()
                .await
                .context(StoreSnafu {
                    stage: "list-agents",
                })
                .map_err(|error| report("list_agents", error))?;
            Ok(records.into_iter().map(agent_from_record).collect())
        })
    }

    fn get_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<Option<Agent>>> {
        Box::pin(async move {
            let record = self
                .storage
                .get_agent(agent_id)
                .await
                .context(StoreSnafu { stage: "get-agent" })
                .map_err(|error| report("get_agent", error))?;
            Ok(record.map(agent_from_record))
        })
    }

    fn create_agent(&self, input: NewAgent) -> BoxFuture<'_, BackendResult<Agent>> {
        Box::pin(async move {
            let record = self
                .storage
                .create_agent(new_agent_record(input))
                .await
                .context(StoreSnafu {
                    stage: "create-agent",
                })
                .map_err(|error| report("create_agent", error))?;
            tracing::info!(agent_id = %record.id, "agent created");
            Ok(agent_from_record(record))
        })
    }

    fn update_agent(&self, agent: Agent) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.storage
                .update_agent(agent_to_record(agent))
                .await
                .context(StoreSnafu {
                    stage: "update-agent",
                })
                .map_err(|error| report("update_agent", error))?;
            Ok(())
        })
    }

    fn delete_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.storage
                .delete_agent(agent_id)
                .await
                .context(StoreSnafu {
                    stage: "delete-agent",
                })
                .map_err(|error| report("delete_agent", error))?;
            tracing::info!(agent_id = %agent_id, "agent deleted");
            Ok(())
        })
    }

    fn list_conversations(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, BackendResult<Vec<Conversation>>> {
        Box::pin(async move {
            let records = self
                .storage
                .list_conversations(agent_id)
                .await
                .context(StoreSnafu {
                    stage: "list-conversations",
                })
                .map_err(|error| report("list_conversations", error))?;
            Ok(records.into_iter().map(conversation_from_record).collect())
        })
    }

    fn create_conversation(
        &self,
        agent_id: AgentId,
        title: Option<String>,
    ) -> BoxFuture<'_, BackendResult<Conversation>> {
        Box::pin(async move {
            let record = self
                .storage
                .create_conversation(NewConversation { agent_id, title })
                .await
                .context(StoreSnafu {
                    stage: "create-conversation",
                })
                .map_err(|error| report("create_conversation", error))?;
            Ok(conversation_from_record(record))
        })
    }

    fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            // Only the title of a conversation is mutable.
            self.storage
                .set_conversation_title(conversation.id, conversation.title)
                .await
                .context(StoreSnafu {
                    stage: "update-conversation",
                })
                .map_err(|error| report("update_conversation", error))?;
            Ok(())
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.storage
                .delete_conversation(conversation_id)
                .await
                .context(StoreSnafu {
                    stage: "delete-conversation",
                })
                .map_err(|error| report("delete_conversation", error))?;
            Ok(())
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<Vec<Message>>> {
        Box::pin(async move {
            let records = self
                .storage
                .list_messages(conversation_id)
                .await
                .context(StoreSnafu {
                    stage: "list-messages",
                })
                .map_err(|error| report("list_messages", error))?;
            Ok(records.into_iter().map(message_from_record).collect())
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: String,
    ) -> BoxFuture<'_, BackendResult<Message>> {
        Box::pin(async move {
            let record = self
                .storage
                .append_message(
                    conversation_id,
                    NewMessage::text(role_to_storage(role), content),
                )
                .await
                .context(StoreSnafu {
                    stage: "append-message",
                })
                .map_err(|error| report("append_message", error))?;
            Ok(message_from_record(record))
        })
    }

    fn send_message(&self, request: SendRequest) -> BoxFuture<'_, BackendResult<String>> {
        Box::pin(async move {
            let conversation_id = request.conversation_id;
            tracing::info!(
                agent_id = %request.agent_id,
                conversation_id = %conversation_id,
                "exchange started"
            );
            self.run_send(request)
                .await
                .map_err(|error| report("send_message", error))
        })
    }

    fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        self.events.subscribe(conversation_id)
    }
}
