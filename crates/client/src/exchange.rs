use std::collections::HashMap;
use std::sync::Arc;

use agentdesk_protocol::{
    AgentId, Backend, Conversation, ConversationId, Message, MessageKey, SendRequest,
    Subscription,
};
use parking_lot::Mutex;

use super::error::{ClientError, ClientResult};
use super::interpret::interpret;
use super::session::SessionContext;
use super::store::EntityStore;

/// Lifecycle of the exchange of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending {
        assistant: MessageKey,
        subscription_id: Option<u64>,
    },
}

/// Why a submit did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyText,
    NoAgentSelected,
    NoConversationSelected,
    AlreadySending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    /// The exchange finished and the store holds authoritative messages.
    ///
    /// `conversation` is the refreshed active conversation when its metadata
    /// changed during the exchange; the caller should store it in its context.
    Completed { conversation: Option<Conversation> },
}

/// Runs at most one exchange per conversation.
pub struct ExchangeController {
    backend: Arc<dyn Backend>,
    store: Arc<EntityStore>,
    states: Mutex<HashMap<ConversationId, ExchangeState>>,
}

/// Keeps a conversation in `Sending` until dropped, whichever way the
/// exchange ends.
struct ExchangeGuard<'a> {
    states: &'a Mutex<HashMap<ConversationId, ExchangeState>>,
    conversation_id: ConversationId,
}

impl ExchangeGuard<'_> {
    fn attach(&self, subscription: &Subscription) {
        if let Some(ExchangeState::Sending {
            subscription_id, ..
        }) = self.states.lock().get_mut(&self.conversation_id)
        {
            *subscription_id = Some(subscription.id());
        }
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.states.lock().remove(&self.conversation_id);
        tracing::debug!(conversation_id = %self.conversation_id, "exchange returned to idle");
    }
}

impl ExchangeController {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<EntityStore>) -> Self {
        Self {
            backend,
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, conversation_id: ConversationId) -> ExchangeState {
        self.states
            .lock()
            .get(&conversation_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_sending(&self, conversation_id: ConversationId) -> bool {
        matches!(self.state(conversation_id), ExchangeState::Sending { .. })
    }

    /// Sends `text` to the selected conversation and follows the exchange to
    /// its end.
    ///
    /// The user and assistant placeholders are in the store when this
    /// returns its first `Pending`. On failure the assistant placeholder is
    /// removed, a notice is posted and the backend error is returned.
    pub async fn submit(
        &self,
        context: &SessionContext,
        text: &str,
    ) -> ClientResult<SubmitOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored(IgnoreReason::EmptyText));
        }
        let Some(agent) = context.agent.as_ref() else {
            return Ok(SubmitOutcome::Ignored(IgnoreReason::NoAgentSelected));
        };
        let Some(conversation) = context.conversation.as_ref() else {
            return Ok(SubmitOutcome::Ignored(IgnoreReason::NoConversationSelected));
        };
        let agent_id = agent.id;
        let conversation_id = conversation.id;

        let user = Message::user_placeholder(conversation_id, text);
        let assistant = Message::assistant_placeholder(conversation_id);

        {
            let mut states = self.states.lock();
            if matches!(
                states.get(&conversation_id),
                Some(ExchangeState::Sending { .. })
            ) {
                tracing::debug!(conversation_id = %conversation_id, "submit ignored; exchange in flight");
                return Ok(SubmitOutcome::Ignored(IgnoreReason::AlreadySending));
            }
            states.insert(
                conversation_id,
                ExchangeState::Sending {
                    assistant: assistant.id,
                    subscription_id: None,
                },
            );
        }
        let guard = ExchangeGuard {
            states: &self.states,
            conversation_id,
        };

        self.store
            .append_messages(conversation_id, vec![user, assistant.clone()]);
        // Declared after the guard so cancellation drops it first.
        let mut subscription = self.backend.subscribe(conversation_id);
        guard.attach(&subscription);

        tracing::info!(conversation_id = %conversation_id, "exchange started");
        let mut send = self
            .backend
            .send_message(SendRequest::new(agent_id, conversation_id, text));
        let mut current = assistant;
        let mut channel_closed = false;

        let result = loop {
            tokio::select! {
                biased;

                event = subscription.recv(), if !channel_closed => match event {
                    Some(event) => {
                        current = interpret(&event, &current);
                        self.store.upsert_message(conversation_id, current.clone());
                    }
                    None => {
                        tracing::warn!(conversation_id = %conversation_id, "event channel closed mid-exchange");
                        channel_closed = true;
                    }
                },
                result = &mut send => break result,
            }
        };

        // Settled: the listener goes first, the conversation stays `Sending`
        // until the store holds the outcome.
        drop(subscription);

        let outcome = match result {
            Ok(_) => Ok(SubmitOutcome::Completed {
                conversation: self.reconcile(context, agent_id, conversation_id).await,
            }),
            Err(source) => {
                self.rollback(conversation_id, current.id, &source.to_string());
                Err(ClientError::SendFailed {
                    stage: "exchange-send",
                    conversation_id,
                    source,
                })
            }
        };
        drop(guard);
        outcome
    }

    async fn reconcile(
        &self,
        context: &SessionContext,
        agent_id: AgentId,
        conversation_id: ConversationId,
    ) -> Option<Conversation> {
        match self.backend.list_messages(conversation_id).await {
            Ok(messages) => self.store.replace_messages(conversation_id, messages),
            Err(error) => tracing::warn!(
                conversation_id = %conversation_id,
                error = %error,
                "failed to reload messages after exchange"
            ),
        }

        let conversations = match self.backend.list_conversations(agent_id).await {
            Ok(conversations) => conversations,
            Err(error) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    error = %error,
                    "failed to reload conversations after exchange"
                );
                return None;
            }
        };
        self.store
            .replace_conversations(agent_id, conversations.clone());

        let refreshed = conversations
            .into_iter()
            .find(|conversation| conversation.id == conversation_id)?;
        match context.conversation.as_ref() {
            Some(active) if active.id == conversation_id && *active != refreshed => {
                Some(refreshed)
            }
            _ => None,
        }
    }

    fn rollback(&self, conversation_id: ConversationId, assistant: MessageKey, reason: &str) {
        tracing::warn!(conversation_id = %conversation_id, error = reason, "exchange failed");
        self.store.remove_message(conversation_id, assistant);
        self.store
            .post_notice(format!("Failed to send message: {reason}"));
    }
}
