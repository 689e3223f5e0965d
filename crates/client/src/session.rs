use std::sync::Arc;

use agentdesk_protocol::{Agent, AgentId, Backend, Conversation, ConversationId};
use snafu::{OptionExt, ResultExt, ensure};

use super::error::{BackendSnafu, ClientResult, EmptyTitleSnafu, NoAgentSelectedSnafu};
use super::store::EntityStore;

/// The user's current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub agent: Option<Agent>,
    pub conversation: Option<Conversation>,
}

impl SessionContext {
    pub fn agent_id(&self) -> Option<AgentId> {
        self.agent.as_ref().map(|agent| agent.id)
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation.as_ref().map(|conversation| conversation.id)
    }

    pub fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.conversation_id() == Some(conversation_id)
    }
}

/// Decides which conversation is active as agents and conversations come and go.
pub struct SessionSelector {
    backend: Arc<dyn Backend>,
    store: Arc<EntityStore>,
}

impl SessionSelector {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<EntityStore>) -> Self {
        Self { backend, store }
    }

    /// Selects `agent` and activates its most recent conversation, creating
    /// one when it has none.
    ///
    /// Returns `Ok(false)` when the conversation list could not be loaded; the
    /// context is left untouched in that case.
    pub async fn select_agent(
        &self,
        context: &mut SessionContext,
        agent: Agent,
    ) -> ClientResult<bool> {
        let Some(conversations) = self.load_conversations(agent.id).await else {
            return Ok(false);
        };

        let agent_id = agent.id;
        context.agent = Some(agent);
        context.conversation = None;

        match conversations.first().cloned() {
            Some(most_recent) => {
                self.activate(context, most_recent).await;
            }
            None => {
                tracing::debug!(agent_id = %agent_id, "agent has no conversations; creating one");
                self.new_conversation(context).await?;
            }
        }
        Ok(true)
    }

    /// Creates an untitled conversation for the selected agent and activates it.
    pub async fn new_conversation(
        &self,
        context: &mut SessionContext,
    ) -> ClientResult<Conversation> {
        let agent_id = context.agent_id().context(NoAgentSelectedSnafu {
            stage: "new-conversation",
        })?;

        let conversation = self
            .backend
            .create_conversation(agent_id, None)
            .await
            .context(BackendSnafu {
                stage: "new-conversation-create",
            })?;

        self.store.prepend_conversation(conversation.clone());
        self.activate(context, conversation.clone()).await;
        Ok(conversation)
    }

    /// Activates an existing conversation. Returns whether its messages loaded.
    pub async fn select_conversation(
        &self,
        context: &mut SessionContext,
        conversation: Conversation,
    ) -> bool {
        self.activate(context, conversation).await
    }

    pub async fn rename_conversation(
        &self,
        context: &mut SessionContext,
        conversation: Conversation,
        title: &str,
    ) -> ClientResult<Conversation> {
        let title = title.trim();
        ensure!(
            !title.is_empty(),
            EmptyTitleSnafu {
                stage: "rename-conversation",
            }
        );

        let renamed = Conversation {
            title: Some(title.to_string()),
            ..conversation
        };
        self.backend
            .update_conversation(renamed.clone())
            .await
            .context(BackendSnafu {
                stage: "rename-conversation-update",
            })?;

        self.store.upsert_conversation(renamed.clone());
        if context.is_active(renamed.id) {
            context.conversation = Some(renamed.clone());
        }
        Ok(renamed)
    }

    /// Deletes a conversation and keeps a conversation active while an agent is selected.
    pub async fn delete_conversation(
        &self,
        context: &mut SessionContext,
        conversation: &Conversation,
    ) -> ClientResult<()> {
        self.backend
            .delete_conversation(conversation.id)
            .await
            .context(BackendSnafu {
                stage: "delete-conversation",
            })?;

        self.store
            .remove_conversation(conversation.agent_id, conversation.id);
        self.store.clear_messages(conversation.id);

        if !context.is_active(conversation.id) {
            return Ok(());
        }
        context.conversation = None;

        let Some(agent_id) = context.agent_id() else {
            return Ok(());
        };

        match self.store.conversations(agent_id).first().cloned() {
            Some(next) => {
                self.activate(context, next).await;
            }
            None => {
                self.new_conversation(context).await?;
            }
        }
        Ok(())
    }

    /// Applies the selection policy after an agent was deleted.
    pub fn agent_deleted(&self, context: &mut SessionContext, agent_id: AgentId) {
        if context.agent_id() == Some(agent_id) {
            context.agent = None;
            context.conversation = None;
        }
    }

    async fn activate(&self, context: &mut SessionContext, conversation: Conversation) -> bool {
        let conversation_id = conversation.id;
        context.conversation = Some(conversation);

        match self.backend.list_messages(conversation_id).await {
            Ok(messages) => {
                self.store.replace_messages(conversation_id, messages);
                true
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to load messages"
                );
                false
            }
        }
    }

    /// Refreshes the conversation list of `agent_id` in the store.
    pub async fn load_conversations(&self, agent_id: AgentId) -> Option<Vec<Conversation>> {
        match self.backend.list_conversations(agent_id).await {
            Ok(conversations) => {
                self.store
                    .replace_conversations(agent_id, conversations.clone());
                Some(conversations)
            }
            Err(error) => {
                tracing::warn!(agent_id = %agent_id, error = %error, "failed to load conversations");
                None
            }
        }
    }
}
