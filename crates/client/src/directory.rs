use std::sync::Arc;

use agentdesk_protocol::{Agent, Backend, NewAgent};
use snafu::ResultExt;

use super::error::{BackendSnafu, ClientResult, IncompleteAgentSnafu};
use super::session::{SessionContext, SessionSelector};
use super::store::EntityStore;

/// Agent list maintenance on top of the backend.
pub struct AgentDirectory {
    backend: Arc<dyn Backend>,
    store: Arc<EntityStore>,
}

impl AgentDirectory {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<EntityStore>) -> Self {
        Self { backend, store }
    }

    /// Refreshes the agent list. Returns `false` and keeps the previous list on failure.
    pub async fn load_agents(&self) -> bool {
        match self.backend.list_agents().await {
            Ok(agents) => {
                self.store.replace_agents(agents);
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to load agents");
                false
            }
        }
    }

    pub async fn create_agent(&self, input: NewAgent) -> ClientResult<Agent> {
        if let Err(field) = input.validate() {
            return IncompleteAgentSnafu {
                stage: "create-agent-validate",
                field,
            }
            .fail();
        }

        let agent = self
            .backend
            .create_agent(input)
            .await
            .context(BackendSnafu {
                stage: "create-agent",
            })?;
        self.store.prepend_agent(agent.clone());
        Ok(agent)
    }

    pub async fn update_agent(
        &self,
        context: &mut SessionContext,
        agent: Agent,
    ) -> ClientResult<()> {
        self.backend
            .update_agent(agent.clone())
            .await
            .context(BackendSnafu {
                stage: "update-agent",
            })?;

        if context.agent_id() == Some(agent.id) {
            context.agent = Some(agent.clone());
        }
        self.store.upsert_agent(agent);
        Ok(())
    }

    pub async fn delete_agent(
        &self,
        context: &mut SessionContext,
        selector: &SessionSelector,
        agent: &Agent,
    ) -> ClientResult<()> {
        self.backend
            .delete_agent(agent.id)
            .await
            .context(BackendSnafu {
                stage: "delete-agent",
            })?;

        self.store.remove_agent(agent.id);
        for conversation in self.store.conversations(agent.id) {
            self.store.clear_messages(conversation.id);
        }
        self.store.clear_conversations(agent.id);
        selector.agent_deleted(context, agent.id);
        Ok(())
    }
}
