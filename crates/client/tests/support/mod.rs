#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agentdesk_client::{ClientCore, SessionContext};
use agentdesk_protocol::{
    Agent, AgentId, Backend, BackendError, BackendResult, BoxFuture, Conversation,
    ConversationId, EventChannel, Message, MessageId, MessageKey, NewAgent, Role, SendRequest,
    StreamEvent, Subscription, ToolCall, unix_timestamp_seconds,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// How the next `send_message` call behaves.
#[derive(Debug, Clone, Default)]
pub struct SendScript {
    pub events: Vec<StreamEvent>,
    /// `None` succeeds; `Some` fails with this message.
    pub failure: Option<String>,
    pub assistant_reply: String,
    pub assistant_tool_calls: Vec<ToolCall>,
    pub title: Option<String>,
}

#[derive(Default)]
struct FakeData {
    agents: Vec<Agent>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

/// In-memory backend that plays back a [`SendScript`].
#[derive(Default)]
pub struct FakeBackend {
    data: Mutex<FakeData>,
    events: EventChannel,
    script: Mutex<SendScript>,
    gate: Mutex<Option<Arc<Notify>>>,
    load_gate: Mutex<Option<Arc<Notify>>>,
    closed_channel: AtomicBool,
    fail_mutations: AtomicBool,
    fail_loads: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_script(&self, script: SendScript) {
        *self.script.lock() = script;
    }

    /// Holds every send after its events are published until the returned
    /// notify gets a permit.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Holds every `list_messages` call until the returned notify gets a permit.
    pub fn hold_message_loads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.load_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Hands out subscriptions whose channel is already gone.
    pub fn close_channel_on_subscribe(&self, closed: bool) {
        self.closed_channel.store(closed, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.events.active_subscriptions()
    }

    pub fn stored_messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.data
            .lock()
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn seed_agent(&self, name: &str) -> Agent {
        let agent = Agent {
            id: AgentId::new_v7(),
            name: name.to_string(),
            api_url: "https://agent.example/run".to_string(),
            auth_token: "token".to_string(),
            project_id: "bot".to_string(),
            created_at: unix_timestamp_seconds(),
        };
        self.data.lock().agents.insert(0, agent.clone());
        agent
    }

    pub fn seed_conversation(&self, agent_id: AgentId, title: Option<&str>) -> Conversation {
        let conversation = Conversation {
            id: ConversationId::new_v7(),
            agent_id,
            title: title.map(str::to_string),
            created_at: unix_timestamp_seconds(),
        };
        self.data.lock().conversations.insert(0, conversation.clone());
        conversation
    }

    fn check_mutation(&self, stage: &'static str) -> BackendResult<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::Storage {
                stage,
                message: "disk full".to_string(),
            });
        }
        Ok(())
    }

    fn check_load(&self, stage: &'static str) -> BackendResult<()> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(BackendError::Storage {
                stage,
                message: "database locked".to_string(),
            });
        }
        Ok(())
    }

    fn store_message(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: String,
        tool_calls: Vec<ToolCall>,
    ) -> Message {
        let message = Message {
            id: MessageKey::Stored(MessageId::new_v7()),
            conversation_id,
            role,
            content,
            tool_calls,
            created_at: unix_timestamp_seconds(),
        };
        self.data.lock().messages.push(message.clone());
        message
    }
}

impl Backend for FakeBackend {
    fn list_agents(&self) -> BoxFuture<'_, BackendResult<Vec<Agent>>> {
        Box::pin(async move {
            self.check_load("list-agents")?;
            Ok(self.data.lock().agents.clone())
        })
    }

    fn get_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<Option<Agent>>> {
        Box::pin(async move {
            Ok(self
                .data
                .lock()
                .agents
                .iter()
                .find(|agent| agent.id == agent_id)
                .cloned())
        })
    }

    fn create_agent(&self, input: NewAgent) -> BoxFuture<'_, BackendResult<Agent>> {
        Box::pin(async move {
            self.check_mutation("create-agent")?;
            let agent = Agent {
                id: AgentId::new_v7(),
                name: input.name,
                api_url: input.api_url,
                auth_token: input.auth_token,
                project_id: input.project_id,
                created_at: unix_timestamp_seconds(),
            };
            self.data.lock().agents.insert(0, agent.clone());
            Ok(agent)
        })
    }

    fn update_agent(&self, agent: Agent) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.check_mutation("update-agent")?;
            let mut data = self.data.lock();
            if let Some(existing) = data.agents.iter_mut().find(|existing| existing.id == agent.id)
            {
                *existing = agent;
            }
            Ok(())
        })
    }

    fn delete_agent(&self, agent_id: AgentId) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.check_mutation("delete-agent")?;
            let mut data = self.data.lock();
            data.agents.retain(|agent| agent.id != agent_id);
            data.conversations
                .retain(|conversation| conversation.agent_id != agent_id);
            Ok(())
        })
    }

    fn list_conversations(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, BackendResult<Vec<Conversation>>> {
        Box::pin(async move {
            self.check_load("list-conversations")?;
            Ok(self
                .data
                .lock()
                .conversations
                .iter()
                .filter(|conversation| conversation.agent_id == agent_id)
                .cloned()
                .collect())
        })
    }

    fn create_conversation(
        &self,
        agent_id: AgentId,
        title: Option<String>,
    ) -> BoxFuture<'_, BackendResult<Conversation>> {
        Box::pin(async move {
            self.check_mutation("create-conversation")?;
            let conversation = Conversation {
                id: ConversationId::new_v7(),
                agent_id,
                title,
                created_at: unix_timestamp_seconds(),
            };
            self.data.lock().conversations.insert(0, conversation.clone());
            Ok(conversation)
        })
    }

    fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.check_mutation("update-conversation")?;
            let mut data = self.data.lock();
            if let Some(existing) = data
                .conversations
                .iter_mut()
                .find(|existing| existing.id == conversation.id)
            {
                existing.title = conversation.title;
            }
            Ok(())
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.check_mutation("delete-conversation")?;
            let mut data = self.data.lock();
            data.conversations
                .retain(|conversation| conversation.id != conversation_id);
            data.messages
                .retain(|message| message.conversation_id != conversation_id);
            Ok(())
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BackendResult<Vec<Message>>> {
        Box::pin(async move {
            self.check_load("list-messages")?;
            let snapshot = self.stored_messages(conversation_id);
            let gate = self.load_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(snapshot)
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: String,
    ) -> BoxFuture<'_, BackendResult<Message>> {
        Box::pin(async move {
            self.check_mutation("append-message")?;
            Ok(self.store_message(conversation_id, role, content, Vec::new()))
        })
    }

    fn send_message(&self, request: SendRequest) -> BoxFuture<'_, BackendResult<String>> {
        Box::pin(async move {
            let script = self.script.lock().clone();
            self.store_message(
                request.conversation_id,
                Role::User,
                request.message.clone(),
                Vec::new(),
            );

            for event in script.events {
                self.events.publish(request.conversation_id, event);
            }

            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if let Some(message) = script.failure {
                return Err(BackendError::Remote {
                    stage: "fake-send",
                    message,
                });
            }

            self.store_message(
                request.conversation_id,
                Role::Assistant,
                script.assistant_reply.clone(),
                script.assistant_tool_calls,
            );
            if let Some(title) = script.title {
                let mut data = self.data.lock();
                if let Some(conversation) = data
                    .conversations
                    .iter_mut()
                    .find(|conversation| conversation.id == request.conversation_id)
                {
                    conversation.title = Some(title);
                }
            }
            Ok(script.assistant_reply)
        })
    }

    fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        if self.closed_channel.load(Ordering::SeqCst) {
            return EventChannel::default().subscribe(conversation_id);
        }
        self.events.subscribe(conversation_id)
    }
}

/// Client wired to a fake backend with one agent and one conversation selected.
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub client: ClientCore,
    pub context: SessionContext,
}

impl Harness {
    pub async fn with_selected_conversation() -> Self {
        let backend = FakeBackend::new();
        let agent = backend.seed_agent("helper");
        backend.seed_conversation(agent.id, None);

        let client = ClientCore::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let mut context = SessionContext::default();
        let selected = client
            .selector
            .select_agent(&mut context, agent)
            .await
            .expect("select agent");
        assert!(selected);

        Self {
            backend,
            client,
            context,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.context
            .conversation_id()
            .expect("conversation selected")
    }

    pub fn messages(&self) -> Vec<Message> {
        self.client.store.messages(self.conversation_id())
    }

    /// Waits until the store satisfies `condition`.
    pub async fn wait_for_store(&self, condition: impl Fn(&[Message]) -> bool) {
        let mut revisions = self.client.store.subscribe();
        loop {
            if condition(self.messages().as_slice()) {
                return;
            }
            if revisions.changed().await.is_err() {
                panic!("store dropped while waiting");
            }
        }
    }
}
