use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use agentdesk_protocol::{
    Agent, AgentId, Conversation, ConversationId, Message, MessageKey, unix_timestamp_seconds,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;

type ConversationMap = HashMap<AgentId, Vec<Conversation>>;
type MessageMap = HashMap<ConversationId, Vec<Message>>;

/// User-visible failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub posted_at: i64,
}

/// In-memory collections observed by the presentation layer.
///
/// Every write swaps a whole collection, so readers only ever see complete
/// snapshots. Each mutation bumps the revision published by [`Self::subscribe`].
pub struct EntityStore {
    agents: ArcSwap<Vec<Agent>>,
    conversations: ArcSwap<ConversationMap>,
    messages: ArcSwap<MessageMap>,
    notices: Mutex<VecDeque<Notice>>,
    revision: watch::Sender<u64>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            agents: ArcSwap::from_pointee(Vec::new()),
            conversations: ArcSwap::from_pointee(HashMap::new()),
            messages: ArcSwap::from_pointee(HashMap::new()),
            notices: Mutex::new(VecDeque::new()),
            revision,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    // Agents

    pub fn agents(&self) -> Arc<Vec<Agent>> {
        self.agents.load_full()
    }

    pub fn agent(&self, agent_id: AgentId) -> Option<Agent> {
        self.agents
            .load()
            .iter()
            .find(|agent| agent.id == agent_id)
            .cloned()
    }

    pub fn replace_agents(&self, agents: Vec<Agent>) {
        self.agents.store(Arc::new(agents));
        self.bump();
    }

    pub fn prepend_agent(&self, agent: Agent) {
        self.agents.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.push(agent.clone());
            next.extend(current.iter().cloned());
            next
        });
        self.bump();
    }

    /// Replaces the agent with the same id in place, or prepends it.
    pub fn upsert_agent(&self, agent: Agent) {
        self.agents.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|existing| existing.id == agent.id) {
                Some(existing) => *existing = agent.clone(),
                None => next.insert(0, agent.clone()),
            }
            next
        });
        self.bump();
    }

    pub fn remove_agent(&self, agent_id: AgentId) -> bool {
        let mut removed = false;
        self.agents.rcu(|current| {
            let next = current
                .iter()
                .filter(|agent| agent.id != agent_id)
                .cloned()
                .collect::<Vec<_>>();
            removed = next.len() != current.len();
            next
        });
        if removed {
            self.bump();
        }
        removed
    }

    // Conversations

    pub fn conversations(&self, agent_id: AgentId) -> Vec<Conversation> {
        self.conversations
            .load()
            .get(&agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.conversations
            .load()
            .values()
            .flatten()
            .find(|conversation| conversation.id == conversation_id)
            .cloned()
    }

    pub fn replace_conversations(&self, agent_id: AgentId, conversations: Vec<Conversation>) {
        self.conversations.rcu(|current| {
            let mut next = ConversationMap::clone(current);
            next.insert(agent_id, conversations.clone());
            next
        });
        self.bump();
    }

    pub fn clear_conversations(&self, agent_id: AgentId) {
        self.conversations.rcu(|current| {
            let mut next = ConversationMap::clone(current);
            next.remove(&agent_id);
            next
        });
        self.bump();
    }

    pub fn prepend_conversation(&self, conversation: Conversation) {
        self.conversations.rcu(|current| {
            let mut next = ConversationMap::clone(current);
            next.entry(conversation.agent_id)
                .or_default()
                .insert(0, conversation.clone());
            next
        });
        self.bump();
    }

    /// Replaces the conversation with the same id in place, or prepends it.
    pub fn upsert_conversation(&self, conversation: Conversation) {
        self.conversations.rcu(|current| {
            let mut next = ConversationMap::clone(current);
            let list = next.entry(conversation.agent_id).or_default();
            match list
                .iter_mut()
                .find(|existing| existing.id == conversation.id)
            {
                Some(existing) => *existing = conversation.clone(),
                None => list.insert(0, conversation.clone()),
            }
            next
        });
        self.bump();
    }

    pub fn remove_conversation(&self, agent_id: AgentId, conversation_id: ConversationId) -> bool {
        let mut removed = false;
        self.conversations.rcu(|current| {
            let mut next = ConversationMap::clone(current);
            removed = false;
            if let Some(list) = next.get_mut(&agent_id) {
                let before = list.len();
                list.retain(|conversation| conversation.id != conversation_id);
                removed = list.len() != before;
            }
            next
        });
        if removed {
            self.bump();
        }
        removed
    }

    // Messages

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.messages
            .load()
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn message(&self, conversation_id: ConversationId, key: MessageKey) -> Option<Message> {
        self.messages
            .load()
            .get(&conversation_id)
            .and_then(|messages| messages.iter().find(|message| message.id == key))
            .cloned()
    }

    /// Supersedes everything held for the conversation, optimistic entries included.
    pub fn replace_messages(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.messages.rcu(|current| {
            let mut next = MessageMap::clone(current);
            next.insert(conversation_id, messages.clone());
            next
        });
        self.bump();
    }

    pub fn clear_messages(&self, conversation_id: ConversationId) {
        self.messages.rcu(|current| {
            let mut next = MessageMap::clone(current);
            next.remove(&conversation_id);
            next
        });
        self.bump();
    }

    /// Appends all of `messages` in one swap.
    pub fn append_messages(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.messages.rcu(|current| {
            let mut next = MessageMap::clone(current);
            next.entry(conversation_id)
                .or_default()
                .extend(messages.iter().cloned());
            next
        });
        self.bump();
    }

    /// Replaces the message with the same key, or appends it.
    pub fn upsert_message(&self, conversation_id: ConversationId, message: Message) {
        self.messages.rcu(|current| {
            let mut next = MessageMap::clone(current);
            let list = next.entry(conversation_id).or_default();
            match list.iter_mut().find(|existing| existing.id == message.id) {
                Some(existing) => *existing = message.clone(),
                None => list.push(message.clone()),
            }
            next
        });
        self.bump();
    }

    pub fn remove_message(&self, conversation_id: ConversationId, key: MessageKey) -> bool {
        let mut removed = false;
        self.messages.rcu(|current| {
            let mut next = MessageMap::clone(current);
            removed = false;
            if let Some(list) = next.get_mut(&conversation_id) {
                let before = list.len();
                list.retain(|message| message.id != key);
                removed = list.len() != before;
            }
            next
        });
        if removed {
            self.bump();
        }
        removed
    }

    // Notices

    pub fn post_notice(&self, message: impl Into<String>) {
        let notice = Notice {
            message: message.into(),
            posted_at: unix_timestamp_seconds(),
        };
        tracing::debug!(message = %notice.message, "posted user notice");
        self.notices.lock().push_back(notice);
        self.bump();
    }

    /// Oldest notice not yet shown.
    pub fn take_notice(&self) -> Option<Notice> {
        self.notices.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use agentdesk_protocol::Role;

    use super::*;

    fn agent(name: &str) -> Agent {
        Agent {
            id: AgentId::new_v7(),
            name: name.to_string(),
            api_url: "https://agent.example".to_string(),
            auth_token: "token".to_string(),
            project_id: "p".to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let store = EntityStore::new();
        let receiver = store.subscribe();

        store.prepend_agent(agent("a"));
        store.post_notice("boom");

        assert_eq!(store.revision(), 2);
        assert!(receiver.has_changed().expect("sender alive"));
    }

    #[test]
    fn upsert_agent_replaces_in_place() {
        let store = EntityStore::new();
        let first = agent("first");
        let second = agent("second");
        store.replace_agents(vec![first.clone(), second.clone()]);

        let mut renamed = second.clone();
        renamed.name = "renamed".to_string();
        store.upsert_agent(renamed);

        let names = store
            .agents()
            .iter()
            .map(|agent| agent.name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["first", "renamed"]);
    }

    #[test]
    fn messages_are_keyed_by_identifier() {
        let store = EntityStore::new();
        let conversation_id = ConversationId::new_v7();
        let user = Message::user_placeholder(conversation_id, "hi");
        let mut assistant = Message::assistant_placeholder(conversation_id);
        store.append_messages(conversation_id, vec![user.clone(), assistant.clone()]);

        assistant.content = "hello".to_string();
        store.upsert_message(conversation_id, assistant.clone());

        let messages = store.messages(conversation_id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "hello");

        assert!(store.remove_message(conversation_id, assistant.id));
        assert!(!store.remove_message(conversation_id, assistant.id));
        assert_eq!(store.messages(conversation_id), vec![user]);
    }

    #[test]
    fn snapshots_are_unaffected_by_later_writes() {
        let store = EntityStore::new();
        store.replace_agents(vec![agent("a")]);

        let snapshot = store.agents();
        store.prepend_agent(agent("b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.agents().len(), 2);
    }

    #[test]
    fn notices_are_taken_oldest_first() {
        let store = EntityStore::new();
        store.post_notice("first");
        store.post_notice("second");

        assert_eq!(store.take_notice().map(|notice| notice.message), Some("first".to_string()));
        assert_eq!(store.take_notice().map(|notice| notice.message), Some("second".to_string()));
        assert_eq!(store.take_notice(), None);
    }
}
