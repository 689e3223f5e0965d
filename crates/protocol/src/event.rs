use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::ids::ConversationId;
use super::model::ToolCall;

/// Name of the channel that carries progress events for in-flight sends.
pub const CHAT_STREAM_CHANNEL: &str = "chat-stream";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Content,
    ToolCall,
    ToolResult,
    Done,
    Error,
    /// Any kind this client does not know about yet.
    #[serde(other)]
    Unknown,
}

/// Progress event emitted by the backend while a send is in flight.
///
/// `full_content` always carries the accumulated answer text, never a delta.
/// `tool_calls` on a `tool_result` event is the complete set with current statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl StreamEvent {
    fn bare(event_type: StreamEventKind) -> Self {
        Self {
            event_type,
            content: None,
            full_content: None,
            tool_call: None,
            tool_calls: None,
        }
    }

    pub fn content(delta: impl Into<String>, full_content: impl Into<String>) -> Self {
        Self {
            content: Some(delta.into()),
            full_content: Some(full_content.into()),
            ..Self::bare(StreamEventKind::Content)
        }
    }

    pub fn tool_call(tool_call: ToolCall) -> Self {
        Self {
            tool_call: Some(tool_call),
            ..Self::bare(StreamEventKind::ToolCall)
        }
    }

    pub fn tool_result(tool_call: ToolCall, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_call: Some(tool_call),
            tool_calls: Some(tool_calls),
            ..Self::bare(StreamEventKind::ToolResult)
        }
    }

    pub fn done(full_content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            full_content: Some(full_content.into()),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            ..Self::bare(StreamEventKind::Done)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Some(message.into()),
            ..Self::bare(StreamEventKind::Error)
        }
    }
}

/// Event as routed on the channel, tagged with the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub conversation_id: ConversationId,
    pub event: StreamEvent,
}

/// In-process publish/subscribe channel for stream events.
#[derive(Debug)]
pub struct EventChannel {
    name: &'static str,
    sender: broadcast::Sender<ChannelEvent>,
    next_subscription_id: AtomicU64,
    active_subscriptions: Arc<AtomicUsize>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(CHAT_STREAM_CHANNEL)
    }
}

impl EventChannel {
    pub fn new(name: &'static str) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            name,
            sender,
            next_subscription_id: AtomicU64::new(1),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publishes one event. Events with no listener are dropped.
    pub fn publish(&self, conversation_id: ConversationId, event: StreamEvent) {
        let event_type = event.event_type;
        if self
            .sender
            .send(ChannelEvent {
                conversation_id,
                event,
            })
            .is_err()
        {
            tracing::trace!(
                channel = self.name,
                conversation_id = %conversation_id,
                ?event_type,
                "dropped stream event without subscribers"
            );
        }
    }

    /// Opens a subscription that only yields events for `conversation_id`.
    pub fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.active_subscriptions.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            channel = self.name,
            subscription_id = id,
            conversation_id = %conversation_id,
            "opened stream subscription"
        );

        Subscription {
            id,
            channel: self.name,
            conversation_id,
            receiver: self.sender.subscribe(),
            active_subscriptions: Arc::clone(&self.active_subscriptions),
        }
    }

    /// Number of subscriptions that have not been dropped yet.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::Acquire)
    }
}

/// Scoped listener on an [`EventChannel`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    channel: &'static str,
    conversation_id: ConversationId,
    receiver: broadcast::Receiver<ChannelEvent>,
    active_subscriptions: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Waits for the next event of this subscription's conversation.
    ///
    /// Returns `None` once the channel is closed. Cancel safe.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(routed) if routed.conversation_id == self.conversation_id => {
                    return Some(routed.event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = self.channel,
                        subscription_id = self.id,
                        skipped,
                        "stream subscription lagged; events were dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active_subscriptions.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(
            channel = self.channel,
            subscription_id = self.id,
            conversation_id = %self.conversation_id,
            "released stream subscription"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_kinds_decode_without_failing() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"event_type":"heartbeat","content":"tick"}"#)
                .expect("unknown kinds decode");

        assert_eq!(event.event_type, StreamEventKind::Unknown);
        assert_eq!(event.content.as_deref(), Some("tick"));
    }

    #[test]
    fn wire_shape_omits_absent_fields() {
        let json = serde_json::to_value(StreamEvent::content("lo", "hello")).expect("encode");

        assert_eq!(
            json,
            serde_json::json!({
                "event_type": "content",
                "content": "lo",
                "full_content": "hello"
            })
        );
    }

    #[tokio::test]
    async fn subscription_filters_by_conversation_and_counts_teardown() {
        let channel = EventChannel::default();
        let mine = ConversationId::new_v7();
        let other = ConversationId::new_v7();

        let mut subscription = channel.subscribe(mine);
        assert_eq!(channel.active_subscriptions(), 1);

        channel.publish(other, StreamEvent::content("x", "x"));
        channel.publish(mine, StreamEvent::content("a", "a"));

        let received = subscription.recv().await.expect("event for own conversation");
        assert_eq!(received.full_content.as_deref(), Some("a"));

        drop(subscription);
        assert_eq!(channel.active_subscriptions(), 0);
    }
}
