use agentdesk_protocol::{StreamEvent, ToolCall, ToolCallStatus, UNTITLED_CONVERSATION_TITLE};
use agentdesk_remote::{RemoteEvent, ToolRequest, ToolResponse};

const FALLBACK_TITLE_CHARS: usize = 30;
const FALLBACK_TITLE_ELLIPSIS: &str = "...";

/// What one remote event did to the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStep {
    /// Events to publish; the exchange continues.
    Publish(Vec<StreamEvent>),
    Finished,
    Failed(String),
}

/// Accumulated state of one send while the remote stream is running.
#[derive(Debug, Default)]
pub struct ExchangeAccumulator {
    full_response: String,
    title: Option<String>,
    tool_calls: Vec<ToolCall>,
}

impl ExchangeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn into_parts(self) -> (String, Option<String>, Vec<ToolCall>) {
        (self.full_response, self.title, self.tool_calls)
    }

    /// The `done` event for the current state.
    pub fn done_event(&self) -> StreamEvent {
        StreamEvent::done(self.full_response.clone(), self.tool_calls.clone())
    }

    pub fn apply(&mut self, event: RemoteEvent) -> ExchangeStep {
        match event {
            RemoteEvent::AnswerDelta(delta) => {
                if delta.is_empty() {
                    return ExchangeStep::Publish(Vec::new());
                }
                self.full_response.push_str(&delta);
                ExchangeStep::Publish(vec![StreamEvent::content(
                    delta,
                    self.full_response.clone(),
                )])
            }
            RemoteEvent::Title(title) => {
                let title = title.trim();
                if !title.is_empty() {
                    self.title = Some(title.to_string());
                }
                ExchangeStep::Publish(Vec::new())
            }
            RemoteEvent::ToolRequest(request) => {
                ExchangeStep::Publish(self.apply_tool_request(request).into_iter().collect())
            }
            RemoteEvent::ToolResponse(response) => {
                ExchangeStep::Publish(self.apply_tool_response(response).into_iter().collect())
            }
            RemoteEvent::Done => ExchangeStep::Finished,
            RemoteEvent::Error(message) => ExchangeStep::Failed(message),
        }
    }

    fn apply_tool_request(&mut self, request: ToolRequest) -> Option<StreamEvent> {
        if self.tool_calls.iter().any(|call| call.id == request.id) {
            return None;
        }

        let call = ToolCall::running(request.id, request.name, request.input);
        self.tool_calls.push(call.clone());
        Some(StreamEvent::tool_call(call))
    }

    fn apply_tool_response(&mut self, response: ToolResponse) -> Option<StreamEvent> {
        let Some(call) = self
            .tool_calls
            .iter_mut()
            .find(|call| call.id == response.id)
        else {
            tracing::debug!(tool_call_id = %response.id, "tool response for unknown call ignored");
            return None;
        };

        let next = if response.success {
            ToolCallStatus::Success
        } else {
            ToolCallStatus::Error
        };
        call.status = call.status.advance(next);
        call.tool_output = response.output;

        let updated = call.clone();
        Some(StreamEvent::tool_result(updated, self.tool_calls.clone()))
    }
}

/// Title to store after a successful exchange, if any.
///
/// A title reported by the agent always wins. Otherwise an untitled
/// conversation is named after the start of the first message.
pub fn resolve_title(
    remote_title: Option<&str>,
    current_title: Option<&str>,
    message: &str,
) -> Option<String> {
    if let Some(title) = remote_title {
        return Some(title.to_string());
    }

    let untitled = match current_title.map(str::trim) {
        None | Some("") => true,
        Some(title) => title == UNTITLED_CONVERSATION_TITLE,
    };
    if !untitled {
        return None;
    }

    let mut fallback = message
        .chars()
        .take(FALLBACK_TITLE_CHARS)
        .collect::<String>();
    if message.chars().count() > FALLBACK_TITLE_CHARS {
        fallback.push_str(FALLBACK_TITLE_ELLIPSIS);
    }
    Some(fallback)
}

#[cfg(test)]
mod tests {
    use agentdesk_protocol::StreamEventKind;

    use super::*;

    fn published(step: ExchangeStep) -> Vec<StreamEvent> {
        match step {
            ExchangeStep::Publish(events) => events,
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn content_events_carry_delta_and_accumulated_text() {
        let mut exchange = ExchangeAccumulator::new();

        published(exchange.apply(RemoteEvent::AnswerDelta("Hel".to_string())));
        let events = published(exchange.apply(RemoteEvent::AnswerDelta("lo".to_string())));

        assert_eq!(events, vec![StreamEvent::content("lo", "Hello")]);
        assert!(published(exchange.apply(RemoteEvent::AnswerDelta(String::new()))).is_empty());
        assert_eq!(exchange.full_response(), "Hello");
    }

    #[test]
    fn duplicate_tool_requests_are_ignored() {
        let mut exchange = ExchangeAccumulator::new();
        let request = ToolRequest {
            id: "c1".to_string(),
            name: "search".to_string(),
            input: "{}".to_string(),
        };

        let first = published(exchange.apply(RemoteEvent::ToolRequest(request.clone())));
        let second = published(exchange.apply(RemoteEvent::ToolRequest(request)));

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_type, StreamEventKind::ToolCall);
        assert!(second.is_empty());
        assert_eq!(exchange.tool_calls().len(), 1);
    }

    #[test]
    fn tool_response_publishes_full_set() {
        let mut exchange = ExchangeAccumulator::new();
        for id in ["c1", "c2"] {
            exchange.apply(RemoteEvent::ToolRequest(ToolRequest {
                id: id.to_string(),
                name: "search".to_string(),
                input: String::new(),
            }));
        }

        let events = published(exchange.apply(RemoteEvent::ToolResponse(ToolResponse {
            id: "c2".to_string(),
            success: false,
            output: Some("boom".to_string()),
        })));

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, StreamEventKind::ToolResult);
        let calls = event.tool_calls.as_ref().expect("full set");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].status, ToolCallStatus::Running);
        assert_eq!(calls[1].status, ToolCallStatus::Error);
        assert_eq!(calls[1].tool_output.as_deref(), Some("boom"));
    }

    #[test]
    fn terminal_remote_events_end_the_exchange() {
        let mut exchange = ExchangeAccumulator::new();

        assert_eq!(exchange.apply(RemoteEvent::Done), ExchangeStep::Finished);
        assert_eq!(
            exchange.apply(RemoteEvent::Error("boom".to_string())),
            ExchangeStep::Failed("boom".to_string())
        );
    }

    #[test]
    fn remote_title_wins_over_everything() {
        assert_eq!(
            resolve_title(Some("From agent"), Some("Mine"), "hello"),
            Some("From agent".to_string())
        );
    }

    #[test]
    fn untitled_conversations_get_a_fallback_title() {
        assert_eq!(resolve_title(None, None, "hello"), Some("hello".to_string()));
        assert_eq!(
            resolve_title(None, Some(UNTITLED_CONVERSATION_TITLE), "hello"),
            Some("hello".to_string())
        );
        assert_eq!(
            resolve_title(None, None, "abcdefghijklmnopqrstuvwxyz0123456789"),
            Some("abcdefghijklmnopqrstuvwxyz0123...".to_string())
        );
        assert_eq!(resolve_title(None, Some("Kept"), "hello"), None);
    }
}
