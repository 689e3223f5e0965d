use agentdesk_protocol::{Message, StreamEvent, StreamEventKind, ToolCall};

/// Applies one stream event to the in-flight assistant message.
///
/// Never mutates `current`; events that carry nothing applicable return an
/// unchanged copy.
pub fn interpret(event: &StreamEvent, current: &Message) -> Message {
    let mut next = current.clone();

    match event.event_type {
        StreamEventKind::Content => {
            // Accumulated text, never a delta.
            if let Some(full_content) = &event.full_content {
                next.content.clone_from(full_content);
            }
        }
        StreamEventKind::ToolCall => {
            // Appended as emitted; the backend dedups requests by id upstream.
            if let Some(tool_call) = &event.tool_call {
                next.tool_calls.push(tool_call.clone());
            }
        }
        StreamEventKind::ToolResult => {
            if let Some(tool_calls) = &event.tool_calls {
                next.tool_calls = replace_tool_calls(&current.tool_calls, tool_calls);
            }
        }
        StreamEventKind::Done => {}
        StreamEventKind::Error => {
            tracing::warn!(
                conversation_id = %current.conversation_id,
                message = event.content.as_deref().unwrap_or_default(),
                "agent reported an error mid-exchange"
            );
        }
        StreamEventKind::Unknown => {
            tracing::debug!(conversation_id = %current.conversation_id, "ignored unknown stream event");
        }
    }

    next
}

// Wholesale replacement that still refuses to move a finished call back to running.
fn replace_tool_calls(previous: &[ToolCall], incoming: &[ToolCall]) -> Vec<ToolCall> {
    incoming
        .iter()
        .map(|call| match previous.iter().find(|old| old.id == call.id) {
            Some(old) => {
                let mut merged = old.clone();
                merged.merge(call.clone());
                merged
            }
            None => call.clone(),
        })
        .collect()
}
