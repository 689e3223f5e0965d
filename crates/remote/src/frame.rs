use serde_json::Value;

use super::agent::{RemoteEvent, ToolRequest, ToolResponse};

/// Tool outputs above this many bytes are cut before they reach storage.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 1_000_000;
pub const TRUNCATION_SUFFIX: &str = "...(truncated)";

const UNKNOWN_TOOL_NAME: &str = "Unknown";

/// Decodes one SSE `data` payload into frames.
///
/// Servers sometimes put several JSON documents into consecutive `data:`
/// lines of a single event, so a payload that does not parse as a whole is
/// retried line by line. Undecodable lines are skipped.
pub fn decode_data(data: &str) -> Vec<Value> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Ok(frame) = serde_json::from_str::<Value>(trimmed) {
        return vec![frame];
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(frame) => Some(frame),
            Err(error) => {
                tracing::debug!(error = %error, line_len = line.len(), "skipped undecodable agent frame");
                None
            }
        })
        .collect()
}

/// Maps one decoded frame to the remote events it carries, in frame order:
/// answer text, title, tool request, tool response, legacy tool calls.
pub fn parse_frame(frame: &Value) -> Vec<RemoteEvent> {
    let mut events = Vec::new();
    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or("");

    if let Some(answer) = answer_text(frame, frame_type)
        && !answer.is_empty()
    {
        events.push(RemoteEvent::AnswerDelta(answer.to_string()));
    }

    if let Some(title) = title_text(frame, frame_type) {
        events.push(RemoteEvent::Title(title.to_string()));
    }

    match frame_type {
        "tool_request" => {
            if let Some(request) = tool_request(frame) {
                events.push(RemoteEvent::ToolRequest(request));
            }
        }
        "tool_response" => {
            if let Some(response) = tool_response(frame) {
                events.push(RemoteEvent::ToolResponse(response));
            }
        }
        _ => {}
    }

    events.extend(legacy_tool_calls(frame).map(RemoteEvent::ToolRequest));
    events
}

fn answer_text<'a>(frame: &'a Value, frame_type: &str) -> Option<&'a str> {
    if let Some(answer) = frame.get("answer").and_then(Value::as_str) {
        return Some(answer);
    }

    let content = frame.get("content")?;
    if let Some(answer) = content.get("answer").and_then(Value::as_str) {
        return Some(answer);
    }

    let from_assistant = frame.get("role").and_then(Value::as_str) == Some("assistant");
    if frame_type == "answer" || from_assistant {
        return content.as_str();
    }

    None
}

fn title_text<'a>(frame: &'a Value, frame_type: &str) -> Option<&'a str> {
    if let Some(title) = frame.get("title").and_then(Value::as_str) {
        return Some(title);
    }

    if frame_type == "title" {
        return frame.get("content").and_then(Value::as_str);
    }

    frame
        .get("content")
        .and_then(|content| content.get("title"))
        .and_then(Value::as_str)
}

fn tool_request(frame: &Value) -> Option<ToolRequest> {
    let request = frame.get("content")?.get("tool_request")?;
    let id = request.get("tool_call_id").and_then(Value::as_str)?;
    let name = request
        .get("tool_name")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_TOOL_NAME);
    let input = request
        .get("parameters")
        .map(|parameters| serde_json::to_string_pretty(parameters).unwrap_or_default())
        .unwrap_or_default();

    Some(ToolRequest {
        id: id.to_string(),
        name: name.to_string(),
        input,
    })
}

fn tool_response(frame: &Value) -> Option<ToolResponse> {
    let response = frame.get("content")?.get("tool_response")?;
    let id = response.get("tool_call_id").and_then(Value::as_str)?;

    // A missing code counts as success.
    let success = match response.get("code") {
        None | Some(Value::Null) => true,
        Some(Value::String(code)) => code == "0",
        Some(Value::Number(code)) => code.as_i64() == Some(0),
        Some(_) => false,
    };

    let output = match response.get("result") {
        None | Some(Value::Null) => None,
        Some(Value::String(result)) => Some(truncate_output(result)),
        Some(other) => Some(truncate_output(&other.to_string())),
    };

    Some(ToolResponse {
        id: id.to_string(),
        success,
        output,
    })
}

fn legacy_tool_calls(frame: &Value) -> impl Iterator<Item = ToolRequest> + '_ {
    let nested = frame.get("content").filter(|content| content.is_object());

    [Some(frame), nested]
        .into_iter()
        .flatten()
        .filter_map(|target| target.get("tool_calls").and_then(Value::as_array))
        .flatten()
        .filter_map(|call| {
            let id = call.get("id").and_then(Value::as_str)?;
            Some(ToolRequest {
                id: id.to_string(),
                name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_TOOL_NAME)
                    .to_string(),
                input: call.get("args").map(Value::to_string).unwrap_or_default(),
            })
        })
}

/// Cuts `raw` to at most [`MAX_TOOL_OUTPUT_BYTES`] on a char boundary.
pub fn truncate_output(raw: &str) -> String {
    if raw.len() <= MAX_TOOL_OUTPUT_BYTES {
        return raw.to_string();
    }

    let mut end = MAX_TOOL_OUTPUT_BYTES;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }

    let mut truncated = String::with_capacity(end + TRUNCATION_SUFFIX.len());
    truncated.push_str(&raw[..end]);
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}
