use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

/// Connection details of one remote agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub api_url: String,
    pub auth_token: String,
    pub project_id: String,
}

impl AgentEndpoint {
    pub fn new(
        api_url: impl Into<String>,
        auth_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into().trim().to_string(),
            auth_token: auth_token.into().trim().to_string(),
            project_id: project_id.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub endpoint: AgentEndpoint,
    pub prompt: String,
}

impl QueryRequest {
    pub fn new(endpoint: AgentEndpoint, prompt: impl Into<String>) -> Self {
        Self {
            endpoint,
            prompt: prompt.into(),
        }
    }

    pub(crate) fn body(&self) -> QueryBody<'_> {
        QueryBody {
            request_type: "query",
            project_id: &self.endpoint.project_id,
            content: QueryContent {
                query: QueryPrompt {
                    prompt: vec![PromptPart {
                        part_type: "text",
                        content: PromptText { text: &self.prompt },
                    }],
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryBody<'a> {
    #[serde(rename = "type")]
    request_type: &'static str,
    project_id: &'a str,
    content: QueryContent<'a>,
}

#[derive(Debug, Serialize)]
struct QueryContent<'a> {
    query: QueryPrompt<'a>,
}

#[derive(Debug, Serialize)]
struct QueryPrompt<'a> {
    prompt: Vec<PromptPart<'a>>,
}

#[derive(Debug, Serialize)]
struct PromptPart<'a> {
    #[serde(rename = "type")]
    part_type: &'static str,
    content: PromptText<'a>,
}

#[derive(Debug, Serialize)]
struct PromptText<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub id: String,
    pub success: bool,
    pub output: Option<String>,
}

/// One decoded unit of progress from a remote agent stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    AnswerDelta(String),
    Title(String),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
    Done,
    Error(String),
}

pub type RemoteWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RemoteError {
    #[snafu(display("agent endpoint is missing its {field}"))]
    IncompleteEndpoint {
        stage: &'static str,
        field: &'static str,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("agent request failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("API request failed: {status}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("agent stream failed on `{stage}`: {message}"))]
    Stream {
        stage: &'static str,
        message: String,
    },
}

/// Receiving half of a remote stream. Dropping it cancels the worker.
pub struct RemoteEventStream {
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct RemoteStreamHandle {
    pub stream: RemoteEventStream,
    pub worker: RemoteWorker,
}

impl RemoteEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<RemoteEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RemoteEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for RemoteEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Streaming access to remote agents.
///
/// The returned worker must be polled for events to arrive; it ends with
/// exactly one `Done` or `Error` unless the stream is cancelled first.
pub trait AgentClient: Send + Sync {
    fn stream_query(&self, request: QueryRequest) -> RemoteResult<RemoteStreamHandle>;
}

pub fn make_event_stream() -> (
    mpsc::UnboundedSender<RemoteEvent>,
    RemoteEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        RemoteEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_body_matches_agent_api_shape() {
        let request = QueryRequest::new(
            AgentEndpoint::new("https://agent.example/run", "token", " bot-7 "),
            "hello",
        );

        let json = serde_json::to_value(request.body()).expect("encode body");

        assert_eq!(
            json,
            serde_json::json!({
                "type": "query",
                "project_id": "bot-7",
                "content": {
                    "query": {
                        "prompt": [{ "type": "text", "content": { "text": "hello" } }]
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn dropping_stream_signals_cancel() {
        let (_event_tx, stream, cancel_rx) = make_event_stream();

        drop(stream);

        assert!(cancel_rx.await.is_ok());
    }
}
