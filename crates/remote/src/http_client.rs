use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::agent::{
    AgentClient, BuildHttpClientSnafu, IncompleteEndpointSnafu, QueryRequest, RemoteError,
    RemoteEvent, RemoteResult, RemoteStreamHandle, RemoteWorker, RequestSnafu, StatusSnafu,
    make_event_stream,
};
use super::frame::{decode_data, parse_frame};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// [`AgentClient`] speaking the streaming query API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// `read_timeout` bounds the silence between two body chunks, not the
    /// length of the whole stream.
    pub fn new(read_timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .context(BuildHttpClientSnafu {
                stage: "http-agent-client-new",
            })?;
        Ok(Self { client })
    }

    pub fn with_defaults() -> RemoteResult<Self> {
        Self::new(DEFAULT_READ_TIMEOUT)
    }

    async fn open_stream(
        client: &reqwest::Client,
        request: &QueryRequest,
    ) -> RemoteResult<reqwest::Response> {
        let response = client
            .post(&request.endpoint.api_url)
            .bearer_auth(&request.endpoint.auth_token)
            .json(&request.body())
            .send()
            .await
            .context(RequestSnafu {
                stage: "open-stream-send",
            })?;

        let status = response.status();
        if !status.is_success() {
            // The body is diagnostic only; a failed read must not mask the status.
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                stage: "open-stream-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<RemoteEvent>, error: RemoteError) {
        let _ = event_tx.send(RemoteEvent::Error(error.to_string()));
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        request: QueryRequest,
        event_tx: mpsc::UnboundedSender<RemoteEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(api_url = %request.endpoint.api_url, "agent stream cancelled before response");
                return;
            }
            opened = Self::open_stream(&client, &request) => opened,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    api_url = %request.endpoint.api_url,
                    error = %error,
                    "failed to open agent stream"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut events = response.bytes_stream().eventsource();
        let mut frame_count = 0_usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(frame_count, "agent stream cancelled");
                    return;
                }
                next_event = events.next() => {
                    match next_event {
                        Some(Ok(event)) => {
                            for frame in decode_data(&event.data) {
                                frame_count += 1;
                                for mapped in parse_frame(&frame) {
                                    if event_tx.send(mapped).is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                frame_count,
                                error = %source,
                                "agent stream emitted an error chunk"
                            );
                            let error = RemoteError::Stream {
                                stage: "stream-chunk",
                                message: source.to_string(),
                            };
                            Self::emit_error_event(&event_tx, error);
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(frame_count, "agent stream finished");
        let _ = event_tx.send(RemoteEvent::Done);
    }
}

impl AgentClient for HttpAgentClient {
    fn stream_query(&self, request: QueryRequest) -> RemoteResult<RemoteStreamHandle> {
        ensure!(
            !request.endpoint.api_url.is_empty(),
            IncompleteEndpointSnafu {
                stage: "stream-query",
                field: "api_url",
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: RemoteWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(RemoteStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::agent::{AgentEndpoint, ToolRequest};

    async fn collect(client: &HttpAgentClient, request: QueryRequest) -> Vec<RemoteEvent> {
        let RemoteStreamHandle { mut stream, worker } =
            client.stream_query(request).expect("open handle");
        worker.await;

        let mut events = Vec::new();
        while let Some(event) = stream.try_recv() {
            events.push(event);
        }
        events
    }

    fn request_for(server: &MockServer) -> QueryRequest {
        QueryRequest::new(
            AgentEndpoint::new(format!("{}/stream_run", server.uri()), "secret", "bot-1"),
            "hi",
        )
    }

    #[tokio::test]
    async fn streams_frames_in_order_and_finishes_with_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"answer\",\"content\":\"Hel\"}\n\n",
            "data: {\"type\":\"tool_request\",\"content\":{\"tool_request\":{\"tool_call_id\":\"c1\",\"tool_name\":\"search\",\"parameters\":{}}}}\n\n",
            "data: not json\n\n",
            "data: {\"answer\":\"lo\"}\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/stream_run"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "type": "query",
                "project_id": "bot-1"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_defaults().expect("client");
        let events = collect(&client, request_for(&server)).await;

        assert_eq!(
            events,
            vec![
                RemoteEvent::AnswerDelta("Hel".to_string()),
                RemoteEvent::ToolRequest(ToolRequest {
                    id: "c1".to_string(),
                    name: "search".to_string(),
                    input: "{}".to_string(),
                }),
                RemoteEvent::AnswerDelta("lo".to_string()),
                RemoteEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_ends_with_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_defaults().expect("client");
        let events = collect(&client, request_for(&server)).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            RemoteEvent::Error(message) => assert!(message.contains("401")),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn empty_api_url_is_rejected_up_front() {
        let client = HttpAgentClient::with_defaults().expect("client");
        let request = QueryRequest::new(AgentEndpoint::new("  ", "token", "bot"), "hi");

        let result = client.stream_query(request);

        assert!(matches!(
            result,
            Err(RemoteError::IncompleteEndpoint { field: "api_url", .. })
        ));
    }
}
