use std::sync::Arc;

use agentdesk_backend::AgentService;
use agentdesk_protocol::{
    Backend, BackendError, NewAgent, Role, SendRequest, StreamEvent, StreamEventKind, Subscription,
    ToolCallStatus,
};
use agentdesk_remote::HttpAgentClient;
use agentdesk_storage::SqliteStorage;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn service() -> AgentService {
    let storage = SqliteStorage::open_in_memory().await.expect("open storage");
    let client = HttpAgentClient::with_defaults().expect("http client");
    AgentService::new(Arc::new(storage), Arc::new(client))
}

async fn mount_stream(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path("/stream_run"))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body.to_string()),
        )
        .mount(server)
        .await;
}

async fn drain_until_terminal(subscription: &mut Subscription) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.recv().await {
        let terminal = matches!(
            event.event_type,
            StreamEventKind::Done | StreamEventKind::Error
        );
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn sse(frames: &[&str]) -> String {
    frames
        .iter()
        .map(|frame| format!("data: {frame}\n\n"))
        .collect()
}

#[tokio::test]
async fn send_publishes_progress_and_persists_the_exchange() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"type":"answer","content":"Hel"}"#,
        r#"{"type":"tool_request","content":{"tool_request":{"tool_call_id":"c1","tool_name":"search","parameters":{"q":"x"}}}}"#,
        r#"{"type":"tool_response","content":{"tool_response":{"tool_call_id":"c1","code":"0","result":"found"}}}"#,
        r#"{"answer":"lo"}"#,
    ]);
    mount_stream(&server, 200, &body).await;

    let service = service().await;
    let agent = service
        .create_agent(NewAgent::new(
            "helper",
            format!("{}/stream_run", server.uri()),
            "token",
            "bot-1",
        ))
        .await
        .expect("agent");
    let conversation = service
        .create_conversation(agent.id, None)
        .await
        .expect("conversation");

    let mut subscription = service.subscribe(conversation.id);
    let response = service
        .send_message(SendRequest::new(
            agent.id,
            conversation.id,
            "Where did I leave my keys this morning?",
        ))
        .await
        .expect("send");
    assert_eq!(response, "Hello");

    let events = drain_until_terminal(&mut subscription).await;
    let kinds = events.iter().map(|event| event.event_type).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            StreamEventKind::Content,
            StreamEventKind::ToolCall,
            StreamEventKind::ToolResult,
            StreamEventKind::Content,
            StreamEventKind::Done,
        ]
    );
    assert_eq!(events[3].full_content.as_deref(), Some("Hello"));

    let messages = service.list_messages(conversation.id).await.expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[1].tool_calls[0].status, ToolCallStatus::Success);
    assert!(messages.iter().all(|message| !message.is_placeholder()));

    let conversations = service
        .list_conversations(agent.id)
        .await
        .expect("conversations");
    assert_eq!(
        conversations[0].title.as_deref(),
        Some("Where did I leave my keys this...")
    );
}

#[tokio::test]
async fn remote_title_replaces_existing_title() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"answer":"Sure."}"#,
        r#"{"type":"title","content":"Packing list"}"#,
    ]);
    mount_stream(&server, 200, &body).await;

    let service = service().await;
    let agent = service
        .create_agent(NewAgent::new(
            "helper",
            format!("{}/stream_run", server.uri()),
            "token",
            "bot-1",
        ))
        .await
        .expect("agent");
    let conversation = service
        .create_conversation(agent.id, Some("Mine".to_string()))
        .await
        .expect("conversation");

    service
        .send_message(SendRequest::new(agent.id, conversation.id, "help me pack"))
        .await
        .expect("send");

    let conversations = service
        .list_conversations(agent.id)
        .await
        .expect("conversations");
    assert_eq!(conversations[0].title.as_deref(), Some("Packing list"));
}

#[tokio::test]
async fn failed_request_emits_error_and_keeps_only_the_user_message() {
    let server = MockServer::start().await;
    mount_stream(&server, 500, "upstream down").await;

    let service = service().await;
    let agent = service
        .create_agent(NewAgent::new(
            "helper",
            format!("{}/stream_run", server.uri()),
            "token",
            "bot-1",
        ))
        .await
        .expect("agent");
    let conversation = service
        .create_conversation(agent.id, None)
        .await
        .expect("conversation");

    let mut subscription = service.subscribe(conversation.id);
    let result = service
        .send_message(SendRequest::new(agent.id, conversation.id, "hi"))
        .await;
    assert!(matches!(result, Err(BackendError::Remote { .. })));

    let events = drain_until_terminal(&mut subscription).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, StreamEventKind::Error);
    assert!(
        events[0]
            .content
            .as_deref()
            .is_some_and(|message| message.contains("500"))
    );

    let messages = service.list_messages(conversation.id).await.expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);

    let conversations = service
        .list_conversations(agent.id)
        .await
        .expect("conversations");
    assert_eq!(conversations[0].title, None);
}

#[tokio::test]
async fn sending_for_unknown_agent_is_not_found() {
    let service = service().await;
    let agent = service
        .create_agent(NewAgent::new("helper", "http://127.0.0.1:9/", "token", "bot"))
        .await
        .expect("agent");
    let conversation = service
        .create_conversation(agent.id, None)
        .await
        .expect("conversation");
    service.delete_agent(agent.id).await.expect("delete");

    let result = service
        .send_message(SendRequest::new(agent.id, conversation.id, "hi"))
        .await;

    assert!(matches!(
        result,
        Err(BackendError::NotFound { entity: "agent", .. })
    ));
}
