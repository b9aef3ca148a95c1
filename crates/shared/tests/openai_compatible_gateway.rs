use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use shared::llm::{
    ChatMessage, LlmGateway, LlmGatewayError, LlmGatewayRequest, OpenAiCompatibleConfig,
    OpenAiCompatibleGateway, ProviderKind,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone)]
struct MockReply {
    status: StatusCode,
    body: Value,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
struct TestServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    seen_payloads: Arc<Mutex<Vec<Value>>>,
    seen_auth_headers: Arc<Mutex<Vec<String>>>,
}

impl TestServerState {
    fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            seen_payloads: Arc::new(Mutex::new(Vec::new())),
            seen_auth_headers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[tokio::test]
async fn sends_history_with_bearer_key_and_parses_reply() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::OK,
        body: success_response_body("  Try our Margherita Pizza, it's a classic!  "),
        delay: None,
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway =
        OpenAiCompatibleGateway::new(config_for(url, Duration::from_secs(5))).expect("gateway");
    let response = gateway
        .generate(pizza_request())
        .await
        .expect("provider reply should parse");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert_eq!(gateway.provider(), "openai");
    assert_eq!(response.content, "Try our Margherita Pizza, it's a classic!");
    assert_eq!(response.model, "gpt-test");
    assert_eq!(response.provider_request_id.as_deref(), Some("chatcmpl-1"));
    assert_eq!(
        response.usage.map(|usage| usage.completion_tokens),
        Some(9)
    );

    let seen_auth_headers = state.seen_auth_headers.lock().await.clone();
    assert_eq!(seen_auth_headers, vec!["Bearer test-openai-key".to_string()]);

    let payloads = state.seen_payloads.lock().await.clone();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload["model"], "gpt-test");
    assert_eq!(payload["max_tokens"], 80);
    let roles = payload["messages"]
        .as_array()
        .expect("messages array")
        .iter()
        .map(|message| message["role"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(payload["messages"][3]["content"], "Anything with cheese?");
}

#[tokio::test]
async fn non_success_status_is_a_provider_failure() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::TOO_MANY_REQUESTS,
        body: json!({"error": {"code": "rate_limit_exceeded", "type": "requests"}}),
        delay: None,
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway =
        OpenAiCompatibleGateway::new(config_for(url, Duration::from_secs(5))).expect("gateway");
    let err = gateway
        .generate(pizza_request())
        .await
        .expect_err("429 should fail");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(
        matches!(err, LlmGatewayError::ProviderFailure(ref message)
            if message == "status=429 code=rate_limit_exceeded"),
        "unexpected error: {err:?}"
    );
    assert_eq!(state.seen_payloads.lock().await.len(), 1, "no retry expected");
}

#[tokio::test]
async fn malformed_body_is_an_invalid_payload() {
    let state = TestServerState::with_replies(vec![
        MockReply {
            status: StatusCode::OK,
            body: json!({"id": "chatcmpl-2", "choices": []}),
            delay: None,
        },
        MockReply {
            status: StatusCode::OK,
            body: success_response_body("   "),
            delay: None,
        },
    ]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway =
        OpenAiCompatibleGateway::new(config_for(url, Duration::from_secs(5))).expect("gateway");
    let missing_choice = gateway.generate(pizza_request()).await;
    let empty_content = gateway.generate(pizza_request()).await;

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(matches!(
        missing_choice,
        Err(LlmGatewayError::InvalidProviderPayload(ref reason)) if reason == "missing_choice"
    ));
    assert!(matches!(
        empty_content,
        Err(LlmGatewayError::InvalidProviderPayload(ref reason)) if reason == "empty_content"
    ));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::OK,
        body: success_response_body("too late"),
        delay: Some(Duration::from_millis(600)),
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenAiCompatibleGateway::new(config_for(url, Duration::from_millis(100)))
        .expect("gateway");
    let err = gateway
        .generate(pizza_request())
        .await
        .expect_err("slow provider should time out");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(matches!(err, LlmGatewayError::Timeout), "got {err:?}");
}

fn pizza_request() -> LlmGatewayRequest {
    LlmGatewayRequest {
        system_prompt: "You are Sophie, the AI assistant for Luigi's.".to_string(),
        messages: vec![
            ChatMessage::user("Do you have pizza?"),
            ChatMessage::assistant("Yes! Our Margherita Pizza is a favourite."),
            ChatMessage::user("Anything with cheese?"),
        ],
        max_output_tokens: 80,
        temperature: 0.8,
    }
}

fn config_for(chat_completions_url: String, timeout: Duration) -> OpenAiCompatibleConfig {
    OpenAiCompatibleConfig {
        provider: ProviderKind::OpenAi,
        chat_completions_url,
        api_key: "test-openai-key".to_string(),
        model: "gpt-test".to_string(),
        timeout,
    }
}

fn success_response_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-test",
        "choices": [
            {
                "message": {
                    "role": "assistant",
                    "content": content
                }
            }
        ],
        "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 9,
            "total_tokens": 129
        }
    })
}

async fn spawn_test_server(
    state: TestServerState,
) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/v1/chat/completions", post(test_chat_completions_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let local_addr = listener
        .local_addr()
        .expect("listener address should resolve");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        server.await.expect("test server should run");
    });

    (
        format!("http://{local_addr}/v1/chat/completions"),
        shutdown_tx,
        server_task,
    )
}

async fn test_chat_completions_handler(
    State(state): State<TestServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.seen_payloads.lock().await.push(payload);

    if let Some(value) = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
    {
        state.seen_auth_headers.lock().await.push(value.to_string());
    }

    let reply = state.replies.lock().await.pop_front().unwrap_or(MockReply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: json!({"error": {"code": "exhausted_test_replies"}}),
        delay: None,
    });

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    (reply.status, Json(reply.body))
}
