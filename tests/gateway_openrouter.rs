use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argqual_harness::gateway::openrouter::{ChatProvider, OpenRouterAdapter};
use argqual_harness::gateway::{
    Attribution, ChatGateway, ChatModel, ChatRequest, FinishReason, GatewayConfig, Message,
    ProviderError, ProviderGateway,
};
use argqual_harness::rater::{GatewayRater, Rater};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenRouterAdapter {
    OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
        .unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new(
        ChatModel::openrouter("openai/gpt-3.5-turbo"),
        vec![Message::user("hi")],
        Attribution::new("test"),
    )
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 3 }
    })
}

#[tokio::test]
async fn openrouter_parses_success_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("2 - Medium")))
        .mount(&server)
        .await;

    let resp = adapter(&server).chat(&request()).await.unwrap();
    assert_eq!(resp.content, "2 - Medium");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 3);
}

#[tokio::test]
async fn openrouter_classifies_http_429_as_rate_limit_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request()).await.unwrap_err();
    match err {
        ProviderError::RateLimited {
            retry_after,
            context,
        } => {
            assert_eq!(retry_after, Duration::from_secs(60));
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_wait_is_capped_and_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(429).insert_header("retry-after", "30"),
            second: ResponseTemplate::new(200).set_body_json(completion("1 - Low")),
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(
        adapter(&server),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(0),
            max_retry_after: Duration::from_millis(10),
        },
    );

    let resp = gateway.chat(request()).await.unwrap();
    assert_eq!(resp.content, "1 - Low");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn job_id_is_sent_as_user() {
    let server = MockServer::start().await;
    let job = uuid::Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "user": job.to_string() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("2")))
        .mount(&server)
        .await;

    let req = ChatRequest::new(
        ChatModel::openrouter("openai/gpt-4"),
        vec![Message::user("hi")],
        Attribution::new("test").with_job(job),
    );
    let resp = adapter(&server).chat(&req).await.unwrap();
    assert_eq!(resp.content, "2");
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn provider_gateway_retries_on_retryable_errors_and_succeeds() {
    let server = MockServer::start().await;

    let first = ResponseTemplate::new(500).set_body_json(json!({
        "error": { "message": "transient error", "code": "internal" }
    }));
    let second = ResponseTemplate::new(200).set_body_json(completion("ok"));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first,
            second,
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(
        adapter(&server),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(0),
            ..GatewayConfig::default()
        },
    );

    let resp = gateway.chat(request()).await.unwrap();
    assert_eq!(resp.content, "ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn provider_gateway_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "bad model" }
        })))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(
        adapter(&server),
        GatewayConfig {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(0),
            ..GatewayConfig::default()
        },
    );

    let err = gateway.chat(request()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn gateway_rater_sends_sampling_settings_and_keeps_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-3.5-turbo",
            "temperature": 0.3,
            "max_tokens": 256
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("3 - High")))
        .mount(&server)
        .await;

    let gateway: Arc<dyn ChatGateway> =
        Arc::new(ProviderGateway::with_config(adapter(&server), GatewayConfig::default()));
    let rater = GatewayRater::new("GPT3", ChatModel::openrouter("openai/gpt-3.5-turbo"), gateway)
        .concurrency(2);

    let prompts: Vec<String> = (0..3).map(|i| format!("prompt {i}")).collect();
    let out = rater.generate_all(&prompts).await;
    assert_eq!(out.len(), 3);
    assert!(out.iter().all(|r| r.as_deref().ok() == Some("3 - High")));
    assert_eq!(rater.name(), "GPT3");
}
