use paper_screener::llm::{verdict_json, AnthropicProvider, GeminiProvider, OpenAiProvider};
use paper_screener::{
    types::*, LlmProvider, PromptBuilder, RetryPolicy, ScreeningClient, ScreeningError, ScreeningRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn request(group: FeedGroup) -> ScreeningRequest {
    let entry = FeedEntry::new("https://journal.example.org/p/1", "Transformers for RNA splicing", group)
        .with_summary("We train a transformer on splice junctions.")
        .with_feed("https://journal.example.org/rss", "Journal");
    PromptBuilder::default().build("Deep learning for genomics.", &[], &[], &entry)
}

fn anthropic_body(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    })
}

fn openai_body(text: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    })
}

fn gemini_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}, "finishReason": "STOP"}]
    })
}

fn client(provider: Arc<dyn LlmProvider>, max_retries: u32) -> ScreeningClient {
    ScreeningClient::new(provider, RetryPolicy::immediate(max_retries))
}

#[tokio::test]
async fn test_anthropic_rate_limit_then_success() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"model": "claude-test", "max_tokens": 600})))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_body(&verdict_json(true, false))))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("test-key", "claude-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 2).screen(&request(FeedGroup::HighQuality)).await?;

    assert!(verdict.accepted);
    assert!(!verdict.degraded);
    assert_eq!(verdict.criteria.field_match.matched, Some(true));
    assert_eq!(verdict.criteria.method_match.matched, Some(false));
    Ok(())
}

#[tokio::test]
async fn test_openai_server_error_then_success() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(&verdict_json(true, false))))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", "gpt-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 2).screen(&request(FeedGroup::Other)).await?;

    // Other feeds need both criteria
    assert!(!verdict.accepted);
    assert!(!verdict.degraded);
    Ok(())
}

#[tokio::test]
async fn test_gemini_request_shape() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"maxOutputTokens": 600, "responseMimeType": "application/json"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(&verdict_json(true, true))))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("test-key", "gemini-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 0).screen(&request(FeedGroup::Other)).await?;

    assert!(verdict.accepted);
    assert_eq!(verdict.summary.problem.as_deref(), Some("mock problem"));
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("bad-key", "claude-test", TIMEOUT)?.with_base_url(server.uri());
    let err = client(Arc::new(provider), 3)
        .screen(&request(FeedGroup::HighQuality))
        .await
        .unwrap_err();

    match &err {
        ScreeningError::Auth { message, .. } => assert_eq!(message, "invalid x-api-key"),
        other => panic!("expected auth error, got {:?}", other),
    }
    assert!(err.is_fatal());
    Ok(())
}

#[tokio::test]
async fn test_gemini_invalid_key_is_auth() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("bad-key", "gemini-test", TIMEOUT)?.with_base_url(server.uri());
    let err = client(Arc::new(provider), 3)
        .screen(&request(FeedGroup::Other))
        .await
        .unwrap_err();

    assert!(matches!(err, ScreeningError::Auth { .. }));
    Ok(())
}

#[tokio::test]
async fn test_persistent_rate_limit_exhausts_retries() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", "gpt-test", TIMEOUT)?.with_base_url(server.uri());
    let err = client(Arc::new(provider), 2)
        .screen(&request(FeedGroup::Other))
        .await
        .unwrap_err();

    match err {
        ScreeningError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unparseable_body_is_degraded() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway page</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("test-key", "claude-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 2).screen(&request(FeedGroup::HighQuality)).await?;

    assert!(verdict.degraded);
    assert!(!verdict.accepted);
    assert_eq!(verdict.raw_model_output, "<html>gateway page</html>");
    Ok(())
}

#[tokio::test]
async fn test_blocked_answer_keeps_response_body() -> Result<()> {
    let server = MockServer::start().await;

    let blocked = json!({
        "candidates": [{"finishReason": "SAFETY", "safetyRatings": [{"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "probability": "HIGH"}]}],
        "promptFeedback": {"blockReason": "SAFETY"}
    });
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(blocked))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("test-key", "gemini-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 2).screen(&request(FeedGroup::HighQuality)).await?;

    assert!(verdict.degraded);
    assert!(!verdict.accepted);
    assert!(verdict.raw_model_output.contains("\"blockReason\":\"SAFETY\""));
    Ok(())
}

#[tokio::test]
async fn test_truncated_answer_keeps_response_body() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_02",
            "type": "message",
            "role": "assistant",
            "content": [],
            "stop_reason": "max_tokens"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("test-key", "claude-test", TIMEOUT)?.with_base_url(server.uri());
    let verdict = client(Arc::new(provider), 2).screen(&request(FeedGroup::HighQuality)).await?;

    assert!(verdict.degraded);
    assert!(verdict.raw_model_output.contains("max_tokens"));
    Ok(())
}
