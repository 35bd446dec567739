//! LLM Client: the single point of entry for all generation calls.
//!
//! ARCHITECTURAL RULE: No other module may call the Gemini API directly.
//! Callers depend on the `TextGenerator` trait; the concrete client is built
//! once in `main` and injected through `AppState`.
//!
//! Model, temperature and output cap are hardcoded to keep scoring stable
//! across deployments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod prompts;
pub mod retry;

use prompts::JSON_ONLY_SYSTEM;
use retry::{retry, RetryPolicy};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// The model used for every analysis stage.
pub const MODEL: &str = "gemini-1.5-flash";
/// Low temperature: the same resume should score the same way twice.
const TEMPERATURE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// 3 attempts total, sleeping 1s then 2s between them.
pub const INVOKE_RETRY: RetryPolicy = RetryPolicy::linear(3, Duration::from_secs(1));

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Response envelope missing {0}")]
    MissingEnvelope(String),
}

impl LlmError {
    /// Transport failures, throttling, server errors and malformed envelopes
    /// are worth another attempt. Other 4xx responses mean the request or key
    /// is wrong and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::MissingEnvelope(_) => true,
            LlmError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
        }
    }
}

/// Anything that turns a prompt into raw generated text.
///
/// Held in `AppState` as `Arc<dyn TextGenerator>`, so the pipeline can be
/// driven by a scripted double in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    system_instruction: RequestContent<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Every field is optional: providers drop pieces of the envelope on safety
/// blocks or truncation, and that must surface as `MissingEnvelope`, not as a
/// deserialization error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GenerateResponse {
    /// Concatenates the text parts of the first candidate.
    pub fn text(&self) -> Result<String, LlmError> {
        let candidate = self
            .candidates
            .as_deref()
            .and_then(|c| c.first())
            .ok_or_else(|| match self.block_reason() {
                Some(reason) => LlmError::MissingEnvelope(format!("candidates (blocked: {reason})")),
                None => LlmError::MissingEnvelope("candidates".to_string()),
            })?;

        let parts = candidate
            .content
            .as_ref()
            .and_then(|c| c.parts.as_deref())
            .ok_or_else(|| {
                let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
                LlmError::MissingEnvelope(format!("candidate content (finish reason: {reason})"))
            })?;

        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            return Err(LlmError::MissingEnvelope("candidate text".to_string()));
        }
        Ok(text)
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Wraps the Gemini `generateContent` endpoint with retry and envelope checks.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, GEMINI_API_BASE.to_string(), INVOKE_RETRY)
    }

    fn with_base_url(api_key: String, base_url: String, retry_policy: RetryPolicy) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            base_url,
            retry_policy,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, MODEL)
    }

    /// One request/response round trip, no retry.
    async fn generate_once(&self, prompt: &str) -> Result<String, LlmError> {
        let request_body = GenerateRequest {
            contents: vec![RequestContent {
                role: Some("user"),
                parts: vec![RequestPart { text: prompt }],
            }],
            system_instruction: RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: JSON_ONLY_SYSTEM,
                }],
            },
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: GenerateResponse = response.json().await?;
        if let Some(usage) = &envelope.usage_metadata {
            debug!(
                "LLM call succeeded: prompt_tokens={}, output_tokens={}",
                usage.prompt_token_count, usage.candidates_token_count
            );
        }

        envelope.text()
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        retry(&self.retry_policy, LlmError::is_transient, |_| {
            self.generate_once(prompt)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use axum::extract::State;
    use axum::http::{header, HeaderMap, StatusCode, Uri};

    use super::*;

    const OK_BODY: &str =
        r#"{"candidates":[{"content":{"parts":[{"text":"{\"score\": 80}"}]},"finishReason":"STOP"}]}"#;
    const OVERLOADED_BODY: &str = r#"{"error":{"code":503,"message":"The model is overloaded."}}"#;
    const NO_CANDIDATES_BODY: &str = r#"{"usageMetadata":{"promptTokenCount":12}}"#;
    const FAST_RETRY: RetryPolicy = RetryPolicy::linear(3, Duration::from_millis(10));

    /// Replies popped in order, one per request; counts every request.
    #[derive(Clone)]
    struct Script {
        replies: Arc<Mutex<VecDeque<(StatusCode, &'static str)>>>,
        hits: Arc<AtomicUsize>,
    }

    async fn scripted_reply(
        State(script): State<Script>,
        uri: Uri,
        headers: HeaderMap,
    ) -> (StatusCode, [(header::HeaderName, &'static str); 1], &'static str) {
        script.hits.fetch_add(1, Ordering::SeqCst);
        let json = [(header::CONTENT_TYPE, "application/json")];

        let expected_path = format!("/{MODEL}:generateContent");
        let key = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok());
        if uri.path() != expected_path || key != Some("test-key") {
            return (StatusCode::NOT_FOUND, json, r#"{"error":{"message":"wrong route"}}"#);
        }

        let (status, body) = script
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::GONE, r#"{"error":{"message":"script exhausted"}}"#));
        (status, json, body)
    }

    /// Serves the replies on an ephemeral local port.
    async fn gemini_stub(
        replies: Vec<(StatusCode, &'static str)>,
        policy: RetryPolicy,
    ) -> (GeminiClient, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let script = Script {
            replies: Arc::new(Mutex::new(replies.into())),
            hits: hits.clone(),
        };
        let app = axum::Router::new().fallback(scripted_reply).with_state(script);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client =
            GeminiClient::with_base_url("test-key".to_string(), format!("http://{addr}"), policy);
        (client, hits)
    }

    #[tokio::test]
    async fn test_invoke_retries_overloaded_model_then_succeeds() {
        let (client, hits) = gemini_stub(
            vec![
                (StatusCode::SERVICE_UNAVAILABLE, OVERLOADED_BODY),
                (StatusCode::SERVICE_UNAVAILABLE, OVERLOADED_BODY),
                (StatusCode::OK, OK_BODY),
            ],
            INVOKE_RETRY,
        )
        .await;

        let started = Instant::now();
        let text = client.invoke("analyze this").await.unwrap();

        assert_eq!(text, r#"{"score": 80}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= INVOKE_RETRY.total_backoff());
    }

    #[tokio::test]
    async fn test_invoke_gives_up_after_three_missing_envelopes() {
        let (client, hits) = gemini_stub(vec![(StatusCode::OK, NO_CANDIDATES_BODY); 3], FAST_RETRY).await;

        let err = client.invoke("analyze this").await.unwrap_err();

        assert!(matches!(err, LlmError::MissingEnvelope(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invoke_does_not_retry_bad_request() {
        let (client, hits) = gemini_stub(
            vec![
                (StatusCode::BAD_REQUEST, r#"{"error":{"code":400,"message":"API key not valid."}}"#),
                (StatusCode::OK, OK_BODY),
            ],
            FAST_RETRY,
        )
        .await;

        let err = client.invoke("analyze this").await.unwrap_err();

        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn envelope(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_joins_parts_of_first_candidate() {
        let env = envelope(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}],"role":"model"},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(env.text().unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_missing_candidates_is_envelope_error() {
        let err = envelope(r#"{"usageMetadata":{"promptTokenCount":10}}"#)
            .text()
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingEnvelope(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_blocked_prompt_reports_block_reason() {
        let err = envelope(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .text()
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_candidate_without_content_is_envelope_error() {
        let err = envelope(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#)
            .text()
            .unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn test_empty_text_parts_are_envelope_error() {
        let err = envelope(r#"{"candidates":[{"content":{"parts":[{}]}}]}"#)
            .text()
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingEnvelope(_)));
    }

    #[test]
    fn test_transient_classification() {
        let api = |status| LlmError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(503).is_transient());
        assert!(api(408).is_transient());
        assert!(!api(400).is_transient());
        assert!(!api(403).is_transient());
    }

    #[test]
    fn test_request_serializes_generation_config() {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: Some("user"),
                parts: vec![RequestPart { text: "hi" }],
            }],
            system_instruction: RequestContent {
                role: None,
                parts: vec![RequestPart { text: "sys" }],
            },
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_retry_policy_matches_documented_backoff() {
        assert_eq!(INVOKE_RETRY.max_attempts, 3);
        assert_eq!(INVOKE_RETRY.total_backoff(), Duration::from_secs(3));
    }
}
