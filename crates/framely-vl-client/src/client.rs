//! Chat-completions client and strict-JSON response handling.

use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use framely_models::ReasoningPayload;

pub type VlResult<T> = Result<T, VlError>;

#[derive(Debug, thiserror::Error)]
pub enum VlError {
    #[error("VL endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("VL endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("VL reply failed strict parsing: {0}")]
    ParseFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VlError {
    /// Transport-level failures are retried with backoff; parse failures
    /// get exactly one stricter re-prompt instead.
    pub fn is_transport(&self) -> bool {
        matches!(self, VlError::Unreachable(_) | VlError::Http { status: 500..=599, .. })
    }
}

/// VL client configuration.
#[derive(Debug, Clone)]
pub struct VlConfig {
    /// Base URL of the chat-completions endpoint.
    pub api_base: String,
    /// Model name sent with each request.
    pub model: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Transport attempts (first try included).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (1s -> 2s -> 4s by default).
    pub base_delay: Duration,
}

impl Default for VlConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8001/v1".to_string(),
            model: "qwen2-vl-7b-instruct".to_string(),
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl VlConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            api_base: std::env::var("VL_API_BASE").unwrap_or(base.api_base),
            model: std::env::var("VL_MODEL").unwrap_or(base.model),
            request_timeout: Duration::from_secs(
                std::env::var("VL_REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_attempts: base.max_attempts,
            base_delay: base.base_delay,
        }
    }
}

/// Per-shot reasoning request assembled by the scheduler.
#[derive(Debug, Clone)]
pub struct ShotReasoningRequest {
    pub shot_id: u32,
    /// Sampled frame references (paths or URLs), evenly spaced.
    pub frame_refs: Vec<String>,
    /// Compact summary of Phase A/B detector outputs.
    pub detector_summary: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are a film analysis assistant. Reply with a single JSON object \
matching this schema and nothing else: {\"summary\": string, \"mood\": string, \
\"intent\": string, \"composition_notes\": [string], \"transition_guess\": string}. \
No prose, no markdown fences.";

const STRICT_SYSTEM_PROMPT: &str = "Your previous reply was not valid JSON. Reply with ONLY a \
JSON object with exactly the keys summary, mood, intent, composition_notes (array of strings) \
and transition_guess (string). Do not wrap it in markdown. Do not add any other text.";

/// VL reasoning client.
pub struct VlClient {
    config: VlConfig,
    client: Client,
}

impl VlClient {
    pub fn new(config: VlConfig) -> VlResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VlError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> VlResult<Self> {
        Self::new(VlConfig::from_env())
    }

    /// Model name sent with each request.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Probe the endpoint's model listing.
    pub async fn health(&self) -> bool {
        let url = format!("{}/models", self.config.api_base.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Request per-shot reasoning.
    ///
    /// Transport errors are retried `max_attempts` times with exponential
    /// backoff; a syntactically invalid reply gets one stricter re-prompt
    /// before the call fails with [`VlError::ParseFailed`].
    pub async fn reason_shot(&self, request: &ShotReasoningRequest) -> VlResult<ReasoningPayload> {
        let reply = self.call_with_backoff(request, SYSTEM_PROMPT).await?;
        match parse_strict(&reply) {
            Ok(payload) => Ok(payload),
            Err(first_err) => {
                warn!(
                    shot_id = request.shot_id,
                    error = %first_err,
                    "VL reply failed strict parsing, re-prompting once"
                );
                let reply = self.call_with_backoff(request, STRICT_SYSTEM_PROMPT).await?;
                parse_strict(&reply).map_err(|e| {
                    VlError::ParseFailed(format!("after strict re-prompt: {e}"))
                })
            }
        }
    }

    async fn call_with_backoff(
        &self,
        request: &ShotReasoningRequest,
        system_prompt: &str,
    ) -> VlResult<String> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(request, system_prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transport() && attempt + 1 < self.config.max_attempts => {
                    attempt += 1;
                    let delay = self.config.base_delay.saturating_mul(2u32.pow(attempt - 1));
                    let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 4);
                    debug!(
                        shot_id = request.shot_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64 + jitter,
                        "VL transport error, backing off: {e}"
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(
        &self,
        request: &ShotReasoningRequest,
        system_prompt: &str,
    ) -> VlResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: build_user_prompt(request) },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VlError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VlError::Http { status: status.as_u16(), body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VlError::ParseFailed(format!("chat envelope: {e}")))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| VlError::ParseFailed("no choices in reply".into()))?;

        info!(shot_id = request.shot_id, bytes = content.len(), "VL reply received");
        Ok(content)
    }
}

fn build_user_prompt(request: &ShotReasoningRequest) -> String {
    format!(
        "Analyze shot {shot} of a video.\n\n\
         Sampled frames (temporal order):\n{frames}\n\n\
         Detector findings for this shot:\n{summary}\n\n\
         Describe the shot: what happens (summary), the emotional register \
         (mood), the likely editorial purpose (intent), notable composition \
         choices (composition_notes), and your best guess at the transition \
         into the next shot (transition_guess).",
        shot = request.shot_id,
        frames = request
            .frame_refs
            .iter()
            .enumerate()
            .map(|(i, f)| format!("  {}. {f}", i + 1))
            .collect::<Vec<_>>()
            .join("\n"),
        summary = request.detector_summary,
    )
}

/// Parse a reply into the fixed reasoning shape, tolerating markdown
/// fences but nothing else.
fn parse_strict(reply: &str) -> Result<ReasoningPayload, serde_json::Error> {
    let text = reply.trim();
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_prefix("```").unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    serde_json::from_str(text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: &str) -> VlConfig {
        VlConfig {
            api_base: format!("{server_uri}/v1"),
            model: "test-model".to_string(),
            request_timeout: Duration::from_secs(5),
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    fn request() -> ShotReasoningRequest {
        ShotReasoningRequest {
            shot_id: 0,
            frame_refs: vec!["frames/frame_00000000.jpg".into()],
            detector_summary: "1 face, low motion".into(),
        }
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    const GOOD_JSON: &str = r#"{"summary":"a person talks","mood":"calm","intent":"exposition","composition_notes":["centered subject"],"transition_guess":"cut"}"#;

    #[tokio::test]
    async fn parses_well_formed_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(GOOD_JSON)))
            .mount(&server)
            .await;

        let client = VlClient::new(test_config(&server.uri())).unwrap();
        let payload = client.reason_shot(&request()).await.unwrap();
        assert_eq!(payload.summary, "a person talks");
        assert_eq!(payload.mood, "calm");
        assert_eq!(payload.composition_notes, vec!["centered subject"]);
    }

    #[tokio::test]
    async fn strips_markdown_fences() {
        let fenced = format!("```json\n{GOOD_JSON}\n```");
        assert!(parse_strict(&fenced).is_ok());
        assert!(parse_strict("not json at all").is_err());
    }

    #[tokio::test]
    async fn malformed_reply_triggers_one_strict_reprompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_reply("Sure! Here is my analysis.")),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(GOOD_JSON)))
            .mount(&server)
            .await;

        let client = VlClient::new(test_config(&server.uri())).unwrap();
        let payload = client.reason_shot(&request()).await.unwrap();
        assert_eq!(payload.intent, "exposition");

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn persistent_parse_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("still not json")))
            .mount(&server)
            .await;

        let client = VlClient::new(test_config(&server.uri())).unwrap();
        let err = client.reason_shot(&request()).await.unwrap_err();
        assert!(matches!(err, VlError::ParseFailed(_)));
    }

    #[tokio::test]
    async fn server_errors_back_off_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = VlClient::new(test_config(&server.uri())).unwrap();
        let err = client.reason_shot(&request()).await.unwrap_err();
        assert!(err.is_transport(), "expected transport error, got {err:?}");

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn health_probe_checks_model_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let client = VlClient::new(test_config(&server.uri())).unwrap();
        assert!(client.health().await);
    }
}
