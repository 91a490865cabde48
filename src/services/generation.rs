use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure classes of the text-generation service. The retry loop only ever
/// re-attempts `Transient`; `Validation` propagates immediately.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transient generation failure: {0}")]
    Transient(String),
    #[error("invalid generation request: {0}")]
    Validation(String),
}

pub trait TextGenerator {
    fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    /// Number of underlying service invocations, including the successful one.
    pub attempts: usize,
}

/// Calls the generator until it succeeds, retrying transient failures up to
/// the policy budget with a fixed delay. A validation failure or an
/// exhausted budget is returned to the caller unchanged, so the enclosing
/// batch decides whether to abort.
pub fn generate_with_retry(
    generator: &dyn TextGenerator,
    system_prompt: &str,
    user_prompt: &str,
    policy: RetryPolicy,
) -> Result<GenerationOutcome, GenerationError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match generator.generate(system_prompt, user_prompt) {
            Ok(text) => return Ok(GenerationOutcome { text, attempts }),
            Err(GenerationError::Validation(message)) => {
                return Err(GenerationError::Validation(message));
            }
            Err(GenerationError::Transient(message)) => {
                if attempts >= max_attempts {
                    return Err(GenerationError::Transient(format!(
                        "giving up after {attempts} attempts: {message}"
                    )));
                }
                warn!(
                    attempt = attempts,
                    max_attempts,
                    error = %message,
                    "generation attempt failed, retrying"
                );
                std::thread::sleep(policy.retry_delay);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

pub const DEFAULT_GENERATION_BASE_URL: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1";
const GENERATION_API_KEY_VAR: &str = "QWEN_API_KEY";

impl GenerationConfig {
    /// Reads the API key from the process environment once; the resulting
    /// config is immutable for the rest of the run.
    pub fn from_env(model: &str, base_url: &str) -> Result<Self, GenerationError> {
        let api_key = std::env::var(GENERATION_API_KEY_VAR).map_err(|_| {
            GenerationError::Validation(format!("{GENERATION_API_KEY_VAR} is not set"))
        })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Blocking client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    http: reqwest::blocking::Client,
    config: GenerationConfig,
}

impl ChatClient {
    pub fn new(config: GenerationConfig, timeout: Duration) -> Result<Self, GenerationError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                GenerationError::Validation(format!("failed to build http client: {error}"))
            })?;

        Ok(Self { http, config })
    }
}

impl TextGenerator for ChatClient {
    fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|error| GenerationError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
                return Err(GenerationError::Transient(format!(
                    "chat completion returned {status}: {body}"
                )));
            }
            return Err(GenerationError::Validation(format!(
                "chat completion returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|error| GenerationError::Transient(error.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                GenerationError::Transient("chat completion returned no choices".to_string())
            })?;

        debug!(model = %self.config.model, chars = content.len(), "chat completion succeeded");
        Ok(content)
    }
}
