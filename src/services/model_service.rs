use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    Client,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    config::Config,
    errors::{AppResult, ProviderError},
    models::domain::{ProviderMetadata, RawResponse},
};

/// Per-call knobs passed through to the provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub system_instruction: Option<String>,
}

impl GenerationOptions {
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// A generative-text provider: one prompt in, free text out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<RawResponse, ProviderError>;
}

/// Chat-completions provider backed by `async-openai`.
pub struct OpenAiModelService {
    client: Client<OpenAIConfig>,
    model: String,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl OpenAiModelService {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let api_key = config.require_api_key()?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &config.openai_api_base {
            openai_config = openai_config.with_api_base(base);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.openai_model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_output_tokens,
        })
    }

    fn build_request(&self, prompt: &str, options: &GenerationOptions) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system_instruction {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.default_temperature),
            "max_tokens": options.max_output_tokens.unwrap_or(self.default_max_tokens),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiModelService {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<RawResponse, ProviderError> {
        let request = self.build_request(prompt, options);
        let started = Instant::now();

        let response: Value = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(map_openai_error)?;

        let mut raw = parse_completion(&response)?;
        raw.metadata.latency = started.elapsed();
        log::debug!(
            "provider call {} took {:?} ({:?} completion tokens)",
            raw.metadata.trace_id,
            raw.metadata.latency,
            raw.metadata.completion_tokens
        );
        Ok(raw)
    }
}

/// Pulls text, usage and finish reason out of a chat-completions body.
pub fn parse_completion(response: &Value) -> Result<RawResponse, ProviderError> {
    let choice = response.get("choices").and_then(|c| c.get(0));
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderError::SafetyBlocked(
            "response withheld by content filter".to_string(),
        ));
    }

    let text = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let usage = response.get("usage");
    let token_count = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };

    Ok(RawResponse::new(
        text,
        ProviderMetadata {
            prompt_tokens: token_count("prompt_tokens"),
            completion_tokens: token_count("completion_tokens"),
            trace_id: response
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            finish_reason,
            ..ProviderMetadata::default()
        },
    ))
}

pub fn map_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        }
        OpenAIError::ApiError(api) => classify_api_error(&api),
        OpenAIError::InvalidArgument(message) => ProviderError::Configuration(message),
        other => classify_error_message(&other.to_string()),
    }
}

const AUTHENTICATION_CODES: &[&str] = &["invalid_api_key", "invalid_authentication", "account_deactivated"];
const CONFIGURATION_CODES: &[&str] = &[
    "model_not_found",
    "insufficient_quota",
    "invalid_request_error",
    "context_length_exceeded",
    "unsupported_parameter",
    "unsupported_value",
];

/// `ApiError` carries no HTTP status, so its `code` and `type` decide first and
/// the message is the fallback.
pub fn classify_api_error(api: &ApiError) -> ProviderError {
    let code = api.code.as_deref().unwrap_or_default();
    let kind = api.r#type.as_deref().unwrap_or_default();

    if AUTHENTICATION_CODES.contains(&code) || matches!(kind, "authentication_error" | "permission_error") {
        ProviderError::Authentication(api.message.clone())
    } else if CONFIGURATION_CODES.contains(&code) || CONFIGURATION_CODES.contains(&kind) {
        ProviderError::Configuration(api.message.clone())
    } else if code == "rate_limit_exceeded" || kind == "rate_limit_error" {
        ProviderError::RateLimited
    } else {
        classify_error_message(&api.message)
    }
}

/// Classifies an API error by its message, since the provider's error bodies
/// are the only place status information survives.
pub fn classify_error_message(message: &str) -> ProviderError {
    let lower = message.to_lowercase();

    if lower.contains("model_not_found")
        || (lower.contains("model") && lower.contains("does not exist"))
        || lower.contains("exceeded your current quota")
    {
        ProviderError::Configuration(message.to_string())
    } else if lower.contains("rate limit") || lower.contains("429") {
        ProviderError::RateLimited
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("api key")
        || lower.contains("unauthorized")
    {
        ProviderError::Authentication(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ProviderError::Timeout
    } else if lower.contains("content filter")
        || lower.contains("content_filter")
        || lower.contains("safety")
    {
        ProviderError::SafetyBlocked(message.to_string())
    } else if let Some(status) = ["500", "502", "503", "504"]
        .iter()
        .find(|code| lower.contains(*code))
    {
        ProviderError::Server {
            status: status.parse().unwrap_or(500),
            message: message.to_string(),
        }
    } else if lower.contains("overloaded") {
        ProviderError::Server {
            status: 503,
            message: message.to_string(),
        }
    } else {
        ProviderError::Server {
            status: 0,
            message: message.to_string(),
        }
    }
}
