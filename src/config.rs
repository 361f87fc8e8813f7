use std::{env, path::PathBuf, time::Duration};

use secrecy::{ExposeSecret, SecretString};

use crate::{
    errors::{AppError, AppResult},
    services::retry_orchestrator::RetryPolicy,
};

#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub openai_api_base: Option<String>,
    pub openai_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub provider_timeout_secs: u64,
    pub max_retries: u32,
    pub min_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_document_chars: usize,
    pub prompt_template_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: SecretString::from(env::var("OPENAI_API_KEY").unwrap_or_default()),
            openai_api_base: env::var("OPENAI_API_BASE").ok().filter(|v| !v.trim().is_empty()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: parse_env("PROVIDER_TEMPERATURE", 0.3),
            max_output_tokens: parse_env("PROVIDER_MAX_OUTPUT_TOKENS", 4096),
            provider_timeout_secs: parse_env("PROVIDER_TIMEOUT_SECS", 60),
            max_retries: parse_env("INGEST_MAX_RETRIES", 3),
            min_retry_delay_ms: parse_env("INGEST_MIN_DELAY_MS", 1_000),
            max_retry_delay_ms: parse_env("INGEST_MAX_DELAY_MS", 15_000),
            backoff_factor: parse_env("INGEST_BACKOFF_FACTOR", 2.0),
            max_document_chars: parse_env("MAX_DOCUMENT_CHARS", 30_000),
            prompt_template_dir: env::var("PROMPT_TEMPLATE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.min_retry_delay_ms > self.max_retry_delay_ms {
            return Err(AppError::Configuration(format!(
                "INGEST_MIN_DELAY_MS ({}) exceeds INGEST_MAX_DELAY_MS ({})",
                self.min_retry_delay_ms, self.max_retry_delay_ms
            )));
        }

        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(AppError::Configuration(format!(
                "INGEST_BACKOFF_FACTOR must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }

        if self.max_document_chars == 0 {
            return Err(AppError::Configuration(
                "MAX_DOCUMENT_CHARS must be greater than zero".to_string(),
            ));
        }

        if self.provider_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "PROVIDER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The provider cannot be used without a key.
    pub fn require_api_key(&self) -> AppResult<&str> {
        let key = self.openai_api_key.expose_secret();
        if key.trim().is_empty() {
            return Err(AppError::Configuration(
                "OPENAI_API_KEY is not set; no active provider is configured".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_delay_window(
                Duration::from_millis(self.min_retry_delay_ms),
                Duration::from_millis(self.max_retry_delay_ms),
            )
            .with_backoff_factor(self.backoff_factor)
            .with_attempt_timeout(Duration::from_secs(self.provider_timeout_secs))
    }

    pub fn test_config() -> Self {
        Self {
            openai_api_key: SecretString::from("test-key".to_string()),
            openai_api_base: None,
            openai_model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_output_tokens: 1024,
            provider_timeout_secs: 5,
            max_retries: 3,
            min_retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            backoff_factor: 2.0,
            max_document_chars: 30_000,
            prompt_template_dir: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
