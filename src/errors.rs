use thiserror::Error;

use crate::models::domain::ExpectedKind;

/// Failures raised by a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider rate limit hit")]
    RateLimited,

    #[error("Provider blocked the response: {0}")]
    SafetyBlocked(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Provider authentication failed: {0}")]
    Authentication(String),

    #[error("Provider is not configured: {0}")]
    Configuration(String),

    #[error("Provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Errors worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::RateLimited
                | ProviderError::SafetyBlocked(_)
                | ProviderError::Network(_)
                | ProviderError::Server { .. }
        )
    }

    /// Errors no amount of retrying will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication(_) | ProviderError::Configuration(_)
        )
    }

    pub fn reason_tag(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "provider_timeout",
            ProviderError::RateLimited => "provider_rate_limited",
            ProviderError::SafetyBlocked(_) => "provider_safety_block",
            ProviderError::Network(_) => "provider_network",
            ProviderError::Server { .. } => "provider_server_error",
            ProviderError::Authentication(_) => "provider_authentication",
            ProviderError::Configuration(_) => "provider_configuration",
            ProviderError::Cancelled => "cancelled",
        }
    }
}

/// No stage of the extractor produced a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not extract structured content from provider text")]
pub struct ExtractionFailure {
    /// Leading slice of the raw text, kept for diagnostics only.
    pub snippet: String,
}

/// The parsed value produced zero valid items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No valid {kind} items after normalization ({dropped} dropped)")]
pub struct NormalizationFailure {
    pub kind: ExpectedKind,
    pub dropped: usize,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::Template(_) => "TEMPLATE_ERROR",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Provider(_) => "PROVIDER_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => AppError::Cancelled,
            e if e.is_fatal() => AppError::Configuration(e.to_string()),
            e => AppError::Provider(e),
        }
    }
}
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(format!("I/O error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
