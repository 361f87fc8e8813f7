use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    constants::prompts::NO_RESULTS_MARKER,
    errors::{AppError, AppResult, ExtractionFailure, NormalizationFailure, ProviderError},
    models::domain::{AttemptOutcome, IngestionAttempt, Provenance, RawResponse},
    services::{
        model_service::{GenerationOptions, ModelProvider},
        observability::IngestionObserver,
        shape_normalizer::NormalizedBatch,
    },
};

pub type RetryPredicate = Arc<dyn Fn(&AttemptFailure) -> bool + Send + Sync>;

/// Why an attempt produced nothing usable.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    Provider(ProviderError),
    EmptyResponse,
    Extraction(ExtractionFailure),
    Normalization(NormalizationFailure),
}

impl AttemptFailure {
    /// Tag plus message for the attempt record.
    pub fn reason(&self) -> String {
        match self {
            AttemptFailure::Provider(e) => format!("{}: {}", e.reason_tag(), e),
            AttemptFailure::EmptyResponse => "empty_response".to_string(),
            AttemptFailure::Extraction(e) => format!("extraction_failed: {}", e),
            AttemptFailure::Normalization(e) => format!("normalization_failed: {}", e),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AttemptFailure::Provider(e) if e.is_fatal())
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Attempt bound, backoff curve and retry predicate for one orchestrator.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub attempt_timeout: Duration,
    pub retry_predicate: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(60),
            retry_predicate: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_delay_window(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Narrows which non-fatal failures are retried. Fatal provider errors are
    /// never retried regardless.
    pub fn with_retry_predicate(
        mut self,
        predicate: impl Fn(&AttemptFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `n` (1-based): `min * factor^(n-1)`, clamped to the
    /// delay window.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.min_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs).max(self.min_delay)
    }

    /// Non-transient provider errors are never retried. Content failures are
    /// retried unless the predicate says otherwise.
    pub fn is_retryable(&self, failure: &AttemptFailure) -> bool {
        if let AttemptFailure::Provider(e) = failure {
            if !e.is_transient() {
                return false;
            }
        }
        match &self.retry_predicate {
            Some(predicate) => predicate(failure),
            None => true,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("has_retry_predicate", &self.retry_predicate.is_some())
            .finish()
    }
}

/// Usable content from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpreted<T> {
    pub batch: NormalizedBatch<T>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorOutcome<T> {
    Success {
        interpreted: Interpreted<T>,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_failure: AttemptFailure,
    },
}

/// True for responses that carry no content at all: blank text, a bare `[]` or
/// `{}`, or the no-results marker the prompts ask for.
pub fn looks_empty(text: &str) -> bool {
    let trimmed = text
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '.' || c.is_whitespace());
    if trimmed.is_empty() || trimmed == NO_RESULTS_MARKER {
        return true;
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    compact == "[]" || compact == "{}"
}

/// Only fatal provider errors and cancellation come back as `Err`. Running out
/// of attempts is an ordinary [`OrchestratorOutcome::Exhausted`].
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    observer: Arc<dyn IngestionObserver>,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy, observer: Arc<dyn IngestionObserver>) -> Self {
        Self { policy, observer }
    }

    /// Runs attempts until one yields usable content or the policy is spent.
    /// Attempts are strictly sequential; at most one provider call is in
    /// flight.
    pub async fn run<T>(
        &self,
        operation: &str,
        provider: &dyn ModelProvider,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
        interpret: impl Fn(&RawResponse) -> Result<Interpreted<T>, AttemptFailure>,
    ) -> AppResult<OrchestratorOutcome<T>> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                log::debug!("{}: waiting {:?} before attempt {}", operation, delay, attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.cancelled(operation, attempt)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(self.cancelled(operation, attempt));
            }

            let call = tokio::time::timeout(self.policy.attempt_timeout, provider.generate(prompt, options));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(operation, attempt)),
                outcome = call => outcome.unwrap_or(Err(ProviderError::Timeout)),
            };

            let failure = match result {
                Err(ProviderError::Cancelled) => return Err(self.cancelled(operation, attempt)),
                Err(e) => AttemptFailure::Provider(e),
                Ok(raw) if looks_empty(&raw.text) => AttemptFailure::EmptyResponse,
                Ok(raw) => match interpret(&raw) {
                    Ok(interpreted) => {
                        self.record(
                            operation,
                            attempt,
                            AttemptOutcome::Success,
                            format!(
                                "{} items ({})",
                                interpreted.batch.items.len(),
                                interpreted.provenance
                            ),
                        );
                        return Ok(OrchestratorOutcome::Success {
                            interpreted,
                            attempts: attempt,
                        });
                    }
                    Err(failure) => {
                        if let AttemptFailure::Extraction(e) = &failure {
                            log::debug!("{}: unparseable response starts with {:?}", operation, e.snippet);
                        }
                        failure
                    }
                },
            };

            if failure.is_fatal() {
                self.record(operation, attempt, AttemptOutcome::TerminalFailure, failure.reason());
                if let AttemptFailure::Provider(e) = &failure {
                    return Err(AppError::from(e.clone()));
                }
            }

            if attempt < max_attempts && self.policy.is_retryable(&failure) {
                self.record(operation, attempt, AttemptOutcome::RetryableFailure, failure.reason());
                continue;
            }

            self.record(operation, attempt, AttemptOutcome::TerminalFailure, failure.reason());
            return Ok(OrchestratorOutcome::Exhausted {
                attempts: attempt,
                last_failure: failure,
            });
        }
    }

    fn record(&self, operation: &str, attempt: u32, outcome: AttemptOutcome, reason: String) {
        self.observer
            .record_attempt(operation, &IngestionAttempt::new(attempt, outcome, reason));
    }

    fn cancelled(&self, operation: &str, attempt: u32) -> AppError {
        self.record(
            operation,
            attempt,
            AttemptOutcome::TerminalFailure,
            ProviderError::Cancelled.reason_tag().to_string(),
        );
        AppError::Cancelled
    }
}
