use serde::Serialize;

use crate::models::domain::{AttemptOutcome, IngestionAttempt, Provenance};

/// Final shape of an ingestion call, as reported to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub provenance: Provenance,
    pub item_count: usize,
    pub attempts: u32,
    pub dropped_items: usize,
}

/// Fire-and-forget sink for ingestion telemetry. Implementations must not
/// block or panic.
pub trait IngestionObserver: Send + Sync {
    fn record_attempt(&self, operation: &str, attempt: &IngestionAttempt);

    fn record_result(&self, operation: &str, summary: &ResultSummary);
}

/// Writes attempts and results through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl IngestionObserver for LogObserver {
    fn record_attempt(&self, operation: &str, attempt: &IngestionAttempt) {
        match attempt.outcome {
            AttemptOutcome::Success => log::info!(
                "{} attempt {} succeeded ({})",
                operation,
                attempt.attempt_number,
                attempt.reason
            ),
            AttemptOutcome::RetryableFailure => log::warn!(
                "{} attempt {} failed, will retry if attempts remain: {}",
                operation,
                attempt.attempt_number,
                attempt.reason
            ),
            AttemptOutcome::TerminalFailure => log::error!(
                "{} attempt {} failed terminally: {}",
                operation,
                attempt.attempt_number,
                attempt.reason
            ),
        }
    }

    fn record_result(&self, operation: &str, summary: &ResultSummary) {
        if summary.provenance.is_synthetic() {
            log::warn!(
                "{} returned {} synthetic items after {} attempts",
                operation,
                summary.item_count,
                summary.attempts
            );
        } else {
            log::info!(
                "{} returned {} items ({}) after {} attempts, {} dropped",
                operation,
                summary.item_count,
                summary.provenance,
                summary.attempts,
                summary.dropped_items
            );
        }
    }
}
