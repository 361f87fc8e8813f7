use std::sync::Mutex;

use crate::{
    models::domain::{AttemptOutcome, IngestionAttempt},
    services::observability::{IngestionObserver, ResultSummary},
};

#[cfg(test)]
pub mod fixtures {
    /// Valid question JSON wrapped in chatter and a markdown fence.
    pub const FENCED_QUESTION_RESPONSE: &str = "Here you go:\n```json\n{\"questions\":[{\"questionText\":\"2+2?\",\"options\":[\"3\",\"4\",\"5\",\"6\"],\"correctAnswer\":\"4\"}]}\n```";

    /// Output cut off mid-string by the token limit.
    pub const TRUNCATED_TOPIC_RESPONSE: &str =
        r#"{"topics": [{"mainTopic": "Biology", "subTopics": ["Cells", "Genet"#;

    pub const ALGEBRA_TOPIC_RESPONSE: &str =
        r#"{"topics": [{"mainTopic": "Algebra", "subTopics": ["Linear Equations", "Quadratics"]}]}"#;

    pub const TWO_QUESTION_RESPONSE: &str = r#"{"questions": [
        {"questionText": "What is 2+2?", "options": ["3", "4", "5", "6"], "correctAnswer": "4", "explanation": "Two plus two is four."},
        {"questionText": "What is 3+3?", "options": ["5", "6", "7", "8"], "correctAnswer": "6", "explanation": "Three plus three is six."}
    ]}"#;
}

/// Keeps every attempt and result it is given, for assertions.
#[derive(Default)]
pub struct RecordingObserver {
    attempts: Mutex<Vec<(String, IngestionAttempt)>>,
    results: Mutex<Vec<(String, ResultSummary)>>,
}

impl RecordingObserver {
    pub fn outcomes(&self) -> Vec<AttemptOutcome> {
        self.attempts
            .lock()
            .map(|attempts| attempts.iter().map(|(_, a)| a.outcome).collect())
            .unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.attempts
            .lock()
            .map(|attempts| attempts.iter().map(|(_, a)| a.reason.clone()).collect())
            .unwrap_or_default()
    }

    pub fn results(&self) -> Vec<ResultSummary> {
        self.results
            .lock()
            .map(|results| results.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

impl IngestionObserver for RecordingObserver {
    fn record_attempt(&self, operation: &str, attempt: &IngestionAttempt) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push((operation.to_string(), attempt.clone()));
        }
    }

    fn record_result(&self, operation: &str, summary: &ResultSummary) {
        if let Ok(mut results) = self.results.lock() {
            results.push((operation.to_string(), summary.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::Provenance;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::default();
        observer.record_attempt("op", &IngestionAttempt::new(1, AttemptOutcome::RetryableFailure, "timeout"));
        observer.record_attempt("op", &IngestionAttempt::new(2, AttemptOutcome::Success, "parsed"));
        observer.record_result(
            "op",
            &ResultSummary {
                provenance: Provenance::ProviderParsed,
                item_count: 3,
                attempts: 2,
                dropped_items: 0,
            },
        );

        assert_eq!(
            observer.outcomes(),
            vec![AttemptOutcome::RetryableFailure, AttemptOutcome::Success]
        );
        assert_eq!(observer.reasons(), vec!["timeout", "parsed"]);
        assert_eq!(observer.results()[0].item_count, 3);
    }
}
