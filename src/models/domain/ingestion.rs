use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which canonical shape a response is expected to carry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedKind {
    Topics,
    Questions,
}

impl fmt::Display for ExpectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedKind::Topics => f.write_str("topic"),
            ExpectedKind::Questions => f.write_str("question"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency: Duration,
    pub trace_id: String,
    pub finish_reason: Option<String>,
}

/// Provider output for one attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawResponse {
    pub text: String,
    pub metadata: ProviderMetadata,
}

impl RawResponse {
    pub fn new(text: impl Into<String>, metadata: ProviderMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// A response with a fresh trace id and no usage data. Mostly for stubs.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(
            text,
            ProviderMetadata {
                trace_id: Uuid::new_v4().to_string(),
                ..ProviderMetadata::default()
            },
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Copy)]
#[serde(rename_all = "camelCase")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// Observability record for one orchestrator loop iteration. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionAttempt {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl IngestionAttempt {
    pub fn new(attempt_number: u32, outcome: AttemptOutcome, reason: impl Into<String>) -> Self {
        Self {
            attempt_number,
            outcome,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Copy)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
    ProviderParsed,
    ProviderRegexRecovered,
    SyntheticFallback,
}

impl Provenance {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Provenance::SyntheticFallback)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::ProviderParsed => f.write_str("providerParsed"),
            Provenance::ProviderRegexRecovered => f.write_str("providerRegexRecovered"),
            Provenance::SyntheticFallback => f.write_str("syntheticFallback"),
        }
    }
}

/// Terminal output of an ingestion call. `items` is never empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult<T> {
    pub items: Vec<T>,
    pub provenance: Provenance,
    pub attempts: u32,
    pub dropped_items: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl<T> IngestionResult<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_synthetic(&self) -> bool {
        self.provenance.is_synthetic()
    }
}
