pub mod ingestion;
pub mod question;
pub mod topic;
pub use ingestion::{
    AttemptOutcome, ExpectedKind, IngestionAttempt, IngestionResult, Provenance,
    ProviderMetadata, RawResponse,
};
pub use question::{CanonicalQuestion, Difficulty};
pub use topic::{normalized_key, CanonicalTopic};
