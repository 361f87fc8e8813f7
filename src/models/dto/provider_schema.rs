use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::domain::Difficulty;

// Rendered into prompts only. Responses go through the normalizer, not serde.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderQuestion {
    pub question_text: String,
    /// Exactly four answer options.
    pub options: Vec<String>,
    /// Must repeat one of `options` exactly.
    pub correct_answer: String,
    pub explanation: String,
    pub topic_name: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuestionBatchSchema {
    pub questions: Vec<ProviderQuestion>,
}

/// Pretty-printed JSON schema for a question batch.
pub fn question_output_schema() -> String {
    let schema = schemars::schema_for!(QuestionBatchSchema);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
