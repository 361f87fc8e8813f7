use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::domain::Difficulty;

pub const MAX_QUESTIONS_PER_REQUEST: u32 = 50;
pub const MAX_TOPIC_NAME_CHARS: usize = 200;

/// Input to `generate_questions`. An empty topic list is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuestionsRequest {
    #[validate(custom(function = "validate_topic_names"))]
    #[serde(default)]
    pub topics: Vec<String>,
    #[validate(range(min = 1, max = MAX_QUESTIONS_PER_REQUEST))]
    pub count: u32,
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl GenerateQuestionsRequest {
    pub fn new(topics: Vec<String>, count: u32, difficulty: Difficulty) -> Self {
        Self {
            topics,
            count,
            difficulty,
        }
    }

    /// Non-blank topic names, trimmed, in request order.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[allow(clippy::ptr_arg)]
fn validate_topic_names(topics: &Vec<String>) -> Result<(), ValidationError> {
    if topics
        .iter()
        .any(|t| t.chars().count() > MAX_TOPIC_NAME_CHARS)
    {
        let mut err = ValidationError::new("topic_name_too_long");
        err.message = Some(format!("topic names must be at most {} characters", MAX_TOPIC_NAME_CHARS).into());
        return Err(err);
    }
    Ok(())
}
