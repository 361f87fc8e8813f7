use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub const OPTION_COUNT: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_correct_answer"))]
pub struct CanonicalQuestion {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub question_text: String,
    #[validate(length(equal = 4))]
    pub options: Vec<String>,
    pub correct_answer: String, // must be one of options
    pub explanation: String,
    pub topic_name: String,
    pub normalized_topic_key: String,
    pub difficulty: Difficulty,
}

fn validate_correct_answer(question: &CanonicalQuestion) -> Result<(), ValidationError> {
    if question.options.iter().any(|o| o == &question.correct_answer) {
        Ok(())
    } else {
        Err(ValidationError::new("correct_answer_not_in_options"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, Copy, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Mixed,
}

impl Difficulty {
    /// Lenient parse for provider-supplied labels.
    pub fn parse_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "easy" | "beginner" | "simple" | "basic" => Some(Difficulty::Easy),
            "medium" | "intermediate" | "moderate" => Some(Difficulty::Medium),
            "hard" | "advanced" | "difficult" | "expert" => Some(Difficulty::Hard),
            "mixed" | "any" => Some(Difficulty::Mixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::parse_loose(s).ok_or_else(|| format!("unknown difficulty '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_question() -> CanonicalQuestion {
        CanonicalQuestion {
            id: "q-1".to_string(),
            question_text: "2+2?".to_string(),
            options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
            correct_answer: "4".to_string(),
            explanation: String::new(),
            topic_name: "Arithmetic".to_string(),
            normalized_topic_key: "arithmetic".to_string(),
            difficulty: Difficulty::Easy,
        }
    }

    #[test]
    fn test_valid_question_passes_validation() {
        assert!(sample_question().validate().is_ok());
    }

    #[test]
    fn test_correct_answer_must_be_an_option() {
        let mut question = sample_question();
        question.correct_answer = "7".to_string();
        assert!(question.validate().is_err());
    }

    #[test]
    fn test_exactly_four_options_required() {
        let mut question = sample_question();
        question.options.pop();
        assert!(question.validate().is_err());

        let mut question = sample_question();
        question.options.push("8".to_string());
        assert!(question.validate().is_err());
    }

    #[test]
    fn test_difficulty_parses_loosely_and_rejects_unknown() {
        assert_eq!(Difficulty::parse_loose(" Advanced "), Some(Difficulty::Hard));
        assert_eq!("MIXED".parse::<Difficulty>(), Ok(Difficulty::Mixed));
        assert!("impossible".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_difficulty_serializes_lowercase() {
        let json = serde_json::to_string(&Difficulty::Hard).expect("serialize");
        assert_eq!(json, "\"hard\"");
    }
}
