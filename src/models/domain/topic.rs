use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub const UNKNOWN_TOPIC: &str = "Unknown Topic";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTopic {
    pub display_name: String,
    pub normalized_key: String, // always normalized_key(display_name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_display_name: Option<String>,
    pub is_main_topic: bool,
}

impl CanonicalTopic {
    pub fn main(display_name: &str) -> Self {
        Self::build(display_name, None, true)
    }

    pub fn sub(display_name: &str, parent_display_name: &str) -> Self {
        Self::build(display_name, Some(parent_display_name), false)
    }

    /// Blank names degrade to [`UNKNOWN_TOPIC`], blank parents to no parent.
    pub fn build(display_name: &str, parent_display_name: Option<&str>, is_main_topic: bool) -> Self {
        let display_name = match collapse_whitespace(display_name) {
            name if name.is_empty() => UNKNOWN_TOPIC.to_string(),
            name => name,
        };
        let parent_display_name = parent_display_name
            .map(collapse_whitespace)
            .filter(|p| !p.is_empty());

        CanonicalTopic {
            normalized_key: normalized_key(&display_name),
            display_name,
            parent_display_name,
            is_main_topic,
        }
    }
}

/// Identity key for a topic name: diacritics stripped, lowercased,
/// whitespace collapsed. `"  Álgebra   Básica "` and `"algebra basica"`
/// share a key.
pub fn normalized_key(name: &str) -> String {
    let folded: String = name
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch) && !is_zero_width(*ch))
        .flat_map(char::to_lowercase)
        .collect();
    collapse_whitespace(&folded)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}
