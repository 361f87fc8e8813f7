use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::{
    errors::ExtractionFailure,
    models::domain::{ExpectedKind, Provenance},
    services::text_repair::{self, RepairStage},
};

pub const DIAGNOSTIC_SNIPPET_CHARS: usize = 500;
pub const ARRAY_WRAPPER_KEY: &str = "items";

const STRING_LITERAL: &str = r#""((?:[^"\\]|\\.)*)""#;

static TOPIC_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(mainTopic|main_topic|subTopicName|sub_topic_name|subTopics|sub_topics)"\s*:\s*"#)
        .expect("TOPIC_KEY_RE is a valid regex pattern")
});
static PARENT_TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#""(?:parentTopic|parent_topic|parent)"\s*:\s*{}"#, STRING_LITERAL))
        .expect("PARENT_TOPIC_RE is a valid regex pattern")
});
static IS_MAIN_TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:isMainTopic|is_main_topic)"\s*:\s*(true|false)"#)
        .expect("IS_MAIN_TOPIC_RE is a valid regex pattern")
});
static QUESTION_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:questionText|question_text|question)"\s*:\s*""#)
        .expect("QUESTION_START_RE is a valid regex pattern")
});
static QUESTION_TEXT_RE: Lazy<Regex> = Lazy::new(|| field_regex("questionText|question_text|question"));
static CORRECT_ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| field_regex("correctAnswer|correct_answer|answer"));
static EXPLANATION_RE: Lazy<Regex> = Lazy::new(|| field_regex("explanation|rationale"));
static TOPIC_NAME_RE: Lazy<Regex> = Lazy::new(|| field_regex("topicName|topic_name|topic"));
static DIFFICULTY_RE: Lazy<Regex> = Lazy::new(|| field_regex("difficulty"));
static OPTIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:options|choices)"\s*:\s*\[((?:[^\]"]|"(?:[^"\\]|\\.)*")*)"#)
        .expect("OPTIONS_RE is a valid regex pattern")
});
static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(STRING_LITERAL).expect("STRING_LITERAL_RE is a valid regex pattern"));

fn field_regex(keys: &str) -> Regex {
    Regex::new(&format!(r#""(?:{})"\s*:\s*{}"#, keys, STRING_LITERAL))
        .expect("field regex is a valid regex pattern")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    DirectParse,
    Repaired,
    RegexScraped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Always an object; arrays arrive wrapped under [`ARRAY_WRAPPER_KEY`].
    pub value: Value,
    pub stage: ExtractionStage,
    pub repairs: Vec<RepairStage>,
}

impl Extracted {
    pub fn provenance(&self) -> Provenance {
        match self.stage {
            ExtractionStage::RegexScraped => Provenance::ProviderRegexRecovered,
            ExtractionStage::DirectParse | ExtractionStage::Repaired => Provenance::ProviderParsed,
        }
    }
}

/// Direct parse, then parse after repair, then regex scraping for `kind`.
/// A top-level array comes back wrapped as `{"items": [...]}`.
pub fn extract(raw_text: &str, kind: ExpectedKind) -> Result<Extracted, ExtractionFailure> {
    extract_inner(raw_text, kind, 0)
}

fn extract_inner(raw_text: &str, kind: ExpectedKind, depth: u8) -> Result<Extracted, ExtractionFailure> {
    if raw_text.trim().is_empty() {
        return Err(failure(raw_text));
    }

    match serde_json::from_str::<Value>(raw_text) {
        Ok(value) => {
            if let Some(found) = accept(value, ExtractionStage::DirectParse, Vec::new(), kind, depth) {
                return Ok(found);
            }
        }
        Err(e) => log::debug!("direct parse failed: {}", e),
    }

    let trace = text_repair::repair_traced(raw_text);
    if !trace.applied.is_empty() {
        match serde_json::from_str::<Value>(&trace.text) {
            Ok(value) => {
                let stages = trace.applied.iter().map(RepairStage::name).collect::<Vec<_>>();
                log::debug!("parsed after repair stages {:?}", stages);
                if let Some(found) = accept(value, ExtractionStage::Repaired, trace.applied, kind, depth) {
                    return Ok(found);
                }
            }
            Err(e) => log::debug!("parse after repair failed: {}", e),
        }
    }

    let scraped = match kind {
        ExpectedKind::Topics => scrape_topics(raw_text),
        ExpectedKind::Questions => scrape_questions(raw_text),
    };
    if let Some(value) = scraped {
        log::info!("recovered {} payload by field scraping", kind);
        return Ok(Extracted {
            value,
            stage: ExtractionStage::RegexScraped,
            repairs: Vec::new(),
        });
    }

    Err(failure(raw_text))
}

/// Objects pass, arrays get wrapped, a JSON string holding JSON is unwrapped
/// once, other scalars are rejected.
fn accept(
    value: Value,
    stage: ExtractionStage,
    repairs: Vec<RepairStage>,
    kind: ExpectedKind,
    depth: u8,
) -> Option<Extracted> {
    match value {
        Value::Object(_) => Some(Extracted { value, stage, repairs }),
        Value::Array(items) => {
            let mut wrapper = Map::new();
            wrapper.insert(ARRAY_WRAPPER_KEY.to_string(), Value::Array(items));
            Some(Extracted {
                value: Value::Object(wrapper),
                stage,
                repairs,
            })
        }
        Value::String(inner) if depth == 0 => extract_inner(&inner, kind, depth + 1).ok(),
        _ => None,
    }
}

fn failure(raw_text: &str) -> ExtractionFailure {
    ExtractionFailure {
        snippet: raw_text.chars().take(DIAGNOSTIC_SNIPPET_CHARS).collect(),
    }
}

/// Rebuilds `{"topics": [...]}` from `mainTopic` / `subTopics` /
/// `subTopicName` occurrences, in document order.
pub fn scrape_topics(text: &str) -> Option<Value> {
    let mut entries: Vec<Value> = Vec::new();
    let mut current_main: Option<usize> = None;

    for caps in TOPIC_KEY_RE.captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let rest = &text[whole.end()..];

        match key.as_str() {
            "mainTopic" | "main_topic" => {
                let Some(name) = leading_string_literal(rest) else {
                    continue;
                };
                entries.push(json!({ "mainTopic": name, "subTopics": [] }));
                current_main = Some(entries.len() - 1);
            }
            "subTopics" | "sub_topics" => {
                let names = leading_string_array(rest);
                match current_main.and_then(|i| entries.get_mut(i)) {
                    Some(main) => {
                        if let Some(Value::Array(subs)) = main.get_mut("subTopics") {
                            subs.extend(names.into_iter().map(Value::String));
                        }
                    }
                    None => entries.extend(names.into_iter().map(Value::String)),
                }
            }
            _ => {
                let Some(name) = leading_string_literal(rest) else {
                    continue;
                };
                let object = enclosing_object(text, whole.start());
                let mut entry = Map::new();
                entry.insert("subTopicName".to_string(), Value::String(name));
                if let Some(parent) = PARENT_TOPIC_RE
                    .captures(object)
                    .and_then(|c| c.get(1))
                    .map(|m| unescape(m.as_str()))
                {
                    entry.insert("parentTopic".to_string(), Value::String(parent));
                }
                if let Some(flag) = IS_MAIN_TOPIC_RE.captures(object).and_then(|c| c.get(1)) {
                    entry.insert("isMainTopic".to_string(), Value::Bool(flag.as_str() == "true"));
                }
                entries.push(Value::Object(entry));
            }
        }
    }

    if entries.is_empty() {
        None
    } else {
        Some(json!({ "topics": entries }))
    }
}

/// Rebuilds `{"questions": [...]}` from each `"questionText"` occurrence and
/// the fields that follow it up to the next question.
pub fn scrape_questions(text: &str) -> Option<Value> {
    let starts: Vec<usize> = QUESTION_START_RE.find_iter(text).map(|m| m.start()).collect();
    let mut questions = Vec::new();

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let chunk = &text[start..end];

        let Some(question_text) = capture_string(&QUESTION_TEXT_RE, chunk) else {
            continue;
        };

        let mut item = Map::new();
        item.insert("questionText".to_string(), Value::String(question_text));

        if let Some(body) = OPTIONS_RE.captures(chunk).and_then(|c| c.get(1)) {
            let options: Vec<Value> = STRING_LITERAL_RE
                .captures_iter(body.as_str())
                .filter_map(|c| c.get(1).map(|m| Value::String(unescape(m.as_str()))))
                .collect();
            item.insert("options".to_string(), Value::Array(options));
        }
        for (key, re) in [
            ("correctAnswer", &*CORRECT_ANSWER_RE),
            ("explanation", &*EXPLANATION_RE),
            ("topicName", &*TOPIC_NAME_RE),
            ("difficulty", &*DIFFICULTY_RE),
        ] {
            if let Some(value) = capture_string(re, chunk) {
                item.insert(key.to_string(), Value::String(value));
            }
        }

        questions.push(Value::Object(item));
    }

    if questions.is_empty() {
        None
    } else {
        Some(json!({ "questions": questions }))
    }
}

fn capture_string(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
}

/// Reads a string literal at the start of `text`, tolerating truncation.
fn leading_string_literal(text: &str) -> Option<String> {
    let body = text.strip_prefix('"')?;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return non_empty(unescape(&body[..i]));
        }
    }
    non_empty(unescape(body.trim_end_matches('\\')))
}

/// Reads the plain string elements of an array at the start of `text`. Stops at
/// the closing bracket, at the first object element, or at a string followed by
/// `:` (which means we have walked into an object).
fn leading_string_array(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Some(mut rest) = text.trim_start().strip_prefix('[') else {
        return names;
    };

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if !rest.starts_with('"') {
            break;
        }
        let Some(caps) = STRING_LITERAL_RE.captures(rest) else {
            // unterminated final element
            if let Some(name) = leading_string_literal(rest) {
                names.push(name);
            }
            break;
        };
        let Some(whole) = caps.get(0).filter(|m| m.start() == 0) else {
            break;
        };
        let after = &rest[whole.end()..];
        if after.trim_start().starts_with(':') {
            break;
        }
        if let Some(name) = caps.get(1).and_then(|m| non_empty(unescape(m.as_str()))) {
            names.push(name);
        }
        rest = after;
    }

    names
}

/// The `{ ... }` text around `pos`, or as much of it as exists.
fn enclosing_object(text: &str, pos: usize) -> &str {
    let start = text[..pos].rfind('{').unwrap_or(0);
    let end = text[pos..].find('}').map(|e| pos + e + 1).unwrap_or(text.len());
    &text[start..end]
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
