use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::NormalizationFailure,
    models::domain::{
        question::OPTION_COUNT, topic::UNKNOWN_TOPIC, CanonicalQuestion, CanonicalTopic,
        Difficulty, ExpectedKind,
    },
};

const MAX_WRAPPER_DEPTH: u8 = 3;
const MAX_NOTES: usize = 20;

const TOPIC_WRAPPER_KEYS: &[&str] = &[
    "topics",
    "items",
    "mainTopics",
    "main_topics",
    "newTopics",
    "new_topics",
    "data",
    "result",
    "results",
    "subTopics",
];
const MAIN_TOPIC_KEYS: &[&str] = &["mainTopic", "main_topic"];
const SUB_TOPIC_LIST_KEYS: &[&str] = &["subTopics", "sub_topics", "subtopics", "children"];
const STRONG_SUB_TOPIC_NAME_KEYS: &[&str] = &["subTopicName", "sub_topic_name"];
const TOPIC_NAME_KEYS: &[&str] = &[
    "subTopicName",
    "sub_topic_name",
    "name",
    "title",
    "topicName",
    "topic_name",
    "topic",
];
const PARENT_TOPIC_KEYS: &[&str] = &["parentTopic", "parent_topic", "parent"];
const IS_MAIN_TOPIC_KEYS: &[&str] = &["isMainTopic", "is_main_topic"];

const QUESTION_WRAPPER_KEYS: &[&str] = &[
    "questions",
    "quiz",
    "data",
    "result",
    "results",
    "items",
    "questionList",
];
const QUESTION_TEXT_KEYS: &[&str] = &["questionText", "question_text", "question", "text", "prompt"];
const OPTION_LIST_KEYS: &[&str] = &["options", "choices", "answers"];
const CORRECT_ANSWER_KEYS: &[&str] = &["correctAnswer", "correct_answer", "answer", "correct"];
const EXPLANATION_KEYS: &[&str] = &["explanation", "rationale", "reason"];
const QUESTION_TOPIC_KEYS: &[&str] = &["topicName", "topic_name", "topic"];
const OPTION_TEXT_KEYS: &[&str] = &["text", "option", "value", "label", "answer"];
const OPTION_CORRECT_KEYS: &[&str] = &["correct", "isCorrect", "is_correct"];

static ANSWER_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:option\s+)?([a-d])(?:\s*[\).:]\s*(.*))?$")
        .expect("ANSWER_LABEL_RE is a valid regex pattern")
});
static OPTION_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[A-Da-d]\s*[\).:]\s+").expect("OPTION_LABEL_RE is a valid regex pattern")
});

/// The closed set of topic entry shapes providers emit.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEntryShape<'a> {
    /// `"Algebra"`
    Name(&'a str),
    /// `{"mainTopic": "Algebra", "subTopics": ["Vectors", {"subTopicName": ...}]}`
    MainTopicGroup {
        main: &'a str,
        sub_topics: &'a [Value],
    },
    /// `{"subTopicName": "Vectors", "parentTopic": "Algebra", "isMainTopic": false}`
    SubTopicObject {
        name: &'a str,
        parent: Option<&'a str>,
        is_main: Option<bool>,
    },
}

impl<'a> TopicEntryShape<'a> {
    pub fn classify(value: &'a Value) -> Option<Self> {
        match value {
            Value::String(name) if !name.trim().is_empty() => Some(Self::Name(name.trim())),
            Value::Object(object) => {
                if let Some(main) = first_field(object, MAIN_TOPIC_KEYS) {
                    let sub_topics = first_field(object, SUB_TOPIC_LIST_KEYS)
                        .and_then(Value::as_array)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    return Some(Self::MainTopicGroup {
                        main: main.as_str().map(str::trim).unwrap_or_default(),
                        sub_topics,
                    });
                }

                let name = first_field(object, TOPIC_NAME_KEYS)?;
                Some(Self::SubTopicObject {
                    name: name.as_str().map(str::trim).unwrap_or_default(),
                    parent: text_field(object, PARENT_TOPIC_KEYS),
                    is_main: first_field(object, IS_MAIN_TOPIC_KEYS).and_then(Value::as_bool),
                })
            }
            _ => None,
        }
    }
}

/// Normalized items plus an account of what was dropped on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch<T> {
    pub items: Vec<T>,
    pub dropped: usize,
    pub notes: Vec<String>,
}

impl<T> NormalizedBatch<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            dropped: 0,
            notes: Vec::new(),
        }
    }

    fn drop_item(&mut self, kind: ExpectedKind, position: impl fmt::Display, reason: impl fmt::Display) {
        let note = format!("dropped {} {}: {}", kind, position, reason);
        log::debug!("{}", note);
        self.dropped += 1;
        if self.notes.len() < MAX_NOTES {
            self.notes.push(note);
        }
    }

    fn finish(self, kind: ExpectedKind) -> Result<Self, NormalizationFailure> {
        if self.items.is_empty() {
            Err(NormalizationFailure {
                kind,
                dropped: self.dropped,
                notes: self.notes,
            })
        } else {
            Ok(self)
        }
    }
}

/// Bad items are dropped with a note; the batch fails only when none survive.
pub fn normalize_topics(value: &Value) -> Result<NormalizedBatch<CanonicalTopic>, NormalizationFailure> {
    let kind = ExpectedKind::Topics;
    let entries = locate_entries(value, TOPIC_WRAPPER_KEYS, is_topic_entry, 0)
        .or_else(|| match value {
            // a lone `{"name": ...}` object
            Value::Object(_) => TopicEntryShape::classify(value).map(|_| vec![value]),
            _ => None,
        })
        .ok_or_else(|| no_entries(kind))?;

    let mut batch = NormalizedBatch::new();
    let mut seen = HashSet::new();
    let mut push = |batch: &mut NormalizedBatch<CanonicalTopic>, topic: CanonicalTopic| {
        if seen.insert(topic.normalized_key.clone()) {
            batch.items.push(topic);
        } else {
            log::debug!("merged duplicate topic '{}'", topic.display_name);
        }
    };

    for (index, entry) in entries.into_iter().enumerate() {
        match TopicEntryShape::classify(entry) {
            Some(TopicEntryShape::Name(name)) => push(&mut batch, CanonicalTopic::main(name)),
            Some(TopicEntryShape::SubTopicObject {
                name,
                parent,
                is_main,
            }) => {
                let is_main = is_main.unwrap_or(parent.is_none());
                push(&mut batch, CanonicalTopic::build(name, parent, is_main));
            }
            Some(TopicEntryShape::MainTopicGroup { main, sub_topics }) => {
                let main_topic = CanonicalTopic::main(main);
                let parent = main_topic.display_name.clone();
                push(&mut batch, main_topic);

                for (sub_index, sub) in sub_topics.iter().enumerate() {
                    match TopicEntryShape::classify(sub) {
                        Some(TopicEntryShape::Name(name)) => {
                            push(&mut batch, CanonicalTopic::sub(name, &parent))
                        }
                        Some(TopicEntryShape::SubTopicObject { name, parent: own, .. }) => {
                            push(&mut batch, CanonicalTopic::sub(name, own.unwrap_or(&parent)))
                        }
                        Some(TopicEntryShape::MainTopicGroup { .. }) | None => batch.drop_item(
                            kind,
                            format!("{}.{}", index, sub_index),
                            "unrecognized sub-topic entry",
                        ),
                    }
                }
            }
            None => batch.drop_item(kind, index, "unrecognized topic entry"),
        }
    }

    batch.finish(kind)
}

/// Defaults applied to question items that do not carry their own topic or
/// difficulty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuestionContext {
    pub default_topic: Option<String>,
    pub difficulty: Difficulty,
}

pub fn normalize_questions(
    value: &Value,
    context: &QuestionContext,
) -> Result<NormalizedBatch<CanonicalQuestion>, NormalizationFailure> {
    let kind = ExpectedKind::Questions;
    let entries = locate_entries(value, QUESTION_WRAPPER_KEYS, is_question_entry, 0)
        .ok_or_else(|| no_entries(kind))?;

    let mut batch = NormalizedBatch::new();
    let mut ids = HashSet::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match question_from_value(entry, context) {
            Ok(mut question) => {
                if !ids.insert(question.id.clone()) {
                    question.id = Uuid::new_v4().to_string();
                    ids.insert(question.id.clone());
                }
                batch.items.push(question);
            }
            Err(reason) => batch.drop_item(kind, index, reason),
        }
    }

    batch.finish(kind)
}

fn question_from_value(value: &Value, context: &QuestionContext) -> Result<CanonicalQuestion, String> {
    let object = value.as_object().ok_or("not an object")?;

    let question_text = text_field(object, QUESTION_TEXT_KEYS).ok_or("missing questionText")?;
    let (options, flagged) = match first_field(object, OPTION_LIST_KEYS) {
        Some(raw) => parse_options(raw)?,
        None => return Err("missing options".to_string()),
    };
    if options.len() != OPTION_COUNT {
        return Err(format!("expected {} options, got {}", OPTION_COUNT, options.len()));
    }
    let correct_answer = resolve_correct_answer(first_field(object, CORRECT_ANSWER_KEYS), &options, flagged)?;

    let topic = CanonicalTopic::main(
        text_field(object, QUESTION_TOPIC_KEYS)
            .or(context.default_topic.as_deref())
            .unwrap_or(UNKNOWN_TOPIC),
    );
    let difficulty = text_field(object, &["difficulty", "level"])
        .and_then(Difficulty::parse_loose)
        .unwrap_or(context.difficulty);
    let id = match object.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    let question = CanonicalQuestion {
        id,
        question_text: question_text.to_string(),
        options,
        correct_answer,
        explanation: text_field(object, EXPLANATION_KEYS).unwrap_or_default().to_string(),
        topic_name: topic.display_name,
        normalized_topic_key: topic.normalized_key,
        difficulty,
    };
    question.validate().map_err(|e| e.to_string())?;
    Ok(question)
}

/// Option texts in order, plus the index of an option flagged `correct: true`.
fn parse_options(value: &Value) -> Result<(Vec<String>, Option<usize>), String> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        // {"A": "...", "B": "..."} keeps key order A..D
        Value::Object(map) => map.values().collect(),
        _ => return Err("options is not a list".to_string()),
    };

    let mut texts = Vec::with_capacity(entries.len());
    let mut flagged = None;
    for (i, entry) in entries.into_iter().enumerate() {
        let text = match entry {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Object(option) => {
                if OPTION_CORRECT_KEYS
                    .iter()
                    .any(|key| option.get(*key).and_then(Value::as_bool) == Some(true))
                {
                    flagged.get_or_insert(i);
                }
                text_field(option, OPTION_TEXT_KEYS)
                    .ok_or_else(|| format!("option {} has no text", i + 1))?
                    .to_string()
            }
            _ => return Err(format!("option {} is not text", i + 1)),
        };
        if text.is_empty() {
            return Err(format!("option {} is blank", i + 1));
        }
        texts.push(text);
    }
    Ok((texts, flagged))
}

fn resolve_correct_answer(
    raw: Option<&Value>,
    options: &[String],
    flagged: Option<usize>,
) -> Result<String, String> {
    match raw {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|i| options.get(i as usize))
            .cloned()
            .ok_or_else(|| format!("correct answer index {} is out of range", n)),
        Some(Value::String(answer)) if !answer.trim().is_empty() => match_answer_text(answer, options)
            .ok_or_else(|| format!("correct answer '{}' is not one of the options", answer.trim())),
        _ => flagged
            .and_then(|i| options.get(i))
            .cloned()
            .ok_or_else(|| "missing correctAnswer".to_string()),
    }
}

/// Exact text, then case-insensitive text (ignoring `A)` labels), then a
/// letter label `A`-`D`.
fn match_answer_text(answer: &str, options: &[String]) -> Option<String> {
    let answer = answer.trim();
    if let Some(exact) = options.iter().find(|o| o.as_str() == answer) {
        return Some(exact.clone());
    }

    let folded = answer.to_lowercase();
    if let Some(option) = options.iter().find(|o| {
        o.to_lowercase() == folded || OPTION_LABEL_RE.replace(o, "").to_lowercase() == folded
    }) {
        return Some(option.clone());
    }

    let caps = ANSWER_LABEL_RE.captures(answer)?;
    let index = "abcd".find(caps[1].to_ascii_lowercase().as_str())?;
    let option = options.get(index)?;
    let rest = caps.get(2).map(|m| m.as_str().trim().to_lowercase()).unwrap_or_default();
    if rest.is_empty() || option.to_lowercase().contains(&rest) {
        Some(option.clone())
    } else {
        None
    }
}

/// Finds the item list: a bare array, a single item object, or an array under
/// one of `wrapper_keys` (searched through nested wrapper objects), else the
/// first array-valued field.
fn locate_entries<'a>(
    value: &'a Value,
    wrapper_keys: &[&str],
    is_entry: fn(&Map<String, Value>) -> bool,
    depth: u8,
) -> Option<Vec<&'a Value>> {
    match value {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(object) if is_entry(object) => Some(vec![value]),
        Value::Object(object) if depth < MAX_WRAPPER_DEPTH => wrapper_keys
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(|inner| locate_entries(inner, wrapper_keys, is_entry, depth + 1))
            .or_else(|| {
                object
                    .values()
                    .find_map(Value::as_array)
                    .map(|items| items.iter().collect())
            }),
        _ => None,
    }
}

fn is_topic_entry(object: &Map<String, Value>) -> bool {
    first_field(object, MAIN_TOPIC_KEYS).is_some()
        || first_field(object, STRONG_SUB_TOPIC_NAME_KEYS).is_some()
}

fn is_question_entry(object: &Map<String, Value>) -> bool {
    text_field(object, QUESTION_TEXT_KEYS).is_some() && first_field(object, OPTION_LIST_KEYS).is_some()
}

fn no_entries(kind: ExpectedKind) -> NormalizationFailure {
    NormalizationFailure {
        kind,
        dropped: 0,
        notes: vec![format!("no {} list found in parsed value", kind)],
    }
}

fn first_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

/// First non-blank string among `keys`, trimmed.
fn text_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}
