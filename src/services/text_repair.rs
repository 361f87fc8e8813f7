use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_\-]*[ \t]*\r?\n?(.*?)```").expect("FENCE_RE is a valid regex pattern")
});
static DOUBLED_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*,)+").expect("DOUBLED_COMMA_RE is a valid regex pattern"));
static LEADING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\[{])\s*,").expect("LEADING_COMMA_RE is a valid regex pattern"));
static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("TRAILING_COMMA_RE is a valid regex pattern"));
static ADJACENT_OBJECTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\}\s*\{").expect("ADJACENT_OBJECTS_RE is a valid regex pattern"));
static ADJACENT_ARRAYS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]\s*\[").expect("ADJACENT_ARRAYS_RE is a valid regex pattern"));
static BARE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-]*)(\s*:)").expect("BARE_KEY_RE is a valid regex pattern")
});
static BARE_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(:\s*)([A-Za-z][A-Za-z0-9 _\-\.']*?)(\s*)([,}\]]|\z)")
        .expect("BARE_VALUE_RE is a valid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    StripFences,
    SliceOuterRegion,
    NormalizePunctuation,
    QuoteBareTokens,
    BalanceBrackets,
}

const MAX_REPAIR_PASSES: usize = 8;

/// Stages in the order they are attempted.
pub const CASCADE: [RepairStage; 5] = [
    RepairStage::StripFences,
    RepairStage::SliceOuterRegion,
    RepairStage::NormalizePunctuation,
    RepairStage::QuoteBareTokens,
    RepairStage::BalanceBrackets,
];

impl RepairStage {
    pub fn name(&self) -> &'static str {
        match self {
            RepairStage::StripFences => "strip_fences",
            RepairStage::SliceOuterRegion => "slice_outer_region",
            RepairStage::NormalizePunctuation => "normalize_punctuation",
            RepairStage::QuoteBareTokens => "quote_bare_tokens",
            RepairStage::BalanceBrackets => "balance_brackets",
        }
    }

    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            RepairStage::StripFences => strip_fences(text),
            RepairStage::SliceOuterRegion => slice_outer_region(text),
            RepairStage::NormalizePunctuation => normalize_punctuation(text),
            RepairStage::QuoteBareTokens => quote_bare_tokens(text),
            RepairStage::BalanceBrackets => balance_brackets(text),
        }
    }
}

/// Output of a cascade run together with the stages that changed the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTrace {
    pub text: String,
    pub applied: Vec<RepairStage>,
}

/// Runs the cascade. Total and idempotent: `repair(&repair(x)) == repair(x)`.
pub fn repair(text: &str) -> String {
    repair_traced(text).text
}

pub fn repair_traced(text: &str) -> RepairTrace {
    let mut current = text.to_string();
    let mut applied = Vec::new();

    // passes repeat until the text settles: straightened quotes can expose a
    // region the slicing stage skipped on the first pass
    for _ in 0..MAX_REPAIR_PASSES {
        let mut changed = false;
        for stage in CASCADE {
            if parses(&current) {
                break;
            }
            let next = match stage.apply(&current) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(next) => next,
            };
            if next != current {
                log::trace!("repair stage {} changed the text", stage.name());
                if !applied.contains(&stage) {
                    applied.push(stage);
                }
                current = next;
                changed = true;
            }
        }
        if !changed || parses(&current) {
            break;
        }
    }

    RepairTrace {
        text: current,
        applied,
    }
}

pub fn parses(text: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
}

/// Keeps the body of the first non-empty fenced block. An opening fence with no
/// closing fence (truncated output) keeps everything after the fence line.
pub fn strip_fences(text: &str) -> Cow<'_, str> {
    if !text.contains("```") {
        return Cow::Borrowed(text);
    }

    for caps in FENCE_RE.captures_iter(text) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !inner.is_empty() {
            return Cow::Owned(inner.to_string());
        }
    }

    let Some(start) = text.find("```") else {
        return Cow::Borrowed(text);
    };
    let after = &text[start + 3..];
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    };
    Cow::Owned(body.replace("```", "").trim().to_string())
}

/// Slices from the first opener to its last closer. Objects win unless a
/// JSON-looking array starts earlier. No closer means "to the end of the text".
pub fn slice_outer_region(text: &str) -> Cow<'_, str> {
    let object = region(text, '{', '}', |_| true);
    let array = region(text, '[', ']', looks_like_array_start);

    let (start, end) = match (object, array) {
        (Some(o), Some(a)) if a.0 < o.0 => a,
        (Some(o), _) => o,
        (None, Some(a)) => a,
        (None, None) => return Cow::Borrowed(text),
    };

    if start == 0 && end == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text[start..end].to_string())
    }
}

fn region(
    text: &str,
    open: char,
    close: char,
    accept: impl Fn(&str) -> bool,
) -> Option<(usize, usize)> {
    let start = text
        .match_indices(open)
        .map(|(i, _)| i)
        .find(|&i| accept(&text[i + open.len_utf8()..]))?;
    let end = match text.rfind(close) {
        Some(e) if e > start => e + close.len_utf8(),
        _ => text.len(),
    };
    Some((start, end))
}

/// `[see below]` in prose is not an array; `[{`, `["`, `[“`, `[1`, `[]` are.
fn looks_like_array_start(rest: &str) -> bool {
    match rest.trim_start().chars().next() {
        None => true,
        Some(c) => {
            matches!(
                c,
                '{' | '[' | '"' | ']' | '-' | 't' | 'f' | 'n' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}'
            ) || c.is_ascii_digit()
        }
    }
}

/// Smart quotes, doubled/leading/trailing commas, and missing separators
/// between adjacent objects or arrays.
pub fn normalize_punctuation(text: &str) -> Cow<'_, str> {
    let straightened: String = text
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect();

    let cleaned = map_outside_strings(&straightened, |segment| {
        let s = DOUBLED_COMMA_RE.replace_all(segment, ",");
        let s = LEADING_COMMA_RE.replace_all(&s, "$1");
        let s = TRAILING_COMMA_RE.replace_all(&s, "$1");
        let s = ADJACENT_OBJECTS_RE.replace_all(&s, "},{");
        let s = ADJACENT_ARRAYS_RE.replace_all(&s, "],[");
        s.into_owned()
    });
    let cleaned = wrap_top_level_sequence(&cleaned);

    if cleaned == text {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(cleaned)
    }
}

/// `{..},{..}` at the top level becomes `[{..},{..}]`.
fn wrap_top_level_sequence(text: &str) -> String {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return text.to_string();
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut prev_closer_at_top = false;
    for c in trimmed.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                prev_closer_at_top = depth == 0;
                continue;
            }
            ',' if depth == 0 && prev_closer_at_top => {
                return format!("[{}]", trimmed);
            }
            c if c.is_whitespace() => continue,
            _ => {}
        }
        prev_closer_at_top = false;
    }
    text.to_string()
}

/// Quotes bare object keys and bare alphabetic values, leaving `true`,
/// `false`, `null` and numbers alone.
pub fn quote_bare_tokens(text: &str) -> Cow<'_, str> {
    let quoted = map_outside_strings(text, |segment| {
        let keyed = BARE_KEY_RE.replace_all(segment, "$1\"$2\"$3");
        BARE_VALUE_RE
            .replace_all(&keyed, |caps: &Captures| {
                let value = &caps[2];
                if matches!(value, "true" | "false" | "null") {
                    caps[0].to_string()
                } else {
                    format!("{}\"{}\"{}{}", &caps[1], value, &caps[3], &caps[4])
                }
            })
            .into_owned()
    });

    if quoted == text {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(quoted)
    }
}

/// Closes whatever a truncated response left open: an unterminated string,
/// a dangling key or comma, then the missing `]`/`}` in nesting order.
/// A closer that skips an open level gets the skipped closers inserted first;
/// a closer matching nothing is dropped.
pub fn balance_brackets(text: &str) -> Cow<'_, str> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if let Some(depth) = stack.iter().rposition(|&expected| expected == c) {
                    while stack.len() > depth + 1 {
                        if let Some(missing) = stack.pop() {
                            trim_dangling(&mut out, missing == '}');
                            out.push(missing);
                        }
                    }
                    stack.pop();
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if !in_string && stack.is_empty() {
        return if out == text {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(out)
        };
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    while let Some(closer) = stack.pop() {
        trim_dangling(&mut out, closer == '}');
        out.push(closer);
    }

    Cow::Owned(out)
}

/// Strips a trailing comma, a key whose value never arrived, or a bare key
/// string inside an object.
fn trim_dangling(out: &mut String, in_object: bool) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);

        if out.ends_with(',') {
            out.pop();
            continue;
        }

        if out.ends_with(':') {
            out.pop();
            let trimmed_len = out.trim_end().len();
            out.truncate(trimmed_len);
            if let Some(start) = trailing_string_start(out) {
                out.truncate(start);
            }
            continue;
        }

        if in_object && out.ends_with('"') {
            if let Some(start) = trailing_string_start(out) {
                let before = out[..start].trim_end();
                if before.ends_with(',') || before.ends_with('{') {
                    out.truncate(start);
                    continue;
                }
            }
        }

        break;
    }
}

/// Byte offset of the opening quote of the string literal `out` ends with.
fn trailing_string_start(out: &str) -> Option<usize> {
    if !out.ends_with('"') {
        return None;
    }
    let bytes = out.as_bytes();
    let mut i = bytes.len() - 1;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let mut backslashes = 0;
            let mut j = i;
            while j > 0 && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Applies `f` to every stretch of text that is outside a JSON string literal.
/// An unterminated string runs to the end of the text.
pub(crate) fn map_outside_strings(text: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut segment_start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                out.push_str(&text[segment_start..i + 1]);
                segment_start = i + 1;
            }
        } else if c == '"' {
            out.push_str(&f(&text[segment_start..i]));
            in_string = true;
            segment_start = i;
        }
    }

    if in_string {
        out.push_str(&text[segment_start..]);
    } else {
        out.push_str(&f(&text[segment_start..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_valid_json_is_untouched() {
        let json = r#"{"topics": ["Algebra"]}"#;
        let trace = repair_traced(json);
        assert_eq!(trace.text, json);
        assert!(trace.applied.is_empty());
    }

    #[test]
    fn test_strips_markdown_fence_around_prose() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nEnjoy!";
        let trace = repair_traced(text);
        assert_eq!(trace.text, r#"{"a": 1}"#);
        assert_eq!(trace.applied, vec![RepairStage::StripFences]);
    }

    #[test]
    fn test_prefers_first_fenced_block() {
        let text = "```json\n{\"first\": true}\n```\nand\n```json\n{\"second\": true}\n```";
        assert_eq!(strip_fences(text), r#"{"first": true}"#);
    }

    #[test]
    fn test_unterminated_fence_keeps_body() {
        let text = "```json\n{\"a\": [1, 2";
        assert_eq!(strip_fences(text), r#"{"a": [1, 2"#);
    }

    #[test]
    fn test_slices_object_out_of_prose() {
        assert_eq!(
            slice_outer_region(r#"Sure! {"a": 1} hope this helps"#),
            r#"{"a": 1}"#
        );
    }

    #[test]
    fn test_earlier_array_wins_over_object() {
        assert_eq!(
            slice_outer_region(r#"Result: [{"a": 1}, {"b": 2}] done"#),
            r#"[{"a": 1}, {"b": 2}]"#
        );
    }

    #[test]
    fn test_prose_brackets_are_not_an_array() {
        assert_eq!(
            slice_outer_region(r#"Here [see below]: {"a": 1}"#),
            r#"{"a": 1}"#
        );
    }

    #[test]
    fn test_removes_trailing_and_doubled_commas() {
        assert_eq!(
            normalize_punctuation(r#"{"a": [1,, 2,], "b": 3,}"#),
            r#"{"a": [1, 2], "b": 3}"#
        );
    }

    #[test]
    fn test_commas_inside_strings_survive() {
        let text = r#"{"a": "x,,]", "b": [1,]}"#;
        assert_eq!(normalize_punctuation(text), r#"{"a": "x,,]", "b": [1]}"#);
    }

    #[test]
    fn test_straightens_smart_quotes() {
        assert_eq!(
            normalize_punctuation("{\u{201C}name\u{201D}: \u{201C}Algebra\u{201D}}"),
            r#"{"name": "Algebra"}"#
        );
    }

    #[test]
    fn test_merges_adjacent_objects() {
        assert_eq!(
            normalize_punctuation(r#"[{"a": 1} {"b": 2}]"#),
            r#"[{"a": 1},{"b": 2}]"#
        );
        assert_eq!(
            normalize_punctuation(r#"{"a": 1}{"b": 2}"#),
            r#"[{"a": 1},{"b": 2}]"#
        );
    }

    #[test]
    fn test_quotes_bare_keys_and_values() {
        assert_eq!(
            quote_bare_tokens(r#"{name: Algebra, level: 2, active: true, parent: null}"#),
            r#"{"name": "Algebra", "level": 2, "active": true, "parent": null}"#
        );
    }

    #[test]
    fn test_quoting_leaves_string_contents_alone() {
        let text = r#"{"note": "ratio: 5, key: value", count: 3}"#;
        assert_eq!(
            quote_bare_tokens(text),
            r#"{"note": "ratio: 5, key: value", "count": 3}"#
        );
    }

    #[test]
    fn test_balances_truncated_object() {
        let text = r#"{"topics": [{"mainTopic": "Biology", "subTopics": ["Cells""#;
        let balanced = balance_brackets(text);
        assert_eq!(
            balanced,
            r#"{"topics": [{"mainTopic": "Biology", "subTopics": ["Cells"]}]}"#
        );
        assert!(parses(&balanced));
    }

    #[test]
    fn test_closes_unterminated_string() {
        assert_eq!(balance_brackets(r#"{"topics": ["Cel"#), r#"{"topics": ["Cel"]}"#);
    }

    #[test]
    fn test_drops_dangling_key_and_comma() {
        assert_eq!(balance_brackets(r#"{"a": 1, "b"#), r#"{"a": 1}"#);
        assert_eq!(balance_brackets(r#"{"a": 1, "b": "#), r#"{"a": 1}"#);
        assert_eq!(balance_brackets(r#"{"a": [1, 2,"#), r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn test_inserts_skipped_closer() {
        assert_eq!(balance_brackets(r#"{"a": [1, 2}"#), r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn test_drops_unmatched_closer() {
        assert_eq!(balance_brackets(r#"{"a": 1}}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_prose_without_json_is_left_parseless() {
        let repaired = repair("I cannot help with that.");
        assert_eq!(repaired, "I cannot help with that.");
        assert!(!parses(&repaired));
    }

    #[test]
    fn test_full_cascade_recovers_messy_response() {
        let text = "Sure thing!\n```json\n{topics: [{\u{201C}mainTopic\u{201D}: \"Biology\", subTopics: [\"Cells\",, \"Genetics\",";
        let repaired = repair(text);
        assert!(parses(&repaired), "not parseable: {}", repaired);
        let value: serde_json::Value = serde_json::from_str(&repaired).expect("parse");
        assert_eq!(value["topics"][0]["mainTopic"], "Biology");
        assert_eq!(value["topics"][0]["subTopics"][1], "Genetics");
    }

    #[test]
    fn test_curly_quoted_array_is_sliced_out_of_prose() {
        let trace = repair_traced("Here are the topics: [\u{201C}Algebra\u{201D}, \u{201C}Geometry\u{201D}]");
        assert_eq!(trace.text, r#"["Algebra", "Geometry"]"#);
        assert!(trace.applied.contains(&RepairStage::SliceOuterRegion));
    }

    #[rstest]
    #[case("")]
    #[case("I cannot help with that.")]
    #[case("Note: here are topics")]
    #[case(r#"{"a": 1}"#)]
    #[case("Here you go:\n```json\n{\"a\":1}\n```")]
    #[case(r#"Sure! {"a": 1} hope this helps"#)]
    #[case(r#"{"a": [1, 2,], }"#)]
    #[case("{\u{201C}name\u{201D}: \u{201C}Algebra\u{201D}}")]
    #[case(r#"{name: Algebra, level: 2}"#)]
    #[case(r#"{"topics": [{"mainTopic": "Biology", "subTopics": ["Cells""#)]
    #[case(r#"{"topics": ["Cel"#)]
    #[case(r#"{"a": 1}{"b": 2}"#)]
    #[case(r#"[{"a": 1} {"b": 2}"#)]
    #[case(r#"{"a": [1, 2}"#)]
    #[case("```\n[1, 2, 3")]
    #[case(r#"{"questions": [{"questionText": "2+2?", "options": ["3", "4""#)]
    #[case("Here are the topics: [\u{201C}Algebra\u{201D}, \u{201C}Geometry\u{201D}]")]
    #[case("Topics: [\u{201C}Algebra\u{201D}, \u{201C}Geom")]
    #[case("] then {\u{201C}a\u{201D}: [1, 2")]
    fn test_repair_is_idempotent(#[case] input: &str) {
        let once = repair(input);
        let twice = repair(&once);
        assert_eq!(once, twice, "input: {:?}", input);
    }
}
