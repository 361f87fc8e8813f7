use std::{
    collections::HashMap,
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::{
    config::Config,
    constants::prompts::{
        DETECT_TOPICS_PROMPT, DETECT_TOPICS_TEMPLATE_NAME, GENERATE_QUESTIONS_PROMPT,
        GENERATE_QUESTIONS_TEMPLATE_NAME, NEW_TOPICS_PROMPT, NEW_TOPICS_TEMPLATE_NAME,
    },
    errors::{AppError, AppResult},
};

static BLOCK_OPEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{#\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("BLOCK_OPEN_RE is a valid regex pattern")
});
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("VARIABLE_RE is a valid regex pattern")
});

pub trait PromptTemplateSource: Send + Sync {
    fn load_template(&self, name: &str) -> AppResult<Arc<str>>;
}

/// Built-in templates, optionally overridden by `<dir>/<name>.txt` files.
/// Loaded templates are cached for the life of the library.
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, Arc<str>>>,
}

impl PromptLibrary {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self {
            override_dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.prompt_template_dir.clone())
    }

    fn builtin(name: &str) -> Option<&'static str> {
        match name {
            DETECT_TOPICS_TEMPLATE_NAME => Some(DETECT_TOPICS_PROMPT),
            NEW_TOPICS_TEMPLATE_NAME => Some(NEW_TOPICS_PROMPT),
            GENERATE_QUESTIONS_TEMPLATE_NAME => Some(GENERATE_QUESTIONS_PROMPT),
            _ => None,
        }
    }

    fn read_override(&self, name: &str) -> AppResult<Option<String>> {
        let Some(dir) = &self.override_dir else {
            return Ok(None);
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(AppError::Template(format!("invalid template name '{}'", name)));
        }

        let path = dir.join(format!("{}.txt", name));
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                log::debug!("loaded prompt template override {}", path.display());
                Ok(Some(text))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Template(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PromptTemplateSource for PromptLibrary {
    fn load_template(&self, name: &str) -> AppResult<Arc<str>> {
        if let Some(hit) = self.cache.read().ok().and_then(|cache| cache.get(name).cloned()) {
            return Ok(hit);
        }

        let text: Arc<str> = match self.read_override(name)? {
            Some(text) => Arc::from(text),
            None => Arc::from(
                Self::builtin(name)
                    .ok_or_else(|| AppError::Template(format!("unknown prompt template '{}'", name)))?,
            ),
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), Arc::clone(&text));
        }
        Ok(text)
    }
}

/// Fills a template.
///
/// - `{{#VAR}}...{{/VAR}}` keeps its body only when `VAR` is set and not blank
/// - `{{VAR}}` becomes the value, or nothing when `VAR` is unknown
/// - `{VAR}` becomes the value when `VAR` is known and is left alone otherwise,
///   so literal JSON braces survive
///
/// Substituted values are never re-expanded.
pub fn compile_template(template: &str, variables: &HashMap<String, String>) -> String {
    let expanded = expand_blocks(template, variables);

    VARIABLE_RE
        .replace_all(&expanded, |caps: &Captures| {
            if let Some(name) = caps.get(1) {
                variables.get(name.as_str()).cloned().unwrap_or_else(|| {
                    log::debug!("prompt variable {} has no value", name.as_str());
                    String::new()
                })
            } else if let Some(name) = caps.get(2) {
                variables
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn expand_blocks(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(caps) = BLOCK_OPEN_RE.captures(rest) {
        let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        out.push_str(&rest[..open.start()]);
        let after_open = &rest[open.end()..];
        let close_tag = format!("{{{{/{}}}}}", name.as_str());

        match after_open.find(&close_tag) {
            Some(close_at) => {
                let present = variables
                    .get(name.as_str())
                    .is_some_and(|value| !value.trim().is_empty());
                if present {
                    out.push_str(&expand_blocks(&after_open[..close_at], variables));
                }
                rest = &after_open[close_at + close_tag.len()..];
            }
            None => {
                // unclosed block, keep the tag as text
                out.push_str(open.as_str());
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}
