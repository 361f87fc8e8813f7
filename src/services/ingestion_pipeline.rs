use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    config::Config,
    constants::prompts::{
        DETECT_TOPICS_TEMPLATE_NAME, GENERATE_QUESTIONS_TEMPLATE_NAME, JSON_SYSTEM_INSTRUCTION,
        NEW_TOPICS_TEMPLATE_NAME, NO_RESULTS_MARKER,
    },
    errors::AppResult,
    models::{
        domain::{
            normalized_key, CanonicalQuestion, CanonicalTopic, Difficulty, ExpectedKind,
            IngestionResult, Provenance, RawResponse,
        },
        dto::{provider_schema::question_output_schema, GenerateQuestionsRequest},
    },
    services::{
        fallback_synthesizer::{synthesize_questions, synthesize_topics},
        model_service::{GenerationOptions, ModelProvider, OpenAiModelService},
        observability::{IngestionObserver, LogObserver, ResultSummary},
        prompt_templates::{compile_template, PromptLibrary, PromptTemplateSource},
        retry_orchestrator::{
            AttemptFailure, Interpreted, OrchestratorOutcome, RetryOrchestrator, RetryPolicy,
        },
        shape_normalizer::{normalize_questions, normalize_topics, QuestionContext},
        structure_extractor::extract,
    },
};

const DETECT_TOPICS_OPERATION: &str = "detect_topics";
const NEW_TOPICS_OPERATION: &str = "detect_exclusive_new_topics";
const GENERATE_QUESTIONS_OPERATION: &str = "generate_questions";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_document_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 4096,
            max_document_chars: 30_000,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_document_chars: config.max_document_chars,
        }
    }
}

/// Holds no per-call state; concurrent calls share it read-only.
pub struct IngestionPipeline {
    provider: Arc<dyn ModelProvider>,
    templates: Arc<dyn PromptTemplateSource>,
    observer: Arc<dyn IngestionObserver>,
    orchestrator: RetryOrchestrator,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        templates: Arc<dyn PromptTemplateSource>,
        observer: Arc<dyn IngestionObserver>,
        policy: RetryPolicy,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            templates,
            orchestrator: RetryOrchestrator::new(policy, Arc::clone(&observer)),
            observer,
            settings,
        }
    }

    /// OpenAI provider, built-in prompts (or `PROMPT_TEMPLATE_DIR` overrides)
    /// and log-based observability.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        config.validate()?;
        let provider = Arc::new(OpenAiModelService::from_config(config)?);

        Ok(Self::new(
            provider,
            Arc::new(PromptLibrary::from_config(config)),
            Arc::new(LogObserver),
            config.retry_policy(),
            PipelineSettings::from(config),
        ))
    }

    /// Topics covered by `document_text`. Never empty. Topics that match an
    /// existing name by normalized key take that name's spelling.
    pub async fn detect_topics(
        &self,
        document_text: &str,
        existing_topic_names: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<IngestionResult<CanonicalTopic>> {
        let document = truncate_document(document_text, self.settings.max_document_chars);
        let prompt = self.render(
            DETECT_TOPICS_TEMPLATE_NAME,
            &[
                ("DOCUMENT", document.to_string()),
                ("EXISTING_TOPICS", bullet_list(existing_topic_names)),
            ],
        )?;

        let outcome = self
            .orchestrator
            .run(
                DETECT_TOPICS_OPERATION,
                self.provider.as_ref(),
                &prompt,
                &self.generation_options(),
                cancel,
                interpret_topics,
            )
            .await?;

        let mut result = into_result(DETECT_TOPICS_OPERATION, outcome, || synthesize_topics(document));
        result.items = align_with_existing(result.items, existing_topic_names);
        self.report(DETECT_TOPICS_OPERATION, &result);
        Ok(result)
    }

    /// Names of topics in `context` that none of `existing_topic_names` cover,
    /// unique by normalized key. Empty when nothing new is found.
    pub async fn detect_exclusive_new_topics(
        &self,
        context: &str,
        existing_topic_names: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<Vec<String>> {
        let context = truncate_document(context, self.settings.max_document_chars);
        let prompt = self.render(
            NEW_TOPICS_TEMPLATE_NAME,
            &[
                ("CONTEXT", context.to_string()),
                ("EXISTING_TOPICS", bullet_list(existing_topic_names)),
            ],
        )?;

        let outcome = self
            .orchestrator
            .run(
                NEW_TOPICS_OPERATION,
                self.provider.as_ref(),
                &prompt,
                &self.generation_options(),
                cancel,
                interpret_topics,
            )
            .await?;

        let result = into_result(NEW_TOPICS_OPERATION, outcome, || synthesize_topics(context));
        self.report(NEW_TOPICS_OPERATION, &result);

        let mut seen: HashSet<String> = existing_topic_names
            .iter()
            .map(|name| normalized_key(name))
            .collect();
        Ok(result
            .items
            .into_iter()
            .filter(|topic| seen.insert(topic.normalized_key.clone()))
            .map(|topic| topic.display_name)
            .collect())
    }

    /// Validated multiple-choice questions, at most `request.count` of them.
    /// Never empty once the request itself is valid.
    pub async fn generate_questions(
        &self,
        request: &GenerateQuestionsRequest,
        cancel: &CancellationToken,
    ) -> AppResult<IngestionResult<CanonicalQuestion>> {
        request.validate()?;
        let topics = request.topic_names();
        let prompt = self.render(
            GENERATE_QUESTIONS_TEMPLATE_NAME,
            &[
                ("COUNT", request.count.to_string()),
                ("DIFFICULTY", difficulty_label(request.difficulty).to_string()),
                ("TOPICS", bullet_list(&topics)),
                ("SCHEMA", question_output_schema()),
            ],
        )?;
        let context = QuestionContext {
            default_topic: topics.first().cloned(),
            difficulty: request.difficulty,
        };

        let outcome = self
            .orchestrator
            .run(
                GENERATE_QUESTIONS_OPERATION,
                self.provider.as_ref(),
                &prompt,
                &self.generation_options(),
                cancel,
                |raw| interpret_questions(raw, &context),
            )
            .await?;

        let mut result = into_result(GENERATE_QUESTIONS_OPERATION, outcome, || {
            synthesize_questions(&topics, request.difficulty)
        });
        let limit = request.count as usize;
        if result.items.len() > limit {
            let extra = result.items.len() - limit;
            result.items.truncate(limit);
            result.notes.push(format!("truncated {} questions beyond the requested count", extra));
        }
        self.report(GENERATE_QUESTIONS_OPERATION, &result);
        Ok(result)
    }

    fn render(&self, template_name: &str, pairs: &[(&str, String)]) -> AppResult<String> {
        let template = self.templates.load_template(template_name)?;
        let mut variables: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        variables.insert("NO_RESULTS".to_string(), NO_RESULTS_MARKER.to_string());
        Ok(compile_template(&template, &variables))
    }

    fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: Some(self.settings.temperature),
            max_output_tokens: Some(self.settings.max_output_tokens),
            system_instruction: Some(JSON_SYSTEM_INSTRUCTION.to_string()),
        }
    }

    fn report<T>(&self, operation: &str, result: &IngestionResult<T>) {
        self.observer.record_result(
            operation,
            &ResultSummary {
                provenance: result.provenance,
                item_count: result.items.len(),
                attempts: result.attempts,
                dropped_items: result.dropped_items,
            },
        );
    }
}

fn interpret_topics(raw: &RawResponse) -> Result<Interpreted<CanonicalTopic>, AttemptFailure> {
    let extracted = extract(&raw.text, ExpectedKind::Topics).map_err(AttemptFailure::Extraction)?;
    let batch = normalize_topics(&extracted.value).map_err(AttemptFailure::Normalization)?;
    Ok(Interpreted {
        batch,
        provenance: extracted.provenance(),
    })
}

fn interpret_questions(
    raw: &RawResponse,
    context: &QuestionContext,
) -> Result<Interpreted<CanonicalQuestion>, AttemptFailure> {
    let extracted = extract(&raw.text, ExpectedKind::Questions).map_err(AttemptFailure::Extraction)?;
    let batch = normalize_questions(&extracted.value, context).map_err(AttemptFailure::Normalization)?;
    Ok(Interpreted {
        batch,
        provenance: extracted.provenance(),
    })
}

fn into_result<T>(
    operation: &str,
    outcome: OrchestratorOutcome<T>,
    synthesize: impl FnOnce() -> Vec<T>,
) -> IngestionResult<T> {
    match outcome {
        OrchestratorOutcome::Success {
            interpreted,
            attempts,
        } => IngestionResult {
            items: interpreted.batch.items,
            provenance: interpreted.provenance,
            attempts,
            dropped_items: interpreted.batch.dropped,
            notes: interpreted.batch.notes,
        },
        OrchestratorOutcome::Exhausted {
            attempts,
            last_failure,
        } => {
            log::warn!(
                "{}: no usable response after {} attempts ({}), synthesizing",
                operation,
                attempts,
                last_failure
            );
            IngestionResult {
                items: synthesize(),
                provenance: Provenance::SyntheticFallback,
                attempts,
                dropped_items: 0,
                notes: vec![format!("last failure: {}", last_failure)],
            }
        }
    }
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_document(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => {
            log::debug!("document truncated from {} bytes to {}", text.len(), end);
            &text[..end]
        }
        None => text,
    }
}

/// Rewrites topic and parent names that match an existing topic by normalized
/// key to the existing spelling.
fn align_with_existing(topics: Vec<CanonicalTopic>, existing_topic_names: &[String]) -> Vec<CanonicalTopic> {
    let known: HashMap<String, &str> = existing_topic_names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| (normalized_key(name), name))
        .collect();
    if known.is_empty() {
        return topics;
    }

    let surface = |name: &str| -> String {
        known
            .get(&normalized_key(name))
            .copied()
            .unwrap_or(name)
            .to_string()
    };

    topics
        .into_iter()
        .map(|topic| {
            let parent = topic.parent_display_name.as_deref().map(surface);
            CanonicalTopic::build(&surface(&topic.display_name), parent.as_deref(), topic.is_main_topic)
        })
        .collect()
}

fn bullet_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn difficulty_label(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Mixed => "mixed (vary between easy, medium and hard)",
        other => other.as_str(),
    }
}
