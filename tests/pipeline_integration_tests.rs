use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use quiz_ingest::{
    errors::{AppError, AppResult, ProviderError},
    models::{
        domain::{normalized_key, AttemptOutcome, Difficulty, IngestionAttempt, Provenance, RawResponse},
        dto::GenerateQuestionsRequest,
    },
    services::{
        model_service::{GenerationOptions, ModelProvider},
        observability::{IngestionObserver, ResultSummary},
        prompt_templates::{PromptLibrary, PromptTemplateSource},
        IngestionPipeline, PipelineSettings, RetryPolicy,
    },
};

/// Replays scripted replies in order, repeating the last one once the script
/// runs out.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    last: Mutex<Option<Result<String, ProviderError>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<&str, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn always(reply: Result<&str, ProviderError>) -> Self {
        Self::new(vec![reply])
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<RawResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ProviderError::Network("empty script".into()))),
        };
        reply.map(RawResponse::from_text)
    }
}

struct InMemoryTemplates {
    templates: HashMap<String, String>,
}

impl InMemoryTemplates {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            templates: pairs
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
        }
    }
}

impl PromptTemplateSource for InMemoryTemplates {
    fn load_template(&self, name: &str) -> AppResult<Arc<str>> {
        self.templates
            .get(name)
            .map(|text| Arc::from(text.as_str()))
            .ok_or_else(|| AppError::Template(format!("no template '{}'", name)))
    }
}

#[derive(Default)]
struct RecordingObserver {
    attempts: Mutex<Vec<IngestionAttempt>>,
    results: Mutex<Vec<ResultSummary>>,
}

impl RecordingObserver {
    fn outcomes(&self) -> Vec<AttemptOutcome> {
        self.attempts.lock().unwrap().iter().map(|a| a.outcome).collect()
    }

    fn results(&self) -> Vec<ResultSummary> {
        self.results.lock().unwrap().clone()
    }
}

impl IngestionObserver for RecordingObserver {
    fn record_attempt(&self, _operation: &str, attempt: &IngestionAttempt) {
        self.attempts.lock().unwrap().push(attempt.clone());
    }

    fn record_result(&self, _operation: &str, summary: &ResultSummary) {
        self.results.lock().unwrap().push(summary.clone());
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries).with_delay_window(Duration::from_millis(1), Duration::from_millis(5))
}

fn pipeline(
    provider: Arc<ScriptedProvider>,
    observer: Arc<RecordingObserver>,
    policy: RetryPolicy,
) -> IngestionPipeline {
    IngestionPipeline::new(
        provider,
        Arc::new(PromptLibrary::default()),
        observer,
        policy,
        PipelineSettings::default(),
    )
}

const ALGEBRA_TOPICS: &str =
    r#"{"topics": [{"mainTopic":"Algebra","subTopics":["Linear Equations","Quadratics"]}]}"#;

#[tokio::test]
async fn test_algebra_topics_are_flattened() {
    let provider = Arc::new(ScriptedProvider::always(Ok(ALGEBRA_TOPICS)));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider.clone(), observer.clone(), fast_policy(3));

    let result = pipeline
        .detect_topics("Solving equations.", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.provenance, Provenance::ProviderParsed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.len(), 3);

    let main: Vec<_> = result.items.iter().filter(|t| t.is_main_topic).collect();
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].display_name, "Algebra");
    for sub in result.items.iter().filter(|t| !t.is_main_topic) {
        assert_eq!(sub.parent_display_name.as_deref(), Some("Algebra"));
    }

    assert_eq!(provider.calls(), 1);
    assert_eq!(observer.outcomes(), vec![AttemptOutcome::Success]);
    assert_eq!(observer.results()[0].item_count, 3);
}

#[tokio::test]
async fn test_truncated_topics_keep_main_topic() {
    let provider = Arc::new(ScriptedProvider::always(Ok(
        r#"{"topics": [{"mainTopic": "Biology", "subTopics": ["Cells""#,
    )));
    let pipeline = pipeline(provider, Arc::new(RecordingObserver::default()), fast_policy(3));

    let result = pipeline
        .detect_topics("Cells are the unit of life.", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.is_synthetic());
    assert!(result
        .items
        .iter()
        .any(|t| t.display_name == "Biology" && t.is_main_topic));
}

#[tokio::test]
async fn test_fenced_question_is_recovered() {
    let provider = Arc::new(ScriptedProvider::always(Ok(
        "Here you go:\n```json\n{\"questions\":[{\"questionText\":\"2+2?\",\"options\":[\"3\",\"4\",\"5\",\"6\"],\"correctAnswer\":\"4\"}]}\n```",
    )));
    let pipeline = pipeline(provider, Arc::new(RecordingObserver::default()), fast_policy(3));

    let request = GenerateQuestionsRequest::new(vec!["Arithmetic".into()], 5, Difficulty::Easy);
    let result = pipeline
        .generate_questions(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].correct_answer, "4");
    assert_eq!(result.items[0].topic_name, "Arithmetic");
    assert_eq!(result.provenance, Provenance::ProviderParsed);
}

#[tokio::test]
async fn test_prose_exhausts_retries_then_synthesizes_from_document() {
    let provider = Arc::new(ScriptedProvider::always(Ok("I cannot help with that.")));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider.clone(), observer.clone(), fast_policy(3));

    let result = pipeline
        .detect_topics(
            "Mitochondria produce energy. Mitochondria contain ribosomes.",
            &[],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.is_synthetic());
    assert!(!result.is_empty());
    assert_eq!(result.items[0].display_name, "Mitochondria");
    assert_eq!(provider.calls(), 4);
    assert_eq!(result.attempts, 4);
    assert_eq!(observer.results()[0].provenance, Provenance::SyntheticFallback);
}

#[tokio::test]
async fn test_retry_bound_with_transient_failures() {
    let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Timeout)));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider.clone(), observer.clone(), fast_policy(2));

    let request = GenerateQuestionsRequest::new(vec!["Chemistry".into()], 3, Difficulty::Mixed);
    let result = pipeline
        .generate_questions(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 3);
    assert_eq!(
        observer.outcomes(),
        vec![
            AttemptOutcome::RetryableFailure,
            AttemptOutcome::RetryableFailure,
            AttemptOutcome::TerminalFailure,
        ]
    );
    assert!(result.is_synthetic());
    assert_eq!(result.len(), 3);
    for question in &result.items {
        assert!(question.validate().is_ok());
        assert_eq!(question.topic_name, "Chemistry");
    }
}

#[tokio::test]
async fn test_no_results_marker_is_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok("NO_RESULTS"), Ok(ALGEBRA_TOPICS)]));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider.clone(), observer.clone(), fast_policy(3));

    let result = pipeline
        .detect_topics("Equations and their roots.", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(result.provenance, Provenance::ProviderParsed);
    assert_eq!(
        observer.outcomes(),
        vec![AttemptOutcome::RetryableFailure, AttemptOutcome::Success]
    );
}

#[tokio::test]
async fn test_new_topics_are_unique_and_exclude_existing() {
    let provider = Arc::new(ScriptedProvider::always(Ok(
        r#"{"newTopics": ["Cell Biology", "CELL BIOLOGY", "Genetics", "genetics", "Ecology"]}"#,
    )));
    let pipeline = pipeline(provider, Arc::new(RecordingObserver::default()), fast_policy(3));
    let existing = vec!["ecology".to_string()];

    let names = pipeline
        .detect_exclusive_new_topics("Cells, genes and ecosystems.", &existing, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(names, vec!["Cell Biology".to_string(), "Genetics".to_string()]);
    let mut keys: Vec<_> = names.iter().map(|n| normalized_key(n)).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), names.len());
    assert!(!keys.contains(&normalized_key("ecology")));
}

#[tokio::test]
async fn test_malformed_question_is_dropped_not_fatal() {
    let provider = Arc::new(ScriptedProvider::always(Ok(r#"{"questions": [
        {"questionText": "Capital of France?", "options": ["Paris", "Rome", "Madrid", "Berlin"], "correctAnswer": "Paris"},
        {"questionText": "Broken", "options": ["a", "b", "c", "d"], "correctAnswer": "z"},
        {"questionText": "Largest planet?", "choices": ["Mars", "Jupiter", "Venus", "Earth"], "answer": "B"}
    ]}"#)));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider, observer.clone(), fast_policy(3));

    let request = GenerateQuestionsRequest::new(vec!["Geography".into()], 10, Difficulty::Medium);
    let result = pipeline
        .generate_questions(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.dropped_items, 1);
    assert_eq!(result.items[1].correct_answer, "Jupiter");
    assert!(result.items.iter().all(|q| q.options.len() == 4 && q.options.contains(&q.correct_answer)));
    assert_eq!(observer.results()[0].dropped_items, 1);
}

#[tokio::test]
async fn test_fatal_provider_error_propagates_without_retry() {
    let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Authentication(
        "invalid api key".into(),
    ))));
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider.clone(), observer.clone(), fast_policy(3));

    let err = pipeline
        .detect_topics("Anything.", &[], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)));
    assert_eq!(provider.calls(), 1);
    assert_eq!(observer.outcomes(), vec![AttemptOutcome::TerminalFailure]);
    assert!(observer.results().is_empty());
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let provider = Arc::new(
        ScriptedProvider::always(Ok(ALGEBRA_TOPICS)).with_delay(Duration::from_secs(30)),
    );
    let observer = Arc::new(RecordingObserver::default());
    let pipeline = pipeline(provider, observer.clone(), fast_policy(3));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = pipeline
        .detect_topics("Slow document.", &[], &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(observer.outcomes(), vec![AttemptOutcome::TerminalFailure]);
}

#[tokio::test]
async fn test_custom_templates_are_used() {
    let provider = Arc::new(ScriptedProvider::always(Ok(r#"["Optics", "Waves"]"#)));
    let templates = InMemoryTemplates::new(&[("detect_topics", "Topics in: {{DOCUMENT}}")]);
    let pipeline = IngestionPipeline::new(
        provider,
        Arc::new(templates),
        Arc::new(RecordingObserver::default()),
        fast_policy(1),
        PipelineSettings::default(),
    );

    let result = pipeline
        .detect_topics("Light bends.", &[], &CancellationToken::new())
        .await
        .unwrap();
    let names: Vec<_> = result.items.iter().map(|t| t.display_name.as_str()).collect();
    assert_eq!(names, vec!["Optics", "Waves"]);
    assert!(result.items.iter().all(|t| t.is_main_topic));

    let err = pipeline
        .generate_questions(
            &GenerateQuestionsRequest::new(vec![], 2, Difficulty::Easy),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Template(_)));
}

#[tokio::test]
async fn test_non_empty_for_blank_inputs() {
    let provider = Arc::new(ScriptedProvider::always(Ok("")));
    let pipeline = Arc::new(pipeline(
        provider,
        Arc::new(RecordingObserver::default()),
        fast_policy(1),
    ));

    let topics = pipeline
        .detect_topics("", &[], &CancellationToken::new())
        .await
        .unwrap();
    assert!(!topics.is_empty());

    let questions = pipeline
        .generate_questions(
            &GenerateQuestionsRequest::new(vec![], 4, Difficulty::Hard),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(questions.len(), 4);
    assert!(questions.items.iter().all(|q| q.validate().is_ok()));
}

#[tokio::test]
async fn test_unknown_model_is_reported_not_synthesized() {
    let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Configuration(
        "The model `gpt-9` does not exist".into(),
    ))));
    let pipeline = pipeline(provider.clone(), Arc::new(RecordingObserver::default()), fast_policy(3));

    let request = GenerateQuestionsRequest::new(vec!["Physics".into()], 2, Difficulty::Easy);
    let err = pipeline
        .generate_questions(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)));
    assert_eq!(provider.calls(), 1);
}
