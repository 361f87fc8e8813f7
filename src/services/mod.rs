pub mod fallback_synthesizer;
pub mod ingestion_pipeline;
pub mod model_service;
pub mod observability;
pub mod prompt_templates;
pub mod retry_orchestrator;
pub mod shape_normalizer;
pub mod structure_extractor;
pub mod text_repair;

pub use ingestion_pipeline::{IngestionPipeline, PipelineSettings};
pub use model_service::{GenerationOptions, ModelProvider, OpenAiModelService};
pub use observability::{IngestionObserver, LogObserver, ResultSummary};
pub use retry_orchestrator::RetryPolicy;
