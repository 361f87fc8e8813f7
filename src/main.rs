use std::{io::Read, path::PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use quiz_ingest::{
    config::Config,
    errors::{AppError, AppResult},
    models::{domain::Difficulty, dto::GenerateQuestionsRequest},
    services::IngestionPipeline,
};

/// Turn study material into topics and quiz questions with an LLM.
#[derive(Parser, Debug)]
#[command(name = "quiz-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the topics a document covers
    Topics {
        /// Document to read, or stdin when omitted
        #[arg(long, value_name = "FILE")]
        document: Option<PathBuf>,

        /// Topic names the course already has
        #[arg(long = "existing", value_name = "NAME")]
        existing: Vec<String>,
    },
    /// List topics in a document that the existing ones do not cover
    NewTopics {
        #[arg(long, value_name = "FILE")]
        document: Option<PathBuf>,

        #[arg(long = "existing", value_name = "NAME")]
        existing: Vec<String>,
    },
    /// Generate multiple-choice questions for topics
    Questions {
        #[arg(long = "topic", value_name = "NAME", required = true)]
        topics: Vec<String>,

        #[arg(long, default_value_t = 5)]
        count: u32,

        /// easy, medium, hard or mixed
        #[arg(long, default_value = "medium")]
        difficulty: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = Config::from_env();
    let pipeline = IngestionPipeline::from_config(&config)?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling");
            ctrl_c_token.cancel();
        }
    });

    let output = match cli.command {
        Command::Topics { document, existing } => {
            let text = read_document(document.as_ref())?;
            let result = pipeline.detect_topics(&text, &existing, &cancel).await?;
            serde_json::to_string_pretty(&result)?
        }
        Command::NewTopics { document, existing } => {
            let text = read_document(document.as_ref())?;
            let names = pipeline
                .detect_exclusive_new_topics(&text, &existing, &cancel)
                .await?;
            serde_json::to_string_pretty(&names)?
        }
        Command::Questions {
            topics,
            count,
            difficulty,
        } => {
            let difficulty = Difficulty::parse_loose(&difficulty).ok_or_else(|| {
                AppError::ValidationError(format!("unknown difficulty '{}'", difficulty))
            })?;
            let request = GenerateQuestionsRequest::new(topics, count, difficulty);
            let result = pipeline.generate_questions(&request, &cancel).await?;
            serde_json::to_string_pretty(&result)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn read_document(path: Option<&PathBuf>) -> AppResult<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            AppError::ValidationError(format!("cannot read {}: {}", path.display(), e))
        }),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}
