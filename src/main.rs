use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use meal_retrieval::api_connection::{CompletionService, OllamaClient};
use meal_retrieval::cli::{parse_args, Command};
use meal_retrieval::config::Settings;
use meal_retrieval::metadata_store::SqliteMetadataStore;
use meal_retrieval::pipeline;
use meal_retrieval::prompt::{meal_prompt, user_message};
use meal_retrieval::retrieval_service::RetrievalService;
use meal_retrieval::search::{Content, EmbeddingEngine, EmbeddingStore, Encoder, NeighborSearch, VectorIndex};
use meal_retrieval::RetrievalError;

type Service = RetrievalService<VectorIndex, SqliteMetadataStore>;

/// Prints the end-user wording for a failed retrieval and exits non-zero.
fn exit_retrieval_failure(err: RetrievalError) -> ! {
    println!("{}", user_message(&Err(err)));
    std::process::exit(1);
}

fn open_service(settings: &Settings) -> Service {
    Service::open(settings).unwrap_or_else(|e| exit_retrieval_failure(e))
}

fn load_encoder(settings: &Settings) -> Result<EmbeddingEngine> {
    EmbeddingEngine::new(&settings.encoder.model_id)
        .with_context(|| format!("Failed to initialize encoder '{}'", settings.encoder.model_id))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli_args = parse_args();
    let settings = Settings::load(&cli_args.config)
        .with_context(|| format!("Failed to load settings from '{}'", cli_args.config))?;
    let paths = &settings.paths;

    match cli_args.command {
        Command::ImportMetadata { csv } => {
            let csv = csv.unwrap_or_else(|| paths.food_csv.clone());
            let metadata = SqliteMetadataStore::open(&paths.metadata_db)?;
            let count = pipeline::import_metadata(&csv, &metadata)
                .with_context(|| format!("Failed to import metadata from '{}'", csv.display()))?;
            println!("Saved {} rows to {}", count, paths.metadata_db.display());
        }
        Command::Embed { csv } => {
            let csv = csv.unwrap_or_else(|| paths.food_csv.clone());
            let encoder = load_encoder(&settings)?;
            let store = EmbeddingStore::new(&paths.embedding_store);
            let count = pipeline::embed_foods(&csv, &encoder, &store, settings.encoder.batch_size)
                .with_context(|| format!("Failed to embed foods from '{}'", csv.display()))?;
            println!("Saved {} embeddings to {}", count, paths.embedding_store.display());
        }
        Command::BuildIndex => {
            let store = EmbeddingStore::new(&paths.embedding_store);
            let index = pipeline::build_index(&store, &paths.index)
                .with_context(|| format!("Failed to build index from '{}'", paths.embedding_store.display()))?;
            println!(
                "Indexed {} vectors of dimension {} into {}",
                index.len(),
                index.dimension(),
                paths.index.display()
            );
        }
        Command::Search { text, top_k, json } => {
            let k = top_k.unwrap_or(settings.retrieval.top_k);
            let encoder = load_encoder(&settings)?;
            let service = open_service(&settings);

            if json {
                let query = encoder.encode(Content::Text(&text))?;
                let foods = service.retrieve_detailed(&query, k).unwrap_or_else(|e| exit_retrieval_failure(e));
                println!("{}", serde_json::to_string_pretty(&foods)?);
            } else {
                let outcome = service.retrieve_content(&encoder, Content::Text(&text), k);
                println!("{}", user_message(&outcome));
                if outcome.is_err() {
                    std::process::exit(1);
                }
            }
        }
        Command::Ask { description, top_k } => {
            let k = top_k.unwrap_or(settings.retrieval.top_k);
            let encoder = load_encoder(&settings)?;
            let service = open_service(&settings);

            let outcome = service.retrieve_content(&encoder, Content::Text(&description), k);
            let context = outcome.unwrap_or_else(|e| exit_retrieval_failure(e));
            if context.is_empty() {
                info!("No reference foods found; asking without nutrition context");
            }

            let prompt = meal_prompt(&description, &context);
            let mut client = OllamaClient::new(&settings.completion.base_url, &settings.completion.model);
            if let Some(options) = settings.completion.generate_options() {
                client = client.with_options(options);
            }
            info!(model = client.model(), references = context.len(), "Requesting meal analysis");
            let timeout = Duration::from_secs(settings.completion.timeout_secs);
            let answer = tokio::time::timeout(timeout, client.complete(&prompt))
                .await
                .map_err(|_| anyhow!("Completion timed out after {}s", timeout.as_secs()))??;
            println!("{}", answer);
        }
    }

    Ok(())
}
