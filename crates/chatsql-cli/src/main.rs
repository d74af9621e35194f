use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatsql_api::state::AppState;
use chatsql_infra::{FilesystemArtifactStore, HttpEmbedder, HttpLlmProvider, HttpQueryExecutor, SqliteConversationStore, SqliteKnowledgeStore};

#[derive(Parser)]
#[command(name = "chatsql", about = "Conversational natural-language-to-SQL analytics service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve,
    /// Run the RAG-store eviction sweep once and exit.
    Evict,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chatsql=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = chatsql_infra::config::load()?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Evict => evict_once(config).await,
    }
}

async fn build_state(config: chatsql_types::config::AppConfig) -> Result<AppState> {
    let knowledge = Arc::new(SqliteKnowledgeStore::connect(&config.store.database_url).await?);
    let conversations = Arc::new(SqliteConversationStore::connect(&config.store.database_url).await?);
    let artifacts = Arc::new(FilesystemArtifactStore::new(&config.store.artifact_dir));
    let llm = Arc::new(HttpLlmProvider::new(
        config.provider.llm_endpoint.clone(),
        config.provider.llm_api_key.clone(),
    ));
    let embedder = Arc::new(HttpEmbedder::new(
        config.provider.embedder_endpoint.clone(),
        config.provider.embedder_api_key.clone(),
    ));
    let executor = Arc::new(HttpQueryExecutor::new(config.provider.query_executor_endpoint.clone()));

    Ok(AppState::new(knowledge, conversations, artifacts, llm, embedder, executor, config))
}

async fn serve(config: chatsql_types::config::AppConfig) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let eviction_interval = std::time::Duration::from_secs(config.agent.eviction_interval_hours * 3600);

    chatsql_api::metrics::install().map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    let state = build_state(config).await?;
    state.analyzer.reload_dictionaries().await?;

    spawn_eviction_sweep(state.clone(), eviction_interval);

    let router = chatsql_api::routes::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "chatsql listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn evict_once(config: chatsql_types::config::AppConfig) -> Result<()> {
    let state = build_state(config).await?;
    let evicted = state.learner.evict_stale().await?;
    tracing::info!(evicted, "rag eviction sweep complete");
    Ok(())
}

/// Runs the RAG Learner's stale-entry sweep on a fixed interval for the
/// lifetime of the server process (spec §4.7 Eviction).
fn spawn_eviction_sweep(state: AppState, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.learner.evict_stale().await {
                Ok(evicted) => tracing::info!(evicted, "rag eviction sweep complete"),
                Err(e) => tracing::warn!(error = %e, "rag eviction sweep failed"),
            }
        }
    });
}
