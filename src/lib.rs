pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod llm;
pub mod rag;
pub mod routes;

use config::Config;
use db::Database;
use embedding::EmbeddingClient;
use llm::relay::ChatRelay;
use rag::Orchestrator;
use routes::{build_router, AppState};
use std::sync::Arc;

/// Open the store, serve the API until Ctrl-C, then close the store.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(Database::open(&config.database_path)?);
    tracing::info!(path = %config.database_path.display(), "vector memory opened");

    let client = reqwest::Client::new();
    let rag = Orchestrator::new(
        db.clone(),
        EmbeddingClient::new(client.clone(), config.embedding()),
        ChatRelay::new(client, config.completion()),
        config.top_k,
    );
    let app = build_router(AppState {
        rag,
        chunk_words: config.chunk_words,
    });

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => tracing::warn!("vector memory still in use at shutdown"),
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
