use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use commontale::answer::AnswerGenerator;
use commontale::config::Settings;
use commontale::rag::Retriever;
use commontale::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Connecting to Qdrant: {}", settings.qdrant_url);
    tracing::info!("Embedding endpoint: {}", settings.embedding_base_url);
    tracing::info!("Chat endpoint: {}", settings.openai_base_url);

    let retriever = Retriever::from_settings(&settings)?;
    let answers = AnswerGenerator::from_settings(&settings)?;
    let state = Arc::new(AppState::new(retriever, answers)?);

    let app = server::router(state, &settings.static_dir);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
