use crate::command::{
    settings::ServerConfig,
    start::ai::{tools::Toolbox, AiProvider, OpenAiProvider},
    store::{
        artifacts::{prune_exports, DownloadRegistry},
        cache::{backend_cache, Cache},
        database::{backend_database, DatabaseBackend},
    },
};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, time::Duration};
use tokio::{fs::create_dir_all, net::TcpListener, signal, time::interval};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod ai;
mod chat;
mod documents;
mod download;
pub mod error;
mod export;
mod forms;
mod health;
mod reports;

#[cfg(test)]
mod testing;

pub const BODY_LIMIT: usize = 25 * 1024 * 1024;

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    ai: Box<dyn AiProvider>,
    database: Box<dyn DatabaseBackend>,
    downloads: DownloadRegistry,
    tools: Toolbox,
    upload_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/stream", post(chat::chat_stream))
        .route("/api/chat/conversation/{id}/history", get(chat::history))
        .route("/api/documents/analyze", post(documents::analyze))
        .route("/api/documents/upload", post(documents::upload))
        .route("/api/documents/{id}", get(documents::get))
        .route("/api/forms", get(forms::list))
        .route("/api/forms/fill-with-ai", post(forms::fill_with_ai))
        .route("/api/forms/{id}", get(forms::get))
        .route("/api/export/forms/csv", post(export::forms_csv))
        .route(
            "/api/export/conversations/pdf",
            post(export::conversations_pdf_export),
        )
        .route("/api/export/documents/pdf", post(export::documents_pdf_export))
        .route("/api/reports/{kind}", post(reports::generate))
        .route("/api/download/{key}", get(download::download))
        .route("/api/download/info/{key}", get(download::info))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Remove expired artifacts on an interval for the life of the server.
fn spawn_prune(downloads: DownloadRegistry) {
    tokio::spawn(async move {
        let mut ticker = interval(PRUNE_INTERVAL);

        loop {
            ticker.tick().await;

            if let Err(err) = prune_exports(downloads.export_dir(), downloads.ttl()).await {
                warn!("download |> prune failed: {}", err);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("server |> failed to listen for shutdown: {}", err);
    }

    info!("server |> shutting down");
}

pub async fn run(config: ServerConfig) -> Result<()> {
    let database = backend_database(&config.database_backend, &config.database).await?;

    let cache = Cache::new(backend_cache(&config.cache_backend, &config.redis).await?);

    create_dir_all(&config.export_dir).await?;
    create_dir_all(&config.upload_dir).await?;

    let downloads = DownloadRegistry::new(cache, config.export_dir.clone(), config.download_ttl);

    let tools = Toolbox::new(database.clone(), downloads.clone());

    let ai = OpenAiProvider::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_model.clone(),
        tools.clone(),
    )?;

    info!("chat |> model: {}", config.openai_model);

    spawn_prune(downloads.clone());

    let state = AppState {
        ai: Box::new(ai),
        database,
        downloads,
        tools,
        upload_dir: config.upload_dir.clone(),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;

    info!("server |> listening: {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
