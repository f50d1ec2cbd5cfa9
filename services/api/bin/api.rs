//! Main Entrypoint for the IELTS Coach API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Preparing the profile store and running migrations.
//! 3. Initializing the completion and audio clients.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use coach_api::{config::Config, db::PgRecordStore, router::create_router, state::AppState};
use coach_core::{
    llm_client::{CompletionClient, OpenAICompatibleClient, SpeechSynthesizer, Transcriber},
    prompt::{PromptComposer, PromptPolicy},
    session::SessionManager,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Profile Store ---
    let store = Arc::new(PgRecordStore::new(
        config.database_url.clone(),
        config.store_freshness,
    ));
    store
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Shared Services ---
    let completion: Arc<dyn CompletionClient> =
        Arc::new(OpenAICompatibleClient::new(config.completion_client_config()));

    let (transcriber, synthesizer): (
        Option<Arc<dyn Transcriber>>,
        Option<Arc<dyn SpeechSynthesizer>>,
    ) = match config.audio_client_config() {
        Some(audio_config) => {
            let audio = Arc::new(OpenAICompatibleClient::new(audio_config));
            let transcriber: Arc<dyn Transcriber> = audio.clone();
            let synthesizer: Arc<dyn SpeechSynthesizer> = audio;
            (Some(transcriber), Some(synthesizer))
        }
        None => {
            warn!("No OpenAI key configured; voice input and spoken replies are disabled.");
            (None, None)
        }
    };

    let composer = PromptComposer::new(PromptPolicy {
        greeting: config.coach_greeting,
        ..PromptPolicy::default()
    });
    let sessions = SessionManager::new(store, composer);

    let app_state = Arc::new(AppState::from_config(
        &config,
        sessions,
        completion,
        transcriber,
        synthesizer,
    ));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
