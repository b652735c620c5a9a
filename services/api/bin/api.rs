//! Main Entrypoint for the Revise API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Initializing the generation service and the conversation state machine.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use revise_api::{
    config::{Config, Provider},
    db::Db,
    locks::SessionLocks,
    router::create_router,
    state::AppState,
};
use revise_core::{
    MachineConfig, StateMachine,
    content::ContentRepository,
    generation::{GenerationService, OpenAiGenerationService},
    store::SessionStore,
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads all `.md` prompt templates from a directory, keyed by file stem.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
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

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize the Generation Service ---
    let prompts = load_prompts(&config.prompts_path)?;
    let generation: Arc<dyn GenerationService> = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY missing")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/");
            Arc::new(OpenAiGenerationService::new(
                openai_config,
                config.chat_model.clone(),
                prompts,
            ))
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY missing")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai");
            Arc::new(OpenAiGenerationService::new(
                openai_config,
                config.chat_model.clone(),
                prompts,
            ))
        }
    };

    // --- 5. Assemble the State Machine ---
    let store: Arc<dyn SessionStore> = db.clone();
    let content: Arc<dyn ContentRepository> = db.clone();
    let machine = Arc::new(StateMachine::new(
        store,
        content,
        generation,
        MachineConfig {
            required_correct_answers: config.required_correct_answers,
            ..Default::default()
        },
    ));

    let app_state = Arc::new(AppState {
        machine,
        db,
        locks: SessionLocks::new(),
        config: Arc::new(config.clone()),
    });

    // --- 6. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 7. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        mastery_threshold = config.required_correct_answers,
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
