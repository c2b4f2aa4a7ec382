//! Server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use hearth_config::{load_settings, Settings};
use hearth_engine::{
    EngineSet, InferenceFacade, LanguageModel, StubLanguageModel, StubSpeechToText,
    StubTextToSpeech,
};
use hearth_server::{create_router, AppState};
use hearth_storage::{SettingsStore, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings(std::env::var("HEARTH_ENV").ok().as_deref())?;
    init_tracing(&settings);

    tracing::info!("Starting hearth server v{}", env!("CARGO_PKG_VERSION"));

    let storage = Arc::new(Storage::open(&settings.storage.db_path)?);
    if let Err(e) = storage.seed_defaults() {
        tracing::warn!("Seeding failed: {e}");
    }

    let facade = Arc::new(InferenceFacade::new());

    // The HTTP surface comes up immediately; engines load in the
    // background and sessions are refused until they are installed.
    {
        let facade = facade.clone();
        let storage = storage.clone();
        let engine = settings.engine.clone();
        tokio::spawn(async move {
            let llm_model = storage
                .settings
                .get("llm_model")
                .ok()
                .flatten()
                .unwrap_or(engine.llm_model);
            facade
                .install(EngineSet {
                    stt: Arc::new(StubSpeechToText::new("")),
                    llm: Arc::new(StubLanguageModel::new(&llm_model, "Hello.")),
                    tts: Arc::new(StubTextToSpeech::new(24_000)),
                })
                .await;
        });
    }

    let model_factory: hearth_server::state::ModelFactory = Arc::new(|model_ref: &str| {
        Arc::new(StubLanguageModel::new(model_ref, "Hello.")) as Arc<dyn LanguageModel>
    });

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, storage, facade, model_factory);
    let app = create_router(state);

    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.observability.log_level.clone().into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
