use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use server::config::ServerConfig;
use server::{build_router, AppState};
use tts_core::{ModelConfig, ModelSession, PiperSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS server...");

    let config = ServerConfig::from_env();
    let model_config = ModelConfig::from_env();

    // Loading is blocking and fatal on failure: no retry, no fallback device.
    let session = tokio::task::spawn_blocking(move || PiperSession::load(&model_config)).await??;
    let model: ModelSession = Arc::new(session);
    info!("Serving {} voice(s)", model.voices().len());

    let addr = config.bind_addr()?;
    let app = build_router(AppState::new(model, config));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
