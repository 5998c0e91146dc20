//! Marbling grading server binary.

use std::process::ExitCode;

use anyhow::{Context, Result};
use marbling_core::{ImageNormalizer, MarblingModel};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use marbling_server::{AppState, ServerConfig, create_router};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(err) = run().await {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn run() -> Result<()> {
    info!("starting marbling server");
    let config = ServerConfig::load()?;
    info!(
        "config: host={}, port={}, model={}",
        config.host,
        config.port,
        config.model_path.display()
    );

    let normalizer = ImageNormalizer::new(config.normalizer);
    let model = load_model(&config)?;
    model.ensure_compatible(&normalizer)?;
    if config.warmup_runs > 0 {
        model
            .warmup(&normalizer, config.warmup_runs)
            .context("model warmup failed")?;
    }

    let addr = config.bind_addr()?;
    let app = create_router(AppState::new(config, normalizer, model));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("listening on http://{addr}");
    info!("predict endpoint: http://{addr}/api/predict");
    info!("health check: http://{addr}/api/health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shutdown complete");
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_model(config: &ServerConfig) -> Result<MarblingModel> {
    let classifier = marbling_core::OnnxClassifier::new(&config.model_path)?;
    Ok(MarblingModel::new(Box::new(classifier)))
}

#[cfg(not(feature = "onnx"))]
fn load_model(config: &ServerConfig) -> Result<MarblingModel> {
    anyhow::bail!(
        "cannot load {}: built without ONNX Runtime support (rebuild with `--features onnx`)",
        config.model_path.display()
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
