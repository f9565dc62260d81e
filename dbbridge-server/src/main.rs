use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use clap::Parser;
use dbbridge::{DbBridgeLayer, EngineRegistry, UnconfiguredChatModel};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// HTTP server exposing every database engine compiled into dbbridge
#[derive(Parser, Debug)]
#[command(version, about)]
struct Settings {
    /// Address to listen on
    #[arg(long, env = "DBBRIDGE_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Path the API is mounted under
    #[arg(long, env = "DBBRIDGE_BASE_PATH", default_value = "")]
    base_path: String,

    /// Deadline for every database call, in seconds (0 disables it)
    #[arg(long, env = "DBBRIDGE_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Log filter, e.g. `info` or `dbbridge=debug`
    #[arg(long, env = "DBBRIDGE_LOG", default_value = "info")]
    log: String,
}

#[derive(Clone)]
struct ApplicationState {
    registry: Arc<EngineRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log).context("Invalid log filter")?)
        .init();

    let registry = Arc::new(EngineRegistry::with_default_plugins(Arc::new(UnconfiguredChatModel)));
    info!(
        "Registered engines: {}",
        registry
            .engines()
            .iter()
            .map(|engine| engine.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut bridge = DbBridgeLayer::shared(settings.base_path.clone(), Arc::clone(&registry));
    if settings.timeout > 0 {
        bridge = bridge.with_request_timeout(Duration::from_secs(settings.timeout));
    }

    let application_state = ApplicationState { registry };

    // The bridge router is stateless, so it is merged after with_state()
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(application_state)
        .merge(bridge.into_router())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind))?;

    info!("Server running at http://{}", settings.bind);
    info!("API available at http://{}{}/api", settings.bind, settings.base_path);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn root_handler() -> &'static str {
    "dbbridge server"
}

async fn health_handler(State(state): State<ApplicationState>) -> Json<serde_json::Value> {
    let engines: Vec<&str> = state.registry.engines().iter().map(|engine| engine.as_str()).collect();
    Json(serde_json::json!({
        "status": "ok",
        "engines": engines,
    }))
}
