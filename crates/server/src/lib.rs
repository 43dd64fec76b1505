//! HTTP server glue: binds the listener, mounts the LLM router and the
//! health endpoint, and handles graceful shutdown.

mod logger;

pub use logger::init as init_logger;

use std::sync::Arc;

use axum::{Json, routing::get};
use serde_json::json;

/// Run the proxy until interrupted.
pub async fn serve(config: config::Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let llm::server::LlmServer { router, scheduler } = llm::server::build(config.clone()).await?;

    let router = router.route("/health", get(health));

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .map_err(|e| anyhow::anyhow!("binding {}: {e}", config.server.listen_address))?;

    log::info!("ccproxy listening on {}", config.server.listen_address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down, stopping scheduled tasks");
    scheduler.stop().await;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
