//! HTTP surface: a health endpoint for process supervisors.

use axum::{Json, Router, routing::get};
use chrono::{SecondsFormat, Utc};
use tracing::info;

pub const SERVICE_NAME: &str = "email-agent";

pub fn health_routes() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

/// Serve until the process is interrupted.
pub async fn serve(port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health endpoint listening on /api/health");
    axum::serve(listener, health_routes())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
