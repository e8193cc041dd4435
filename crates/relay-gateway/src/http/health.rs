use axum::Json;
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "WhatsApp Export Copilot";

/// GET /: service metadata.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health: liveness probe.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}
