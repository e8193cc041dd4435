pub mod health;
pub mod knowledge;
pub mod query;
pub mod webhook;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error body shared by every endpoint: `{"detail": "..."}`.
pub(crate) fn detail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"detail": message.into()})))
}
