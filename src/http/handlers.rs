//! Demo endpoints served by the binary.

use axum::Extension;
use axum::Json;
use serde_json::{json, Value};

use crate::gate::Identity;

/// Rate-limited endpoint; greets the caller by how the gate identified it.
///
/// Must sit behind [`enforce`](super::enforce), which supplies the identity.
pub async fn limited(Extension(identity): Extension<Identity>) -> Json<Value> {
    let caller = match identity {
        Identity::Exempt => "authenticated user",
        _ => "anonymous user",
    };
    Json(json!({ "message": format!("Limited endpoint! {}", caller) }))
}

pub async fn unlimited() -> Json<Value> {
    Json(json!({ "message": "Unlimited endpoint!" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
