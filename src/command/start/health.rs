use crate::command::store::report::format_timestamp;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": format_timestamp(&Utc::now()),
        "service": "ikated-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
