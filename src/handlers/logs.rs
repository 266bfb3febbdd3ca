use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/logs
///
/// Snapshot of the in-memory event log, newest first. The store keeps a
/// bounded window, so this endpoint is safe to poll from a dashboard.
pub async fn get_logs(state: web::Data<AppState>) -> HttpResponse {
    let entries = state.logs.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": entries.len(),
        "logs": entries
    }))
}
