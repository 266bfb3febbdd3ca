use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/config
///
/// The credential is never echoed back; clients only learn whether one is
/// configured.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "openai": {
                "model": config.openai.model,
                "voice": config.openai.voice,
                "instructions": config.openai.instructions,
                "greeting_instructions": config.openai.greeting_instructions,
                "temperature": config.openai.temperature,
                "greeting_settle_ms": config.openai.greeting_settle_ms,
                "credential_configured": !config.openai.api_key.trim().is_empty()
            }
        }
    })))
}

/// PUT /api/v1/config
///
/// Partial update of the agent tuning fields. Changes apply to calls
/// started after the update; live calls keep the config they opened with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "openai": {
                "model": current_config.openai.model,
                "voice": current_config.openai.voice,
                "instructions": current_config.openai.instructions,
                "greeting_instructions": current_config.openai.greeting_instructions,
                "temperature": current_config.openai.temperature,
                "greeting_settle_ms": current_config.openai.greeting_settle_ms
            }
        }
    })))
}
