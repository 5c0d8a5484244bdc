use crate::{error::{AppError, AppResult}, state::AppState};
use crate::config::AppConfig;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

fn config_json(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "matching": {
            "requeue_delay_ms": config.matching.requeue_delay_ms
        },
        "websocket": {
            "heartbeat_interval_secs": config.websocket.heartbeat_interval_secs,
            "client_timeout_secs": config.websocket.client_timeout_secs
        },
        "performance": {
            "max_connections": config.performance.max_connections
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

/// Partially update the runtime configuration.
///
/// PUT /api/v1/config
/// Body: {"matching": {"requeue_delay_ms": 100}}
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(updated.clone())
        .map_err(AppError::ValidationError)?;

    info!("Configuration updated at runtime");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&updated)
    })))
}
