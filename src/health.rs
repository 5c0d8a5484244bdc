use crate::config::AppConfig;
use crate::signaling::{GetStats, MatchmakingServer};
use crate::state::{AppMetrics, AppState};
use actix::Addr;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

pub async fn health_check(
    state: web::Data<AppState>,
    server: web::Data<Addr<MatchmakingServer>>,
) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    // The service is only useful if the matchmaker answers
    let (status, matching) = match server.send(GetStats).await {
        Ok(stats) => (
            "healthy",
            json!({
                "available": true,
                "waiting_count": stats.waiting_count,
                "pair_count": stats.pair_count
            }),
        ),
        Err(err) => {
            warn!("Matchmaking server did not answer health check: {}", err);
            ("degraded", json!({ "available": false }))
        }
    };

    let body = json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "connections": {
            "active": metrics.active_connections,
            "total": metrics.total_connections
        },
        "matching": matching,
        "system": get_system_status(&config, &metrics)
    });

    if status == "healthy" {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "signaling": {
            "active_connections": metrics.active_connections,
            "total_connections": metrics.total_connections,
            "pairings_created": metrics.signaling.pairings_created,
            "messages_relayed": metrics.signaling.messages_relayed,
            "messages_rejected": metrics.signaling.messages_rejected
        },
        "endpoints": endpoint_stats
    }))
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let connection_usage = if config.performance.max_connections > 0 {
        metrics.active_connections as f64 / config.performance.max_connections as f64
    } else {
        0.0
    };

    let status = if connection_usage > 0.9 {
        "high_load"
    } else if connection_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "connection_usage_percent": (connection_usage * 100.0).round(),
        "max_connections": config.performance.max_connections,
        "current_connections": metrics.active_connections,
        "load_warnings": if connection_usage > 0.8 {
            vec!["High connection usage - consider increasing max_connections"]
        } else {
            vec![]
        }
    })
}
