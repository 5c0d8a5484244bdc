use crate::error::AppResult;
use crate::signaling::{GetStats, MatchmakingServer};
use actix::Addr;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Live pool sizes, straight from the matchmaking actor.
///
/// GET /api/v1/stats
pub async fn get_stats(server: web::Data<Addr<MatchmakingServer>>) -> AppResult<HttpResponse> {
    let stats = server.send(GetStats).await?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "waiting_count": stats.waiting_count,
        "pair_count": stats.pair_count
    })))
}
