use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::{AppState, Result};

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub email: String,
    pub security_token: String,
}

pub async fn join(req: web::Json<JoinRequest>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let outcome = state.waiting_list.join(&req.email).await?;
    Ok(HttpResponse::Created().json(outcome))
}

pub async fn position(
    req: web::Json<PositionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let position = state
        .waiting_list
        .position(&req.email, &req.security_token)
        .await?;
    Ok(HttpResponse::Ok().json(position))
}

/// Runs one promotion pass now. Shares the single-flight guard with the
/// scheduled job, so a concurrent run reports `skipped`.
pub async fn promote(state: web::Data<AppState>) -> Result<HttpResponse> {
    let report = state.promoter.promote().await;
    Ok(HttpResponse::Ok().json(report))
}
