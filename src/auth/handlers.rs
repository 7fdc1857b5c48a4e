use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::middleware::{bearer_claims, Principal};
use crate::auth::service::{PasswordChange, ProfileUpdate, RegisterRequest};
use crate::auth::token::TokenType;
use crate::reset::ConfirmReset;
use crate::{AppError, AppState, Result};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StartResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupKeyRequest {
    pub reset_code: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    match state.auth_service.register(&req).await {
        Ok(session) => Ok(HttpResponse::Created().json(session)),
        Err(e) => {
            info!(code = e.code(), "Registration rejected");
            Err(e)
        }
    }
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let session = state.auth_service.login(&req.email, &req.password).await?;
    Ok(HttpResponse::Ok().json(session))
}

/// Expects the refresh token, not an access token, in the bearer header.
pub async fn refresh(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let claims = bearer_claims(&req, &state.tokens, TokenType::Refresh)?;
    let session = state.auth_service.refresh(&claims).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn start_reset(
    req: web::Json<StartResetRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let sent = state.reset_flow.start_reset(&req.email).await?;
    if !sent {
        error!("Reset code email was not accepted by the mail provider");
    }
    Ok(HttpResponse::Ok().json(json!({
        "message": "Reset code sent to backup email",
        "sent": sent,
    })))
}

pub async fn backup_key(
    req: web::Json<BackupKeyRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let key = state.reset_flow.backup_key(&req.reset_code).await?;
    Ok(HttpResponse::Ok().json(key))
}

pub async fn confirm_reset(
    req: web::Json<ConfirmReset>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    state.reset_flow.confirm_reset(&req).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password updated" })))
}

pub async fn app_config(
    principal: Option<Principal>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let remaining = state.capacity.remaining_spots().await?;
    Ok(HttpResponse::Ok().json(json!({
        "domains": state.config.auth.allowed_email_domains,
        "remainingSpots": remaining.max(0),
        "authenticated": principal.is_some(),
    })))
}

pub async fn me(principal: Principal, state: web::Data<AppState>) -> Result<HttpResponse> {
    let profile = state.auth_service.profile(principal.account_id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn update_profile(
    principal: Principal,
    req: web::Json<ProfileUpdate>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let profile = state
        .auth_service
        .update_profile(principal.account_id, &req)
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn change_password(
    principal: Principal,
    req: web::Json<PasswordChange>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    state
        .auth_service
        .change_password(principal.account_id, &req)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password updated" })))
}

pub async fn delete_me(principal: Principal, state: web::Data<AppState>) -> Result<HttpResponse> {
    state.auth_service.delete_account(principal.account_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Account deleted" })))
}

fn role_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::ValidationError(format!("invalid role id: {raw}")))
}

pub async fn list_roles(state: web::Data<AppState>) -> Result<HttpResponse> {
    let roles = state.auth_service.list_roles().await?;
    Ok(HttpResponse::Ok().json(roles))
}

pub async fn create_role(
    req: web::Json<RoleRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let role = state.auth_service.ensure_role(&req.name).await?;
    Ok(HttpResponse::Ok().json(role))
}

pub async fn get_role(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let role = state.auth_service.role(role_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(role))
}

pub async fn update_role(
    path: web::Path<String>,
    req: web::Json<RoleRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let role = state
        .auth_service
        .rename_role(role_id(&path)?, &req.name)
        .await?;
    Ok(HttpResponse::Ok().json(role))
}
