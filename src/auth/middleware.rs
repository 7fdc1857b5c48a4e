//! Request guards.
//!
//! `AuthGate` is one actix middleware with four modes. A request moves through
//! header parsing, token validation, principal attachment and (for the role
//! mode) the role check, and is rejected at the first step that fails:
//!
//! ```ignore
//! web::resource("/admin/roles")
//!     .wrap(AuthGate::role("admin"))
//!     .wrap(AuthGate::required())
//! ```
//!
//! The last `wrap` runs first, so `required` attaches the principal that
//! `role` then checks.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::token::{Claims, TokenService, TokenType};
use crate::db::bounded;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::AppState;

/// The authenticated caller, attached to request extensions by `AuthGate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: Uuid,
    pub roles: Vec<String>,
    pub subscribed: Option<bool>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            account_id: claims.sub,
            roles: claims.roles,
            subscribed: claims.subscribed,
        }
    }
}

impl FromRequest for Principal {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Principal>()
                .cloned()
                .ok_or(AppError::AuthError(AuthError::MissingPrincipal)),
        )
    }
}

/// Parses `Authorization: Bearer <token>` and validates it as `expected`.
pub fn bearer_claims(
    req: &HttpRequest,
    tokens: &TokenService,
    expected: TokenType,
) -> Result<Claims, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" || parts[1].is_empty() {
        return Err(AuthError::MalformedHeader);
    }

    tokens.validate_token(parts[1], expected).map_err(AuthError::Token)
}

#[derive(Debug, Clone)]
enum GateMode {
    Required,
    Optional,
    Role(String),
    StaticToken(String),
}

#[derive(Debug, Clone)]
pub struct AuthGate {
    mode: GateMode,
}

impl AuthGate {
    /// Rejects with 401 unless a valid access token is presented.
    pub fn required() -> Self {
        Self { mode: GateMode::Required }
    }

    /// Attaches a principal when a valid access token is presented, and
    /// otherwise lets the request through untouched.
    pub fn optional() -> Self {
        Self { mode: GateMode::Optional }
    }

    /// Must be wrapped inside `required()`.
    pub fn role(name: impl Into<String>) -> Self {
        Self { mode: GateMode::Role(name.into()) }
    }

    /// Exact match of the raw `Authorization` header against `secret`.
    pub fn static_token(secret: impl Into<String>) -> Self {
        Self { mode: GateMode::StaticToken(secret.into()) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthGateMiddleware {
            service: Rc::new(service),
            mode: self.mode.clone(),
        }))
    }
}

pub struct AuthGateMiddleware<S> {
    service: Rc<S>,
    mode: GateMode,
}

impl<S, B> Service<ServiceRequest> for AuthGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let mode = self.mode.clone();

        Box::pin(async move {
            match authorize(&mode, &req).await {
                Ok(()) => service.call(req).await.map(ServiceResponse::map_into_left_body),
                Err(err) => {
                    warn!(path = %req.path(), code = err.code(), "Request rejected by auth gate");
                    Ok(req.error_response(err).map_into_right_body())
                }
            }
        })
    }
}

fn app_state(req: &ServiceRequest) -> Result<web::Data<AppState>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::InternalError("application state is not registered".into()))
}

async fn authorize(mode: &GateMode, req: &ServiceRequest) -> Result<(), AppError> {
    match mode {
        GateMode::Required => {
            let state = app_state(req)?;
            let claims = bearer_claims(req.request(), &state.tokens, TokenType::Access)?;
            req.extensions_mut().insert(Principal::from(claims));
            Ok(())
        }
        GateMode::Optional => {
            let state = app_state(req)?;
            match bearer_claims(req.request(), &state.tokens, TokenType::Access) {
                Ok(claims) => {
                    req.extensions_mut().insert(Principal::from(claims));
                }
                Err(err) => debug!(reason = err.code(), "Continuing without principal"),
            }
            Ok(())
        }
        GateMode::Role(name) => {
            let principal = req
                .extensions()
                .get::<Principal>()
                .cloned()
                .ok_or(AuthError::MissingPrincipal)?;
            let state = app_state(req)?;
            let timeout = state.config.downstream.timeout();

            let account = match bounded(timeout, state.stores.accounts.get_by_id(principal.account_id)).await {
                Ok(Some(account)) => account,
                Ok(None)
                | Err(AppError::NotFound(_))
                | Err(AppError::DatabaseError(DatabaseError::NotFound)) => {
                    return Err(AuthError::AccountNotFound.into())
                }
                Err(err) => return Err(err),
            };

            let roles = bounded(timeout, state.stores.roles.populate(&account)).await?;
            if roles.iter().any(|role| &role.name == name) {
                Ok(())
            } else {
                Err(AuthError::Forbidden.into())
            }
        }
        GateMode::StaticToken(secret) => {
            let presented = req
                .headers()
                .get(AUTHORIZATION)
                .map(|value| value.as_bytes())
                .ok_or(AuthError::InvalidStaticToken)?;
            if presented == secret.as_bytes() {
                Ok(())
            } else {
                Err(AuthError::InvalidStaticToken.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::{Account, KeySet};
    use actix_web::{http::StatusCode, test, App, HttpResponse};

    async fn whoami(principal: Option<Principal>) -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({
            "accountId": principal.map(|p| p.account_id),
        }))
    }

    async fn state_with_account(role: Option<&str>) -> (web::Data<AppState>, Account) {
        let state = AppState::for_tests(Settings::for_tests());
        let mut account = Account::new("gate@example.com".into(), "hash".into(), KeySet::default());
        if let Some(role) = role {
            let role = state.stores.roles.find_or_create(role).await.unwrap();
            account.role_ids.push(role.id);
        }
        state.stores.accounts.create(&account).await.unwrap();
        (web::Data::new(state), account)
    }

    fn bearer(state: &AppState, account_id: Uuid, token_type: TokenType) -> String {
        let (token, _) = state
            .tokens
            .issue_token(account_id, &[], token_type, None)
            .unwrap();
        format!("Bearer {}", token)
    }

    #[actix_web::test]
    async fn test_required_rejects_missing_and_malformed_headers() {
        let (state, _) = state_with_account(None).await;
        let app = test::init_service(
            App::new().app_data(state.clone()).service(
                web::resource("/me").wrap(AuthGate::required()).to(whoami),
            ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/me").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        for header in ["Token abc", "Bearer", "Bearer a b"] {
            let req = test::TestRequest::get()
                .uri("/me")
                .insert_header((AUTHORIZATION, header))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header {header:?}");
        }
    }

    #[actix_web::test]
    async fn test_required_rejects_refresh_token_and_accepts_access_token() {
        let (state, account) = state_with_account(None).await;
        let refresh = bearer(&state, account.id, TokenType::Refresh);
        let access = bearer(&state, account.id, TokenType::Access);
        let app = test::init_service(
            App::new().app_data(state.clone()).service(
                web::resource("/me").wrap(AuthGate::required()).to(whoami),
            ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((AUTHORIZATION, refresh))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "token_type_mismatch");

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((AUTHORIZATION, access))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["accountId"], account.id.to_string());
    }

    #[actix_web::test]
    async fn test_optional_never_aborts() {
        let (state, account) = state_with_account(None).await;
        let access = bearer(&state, account.id, TokenType::Access);
        let app = test::init_service(
            App::new().app_data(state.clone()).service(
                web::resource("/config").wrap(AuthGate::optional()).to(whoami),
            ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/config")
            .insert_header((AUTHORIZATION, "Bearer garbage"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["accountId"].is_null());

        let req = test::TestRequest::get()
            .uri("/config")
            .insert_header((AUTHORIZATION, access))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["accountId"], account.id.to_string());
    }

    #[actix_web::test]
    async fn test_role_gate() {
        let (state, member) = state_with_account(Some("admin")).await;
        let outsider = Account::new("outsider@example.com".into(), "hash".into(), KeySet::default());
        state.stores.accounts.create(&outsider).await.unwrap();
        let app = test::init_service(
            App::new().app_data(state.clone()).service(
                web::resource("/admin")
                    .wrap(AuthGate::role("admin"))
                    .wrap(AuthGate::required())
                    .to(whoami),
            ),
        )
        .await;

        let call = |account_id| {
            test::TestRequest::get()
                .uri("/admin")
                .insert_header((AUTHORIZATION, bearer(&state, account_id, TokenType::Access)))
                .to_request()
        };

        let resp = test::call_service(&app, call(member.id)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, call(outsider.id)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(&app, call(Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "account_not_found");
    }

    #[actix_web::test]
    async fn test_role_gate_without_principal() {
        let (state, _) = state_with_account(Some("admin")).await;
        let app = test::init_service(
            App::new().app_data(state).service(
                web::resource("/admin").wrap(AuthGate::role("admin")).to(whoami),
            ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/admin").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_static_token_requires_exact_match() {
        let (state, _) = state_with_account(None).await;
        let app = test::init_service(
            App::new().app_data(state).service(
                web::resource("/hook")
                    .wrap(AuthGate::static_token("s3cret"))
                    .to(whoami),
            ),
        )
        .await;

        for header in [None, Some("Bearer s3cret"), Some("s3cret2"), Some("S3CRET")] {
            let mut req = test::TestRequest::post().uri("/hook");
            if let Some(header) = header {
                req = req.insert_header((AUTHORIZATION, header));
            }
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header {header:?}");
        }

        let req = test::TestRequest::post()
            .uri("/hook")
            .insert_header((AUTHORIZATION, "s3cret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
