use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Admission error: {0}")]
    AdmissionError(#[from] AdmissionError),

    #[error("Password reset error: {0}")]
    ResetError(#[from] ResetError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("Dependency error: {0}")]
    DependencyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// Stable slug rendered next to the human readable message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthError(e) => e.code(),
            AppError::AdmissionError(e) => e.code(),
            AppError::ResetError(e) => e.code(),
            AppError::DatabaseError(DatabaseError::NotFound) => "record_not_found",
            AppError::DatabaseError(DatabaseError::Duplicate) => "duplicate_record",
            AppError::DatabaseError(_) => "database_error",
            AppError::NotFound(code) => *code,
            AppError::DependencyError(_) => "dependency_error",
            AppError::ConfigError(_) => "config_error",
            AppError::InternalError(_) => "internal_error",
            AppError::ValidationError(_) => "validation_error",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::ConnectionError(err.to_string()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::DependencyError(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::AuthError(AuthError::Token(err))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "code": self.code(),
                "message": self.to_string()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::AdmissionError(e) => match e {
                AdmissionError::CapacityReached => StatusCode::FORBIDDEN,
                AdmissionError::InvalidCode => StatusCode::FORBIDDEN,
                AdmissionError::EmailTaken => StatusCode::CONFLICT,
                AdmissionError::AlreadyInWaitingList => StatusCode::CONFLICT,
            },
            AppError::ResetError(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(DatabaseError::Duplicate) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DependencyError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    SignatureInvalid,

    #[error("Unexpected token type")]
    TypeMismatch,

    #[error("Token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            JwtErrorKind::InvalidSignature => TokenError::SignatureInvalid,
            JwtErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,

    #[error("Authorization header must be in format: Bearer {{token}}")]
    MalformedHeader,

    #[error("{0}")]
    Token(TokenError),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    MissingPrincipal,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Invalid security token")]
    InvalidSecurityToken,

    #[error("Invalid service token")]
    InvalidStaticToken,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_authorization",
            AuthError::MalformedHeader => "malformed_authorization",
            AuthError::Token(TokenError::Malformed) => "malformed_token",
            AuthError::Token(TokenError::SignatureInvalid) => "invalid_signature",
            AuthError::Token(TokenError::TypeMismatch) => "token_type_mismatch",
            AuthError::Token(TokenError::Expired) => "token_expired",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingPrincipal => "authentication_required",
            AuthError::AccountNotFound => "account_not_found",
            AuthError::Forbidden => "insufficient_permissions",
            AuthError::InvalidSecurityToken => "invalid_security_token",
            AuthError::InvalidStaticToken => "invalid_service_token",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("No registration spots left")]
    CapacityReached,

    #[error("Waiting list code is invalid for this email")]
    InvalidCode,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Email is already in the waiting list")]
    AlreadyInWaitingList,
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::CapacityReached => "capacity_reached",
            AdmissionError::InvalidCode => "invalid_code",
            AdmissionError::EmailTaken => "email_taken",
            AdmissionError::AlreadyInWaitingList => "email_already_in_waiting_list",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResetError {
    #[error("Account has no backup email configured")]
    NoBackupEmail,

    #[error("Reset code expired")]
    Expired,
}

impl ResetError {
    pub fn code(&self) -> &'static str {
        match self {
            ResetError::NoBackupEmail => "no_backup_email",
            ResetError::Expired => "reset_code_expired",
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DatabaseError::Duplicate,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}
