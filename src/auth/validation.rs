use regex::Regex;
use std::sync::OnceLock;

use crate::config::{AuthConfig, RegistrationConfig};
use crate::error::AppError;
use crate::Result;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn email_pattern() -> Option<&'static Regex> {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

pub fn valid_email(email: &str) -> bool {
    email_pattern().is_some_and(|re| re.is_match(email))
}

pub fn require_valid_email(email: &str) -> Result<()> {
    if valid_email(email) {
        Ok(())
    } else {
        Err(AppError::ValidationError("email address is not valid".into()))
    }
}

/// Registration-time email policy: syntax, allowed domains (when any are
/// configured) and blocked local parts. Expects a normalized address.
pub fn check_registration_email(email: &str, auth: &AuthConfig) -> Result<()> {
    require_valid_email(email)?;

    let (local, domain) = email
        .rsplit_once('@')
        .ok_or_else(|| AppError::ValidationError("email address is not valid".into()))?;

    if !auth.allowed_email_domains.is_empty()
        && !auth
            .allowed_email_domains
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    {
        return Err(AppError::ValidationError(format!(
            "registrations from {domain} are not allowed"
        )));
    }

    if auth
        .blocked_local_parts
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(local))
    {
        return Err(AppError::ValidationError(format!(
            "the address {local}@ cannot be registered"
        )));
    }

    Ok(())
}

pub fn check_password(password: &str, registration: &RegistrationConfig) -> Result<()> {
    if password.chars().count() < registration.min_password_length {
        return Err(AppError::ValidationError(format!(
            "password must be at least {} characters",
            registration.min_password_length
        )));
    }
    Ok(())
}
