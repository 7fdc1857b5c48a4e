use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub roles: Vec<String>,
    pub typ: TokenType,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Signs and checks HS256 credentials. Holds no mutable state, so clones are
/// shared freely between workers.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Option<Duration>,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let refresh_ttl = config
            .refresh_tokens_expire
            .then(|| Duration::days(config.refresh_token_ttl_days));

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl,
        }
    }

    fn ttl(&self, token_type: TokenType) -> Option<Duration> {
        match token_type {
            TokenType::Access => Some(self.access_ttl),
            TokenType::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue_token(
        &self,
        account_id: Uuid,
        roles: &[String],
        token_type: TokenType,
        subscribed: Option<bool>,
    ) -> Result<(String, Option<DateTime<Utc>>), TokenError> {
        self.issue_token_at(account_id, roles, token_type, subscribed, Utc::now())
    }

    pub fn issue_token_at(
        &self,
        account_id: Uuid,
        roles: &[String],
        token_type: TokenType,
        subscribed: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<(String, Option<DateTime<Utc>>), TokenError> {
        let expires_at = self.ttl(token_type).map(|ttl| now + ttl);
        let claims = Claims {
            sub: account_id,
            roles: roles.to_vec(),
            typ: token_type,
            iat: now.timestamp(),
            exp: expires_at.map(|at| at.timestamp()),
            subscribed,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Malformed)?;

        Ok((token, expires_at))
    }

    pub fn issue_pair(
        &self,
        account_id: Uuid,
        roles: &[String],
        subscribed: Option<bool>,
    ) -> Result<TokenPair, TokenError> {
        let (access_token, expires_at) =
            self.issue_token(account_id, roles, TokenType::Access, subscribed)?;
        let (refresh_token, _) =
            self.issue_token(account_id, roles, TokenType::Refresh, subscribed)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    pub fn validate_token(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        self.validate_token_at(token, expected, Utc::now())
    }

    pub fn validate_token_at(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        // Expiry is optional per token type, so it is checked here instead of
        // by the decoder.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;

        if claims.typ != expected {
            return Err(TokenError::TypeMismatch);
        }
        if let Some(exp) = claims.exp {
            if now.timestamp() > exp {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn service() -> TokenService {
        TokenService::new(&Settings::for_tests().auth)
    }

    fn roles() -> Vec<String> {
        vec!["user".to_string(), "admin".to_string()]
    }

    #[test]
    fn test_issue_then_validate_round_trips_subject_and_roles() {
        let service = service();
        let account_id = Uuid::new_v4();

        for token_type in [TokenType::Access, TokenType::Refresh] {
            let (token, _) = service
                .issue_token(account_id, &roles(), token_type, Some(true))
                .unwrap();
            let claims = service.validate_token(&token, token_type).unwrap();
            assert_eq!(claims.sub, account_id);
            assert_eq!(claims.roles, roles());
            assert_eq!(claims.typ, token_type);
            assert_eq!(claims.subscribed, Some(true));
        }
    }

    #[test]
    fn test_type_mismatch() {
        let service = service();
        let (access, _) = service
            .issue_token(Uuid::new_v4(), &roles(), TokenType::Access, None)
            .unwrap();
        let (refresh, _) = service
            .issue_token(Uuid::new_v4(), &roles(), TokenType::Refresh, None)
            .unwrap();

        assert_eq!(
            service.validate_token(&access, TokenType::Refresh),
            Err(TokenError::TypeMismatch)
        );
        assert_eq!(
            service.validate_token(&refresh, TokenType::Access),
            Err(TokenError::TypeMismatch)
        );
    }

    #[test]
    fn test_access_token_expires_after_ttl() {
        let service = service();
        let issued = Utc::now();
        let (token, expires_at) = service
            .issue_token_at(Uuid::new_v4(), &[], TokenType::Access, None, issued)
            .unwrap();
        let expires_at = expires_at.unwrap();
        assert_eq!(expires_at, issued + Duration::minutes(15));

        assert!(service
            .validate_token_at(&token, TokenType::Access, expires_at - Duration::seconds(1))
            .is_ok());
        assert_eq!(
            service.validate_token_at(&token, TokenType::Access, expires_at + Duration::seconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_refresh_expiry_is_configurable() {
        let mut config = Settings::for_tests().auth;
        config.refresh_tokens_expire = false;
        let service = TokenService::new(&config);

        let issued = Utc::now();
        let (token, expires_at) = service
            .issue_token_at(Uuid::new_v4(), &[], TokenType::Refresh, None, issued)
            .unwrap();
        assert!(expires_at.is_none());

        let claims = service
            .validate_token_at(&token, TokenType::Refresh, issued + Duration::days(3650))
            .unwrap();
        assert!(claims.exp.is_none());
        assert!(claims.expires_at().is_none());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let service = service();
        let mut other = Settings::for_tests().auth;
        other.jwt_secret = "another_secret".to_string();
        let (token, _) = TokenService::new(&other)
            .issue_token(Uuid::new_v4(), &[], TokenType::Access, None)
            .unwrap();

        assert_eq!(
            service.validate_token(&token, TokenType::Access),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(
            service().validate_token("not.a.token", TokenType::Access),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_issue_pair() {
        let service = service();
        let account_id = Uuid::new_v4();
        let pair = service.issue_pair(account_id, &roles(), None).unwrap();

        assert!(pair.expires_at.is_some());
        let refresh = service
            .validate_token(&pair.refresh_token, TokenType::Refresh)
            .unwrap();
        assert_eq!(refresh.sub, account_id);
    }
}
