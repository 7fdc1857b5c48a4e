use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-side encryption material. The server stores it opaquely and rotates
/// it together with the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeySet {
    pub user_key: String,
    pub user_salt: String,
    pub backup_key: String,
    pub backup_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub backup_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub key_set: KeySet,
    pub role_ids: Vec<Uuid>,
    pub subscription_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: String, password_hash: String, key_set: KeySet) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            backup_email: None,
            first_name: None,
            last_name: None,
            password_hash,
            key_set,
            role_ids: Vec::new(),
            subscription_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription_status.as_deref() == Some("active")
    }
}

/// Account as returned to clients: no password hash, roles resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub backup_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub key_set: KeySet,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountView {
    pub fn new(account: Account, roles: Vec<Role>) -> Self {
        Self {
            id: account.id,
            email: account.email,
            backup_email: account.backup_email,
            first_name: account.first_name,
            last_name: account.last_name,
            key_set: account.key_set,
            roles,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reset codes stay valid for this long after creation.
pub const RESET_CODE_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetRequest {
    pub account_id: Uuid,
    /// SHA-256 of the code mailed to the account's backup address.
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetRequest {
    pub fn new(account_id: Uuid, code_hash: String) -> Self {
        Self {
            account_id,
            code_hash,
            created_at: Utc::now(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::minutes(RESET_CODE_TTL_MINUTES)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WaitingListEntry {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub code: Option<String>,
    #[serde(skip_serializing)]
    pub security_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitingListEntry {
    pub fn new(email: String, security_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            code: None,
            security_token,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_code(&self) -> bool {
        self.code.as_deref().map_or(false, |c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_request_expiry_window() {
        let mut request = PasswordResetRequest::new(Uuid::new_v4(), "digest".into());
        let created = request.created_at;

        assert!(!request.is_expired_at(created + Duration::minutes(4)));
        assert!(!request.is_expired_at(created + Duration::minutes(5)));
        assert!(request.is_expired_at(created + Duration::minutes(5) + Duration::seconds(1)));

        request.created_at = Utc::now() - Duration::minutes(6);
        assert!(request.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_subscription_flag() {
        let mut account = Account::new("a@example.com".into(), "hash".into(), KeySet::default());
        assert!(!account.is_subscribed());
        account.subscription_status = Some("active".into());
        assert!(account.is_subscribed());
        account.subscription_status = Some("cancelled".into());
        assert!(!account.is_subscribed());
    }

    #[test]
    fn test_waiting_list_entry_hides_secrets() {
        let mut entry = WaitingListEntry::new("w@example.com".into(), "token".into());
        entry.code = Some("INVITE".into());
        assert!(entry.has_code());

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["email"], "w@example.com");
        assert!(json.get("code").is_none());
        assert!(json.get("securityToken").is_none());
    }
}
