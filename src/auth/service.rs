use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::token::{Claims, TokenPair, TokenService};
use crate::auth::validation::{check_password, check_registration_email, normalize_email};
use crate::config::Settings;
use crate::db::{bounded, Account, AccountView, KeySet, Role, Stores};
use crate::error::{AdmissionError, AppError, AuthError};
use crate::notify::DataWiper;
use crate::waiting_list::{AdmissionKind, CapacityGate};
use crate::Result;

/// Role every new account receives.
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub key_set: KeySet,
    pub backup_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub waiting_list_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: AccountView,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Partial profile edit. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub backup_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
    pub user_key: String,
    pub user_salt: String,
}

pub struct AuthService {
    stores: Stores,
    tokens: TokenService,
    gate: Arc<CapacityGate>,
    wiper: Arc<dyn DataWiper>,
    settings: Arc<Settings>,
    timeout: Duration,
}

impl AuthService {
    pub fn new(
        stores: Stores,
        tokens: TokenService,
        gate: Arc<CapacityGate>,
        wiper: Arc<dyn DataWiper>,
        settings: Arc<Settings>,
    ) -> Self {
        let timeout = settings.downstream.timeout();
        Self {
            stores,
            tokens,
            gate,
            wiper,
            settings,
            timeout,
        }
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse> {
        let email = normalize_email(&req.email);
        check_registration_email(&email, &self.settings.auth)?;
        check_password(&req.password, &self.settings.registration)?;

        if bounded(self.timeout, self.stores.accounts.get_by_email(&email)).await?.is_some() {
            return Err(AdmissionError::EmailTaken.into());
        }

        // Hashing stays outside the admission lock.
        let password_hash = hash_password(&req.password)?;

        let admission = self.gate.reserve(&email, req.waiting_list_code.as_deref()).await?;
        let invited = matches!(admission.kind(), AdmissionKind::Invited(_));

        let account = match self.create_account(&email, password_hash, req).await {
            Ok(account) => {
                admission.commit().await;
                account
            }
            Err(e) => {
                if let Err(restore) = admission.rollback().await {
                    error!(email = %email, error = %restore, "Failed to restore waiting list code");
                }
                return Err(e);
            }
        };

        info!(account_id = %account.id, invited, "Account registered");
        self.session(account).await
    }

    async fn create_account(&self, email: &str, password_hash: String, req: &RegisterRequest) -> Result<Account> {
        let role = bounded(self.timeout, self.stores.roles.find_or_create(DEFAULT_ROLE)).await?;

        let mut account = Account::new(email.to_string(), password_hash, req.key_set.clone());
        account.backup_email = req
            .backup_email
            .as_deref()
            .map(normalize_email)
            .filter(|address| !address.is_empty());
        account.first_name = req.first_name.clone();
        account.last_name = req.last_name.clone();
        account.role_ids.push(role.id);

        bounded(self.timeout, self.stores.accounts.create(&account)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let email = normalize_email(email);
        let account = match bounded(self.timeout, self.stores.accounts.get_by_email(&email)).await? {
            Some(account) => account,
            None => {
                warn!(email = %email, "Login for unknown email");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(password, &account.password_hash)? {
            warn!(account_id = %account.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        info!(account_id = %account.id, "Login successful");
        self.session(account).await
    }

    /// New token pair for the subject of an already validated refresh token.
    pub async fn refresh(&self, claims: &Claims) -> Result<AuthResponse> {
        let account = bounded(self.timeout, self.stores.accounts.get_by_id(claims.sub))
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        self.session(account).await
    }

    async fn account(&self, account_id: Uuid) -> Result<Account> {
        bounded(self.timeout, self.stores.accounts.get_by_id(account_id))
            .await?
            .ok_or(AppError::NotFound("account_not_found"))
    }

    async fn view(&self, account: Account) -> Result<AccountView> {
        let roles = bounded(self.timeout, self.stores.roles.populate(&account)).await?;
        Ok(AccountView::new(account, roles))
    }

    pub async fn profile(&self, account_id: Uuid) -> Result<AccountView> {
        let account = self.account(account_id).await?;
        self.view(account).await
    }

    /// A new email goes through the same policy as registration and must not
    /// belong to another account.
    pub async fn update_profile(&self, account_id: Uuid, update: &ProfileUpdate) -> Result<AccountView> {
        let mut account = self.account(account_id).await?;

        if let Some(email) = update.email.as_deref().map(normalize_email) {
            if email != account.email {
                check_registration_email(&email, &self.settings.auth)?;
                if bounded(self.timeout, self.stores.accounts.get_by_email(&email)).await?.is_some() {
                    return Err(AdmissionError::EmailTaken.into());
                }
                account.email = email;
            }
        }
        if let Some(backup_email) = update.backup_email.as_deref() {
            account.backup_email = Some(normalize_email(backup_email)).filter(|address| !address.is_empty());
        }
        if update.first_name.is_some() {
            account.first_name = update.first_name.clone();
        }
        if update.last_name.is_some() {
            account.last_name = update.last_name.clone();
        }

        let account = bounded(self.timeout, self.stores.accounts.update(&account)).await?;
        info!(account_id = %account.id, "Profile updated");
        self.view(account).await
    }

    /// Rotates the password hash and the password-wrapped half of the key set.
    /// Any pending reset request is dropped.
    pub async fn change_password(&self, account_id: Uuid, change: &PasswordChange) -> Result<()> {
        let mut account = self.account(account_id).await?;

        if !verify_password(&change.old_password, &account.password_hash)? {
            warn!(account_id = %account.id, "Password change with wrong old password");
            return Err(AuthError::InvalidCredentials.into());
        }
        check_password(&change.new_password, &self.settings.registration)?;

        account.password_hash = hash_password(&change.new_password)?;
        account.key_set.user_key = change.user_key.clone();
        account.key_set.user_salt = change.user_salt.clone();
        bounded(self.timeout, self.stores.accounts.update(&account)).await?;
        bounded(self.timeout, self.stores.resets.delete_by_account(account.id)).await?;

        info!(account_id = %account.id, "Password changed");
        Ok(())
    }

    /// Wipes personal data first; the account is kept when the wipe fails.
    pub async fn delete_account(&self, account_id: Uuid) -> Result<()> {
        let account = self.account(account_id).await?;

        if let Err(e) = bounded(self.timeout, self.wiper.wipe(account.id)).await {
            error!(account_id = %account.id, error = %e, "Data wipe failed, account kept");
            return Err(e);
        }
        bounded(self.timeout, self.stores.accounts.delete(account.id)).await?;

        info!(account_id = %account.id, "Account deleted");
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        bounded(self.timeout, self.stores.roles.list()).await
    }

    pub async fn role(&self, id: Uuid) -> Result<Role> {
        bounded(self.timeout, self.stores.roles.get_by_id(id))
            .await?
            .ok_or(AppError::NotFound("role_not_found"))
    }

    pub async fn ensure_role(&self, name: &str) -> Result<Role> {
        let name = role_name(name)?;
        bounded(self.timeout, self.stores.roles.find_or_create(&name)).await
    }

    pub async fn rename_role(&self, id: Uuid, name: &str) -> Result<Role> {
        let name = role_name(name)?;
        let mut role = self.role(id).await?;
        role.name = name;
        let role = bounded(self.timeout, self.stores.roles.update(&role)).await?;
        info!(role_id = %role.id, name = %role.name, "Role renamed");
        Ok(role)
    }

    async fn session(&self, account: Account) -> Result<AuthResponse> {
        let roles = bounded(self.timeout, self.stores.roles.populate(&account)).await?;
        let names: Vec<String> = roles.iter().map(|role| role.name.clone()).collect();
        let tokens = self
            .tokens
            .issue_pair(account.id, &names, Some(account.is_subscribed()))?;

        Ok(AuthResponse {
            user: AccountView::new(account, roles),
            tokens,
        })
    }
}

fn role_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::ValidationError("role name is required".into()));
    }
    Ok(name)
}
