//! Forgot-password handshake.
//!
//! An account holds at most one reset request. Starting a new one supersedes
//! the previous request; confirming a live code rotates the password hash and
//! key set in one update and then clears the account's slot. Codes live for
//! `RESET_CODE_TTL_MINUTES` and are stored only as a digest.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::auth::codes::{alphanumeric_code, digest};
use crate::auth::password::hash_password;
use crate::auth::validation::normalize_email;
use crate::db::models::RESET_CODE_TTL_MINUTES;
use crate::db::{bounded, Account, AccountStore, KeySet, PasswordResetRequest, ResetRequestStore};
use crate::error::{AppError, ResetError};
use crate::notify::{templates, DataWiper, EmailMessage, Notifier};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupKey {
    pub backup_key: String,
    pub backup_salt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmReset {
    pub reset_code: String,
    pub new_password: String,
    pub user_key: String,
    pub user_salt: String,
    pub backup_key: String,
    pub backup_salt: String,
    #[serde(default)]
    pub reset_data: bool,
}

impl ConfirmReset {
    fn key_set(&self) -> KeySet {
        KeySet {
            user_key: self.user_key.clone(),
            user_salt: self.user_salt.clone(),
            backup_key: self.backup_key.clone(),
            backup_salt: self.backup_salt.clone(),
        }
    }
}

pub struct ResetFlow {
    accounts: Arc<dyn AccountStore>,
    resets: Arc<dyn ResetRequestStore>,
    notifier: Arc<dyn Notifier>,
    wiper: Arc<dyn DataWiper>,
    code_length: usize,
    min_password_length: usize,
    timeout: Duration,
}

impl ResetFlow {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        resets: Arc<dyn ResetRequestStore>,
        notifier: Arc<dyn Notifier>,
        wiper: Arc<dyn DataWiper>,
        code_length: usize,
        min_password_length: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            resets,
            notifier,
            wiper,
            code_length,
            min_password_length,
            timeout,
        }
    }

    /// Returns whether the mail provider accepted the code email.
    pub async fn start_reset(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        let account = bounded(self.timeout, self.accounts.get_by_email(&email))
            .await?
            .ok_or(AppError::NotFound("account_not_found"))?;

        let backup_email = account
            .backup_email
            .clone()
            .filter(|address| !address.trim().is_empty())
            .ok_or(ResetError::NoBackupEmail)?;

        let code = alphanumeric_code(self.code_length);

        if bounded(self.timeout, self.resets.find_by_account(account.id)).await?.is_some() {
            bounded(self.timeout, self.resets.delete_by_account(account.id)).await?;
            info!(account_id = %account.id, "Superseded previous reset request");
        }

        let request = PasswordResetRequest::new(account.id, digest(&code));
        bounded(self.timeout, self.resets.create(&request)).await?;

        let message = EmailMessage::new(backup_email, templates::reset_code(&code, RESET_CODE_TTL_MINUTES));
        let sent = bounded(self.timeout, self.notifier.send(&message))
            .await
            .map_err(|e| {
                error!(account_id = %account.id, error = %e, "Failed to send reset code");
                e
            })?;

        info!(account_id = %account.id, sent, "Password reset started");
        Ok(sent)
    }

    async fn live_request(&self, code: &str) -> Result<(PasswordResetRequest, Account)> {
        let request = bounded(self.timeout, self.resets.find_by_code_hash(&digest(code)))
            .await?
            .ok_or(AppError::NotFound("reset_code_not_found"))?;

        if request.is_expired_at(Utc::now()) {
            warn!(account_id = %request.account_id, "Reset code used after expiry");
            return Err(ResetError::Expired.into());
        }

        let account = bounded(self.timeout, self.accounts.get_by_id(request.account_id))
            .await?
            .ok_or(AppError::NotFound("account_not_found"))?;

        Ok((request, account))
    }

    /// Backup key material for a live code. Clients need it to re-wrap their
    /// keys before confirming.
    pub async fn backup_key(&self, code: &str) -> Result<BackupKey> {
        let (_, account) = self.live_request(code).await?;
        Ok(BackupKey {
            backup_key: account.key_set.backup_key,
            backup_salt: account.key_set.backup_salt,
        })
    }

    pub async fn confirm_reset(&self, input: &ConfirmReset) -> Result<()> {
        if input.new_password.chars().count() < self.min_password_length {
            return Err(AppError::ValidationError(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }

        let (_, mut account) = self.live_request(&input.reset_code).await?;

        account.password_hash = hash_password(&input.new_password)?;
        account.key_set = input.key_set();
        let account = bounded(self.timeout, self.accounts.update(&account)).await?;

        if input.reset_data {
            match bounded(self.timeout, self.wiper.wipe(account.id)).await {
                Ok(()) => info!(account_id = %account.id, "Personal data wiped during reset"),
                Err(e) => error!(account_id = %account.id, error = %e, "Data wipe failed during reset"),
            }
        }

        // Keyed by account: whichever request currently occupies the slot goes.
        bounded(self.timeout, self.resets.delete_by_account(account.id)).await?;

        info!(account_id = %account.id, "Password reset confirmed");
        Ok(())
    }
}
