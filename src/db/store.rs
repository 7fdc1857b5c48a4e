//! Persistence seams. Services only ever talk to these traits; the Postgres
//! implementation lives in `operations`, the in-process one in `memory`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::{Account, PasswordResetRequest, Role, WaitingListEntry};
use crate::Result;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `AdmissionError::EmailTaken` when the email is already used.
    async fn create(&self, account: &Account) -> Result<Account>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>>;
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn update(&self, account: &Account) -> Result<Account>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn count(&self) -> Result<i64>;
    /// Accounts without an active subscription whose last subscription change
    /// (or creation) is older than `grace_period_days`.
    async fn find_inactive_subscriptions(&self, grace_period_days: i64) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn create(&self, role: &Role) -> Result<Role>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Role>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Role>>;
    async fn find_or_create(&self, name: &str) -> Result<Role>;
    /// Renames the role. A name held by another role is a `DatabaseError::Duplicate`.
    async fn update(&self, role: &Role) -> Result<Role>;
    async fn list(&self) -> Result<Vec<Role>>;
    /// Resolves `account.role_ids`; ids without a matching role are skipped.
    async fn populate(&self, account: &Account) -> Result<Vec<Role>>;
}

#[async_trait]
pub trait ResetRequestStore: Send + Sync {
    /// Replaces any request already stored for the same account.
    async fn create(&self, request: &PasswordResetRequest) -> Result<PasswordResetRequest>;
    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<PasswordResetRequest>>;
    async fn find_by_account(&self, account_id: Uuid) -> Result<Option<PasswordResetRequest>>;
    async fn delete_by_account(&self, account_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait WaitingListStore: Send + Sync {
    /// Fails with `AdmissionError::AlreadyInWaitingList` on a duplicate email.
    async fn create(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry>;
    async fn get_by_email(&self, email: &str) -> Result<Option<WaitingListEntry>>;
    async fn get_by_code(&self, code: &str) -> Result<Option<WaitingListEntry>>;
    /// Oldest `limit` entries that have not been given a code yet.
    async fn oldest_without_code(&self, limit: i64) -> Result<Vec<WaitingListEntry>>;
    /// 0-indexed rank of the entry by creation time.
    async fn position_of(&self, entry: &WaitingListEntry) -> Result<i64>;
    async fn count(&self) -> Result<i64>;
    async fn count_with_code(&self) -> Result<i64>;
    /// Sets the code only if the entry has none; returns whether it was set.
    async fn assign_code(&self, id: Uuid, code: &str) -> Result<bool>;
    /// Clears `code` again if it is still the one assigned.
    async fn release_code(&self, id: Uuid, code: &str) -> Result<()>;
    /// Atomically deletes and returns the entry holding `code` for `email`.
    async fn claim_code(&self, code: &str, email: &str) -> Result<Option<WaitingListEntry>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}
