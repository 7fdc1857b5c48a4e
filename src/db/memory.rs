//! In-process store used by the test-suite and by `database.url = "memory"`.
//!
//! All four store traits share one lock, so every operation is atomic with
//! respect to every other one, including the conditional updates that the
//! Postgres implementation gets from single statements.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{Account, PasswordResetRequest, Role, WaitingListEntry};
use crate::db::store::{AccountStore, ResetRequestStore, RoleStore, WaitingListStore};
use crate::error::{AdmissionError, AppError};
use crate::Result;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    roles: HashMap<Uuid, Role>,
    resets: HashMap<Uuid, PasswordResetRequest>,
    waiting_list: HashMap<Uuid, (u64, WaitingListEntry)>,
    next_seq: u64,
}

impl Inner {
    fn waiting_sorted(&self) -> Vec<&(u64, WaitingListEntry)> {
        let mut entries: Vec<_> = self.waiting_list.values().collect();
        entries.sort_by(|(sa, a), (sb, b)| a.created_at.cmp(&b.created_at).then(sa.cmp(sb)));
        entries
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create(&self, account: &Account) -> Result<Account> {
        let mut inner = self.inner.write().await;
        if inner.accounts.values().any(|a| a.email == account.email) {
            return Err(AdmissionError::EmailTaken.into());
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn update(&self, account: &Account) -> Result<Account> {
        let mut inner = self.inner.write().await;
        if inner
            .accounts
            .values()
            .any(|a| a.email == account.email && a.id != account.id)
        {
            return Err(AdmissionError::EmailTaken.into());
        }
        let stored = inner
            .accounts
            .get_mut(&account.id)
            .ok_or(AppError::NotFound("account_not_found"))?;
        *stored = account.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.remove(&id);
        inner.resets.remove(&id);
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.inner.read().await.accounts.len() as i64)
    }

    async fn find_inactive_subscriptions(&self, grace_period_days: i64) -> Result<Vec<Account>> {
        let cutoff = Utc::now() - Duration::days(grace_period_days);
        let inner = self.inner.read().await;
        Ok(inner
            .accounts
            .values()
            .filter(|a| !a.is_subscribed() && a.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn create(&self, role: &Role) -> Result<Role> {
        let mut inner = self.inner.write().await;
        if inner.roles.values().any(|r| r.name == role.name) {
            return Err(AppError::DatabaseError(crate::error::DatabaseError::Duplicate));
        }
        inner.roles.insert(role.id, role.clone());
        Ok(role.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self.inner.read().await.roles.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>> {
        let inner = self.inner.read().await;
        Ok(inner.roles.values().find(|r| r.name == name).cloned())
    }

    async fn find_or_create(&self, name: &str) -> Result<Role> {
        let mut inner = self.inner.write().await;
        if let Some(role) = inner.roles.values().find(|r| r.name == name) {
            return Ok(role.clone());
        }
        let role = Role::new(name);
        inner.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update(&self, role: &Role) -> Result<Role> {
        let mut inner = self.inner.write().await;
        if inner.roles.values().any(|r| r.name == role.name && r.id != role.id) {
            return Err(AppError::DatabaseError(crate::error::DatabaseError::Duplicate));
        }
        let stored = inner
            .roles
            .get_mut(&role.id)
            .ok_or(AppError::NotFound("role_not_found"))?;
        stored.name = role.name.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.inner.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn populate(&self, account: &Account) -> Result<Vec<Role>> {
        let inner = self.inner.read().await;
        Ok(account
            .role_ids
            .iter()
            .filter_map(|id| inner.roles.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl ResetRequestStore for MemoryStore {
    async fn create(&self, request: &PasswordResetRequest) -> Result<PasswordResetRequest> {
        let mut inner = self.inner.write().await;
        inner.resets.insert(request.account_id, request.clone());
        Ok(request.clone())
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<PasswordResetRequest>> {
        let inner = self.inner.read().await;
        Ok(inner.resets.values().find(|r| r.code_hash == code_hash).cloned())
    }

    async fn find_by_account(&self, account_id: Uuid) -> Result<Option<PasswordResetRequest>> {
        Ok(self.inner.read().await.resets.get(&account_id).cloned())
    }

    async fn delete_by_account(&self, account_id: Uuid) -> Result<()> {
        self.inner.write().await.resets.remove(&account_id);
        Ok(())
    }
}

#[async_trait]
impl WaitingListStore for MemoryStore {
    async fn create(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry> {
        let mut inner = self.inner.write().await;
        if inner.waiting_list.values().any(|(_, e)| e.email == entry.email) {
            return Err(AdmissionError::AlreadyInWaitingList.into());
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.waiting_list.insert(entry.id, (seq, entry.clone()));
        Ok(entry.clone())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<WaitingListEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .waiting_list
            .values()
            .find(|(_, e)| e.email == email)
            .map(|(_, e)| e.clone()))
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<WaitingListEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .waiting_list
            .values()
            .find(|(_, e)| e.code.as_deref() == Some(code))
            .map(|(_, e)| e.clone()))
    }

    async fn oldest_without_code(&self, limit: i64) -> Result<Vec<WaitingListEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .waiting_sorted()
            .into_iter()
            .filter(|(_, e)| !e.has_code())
            .take(limit.max(0) as usize)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn position_of(&self, entry: &WaitingListEntry) -> Result<i64> {
        let inner = self.inner.read().await;
        let position = inner
            .waiting_sorted()
            .iter()
            .position(|(_, e)| e.id == entry.id)
            .ok_or(AppError::NotFound("waiting_list_entry_not_found"))?;
        Ok(position as i64)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.inner.read().await.waiting_list.len() as i64)
    }

    async fn count_with_code(&self) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner.waiting_list.values().filter(|(_, e)| e.has_code()).count() as i64)
    }

    async fn assign_code(&self, id: Uuid, code: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.waiting_list.get_mut(&id) {
            Some((_, entry)) if !entry.has_code() => {
                entry.code = Some(code.to_string());
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_code(&self, id: Uuid, code: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some((_, entry)) = inner.waiting_list.get_mut(&id) {
            if entry.code.as_deref() == Some(code) {
                entry.code = None;
                entry.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn claim_code(&self, code: &str, email: &str) -> Result<Option<WaitingListEntry>> {
        let mut inner = self.inner.write().await;
        let id = inner
            .waiting_list
            .values()
            .find(|(_, e)| e.code.as_deref() == Some(code) && e.email == email)
            .map(|(_, e)| e.id);
        Ok(id.and_then(|id| inner.waiting_list.remove(&id)).map(|(_, e)| e))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.inner.write().await.waiting_list.remove(&id);
        Ok(())
    }
}
