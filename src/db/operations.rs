use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{Account, KeySet, PasswordResetRequest, Role, WaitingListEntry};
use crate::db::store::{AccountStore, ResetRequestStore, RoleStore, WaitingListStore};
use crate::error::{AdmissionError, AppError, DatabaseError};
use crate::Result;

const ACCOUNT_COLUMNS: &str = "id, email, backup_email, first_name, last_name, password_hash, \
     key_set, role_ids, subscription_status, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, email, code, security_token, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    backup_email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    password_hash: String,
    key_set: Json<KeySet>,
    role_ids: Vec<Uuid>,
    subscription_status: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            email: row.email,
            backup_email: row.backup_email,
            first_name: row.first_name,
            last_name: row.last_name,
            password_hash: row.password_hash,
            key_set: row.key_set.0,
            role_ids: row.role_ids,
            subscription_status: row.subscription_status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Maps a unique violation onto the domain-level conflict for that table.
fn conflict_as(err: sqlx::Error, conflict: AdmissionError) -> AppError {
    match DatabaseError::from(err) {
        DatabaseError::Duplicate => conflict.into(),
        other => other.into(),
    }
}

pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }
}

#[async_trait]
impl AccountStore for DbOperations {
    async fn create(&self, account: &Account) -> Result<Account> {
        let sql = format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(account.id)
            .bind(&account.email)
            .bind(&account.backup_email)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(&account.password_hash)
            .bind(Json(&account.key_set))
            .bind(&account.role_ids)
            .bind(&account.subscription_status)
            .bind(account.created_at)
            .bind(account.updated_at)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| conflict_as(e, AdmissionError::EmailTaken))?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(Account::from))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(Account::from))
    }

    async fn update(&self, account: &Account) -> Result<Account> {
        let sql = format!(
            "UPDATE accounts SET email = $2, backup_email = $3, first_name = $4, last_name = $5, \
             password_hash = $6, key_set = $7, role_ids = $8, subscription_status = $9, \
             updated_at = now() \
             WHERE id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(account.id)
            .bind(&account.email)
            .bind(&account.backup_email)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(&account.password_hash)
            .bind(Json(&account.key_set))
            .bind(&account.role_ids)
            .bind(&account.subscription_status)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| conflict_as(e, AdmissionError::EmailTaken))?;

        row.map(Account::from)
            .ok_or(AppError::NotFound("account_not_found"))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            sqlx::query("DELETE FROM password_reset_requests WHERE account_id = $1")
                .bind(id)
                .execute(&mut *transaction)
                .await?;
            sqlx::query("DELETE FROM accounts WHERE id = $1")
                .bind(id)
                .execute(&mut *transaction)
                .await
        }
        .await;

        match result {
            Ok(_) => {
                transaction.commit().await?;
                Ok(())
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn find_inactive_subscriptions(&self, grace_period_days: i64) -> Result<Vec<Account>> {
        let cutoff = Utc::now() - ChronoDuration::days(grace_period_days);
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE (subscription_status IS NULL OR subscription_status <> 'active') \
             AND updated_at < $1 \
             ORDER BY updated_at"
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }
}

#[async_trait]
impl RoleStore for DbOperations {
    async fn create(&self, role: &Role) -> Result<Role> {
        let role = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(role.created_at)
        .bind(role.updated_at)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(role)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, created_at, updated_at FROM roles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(role)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, created_at, updated_at FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(role)
    }

    async fn find_or_create(&self, name: &str) -> Result<Role> {
        let candidate = Role::new(name);
        // The no-op update makes RETURNING yield the existing row on conflict.
        let role = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(candidate.id)
        .bind(&candidate.name)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(role)
    }

    async fn update(&self, role: &Role) -> Result<Role> {
        let role = sqlx::query_as::<_, Role>(
            "UPDATE roles SET name = $2, updated_at = now() WHERE id = $1 \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(role.id)
        .bind(&role.name)
        .fetch_optional(self.pool.as_ref())
        .await?;
        role.ok_or(AppError::NotFound("role_not_found"))
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(roles)
    }

    async fn populate(&self, account: &Account) -> Result<Vec<Role>> {
        if account.role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, created_at, updated_at FROM roles WHERE id = ANY($1)",
        )
        .bind(&account.role_ids)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(roles)
    }
}

#[async_trait]
impl ResetRequestStore for DbOperations {
    async fn create(&self, request: &PasswordResetRequest) -> Result<PasswordResetRequest> {
        let request = sqlx::query_as::<_, PasswordResetRequest>(
            "INSERT INTO password_reset_requests (account_id, code_hash, created_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (account_id) DO UPDATE \
             SET code_hash = EXCLUDED.code_hash, created_at = EXCLUDED.created_at \
             RETURNING account_id, code_hash, created_at",
        )
        .bind(request.account_id)
        .bind(&request.code_hash)
        .bind(request.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(request)
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> Result<Option<PasswordResetRequest>> {
        let request = sqlx::query_as::<_, PasswordResetRequest>(
            "SELECT account_id, code_hash, created_at FROM password_reset_requests \
             WHERE code_hash = $1",
        )
        .bind(code_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(request)
    }

    async fn find_by_account(&self, account_id: Uuid) -> Result<Option<PasswordResetRequest>> {
        let request = sqlx::query_as::<_, PasswordResetRequest>(
            "SELECT account_id, code_hash, created_at FROM password_reset_requests \
             WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(request)
    }

    async fn delete_by_account(&self, account_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM password_reset_requests WHERE account_id = $1")
            .bind(account_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WaitingListStore for DbOperations {
    async fn create(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry> {
        let sql = format!(
            "INSERT INTO waiting_list_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {ENTRY_COLUMNS}"
        );
        let entry = sqlx::query_as::<_, WaitingListEntry>(&sql)
            .bind(entry.id)
            .bind(&entry.email)
            .bind(&entry.code)
            .bind(&entry.security_token)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| conflict_as(e, AdmissionError::AlreadyInWaitingList))?;
        Ok(entry)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<WaitingListEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM waiting_list_entries WHERE email = $1");
        let entry = sqlx::query_as::<_, WaitingListEntry>(&sql)
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(entry)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<WaitingListEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM waiting_list_entries WHERE code = $1");
        let entry = sqlx::query_as::<_, WaitingListEntry>(&sql)
            .bind(code)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(entry)
    }

    async fn oldest_without_code(&self, limit: i64) -> Result<Vec<WaitingListEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waiting_list_entries WHERE code IS NULL \
             ORDER BY created_at, id LIMIT $1"
        );
        let entries = sqlx::query_as::<_, WaitingListEntry>(&sql)
            .bind(limit.max(0))
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(entries)
    }

    async fn position_of(&self, entry: &WaitingListEntry) -> Result<i64> {
        let position: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM waiting_list_entries WHERE (created_at, id) < ($1, $2)",
        )
        .bind(entry.created_at)
        .bind(entry.id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(position)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waiting_list_entries")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn count_with_code(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM waiting_list_entries WHERE code IS NOT NULL")
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count)
    }

    async fn assign_code(&self, id: Uuid, code: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE waiting_list_entries SET code = $2, updated_at = now() \
             WHERE id = $1 AND code IS NULL",
        )
        .bind(id)
        .bind(code)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_code(&self, id: Uuid, code: &str) -> Result<()> {
        sqlx::query(
            "UPDATE waiting_list_entries SET code = NULL, updated_at = now() \
             WHERE id = $1 AND code = $2",
        )
        .bind(id)
        .bind(code)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn claim_code(&self, code: &str, email: &str) -> Result<Option<WaitingListEntry>> {
        let sql = format!(
            "DELETE FROM waiting_list_entries WHERE code = $1 AND email = $2 \
             RETURNING {ENTRY_COLUMNS}"
        );
        let entry = sqlx::query_as::<_, WaitingListEntry>(&sql)
            .bind(code)
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(entry)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM waiting_list_entries WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
