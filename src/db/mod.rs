//! Database module for the gatekeeper service
//!
//! Store traits, their Postgres (`DbOperations`) and in-process
//! (`MemoryStore`) implementations, and the row models they exchange.

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

pub use memory::MemoryStore;
pub use models::{Account, AccountView, KeySet, PasswordResetRequest, Role, WaitingListEntry};
pub use operations::DbOperations;
pub use store::{AccountStore, ResetRequestStore, RoleStore, WaitingListStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;

/// The four stores every service is built from.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub roles: Arc<dyn RoleStore>,
    pub resets: Arc<dyn ResetRequestStore>,
    pub waiting_list: Arc<dyn WaitingListStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self::from_shared(Arc::new(MemoryStore::new()))
    }

    pub fn postgres(db: DbOperations) -> Self {
        Self::from_shared(Arc::new(db))
    }

    fn from_shared<T>(store: Arc<T>) -> Self
    where
        T: AccountStore + RoleStore + ResetRequestStore + WaitingListStore + 'static,
    {
        Self {
            accounts: store.clone(),
            roles: store.clone(),
            resets: store.clone(),
            waiting_list: store,
        }
    }
}

/// Runs a downstream call under a deadline. Elapsed deadlines surface as
/// `DependencyError`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::DependencyError(format!(
            "downstream call exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}
