//! Admission control for registration.
//!
//! Admission is pessimistic: the capacity read and the account insert that
//! follows it happen while the gate's admission lock is held, and the
//! promoter takes the same lock while it mints codes. Within one process
//! this serializes every change to `remaining_spots`; the unique email index
//! covers duplicate inserts across processes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::db::{bounded, AccountStore, WaitingListEntry, WaitingListStore};
use crate::error::AdmissionError;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionKind {
    Direct,
    /// The waiting-list entry whose code was redeemed. It has already been
    /// deleted from the store.
    Invited(WaitingListEntry),
}

/// A granted admission. Holds the admission lock until it is committed or
/// rolled back.
pub struct Admission<'a> {
    gate: &'a CapacityGate,
    kind: AdmissionKind,
    email: String,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Admission<'a> {
    pub fn kind(&self) -> &AdmissionKind {
        &self.kind
    }

    /// Account creation succeeded. A direct admission also clears any
    /// waiting-list entry left behind for the same email so it stops
    /// counting against capacity.
    pub async fn commit(self) {
        if self.kind != AdmissionKind::Direct {
            return;
        }
        let store = &self.gate.waiting_list;
        match bounded(self.gate.timeout, store.get_by_email(&self.email)).await {
            Ok(Some(entry)) => {
                if let Err(e) = bounded(self.gate.timeout, store.delete(entry.id)).await {
                    warn!(email = %self.email, error = %e, "Failed to drop waiting list entry after registration");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(email = %self.email, error = %e, "Failed to look up waiting list entry after registration"),
        }
    }

    /// Account creation failed: hand a redeemed code back to its entry.
    pub async fn rollback(self) -> Result<()> {
        if let AdmissionKind::Invited(entry) = &self.kind {
            bounded(self.gate.timeout, self.gate.waiting_list.create(entry)).await?;
            info!(email = %entry.email, "Restored waiting list entry after failed registration");
        }
        Ok(())
    }
}

pub struct CapacityGate {
    accounts: Arc<dyn AccountStore>,
    waiting_list: Arc<dyn WaitingListStore>,
    max_users: i64,
    timeout: Duration,
    admission_lock: Mutex<()>,
}

impl CapacityGate {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        waiting_list: Arc<dyn WaitingListStore>,
        max_users: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            waiting_list,
            max_users,
            timeout,
            admission_lock: Mutex::new(()),
        }
    }

    /// `max_users - accounts - issued but unredeemed codes`. May be negative
    /// when capacity was lowered after codes went out.
    pub async fn remaining_spots(&self) -> Result<i64> {
        let accounts = bounded(self.timeout, self.accounts.count()).await?;
        let issued = bounded(self.timeout, self.waiting_list.count_with_code()).await?;
        Ok(self.max_users - accounts - issued)
    }

    /// Serializes capacity changes. Held by `reserve` and by the promoter.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.admission_lock.lock().await
    }

    /// Admits `email` directly while spots remain; otherwise redeems
    /// `code`, which must belong to a waiting-list entry for the same email.
    pub async fn reserve(&self, email: &str, code: Option<&str>) -> Result<Admission<'_>> {
        let guard = self.lock().await;

        let remaining = self.remaining_spots().await?;
        let kind = if remaining > 0 {
            AdmissionKind::Direct
        } else {
            let code = code
                .filter(|c| !c.is_empty())
                .ok_or(AdmissionError::CapacityReached)?;
            let entry = bounded(self.timeout, self.waiting_list.claim_code(code, email))
                .await?
                .ok_or(AdmissionError::InvalidCode)?;
            AdmissionKind::Invited(entry)
        };

        Ok(Admission {
            gate: self,
            kind,
            email: email.to_string(),
            _guard: guard,
        })
    }
}
