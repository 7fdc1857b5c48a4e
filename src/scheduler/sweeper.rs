use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db::{bounded, Account, AccountStore};
use crate::notify::DataWiper;
use crate::scheduler::{Job, TickReport};
use crate::Result;

/// Deletes accounts whose subscription has been inactive for longer than the
/// grace period. Personal data is wiped downstream first; an account whose
/// wipe fails is kept and retried on the next tick.
pub struct InactiveAccountSweeper {
    accounts: Arc<dyn AccountStore>,
    wiper: Arc<dyn DataWiper>,
    grace_period_days: i64,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl InactiveAccountSweeper {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        wiper: Arc<dyn DataWiper>,
        grace_period_days: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            wiper,
            grace_period_days,
            timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn sweep(&self) -> TickReport {
        let Ok(_running) = self.in_flight.try_lock() else {
            return TickReport::skipped();
        };

        let mut report = TickReport::default();
        let inactive = match bounded(
            self.timeout,
            self.accounts.find_inactive_subscriptions(self.grace_period_days),
        )
        .await
        {
            Ok(inactive) => inactive,
            Err(e) => {
                error!(error = %e, "Could not list inactive accounts");
                report.record_failure("accounts", e);
                return report;
            }
        };

        for account in inactive {
            match self.remove(&account).await {
                Ok(()) => {
                    report.succeeded += 1;
                    info!(account_id = %account.id, "Removed account with inactive subscription");
                }
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "Failed to remove inactive account");
                    report.record_failure(account.id.to_string(), e);
                }
            }
        }

        report
    }

    async fn remove(&self, account: &Account) -> Result<()> {
        bounded(self.timeout, self.wiper.wipe(account.id)).await?;
        bounded(self.timeout, self.accounts.delete(account.id)).await
    }
}

#[async_trait]
impl Job for InactiveAccountSweeper {
    fn name(&self) -> &'static str {
        "inactive_account_sweeper"
    }

    async fn tick(&self) -> TickReport {
        self.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{KeySet, MemoryStore};
    use crate::error::AppError;
    use crate::notify::MockDataWiper;
    use chrono::Utc;

    async fn account(store: &MemoryStore, email: &str, idle_days: i64, status: Option<&str>) -> Account {
        let mut account = Account::new(email.into(), "hash".into(), KeySet::default());
        account.updated_at = Utc::now() - chrono::Duration::days(idle_days);
        account.subscription_status = status.map(str::to_string);
        AccountStore::create(store, &account).await.unwrap()
    }

    fn sweeper(store: &Arc<MemoryStore>, wiper: MockDataWiper) -> InactiveAccountSweeper {
        InactiveAccountSweeper::new(store.clone(), Arc::new(wiper), 7, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_removes_only_lapsed_accounts() {
        let store = Arc::new(MemoryStore::new());
        let lapsed = account(&store, "lapsed@example.com", 30, None).await;
        let recent = account(&store, "recent@example.com", 2, None).await;
        let paying = account(&store, "paying@example.com", 30, Some("active")).await;

        let mut wiper = MockDataWiper::new();
        let lapsed_id = lapsed.id;
        wiper
            .expect_wipe()
            .withf(move |id| *id == lapsed_id)
            .times(1)
            .returning(|_| Ok(()));

        let report = sweeper(&store, wiper).sweep().await;
        assert_eq!(report.succeeded, 1);
        assert!(report.is_clean());

        assert!(AccountStore::get_by_id(&*store, lapsed.id).await.unwrap().is_none());
        assert!(AccountStore::get_by_id(&*store, recent.id).await.unwrap().is_some());
        assert!(AccountStore::get_by_id(&*store, paying.id).await.unwrap().is_some());
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_wipe_keeps_account() {
        let store = Arc::new(MemoryStore::new());
        let stuck = account(&store, "stuck@example.com", 30, None).await;
        let gone = account(&store, "gone@example.com", 30, None).await;

        let mut wiper = MockDataWiper::new();
        let stuck_id = stuck.id;
        wiper
            .expect_wipe()
            .withf(move |id| *id == stuck_id)
            .returning(|_| Err(AppError::DependencyError("data service down".into())));
        wiper
            .expect_wipe()
            .withf(move |id| *id != stuck_id)
            .returning(|_| Ok(()));

        let report = sweeper(&store, wiper).sweep().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item, stuck.id.to_string());

        assert!(AccountStore::get_by_id(&*store, stuck.id).await.unwrap().is_some());
        assert!(AccountStore::get_by_id(&*store, gone.id).await.unwrap().is_none());
    }
}
