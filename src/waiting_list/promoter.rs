use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::auth::codes::alphanumeric_code;
use crate::db::{bounded, WaitingListEntry, WaitingListStore};
use crate::error::AppError;
use crate::notify::{templates, EmailMessage, Notifier};
use crate::scheduler::{Job, TickReport};
use crate::waiting_list::{position_link, CapacityGate};
use crate::Result;

/// Mints invite codes for the oldest waiting-list entries while capacity
/// allows, then mails them out.
///
/// Codes are assigned under the capacity gate's lock, so a registration can
/// never take a spot that a code was just issued for. Mail goes out after the
/// lock is released; an entry whose mail fails gets its code released and is
/// picked up again next tick.
pub struct WaitingListPromoter {
    gate: Arc<CapacityGate>,
    store: Arc<dyn WaitingListStore>,
    notifier: Arc<dyn Notifier>,
    code_length: usize,
    public_url: String,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl WaitingListPromoter {
    pub fn new(
        gate: Arc<CapacityGate>,
        store: Arc<dyn WaitingListStore>,
        notifier: Arc<dyn Notifier>,
        code_length: usize,
        public_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            gate,
            store,
            notifier,
            code_length,
            public_url,
            timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn promote(&self) -> TickReport {
        let Ok(_running) = self.in_flight.try_lock() else {
            return TickReport::skipped();
        };

        let mut report = TickReport::default();
        let issued = match self.issue_codes(&mut report).await {
            Ok(issued) => issued,
            Err(e) => {
                error!(error = %e, "Waiting list promotion aborted before issuing codes");
                report.record_failure("waiting_list", e);
                return report;
            }
        };

        for (entry, code) in issued {
            match self.deliver(&entry, &code).await {
                Ok(()) => {
                    report.succeeded += 1;
                    info!(email = %entry.email, "Waiting list entry promoted");
                }
                Err(e) => {
                    warn!(email = %entry.email, error = %e, "Invite delivery failed, releasing code");
                    if let Err(release) = bounded(self.timeout, self.store.release_code(entry.id, &code)).await {
                        error!(email = %entry.email, error = %release, "Failed to release undelivered code");
                    }
                    report.record_failure(entry.id.to_string(), e);
                }
            }
        }

        report
    }

    /// Assigns codes to as many of the oldest uncoded entries as there are
    /// spots. Per-entry store failures are recorded and skipped.
    async fn issue_codes(&self, report: &mut TickReport) -> Result<Vec<(WaitingListEntry, String)>> {
        let _admission = self.gate.lock().await;

        let remaining = self.gate.remaining_spots().await?;
        if remaining <= 0 {
            return Ok(Vec::new());
        }

        let candidates = bounded(self.timeout, self.store.oldest_without_code(remaining)).await?;
        let mut issued = Vec::with_capacity(candidates.len());
        for entry in candidates {
            let code = alphanumeric_code(self.code_length);
            match bounded(self.timeout, self.store.assign_code(entry.id, &code)).await {
                Ok(true) => issued.push((entry, code)),
                // Coded by someone else since it was read.
                Ok(false) => {}
                Err(e) => report.record_failure(entry.id.to_string(), e),
            }
        }
        Ok(issued)
    }

    async fn deliver(&self, entry: &WaitingListEntry, code: &str) -> Result<()> {
        let link = position_link(&self.public_url, &entry.email, &entry.security_token)?;
        let message = EmailMessage::new(
            entry.email.clone(),
            templates::waiting_list_invite(code, link.as_str()),
        );

        if bounded(self.timeout, self.notifier.send(&message)).await? {
            Ok(())
        } else {
            Err(AppError::DependencyError("mail provider refused invite".into()))
        }
    }
}

#[async_trait]
impl Job for WaitingListPromoter {
    fn name(&self) -> &'static str {
        "waiting_list_promoter"
    }

    async fn tick(&self) -> TickReport {
        self.promote().await
    }
}
