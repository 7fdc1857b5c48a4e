use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::codes::security_token;
use crate::auth::validation::{normalize_email, require_valid_email};
use crate::db::{bounded, WaitingListEntry, WaitingListStore};
use crate::error::{AdmissionError, AppError, AuthError};
use crate::notify::{templates, EmailMessage, Notifier};
use crate::waiting_list::position_link;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub entry: WaitingListEntry,
    pub position: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub position: i64,
    pub total: i64,
}

pub struct WaitingListService {
    store: Arc<dyn WaitingListStore>,
    notifier: Arc<dyn Notifier>,
    public_url: String,
    timeout: Duration,
}

impl WaitingListService {
    pub fn new(
        store: Arc<dyn WaitingListStore>,
        notifier: Arc<dyn Notifier>,
        public_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            public_url,
            timeout,
        }
    }

    pub async fn join(&self, email: &str) -> Result<JoinOutcome> {
        let email = normalize_email(email);
        require_valid_email(&email)?;

        if bounded(self.timeout, self.store.get_by_email(&email)).await?.is_some() {
            return Err(AdmissionError::AlreadyInWaitingList.into());
        }

        let token = security_token();
        let entry = WaitingListEntry::new(email.clone(), token.clone());
        let entry = bounded(self.timeout, self.store.create(&entry)).await?;
        info!(email = %email, "Joined waiting list");

        self.send_joined_email(&email, &token).await;

        let position = bounded(self.timeout, self.store.position_of(&entry)).await?;
        let total = bounded(self.timeout, self.store.count()).await?;

        Ok(JoinOutcome {
            entry,
            position,
            total,
        })
    }

    async fn send_joined_email(&self, email: &str, token: &str) {
        let link = match position_link(&self.public_url, email, token) {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "Cannot build position link, skipping waiting list email");
                return;
            }
        };

        let message = EmailMessage::new(email, templates::waiting_list_joined(link.as_str()));
        match bounded(self.timeout, self.notifier.send(&message)).await {
            Ok(true) => {}
            Ok(false) => warn!(email = %email, "Waiting list confirmation was not accepted"),
            Err(e) => warn!(email = %email, error = %e, "Failed to send waiting list confirmation"),
        }
    }

    /// 0-indexed FIFO rank plus list size. The security token handed out on
    /// join must match exactly.
    pub async fn position(&self, email: &str, security_token: &str) -> Result<Position> {
        let email = normalize_email(email);
        let entry = bounded(self.timeout, self.store.get_by_email(&email))
            .await?
            .ok_or(AppError::NotFound("waiting_list_entry_not_found"))?;

        if entry.security_token != security_token {
            warn!(email = %email, "Waiting list position requested with wrong security token");
            return Err(AuthError::InvalidSecurityToken.into());
        }

        let position = bounded(self.timeout, self.store.position_of(&entry)).await?;
        let total = bounded(self.timeout, self.store.count()).await?;
        Ok(Position { position, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::notify::MockNotifier;

    fn service(store: Arc<MemoryStore>, notifier: MockNotifier) -> WaitingListService {
        WaitingListService::new(
            store,
            Arc::new(notifier),
            "https://example.com".into(),
            Duration::from_secs(1),
        )
    }

    fn quiet_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().returning(|_| Ok(true));
        notifier
    }

    #[tokio::test]
    async fn test_join_sends_link_and_reports_position() {
        let store = Arc::new(MemoryStore::new());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|m| {
                m.to == vec!["new@example.com".to_string()]
                    && m.text.contains("https://example.com/waiting-list/position?")
            })
            .times(1)
            .returning(|_| Ok(true));

        let outcome = service(store, notifier).join(" New@Example.com ").await.unwrap();
        assert_eq!(outcome.entry.email, "new@example.com");
        assert_eq!(outcome.position, 0);
        assert_eq!(outcome.total, 1);
        assert!(outcome.entry.code.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_join_survives_notifier_failure() {
        let store = Arc::new(MemoryStore::new());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .returning(|_| Err(AppError::DependencyError("mail api down".into())));

        let outcome = service(store, notifier).join("a@example.com").await.unwrap();
        assert_eq!(outcome.total, 1);
    }

    #[tokio::test]
    async fn test_second_join_conflicts() {
        let service = service(Arc::new(MemoryStore::new()), quiet_notifier());
        service.join("dup@example.com").await.unwrap();
        let err = service.join("dup@example.com").await.unwrap_err();
        assert!(matches!(err, AppError::AdmissionError(AdmissionError::AlreadyInWaitingList)));
    }

    #[tokio::test]
    async fn test_join_rejects_bad_email() {
        let service = service(Arc::new(MemoryStore::new()), quiet_notifier());
        let err = service.join("not-an-email").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_positions_follow_join_order() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), quiet_notifier());
        for k in 0..4 {
            service.join(&format!("user{k}@example.com")).await.unwrap();
        }

        for k in 0..4 {
            let email = format!("user{k}@example.com");
            let entry = WaitingListStore::get_by_email(&*store, &email).await.unwrap().unwrap();
            let position = service.position(&email, &entry.security_token).await.unwrap();
            assert_eq!(position, Position { position: k as i64, total: 4 });
        }
    }

    #[tokio::test]
    async fn test_position_requires_matching_token() {
        let service = service(Arc::new(MemoryStore::new()), quiet_notifier());
        service.join("p@example.com").await.unwrap();

        let err = service.position("p@example.com", "guess").await.unwrap_err();
        assert!(matches!(err, AppError::AuthError(AuthError::InvalidSecurityToken)));

        let err = service.position("missing@example.com", "guess").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("waiting_list_entry_not_found")));
    }
}
