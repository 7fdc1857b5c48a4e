//! Personal-data removal in the downstream data service.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::error::AppError;
use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataWiper: Send + Sync {
    async fn wipe(&self, account_id: Uuid) -> Result<()>;
}

/// `DELETE {base}/internal/accounts/{id}/data`, authenticated with the shared
/// internal token.
pub struct HttpDataWiper {
    client: reqwest::Client,
    base_url: String,
    internal_token: String,
}

impl HttpDataWiper {
    pub fn new(base_url: &str, internal_token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_token,
        })
    }
}

#[async_trait]
impl DataWiper for HttpDataWiper {
    async fn wipe(&self, account_id: Uuid) -> Result<()> {
        let url = format!("{}/internal/accounts/{}/data", self.base_url, account_id);
        let response = self
            .client
            .delete(&url)
            .header(reqwest::header::AUTHORIZATION, &self.internal_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::DependencyError(format!(
                "data service answered {} while wiping account {}",
                status, account_id
            )));
        }
        Ok(())
    }
}

pub struct NoopDataWiper;

#[async_trait]
impl DataWiper for NoopDataWiper {
    async fn wipe(&self, account_id: Uuid) -> Result<()> {
        debug!(account_id = %account_id, "No data service configured, nothing to wipe");
        Ok(())
    }
}
