//! Outbound email. Services hand a rendered `EmailMessage` to a `Notifier`;
//! transport details stay behind the trait.

pub mod templates;
pub mod wiper;

pub use templates::EmailContent;
pub use wiper::{DataWiper, HttpDataWiper, NoopDataWiper};
#[cfg(test)]
pub use wiper::MockDataWiper;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

#[cfg(test)]
use mockall::automock;

use crate::config::NotifierConfig;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailMessage {
    pub fn new(to: impl Into<String>, content: EmailContent) -> Self {
        Self {
            to: vec![to.into()],
            subject: content.subject,
            html: content.html,
            text: content.text,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `Ok(false)` when the provider refused the message.
    async fn send(&self, message: &EmailMessage) -> Result<bool>;
}

#[derive(Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// JSON POST to a transactional mail API, authenticated with a bearer key.
pub struct HttpNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<bool> {
        let body = OutboundEmail {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, subject = %message.subject, "Mail API refused message");
            return Ok(false);
        }

        Ok(true)
    }
}

/// Used when no mail API key is configured: logs the envelope and reports the
/// message as sent.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<bool> {
        info!(to = ?message.to, subject = %message.subject, "Email delivery disabled, message dropped");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: vec!["user@example.com".to_string()],
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: "Hi".to_string(),
        }
    }

    fn notifier(server: &MockServer) -> HttpNotifier {
        let mut config = Settings::for_tests().notifier;
        config.api_url = format!("{}/emails", server.uri());
        HttpNotifier::new(&config, "key_123".to_string(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_http_notifier_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer key_123"))
            .and(body_partial_json(json!({
                "from": "noreply@example.com",
                "to": ["user@example.com"],
                "subject": "Hello",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(notifier(&server).send(&message()).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_notifier_reports_refusal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "bad" })))
            .mount(&server)
            .await;

        assert!(!notifier(&server).send(&message()).await.unwrap());
    }

    #[tokio::test]
    async fn test_log_notifier_always_sends() {
        assert!(LogNotifier.send(&message()).await.unwrap());
    }
}
