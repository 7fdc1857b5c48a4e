#![allow(dead_code)]

use actix_web::web;
use async_trait::async_trait;
use gatekeeper::db::Stores;
use gatekeeper::notify::{EmailMessage, NoopDataWiper, Notifier};
use gatekeeper::{AppState, Settings};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub const PASSWORD: &str = "password123";

/// Keeps every message instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
}

impl RecordingNotifier {
    pub fn sent_to(&self, address: &str) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.to.iter().any(|to| to == address))
            .cloned()
            .collect()
    }

    /// Codes sit in their own paragraph of the plain text part.
    pub fn last_code_for(&self, address: &str) -> Option<String> {
        self.sent_to(address)
            .last()
            .and_then(|message| message.text.split("\n\n").nth(1).map(str::to_string))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> gatekeeper::Result<bool> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(true)
    }
}

pub fn settings(max_users: i64) -> Settings {
    let mut settings = Settings::for_tests();
    settings.registration.max_users = max_users;
    settings
}

pub fn state(settings: Settings) -> (web::Data<AppState>, RecordingNotifier) {
    let notifier = RecordingNotifier::default();
    let state = AppState::with_collaborators(
        settings,
        Stores::memory(),
        Arc::new(notifier.clone()),
        Arc::new(NoopDataWiper),
    );
    (web::Data::new(state), notifier)
}

pub fn key_set(tag: &str) -> Value {
    json!({
        "userKey": format!("user-key-{tag}"),
        "userSalt": format!("user-salt-{tag}"),
        "backupKey": format!("backup-key-{tag}"),
        "backupSalt": format!("backup-salt-{tag}"),
    })
}

pub fn registration(email: &str) -> Value {
    json!({
        "email": email,
        "password": PASSWORD,
        "keySet": key_set("v1"),
        "backupEmail": format!("backup+{email}"),
        "firstName": "Test",
        "lastName": "User",
    })
}
