//! Outbound notifications
//!
//! Delivery is best-effort: callers log failures and carry on.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::config::{NotifyConfig, NotifyMode};
use crate::error::QarsError;

pub const SUBJECT_TRANSFER_REQUEST: &str = "QA Transfer Request";
pub const SUBJECT_TRANSFER_SUBMITTED: &str = "QA Transfer Submitted";
pub const SUBJECT_RELEASE_SUCCESS: &str = "QA Release Success";
pub const SUBJECT_UNRECOGNIZED_USER: &str = "Unrecognized QARS User";

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, subject: &str, recipients: &[String], body: &str) -> Result<(), QarsError>;
}

/// Build the notifier selected by configuration
pub fn build_notifier(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match config.mode {
        NotifyMode::Log => Arc::new(LogNotifier),
        NotifyMode::Mailx => Arc::new(MailxNotifier::new(&config.from_address)),
    }
}

// ============================================================
// mailx
// ============================================================

/// Pipes the body into `mailx -s <subject> -r <from> <recipients..>`
#[derive(Debug, Clone)]
pub struct MailxNotifier {
    from_address: String,
    timeout: Duration,
}

impl MailxNotifier {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Notifier for MailxNotifier {
    fn name(&self) -> &'static str {
        "mailx"
    }

    async fn notify(&self, subject: &str, recipients: &[String], body: &str) -> Result<(), QarsError> {
        if recipients.is_empty() {
            return Err(QarsError::Notification(format!("No recipients for '{}'", subject)));
        }
        let mut child = Command::new("mailx")
            .arg("-s")
            .arg(subject)
            .arg("-r")
            .arg(&self.from_address)
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QarsError::Notification(format!("mailx: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .await
                .map_err(|e| QarsError::Notification(format!("mailx stdin: {}", e)))?;
        }

        let status = tokio::time::timeout(self.timeout, child.wait())
            .await
            .map_err(|_| QarsError::Notification("mailx timed out".into()))?
            .map_err(|e| QarsError::Notification(format!("mailx: {}", e)))?;
        if !status.success() {
            return Err(QarsError::Notification(format!("mailx exited with {}", status)));
        }
        Ok(())
    }
}

// ============================================================
// Log only
// ============================================================

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, subject: &str, recipients: &[String], body: &str) -> Result<(), QarsError> {
        info!(subject, recipients = %recipients.join(" "), bytes = body.len(), "Notification");
        Ok(())
    }
}

// ============================================================
// Recording
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub recipients: Vec<String>,
    pub body: String,
}

/// Keeps every notification in memory. Can be told to fail deliveries.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn with_subject(&self, subject: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.subject == subject)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, subject: &str, recipients: &[String], body: &str) -> Result<(), QarsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QarsError::Notification(format!("delivery of '{}' refused", subject)));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                subject: subject.to_string(),
                recipients: recipients.to_vec(),
                body: body.to_string(),
            });
        Ok(())
    }
}
