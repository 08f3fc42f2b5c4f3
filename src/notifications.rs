use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const DEFAULT_NOTIFICATION_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A toast-style message for whatever presentation layer is attached.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UiNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub level: NotificationLevel,
    pub duration_ms: u64,
}

impl UiNotification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level,
            duration_ms: DEFAULT_NOTIFICATION_MS,
        }
    }
}

pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: UiNotification);
}

/// Headless sink: notifications end up in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: UiNotification) {
        let UiNotification {
            title,
            message,
            level,
            ..
        } = notification;
        match level {
            NotificationLevel::Error => error!("[{title}] {message}"),
            NotificationLevel::Warning => warn!("[{title}] {message}"),
            NotificationLevel::Info | NotificationLevel::Success => info!("[{title}] {message}"),
        }
    }
}

/// Keeps every notification in memory; used by tests and by callers that
/// poll for new toasts.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    inner: Arc<Mutex<Vec<UiNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<UiNotification> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: UiNotification) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(notification);
    }
}
