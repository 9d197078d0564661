//! User-visible feedback for settled mutations

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Success,
    Info,
    Error,
}

/// Receives one message per notable mutation outcome
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// Logs notifications instead of displaying them
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Error => error!(message = %message, "notification"),
            NotifyLevel::Success | NotifyLevel::Info => {
                info!(level = ?level, message = %message, "notification")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

/// Collects notifications for a toast-style UI to drain
#[derive(Debug, Default, Clone)]
pub struct NotificationQueue {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued notification
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl NotificationSink for NotificationQueue {
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.inner.lock().push(Notification {
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drains_in_order() {
        let queue = NotificationQueue::new();
        queue.notify(NotifyLevel::Success, "Comment posted!");
        queue.notify(NotifyLevel::Error, "Failed to like video");

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "Comment posted!");
        assert_eq!(drained[1].level, NotifyLevel::Error);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_clones_share_storage() {
        let queue = NotificationQueue::new();
        let handle = queue.clone();
        handle.notify(NotifyLevel::Info, "You already liked this video");
        assert_eq!(queue.len(), 1);
    }
}
