//! Notification sink for user-facing success and failure messages.

use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  Success,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub kind: NotificationKind,
  pub message: String,
  pub description: Option<String>,
}

impl Notification {
  pub fn success(message: impl Into<String>) -> Self {
    Self {
      kind: NotificationKind::Success,
      message: message.into(),
      description: None,
    }
  }

  pub fn error(message: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      kind: NotificationKind::Error,
      message: message.into(),
      description: Some(description.into()),
    }
  }
}

/// Something that shows notifications to the user.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notification: Notification) {
    let description = notification.description.as_deref().unwrap_or("");
    match notification.kind {
      NotificationKind::Success => info!(message = %notification.message, description, "notification"),
      NotificationKind::Error => warn!(message = %notification.message, description, "notification"),
    }
  }
}

/// Forwards notifications to whoever renders them, and logs them.
pub struct ChannelNotifier {
  tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl Notifier for ChannelNotifier {
  fn notify(&self, notification: Notification) {
    TracingNotifier.notify(notification.clone());
    // Receiver gone means nobody is rendering anymore
    let _ = self.tx.send(notification);
  }
}
