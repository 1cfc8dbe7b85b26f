//! Notification surface: fire-and-forget success/error messages.

use std::sync::Mutex;

/// Sink for user-visible messages. Nothing is ever read back.
pub trait Notifier: Send + Sync {
  fn success(&self, message: &str);
  fn error(&self, message: &str);
}

/// Prints messages for a terminal user and mirrors them into the log.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn success(&self, message: &str) {
    tracing::info!(message, "notify success");
    println!("✓ {}", message);
  }

  fn error(&self, message: &str) {
    tracing::warn!(message, "notify error");
    eprintln!("✗ {}", message);
  }
}

/// A message delivered to a [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  Success(String),
  Error(String),
}

/// Keeps every message in memory. Handy in tests and for batch reports.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  messages: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Everything received so far, oldest first.
  pub fn messages(&self) -> Vec<Notification> {
    self
      .messages
      .lock()
      .map(|m| m.clone())
      .unwrap_or_default()
  }

  pub fn errors(&self) -> Vec<String> {
    self
      .messages()
      .into_iter()
      .filter_map(|n| match n {
        Notification::Error(m) => Some(m),
        Notification::Success(_) => None,
      })
      .collect()
  }

  pub fn successes(&self) -> Vec<String> {
    self
      .messages()
      .into_iter()
      .filter_map(|n| match n {
        Notification::Success(m) => Some(m),
        Notification::Error(_) => None,
      })
      .collect()
  }

  fn push(&self, notification: Notification) {
    if let Ok(mut messages) = self.messages.lock() {
      messages.push(notification);
    }
  }
}

impl Notifier for RecordingNotifier {
  fn success(&self, message: &str) {
    self.push(Notification::Success(message.to_string()));
  }

  fn error(&self, message: &str) {
    self.push(Notification::Error(message.to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recording_keeps_order() {
    let notifier = RecordingNotifier::new();
    notifier.success("saved");
    notifier.error("failed");
    notifier.success("deleted");

    assert_eq!(
      notifier.messages(),
      vec![
        Notification::Success("saved".to_string()),
        Notification::Error("failed".to_string()),
        Notification::Success("deleted".to_string()),
      ]
    );
    assert_eq!(notifier.errors(), vec!["failed".to_string()]);
    assert_eq!(notifier.successes().len(), 2);
  }
}
