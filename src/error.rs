//! Typed errors surfaced by the data layer.
//!
//! `ApiError` is `Clone` because one failed in-flight fetch is handed to every
//! observer that joined it.

use thiserror::Error;

/// Failure of a remote call or of the action wrapped by a hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// The request never produced an HTTP response (DNS, connect, timeout, ...)
  #[error("request to {path} failed: {message}")]
  Transport { path: String, message: String },

  /// The server answered with a non-success status
  #[error("{method} {path} returned {status}: {message}")]
  Status {
    method: String,
    path: String,
    status: u16,
    message: String,
  },

  /// The response body could not be read as JSON
  #[error("failed to decode response from {path}: {message}")]
  Decode { path: String, message: String },

  /// A request body or optimistic value could not be serialized
  #[error("failed to encode {what}: {message}")]
  Encode { what: String, message: String },

  /// Free-form failure raised by a caller-supplied action
  #[error("{0}")]
  Action(String),
}

impl ApiError {
  /// HTTP status code, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Raised when an `AdminContext` is built without one of its services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
  #[error("admin context is missing its {0}; register it on AdminContextBuilder before building")]
  Missing(&'static str),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_accessor() {
    let err = ApiError::Status {
      method: "GET".to_string(),
      path: "admin/members".to_string(),
      status: 404,
      message: "Not found".to_string(),
    };
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "GET admin/members returned 404: Not found");
  }

  #[test]
  fn test_context_error_names_the_service() {
    let err = ContextError::Missing("notifier");
    assert!(err.to_string().contains("missing its notifier"));
  }
}
