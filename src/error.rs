//! Error values shared by the data layer.

use color_eyre::Report;
use thiserror::Error;

/// Failure of a keyed fetch or a page fetch.
///
/// Cloneable so every waiter on one in-flight fetch receives the same error.
/// The layer never classifies failures by cause; callers that care inspect
/// the message or the error their producer returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The producer rejected.
  #[error("fetch failed: {message}")]
  Failed { message: String },
  /// The key holds a value of another type (two features share a key).
  #[error("cache key {key} holds a value of a different type")]
  TypeMismatch { key: String },
  /// The fetch task ended without producing a result.
  #[error("fetch aborted: {message}")]
  Aborted { message: String },
}

impl FetchError {
  /// Normalize a producer rejection.
  ///
  /// A rejection that already carries a `FetchError` is passed through,
  /// anything else becomes `Failed`.
  pub fn from_report(report: &Report) -> Self {
    if let Some(existing) = report.downcast_ref::<FetchError>() {
      return existing.clone();
    }
    Self::Failed {
      message: format!("{:#}", report),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  #[test]
  fn test_plain_report_becomes_failed() {
    let err = FetchError::from_report(&eyre!("connection refused"));
    assert_eq!(
      err,
      FetchError::Failed {
        message: "connection refused".to_string()
      }
    );
    assert_eq!(err.to_string(), "fetch failed: connection refused");
  }

  #[test]
  fn test_structured_error_passes_through() {
    let original = FetchError::TypeMismatch {
      key: "properties".to_string(),
    };
    let report = Report::new(original.clone());
    assert_eq!(FetchError::from_report(&report), original);
  }
}
