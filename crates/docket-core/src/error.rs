use thiserror::Error;

use crate::event::EventId;

/// Failure to write the event snapshot to its key-value backend.
#[derive(Error, Debug)]
#[error("failed to persist snapshot under key {key:?}: {source}")]
pub struct PersistenceError {
  pub key:    String,
  #[source]
  pub source: anyhow::Error
}

#[derive(Error, Debug)]
pub enum DashboardError {
  /// Missing or malformed input on create/update.
  #[error("invalid event: {0}")]
  Validation(String),

  /// The referenced id is not in the store.
  #[error("event not found: {0}")]
  NotFound(EventId),

  #[error(transparent)]
  Persistence(#[from] PersistenceError)
}

impl DashboardError {
  pub fn validation(
    message: impl Into<String>
  ) -> Self {
    Self::Validation(message.into())
  }
}
