//! Cache keys for backend reads.

use sha2::{Digest, Sha256};

use super::types::Table;
use crate::cache::QueryKey;

/// Query key types for backend table reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendQueryKey {
  /// Every row of a table
  All { table: Table },
  /// One list scoped to a parent row, e.g. the units of a property
  Scoped {
    table: Table,
    column: String,
    value: String,
  },
}

impl BackendQueryKey {
  /// Key for the rows of `table` whose `column` equals `value`. The value
  /// is hashed exactly as given, so callers pass what they send.
  pub fn scoped(table: Table, column: &str, value: &str) -> Self {
    Self::Scoped {
      table,
      column: column.to_string(),
      value: value.to_string(),
    }
  }
}

impl QueryKey for BackendQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::All { table } => format!("all:{}", table.name()),
      Self::Scoped {
        table,
        column,
        value,
      } => format!("scoped:{}:{}:{}", table.name(), column, value),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::All { table } => format!("all {}", table.name()),
      Self::Scoped {
        table,
        column,
        value,
      } => format!("{} where {} = {}", table.name(), column, value),
    }
  }
}
