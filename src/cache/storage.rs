//! In-memory entry storage.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Type-erased cached value. Each key decides its own value type.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// A single cached value.
#[derive(Clone)]
pub struct CacheEntry {
  pub value: ErasedValue,
  /// When the fetch that produced `value` completed
  pub fetched_at: Instant,
}

impl CacheEntry {
  pub fn age(&self, now: Instant) -> Duration {
    now.saturating_duration_since(self.fetched_at)
  }
}

/// Key → entry map. At most one entry per key.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    self.lock().get(key).cloned()
  }

  /// Replace whatever is stored under `key`.
  pub fn insert(&self, key: &str, value: ErasedValue, fetched_at: Instant) {
    self
      .lock()
      .insert(key.to_string(), CacheEntry { value, fetched_at });
  }

  pub fn remove(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  /// Remove every entry older than `max_age`, returning the removed keys.
  pub fn evict_older_than(&self, max_age: Duration, now: Instant) -> Vec<String> {
    let mut entries = self.lock();
    let expired: Vec<String> = entries
      .iter()
      .filter(|(_, entry)| entry.age(now) > max_age)
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      entries.remove(key);
    }
    expired
  }
}
