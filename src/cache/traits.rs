//! Core traits and types for the caching system.

use std::sync::Arc;
use tokio::time::Instant;

/// A typed description of a query that can produce a stable cache key.
///
/// Implementors must make the key unique across every feature sharing the
/// cache; equal keys are treated as interchangeable results.
pub trait QueryKey {
  /// Stable, fixed-length key used for cache lookups.
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// A value read from the cache without fetching.
#[derive(Debug)]
pub struct CacheHit<T> {
  pub value: Arc<T>,
  /// Completion time of the fetch that stored the value
  pub fetched_at: Instant,
  /// Older than the stale time used for the lookup
  pub is_stale: bool,
}

impl<T> Clone for CacheHit<T> {
  fn clone(&self) -> Self {
    Self {
      value: Arc::clone(&self.value),
      fetched_at: self.fetched_at,
      is_stale: self.is_stale,
    }
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: Arc<T>,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: Arc<T>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: Arc<T>, cached_at: Instant, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: Arc<T>, cached_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale but network fetch in progress or failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl QueryKey for str {
  fn cache_hash(&self) -> String {
    self.to_string()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_hash(&self) -> String {
    self.clone()
  }

  fn description(&self) -> String {
    self.clone()
  }
}
