//! Async query abstraction for keyed data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! binds a cache key and a fetcher to a [`QueryCache`] and tracks the
//! loading, error and staleness state of one consumer.
//!
//! # Example
//!
//! ```ignore
//! let client = client.clone();
//! let mut query = Query::new(cache.clone(), "properties:all", move || {
//!     let client = client.clone();
//!     async move { client.fetch_all::<Property>(Table::Properties).await }
//! });
//!
//! // Read the cache or start fetching
//! query.mount();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let state = query.state();
//! if state.loading {
//!     render_spinner();
//! } else if let Some(data) = &state.data {
//!     render_data(data);
//! }
//! ```

use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cache::{CacheEvent, CacheHit, CacheSubscription, QueryCache};
use crate::error::FetchError;

/// Per-consumer behaviour of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// Overrides the cache's stale time for this consumer
  pub stale_time: Option<Duration>,
  /// Overrides the cache's retention time for this consumer's reads
  pub cache_time: Option<Duration>,
  pub refetch_on_focus: bool,
  pub refetch_on_reconnect: bool,
  /// Suppress all fetching
  pub skip: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: None,
      cache_time: None,
      refetch_on_focus: true,
      refetch_on_reconnect: true,
      skip: false,
    }
  }
}

/// What a consumer renders.
///
/// `loading` is only true while there is no data and a fetch is outstanding.
/// `data` and `error` can both be set: the last good value stays visible
/// next to a later failure.
#[derive(Debug)]
pub struct FetchState<T> {
  pub data: Option<Arc<T>>,
  pub loading: bool,
  pub error: Option<FetchError>,
  pub is_stale: bool,
}

impl<T> Default for FetchState<T> {
  fn default() -> Self {
    Self {
      data: None,
      loading: false,
      error: None,
      is_stale: false,
    }
  }
}

impl<T> Clone for FetchState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      loading: self.loading,
      error: self.error.clone(),
      is_stale: self.is_stale,
    }
  }
}

/// A boxed future that returns a Result<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// One consumer of a cached query.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/error/staleness state for this consumer
/// - Async result handling via channels
/// - Reactions to focus, reconnect and update events from the cache
///
/// Dropping a query is an unmount: results that arrive later are ignored and
/// its cache subscription is released.
pub struct Query<T> {
  cache: QueryCache,
  key: String,
  fetcher: FetcherFn<T>,
  options: QueryOptions,
  state: FetchState<T>,
  receiver: Option<mpsc::UnboundedReceiver<std::result::Result<Arc<T>, FetchError>>>,
  events: Option<broadcast::Receiver<CacheEvent>>,
  subscription: Option<CacheSubscription>,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a new query for `key` with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It is called each time
  /// this consumer needs the network and no other fetch for `key` is running.
  /// Nothing happens until [`mount`](Self::mount).
  pub fn new<F, Fut>(cache: QueryCache, key: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher: FetcherFn<T> = Arc::new(move || -> BoxFuture<T> { Box::pin(fetcher()) });
    Self {
      cache,
      key: key.into(),
      fetcher,
      options: QueryOptions::default(),
      state: FetchState::default(),
      receiver: None,
      events: None,
      subscription: None,
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &FetchState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&Arc<T>> {
    self.state.data.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.state.loading
  }

  pub fn is_stale(&self) -> bool {
    self.state.is_stale
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.state.error.as_ref()
  }

  /// Whether a fetch started by this consumer has not reported back yet.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  /// Attach to the cache and load.
  ///
  /// A fresh cached value is used as is. A stale one is shown immediately
  /// and refreshed in the background. Without a cached value the query
  /// starts loading.
  pub fn mount(&mut self) {
    if self.options.skip {
      return;
    }
    if self.subscription.is_none() {
      self.events = Some(self.cache.events());
      self.subscription = Some(self.cache.subscribe());
    }

    match self.lookup() {
      Some(hit) => {
        let stale = hit.is_stale;
        self.state.data = Some(hit.value);
        self.state.is_stale = stale;
        self.state.loading = false;
        if stale {
          debug!(key = %self.key, "stale cache hit, refreshing");
          self.start_fetch(false);
        }
      }
      None => self.start_fetch(false),
    }
  }

  /// Detach from the cache. Pending results are ignored.
  pub fn unmount(&mut self) {
    self.receiver = None;
    self.events = None;
    self.subscription = None;
    self.state.loading = false;
  }

  /// Force a new fetch even if the cached value is fresh.
  ///
  /// A fetch already running for the key is not joined, since it may have
  /// started before a write; its late result is no longer stored.
  pub fn refetch(&mut self) {
    if self.options.skip {
      return;
    }
    self.start_fetch(true);
  }

  /// Remove this key from the cache and reset to empty.
  pub fn clear_cache(&mut self) {
    self.cache.evict(&self.key);
    self.receiver = None;
    self.state = FetchState::default();
  }

  /// Apply completed fetches and cache events.
  ///
  /// Returns `true` if the state changed.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let result_changed = self.poll_result();
    let events_changed = self.poll_events();
    result_changed || events_changed
  }

  fn poll_result(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.receiver = None;
        self.state.data = Some(data);
        self.state.loading = false;
        self.state.error = None;
        self.state.is_stale = false;
        true
      }
      Ok(Err(error)) => {
        self.receiver = None;
        self.state.error = Some(error);
        self.state.loading = false;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.receiver = None;
        self.state.error = Some(FetchError::Aborted {
          message: "query was cancelled".to_string(),
        });
        self.state.loading = false;
        true
      }
    }
  }

  fn poll_events(&mut self) -> bool {
    let mut changed = false;
    let mut refetch = false;

    loop {
      let Some(events) = &mut self.events else {
        break;
      };
      match events.try_recv() {
        Ok(CacheEvent::Focus) => refetch |= self.options.refetch_on_focus,
        Ok(CacheEvent::Reconnect) => refetch |= self.options.refetch_on_reconnect,
        Ok(CacheEvent::Updated(key)) => {
          if key == self.key {
            changed |= self.adopt_cached();
          }
        }
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          debug!(key = %self.key, skipped, "cache events lagged");
          changed |= self.adopt_cached();
        }
        Err(broadcast::error::TryRecvError::Empty) | Err(broadcast::error::TryRecvError::Closed) => {
          break
        }
      }
    }

    if refetch && self.needs_refresh() {
      debug!(key = %self.key, "refetching after focus/reconnect");
      self.start_fetch(false);
      changed = true;
    }
    changed
  }

  /// Take the value another fetch stored for this key.
  fn adopt_cached(&mut self) -> bool {
    match self.lookup() {
      Some(hit) => {
        self.state.data = Some(hit.value);
        self.state.is_stale = hit.is_stale;
        self.state.error = None;
        self.state.loading = false;
        true
      }
      None => false,
    }
  }

  fn needs_refresh(&self) -> bool {
    self.lookup().map(|hit| hit.is_stale).unwrap_or(true)
  }

  fn lookup(&self) -> Option<CacheHit<T>> {
    let config = self.cache.config();
    self.cache.get_with(
      &self.key,
      self.options.stale_time.unwrap_or(config.stale_time),
      self.options.cache_time.unwrap_or(config.cache_time),
    )
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self, forced: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state.loading = self.state.data.is_none();

    let cache = self.cache.clone();
    let key = self.key.clone();
    let fetcher = Arc::clone(&self.fetcher);
    tokio::spawn(async move {
      let result = if forced {
        cache.refetch(&key, move || fetcher()).await
      } else {
        cache.fetch(&key, move || fetcher()).await
      };
      // Ignore send errors - the consumer may have unmounted
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
