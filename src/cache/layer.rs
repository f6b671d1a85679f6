//! Cache service that orchestrates cached reads, deduplicated fetching and eviction.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::storage::{ErasedValue, MemoryStorage};
use super::traits::{CacheHit, CacheResult};
use crate::error::FetchError;

const EVENT_CAPACITY: usize = 256;

/// Retention and staleness settings for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// Entries older than this are evicted and read as misses
  pub cache_time: Duration,
  /// Entries older than this are served but eligible for a background refresh
  pub stale_time: Duration,
  /// How often the eviction sweep runs. Must be non-zero.
  pub sweep_interval: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      cache_time: Duration::from_secs(5 * 60),
      stale_time: Duration::from_secs(30),
      sweep_interval: Duration::from_secs(60),
    }
  }
}

/// Events broadcast to every consumer of a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// The application window/terminal regained focus
  Focus,
  /// The backend became reachable again
  Reconnect,
  /// A fetch for this key completed and replaced the entry
  Updated(String),
}

type SharedFetch = Shared<BoxFuture<'static, Result<ErasedValue, FetchError>>>;

struct InFlight {
  id: u64,
  /// Generation of the key when the producer was started
  generation: u64,
  fetch: SharedFetch,
}

struct Inner {
  config: CacheConfig,
  storage: MemoryStorage,
  in_flight: Mutex<HashMap<String, InFlight>>,
  /// Bumped per key by evictions, direct writes and forced fetches. Only a
  /// fetch started in the current generation may store its result.
  generations: Mutex<HashMap<String, u64>>,
  next_fetch_id: AtomicU64,
  events: broadcast::Sender<CacheEvent>,
  sweeper: Mutex<Option<JoinHandle<()>>>,
  subscribers: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
  fn generation(&self, key: &str) -> u64 {
    lock(&self.generations).get(key).copied().unwrap_or(0)
  }

  fn bump_generation(generations: &mut HashMap<String, u64>, key: &str) -> u64 {
    let generation = generations.entry(key.to_string()).or_insert(0);
    *generation += 1;
    *generation
  }

  fn complete<T>(&self, key: &str, id: u64, generation: u64, result: Result<T>) -> Result<ErasedValue, FetchError>
  where
    T: Send + Sync + 'static,
  {
    let mut stored = false;
    let outcome = match result {
      Ok(value) => {
        let value: ErasedValue = Arc::new(value);
        // Held across the insert so an eviction cannot slip in between
        let generations = lock(&self.generations);
        if generations.get(key).copied().unwrap_or(0) == generation {
          self
            .storage
            .insert(key, Arc::clone(&value), Instant::now());
          stored = true;
          debug!(key, "fetch completed");
        } else {
          debug!(key, id, "fetch superseded, result not stored");
        }
        Ok(value)
      }
      Err(report) => {
        let err = FetchError::from_report(&report);
        warn!(key, error = %err, "fetch failed");
        Err(err)
      }
    };

    self.forget_in_flight(key, id);
    if stored {
      // No receivers is fine
      let _ = self.events.send(CacheEvent::Updated(key.to_string()));
    }
    outcome
  }

  fn forget_in_flight(&self, key: &str, id: u64) {
    let mut in_flight = lock(&self.in_flight);
    if in_flight.get(key).is_some_and(|f| f.id == id) {
      in_flight.remove(key);
    }
  }

  fn sweep(&self) -> usize {
    let evicted = self
      .storage
      .evict_older_than(self.config.cache_time, Instant::now());
    for key in &evicted {
      debug!(key, "evicted expired cache entry");
    }
    evicted.len()
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    if let Some(handle) = lock(&self.sweeper).take() {
      handle.abort();
    }
  }
}

/// Keyed query cache shared by every consumer that holds a clone.
///
/// A fetch for a key that is already being fetched awaits the same in-flight
/// result instead of calling its own producer. Evicting a key or forcing a
/// [`refetch`](Self::refetch) starts a new generation for it: fetches from
/// an older generation still answer their waiters but never store, so an
/// older result cannot overwrite a newer one.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

impl QueryCache {
  /// Create an empty cache. Nothing runs until [`start`](Self::start) or
  /// the first [`subscribe`](Self::subscribe).
  pub fn new(config: CacheConfig) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        config,
        storage: MemoryStorage::default(),
        in_flight: Mutex::new(HashMap::new()),
        generations: Mutex::new(HashMap::new()),
        next_fetch_id: AtomicU64::new(0),
        events,
        sweeper: Mutex::new(None),
        subscribers: AtomicUsize::new(0),
      }),
    }
  }

  pub fn config(&self) -> CacheConfig {
    self.inner.config
  }

  /// Read an entry using the cache's own stale and retention times.
  pub fn get<T>(&self, key: &str) -> Option<CacheHit<T>>
  where
    T: Send + Sync + 'static,
  {
    self.get_with(key, self.inner.config.stale_time, self.inner.config.cache_time)
  }

  /// Read an entry with caller-provided thresholds.
  ///
  /// Entries older than `cache_time`, and entries holding another type,
  /// read as a miss.
  pub fn get_with<T>(&self, key: &str, stale_time: Duration, cache_time: Duration) -> Option<CacheHit<T>>
  where
    T: Send + Sync + 'static,
  {
    let entry = self.inner.storage.get(key)?;
    let age = entry.age(Instant::now());
    if age > cache_time {
      debug!(key, "cache entry past retention");
      return None;
    }
    let value = entry.value.downcast::<T>().ok()?;
    Some(CacheHit {
      value,
      fetched_at: entry.fetched_at,
      is_stale: age > stale_time,
    })
  }

  /// Store a value as if a fetch had just completed. A fetch already in
  /// flight for the key will not overwrite it.
  #[cfg(test)]
  pub fn set<T>(&self, key: &str, value: T)
  where
    T: Send + Sync + 'static,
  {
    let mut generations = lock(&self.inner.generations);
    Inner::bump_generation(&mut generations, key);
    self.inner.storage.insert(key, Arc::new(value), Instant::now());
    drop(generations);
    let _ = self.inner.events.send(CacheEvent::Updated(key.to_string()));
  }

  /// Remove the entry for `key`. A fetch already in flight for the key no
  /// longer stores its result, and the next fetch starts a new producer.
  pub fn evict(&self, key: &str) -> bool {
    let mut generations = lock(&self.inner.generations);
    Inner::bump_generation(&mut generations, key);
    let removed = self.inner.storage.remove(key);
    if removed {
      debug!(key, "evicted cache entry");
    }
    removed
  }

  /// Remove every entry. Fetches in flight no longer store their results.
  pub fn clear(&self) {
    let keys: Vec<String> = lock(&self.inner.in_flight).keys().cloned().collect();
    let mut generations = lock(&self.inner.generations);
    for key in &keys {
      Inner::bump_generation(&mut generations, key);
    }
    self.inner.storage.clear();
  }

  pub fn len(&self) -> usize {
    self.inner.storage.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Whether a fetch for `key` is outstanding.
  #[cfg(test)]
  pub fn is_fetching(&self, key: &str) -> bool {
    lock(&self.inner.in_flight).contains_key(key)
  }

  /// Evict every entry older than the retention window.
  pub fn sweep(&self) -> usize {
    self.inner.sweep()
  }

  /// Fetch `key` through `fetcher`, or join the fetch already running for it.
  ///
  /// The producer runs on its own task, so it completes and populates the
  /// cache even if every caller stops waiting. On failure the cache is left
  /// untouched and every waiter receives the same error.
  pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<Arc<T>, FetchError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetch = self.join_or_start(key, fetcher);
    Self::downcast(key, fetch.await?)
  }

  /// Fetch `key` through a new producer call.
  ///
  /// A fetch already running for the key may predate a write, so it is
  /// superseded rather than joined: its waiters still get its result, but
  /// only this fetch stores into the cache. Concurrent callers of `fetch`
  /// join this one.
  pub async fn refetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<Arc<T>, FetchError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Inner::bump_generation(&mut lock(&self.inner.generations), key);
    let fetch = self.join_or_start(key, fetcher);
    Self::downcast(key, fetch.await?)
  }

  fn downcast<T>(key: &str, value: ErasedValue) -> Result<Arc<T>, FetchError>
  where
    T: Send + Sync + 'static,
  {
    value.downcast::<T>().map_err(|_| FetchError::TypeMismatch {
      key: key.to_string(),
    })
  }

  fn join_or_start<T, F, Fut>(&self, key: &str, fetcher: F) -> SharedFetch
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let mut in_flight = lock(&self.inner.in_flight);
    let generation = self.inner.generation(key);
    if let Some(existing) = in_flight.get(key) {
      if existing.generation == generation {
        debug!(key, "joining in-flight fetch");
        return existing.fetch.clone();
      }
      debug!(key, "in-flight fetch is superseded");
    }

    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    debug!(key, id, generation, "starting fetch");

    let producer = fetcher();
    let task_inner = Arc::clone(&self.inner);
    let task_key = key.to_string();
    let handle = tokio::spawn(async move {
      let result = producer.await;
      task_inner.complete(&task_key, id, generation, result)
    });

    let join_inner = Arc::clone(&self.inner);
    let join_key = key.to_string();
    let fetch = async move {
      match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
          join_inner.forget_in_flight(&join_key, id);
          Err(FetchError::Aborted {
            message: e.to_string(),
          })
        }
      }
    }
    .boxed()
    .shared();

    in_flight.insert(
      key.to_string(),
      InFlight {
        id,
        generation,
        fetch: fetch.clone(),
      },
    );
    fetch
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. On network failure, return stale cache (offline mode)
  pub async fn fetch_cached<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>, FetchError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    match self.get::<T>(key) {
      Some(hit) if !hit.is_stale => Ok(CacheResult::from_cache(hit.value, hit.fetched_at, false)),
      Some(hit) => match self.fetch(key, fetcher).await {
        Ok(data) => Ok(CacheResult::from_network(data)),
        Err(err) => {
          debug!(key, error = %err, "serving stale entry after failed fetch");
          Ok(CacheResult::offline(hit.value, hit.fetched_at))
        }
      },
      None => self.fetch(key, fetcher).await.map(CacheResult::from_network),
    }
  }

  /// Start the periodic eviction sweep. Idempotent.
  pub fn start(&self) {
    let mut sweeper = lock(&self.inner.sweeper);
    if sweeper.is_some() {
      return;
    }

    let weak = Arc::downgrade(&self.inner);
    let period = self.inner.config.sweep_interval;
    *sweeper = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        inner.sweep();
      }
    }));
    debug!(?period, "cache sweep started");
  }

  /// Stop the eviction sweep. Entries are kept.
  pub fn stop(&self) {
    if let Some(handle) = lock(&self.inner.sweeper).take() {
      handle.abort();
      debug!("cache sweep stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    lock(&self.inner.sweeper).is_some()
  }

  /// Register a consumer. The first subscription starts the sweep and
  /// dropping the last one stops it.
  pub fn subscribe(&self) -> CacheSubscription {
    if self.inner.subscribers.fetch_add(1, Ordering::SeqCst) == 0 {
      self.start();
    }
    CacheSubscription {
      cache: self.clone(),
    }
  }

  /// Receiver for focus, reconnect and update events.
  pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  pub fn notify_focus(&self) {
    debug!("focus event");
    let _ = self.inner.events.send(CacheEvent::Focus);
  }

  pub fn notify_reconnect(&self) {
    debug!("reconnect event");
    let _ = self.inner.events.send(CacheEvent::Reconnect);
  }
}

/// A live consumer of a [`QueryCache`].
pub struct CacheSubscription {
  cache: QueryCache,
}

impl Drop for CacheSubscription {
  fn drop(&mut self) {
    if self.cache.inner.subscribers.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.cache.stop();
    }
  }
}
