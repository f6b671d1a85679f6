//! Backend client that reads through the shared query cache.

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheResult, QueryCache, QueryKey};

use super::client::BackendClient;
use super::keys::BackendQueryKey;
use super::types::Table;

/// Backend client with transparent caching.
///
/// Reads share the [`QueryCache`] with every `Query` keyed by the same
/// [`BackendQueryKey`], so a list fetched here is the list a mounted query
/// shows. Writes go straight to the backend and evict the table's full
/// listing.
#[derive(Clone)]
pub struct CachedBackend {
  inner: BackendClient,
  cache: QueryCache,
}

impl CachedBackend {
  pub fn new(inner: BackendClient, cache: QueryCache) -> Self {
    Self { inner, cache }
  }

  pub fn client(&self) -> &BackendClient {
    &self.inner
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Every row of `table`, from the cache while fresh.
  pub async fn all<T>(&self, table: Table) -> Result<CacheResult<Vec<T>>>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    let key = BackendQueryKey::All { table };
    let inner = self.inner.clone();
    let result = self
      .cache
      .fetch_cached::<Vec<T>, _, _>(&key.cache_hash(), || async move { inner.fetch_all(table).await })
      .await?;
    Ok(result)
  }

  /// Rows of `table` belonging to the parent row `value` through `column`.
  pub async fn scoped<T>(&self, table: Table, column: &str, value: &str) -> Result<CacheResult<Vec<T>>>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    // One value for both the key and the request
    let value = value.trim();
    let key = BackendQueryKey::scoped(table, column, value);
    let inner = self.inner.clone();
    let column = column.to_string();
    let value = value.to_string();
    let result = self
      .cache
      .fetch_cached::<Vec<T>, _, _>(&key.cache_hash(), || async move {
        inner.fetch_where(table, &column, &value).await
      })
      .await?;
    Ok(result)
  }

  /// Insert a row (not cached - write operation).
  pub async fn insert<B, T>(&self, table: Table, row: &B) -> Result<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let row = self.inner.insert(table, row).await?;
    self.invalidate(table);
    Ok(row)
  }

  /// Fetch the full listing of `table` again. Every query showing it adopts
  /// the new rows.
  pub async fn reload<T>(&self, table: Table) -> Result<()>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    self.invalidate(table);
    self.all::<T>(table).await?;
    Ok(())
  }

  /// Update a row (not cached - write operation).
  pub async fn update<P, T>(&self, table: Table, id: &str, patch: &P) -> Result<T>
  where
    P: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let row = self.inner.update(table, id, patch).await?;
    self.invalidate(table);
    Ok(row)
  }

  /// Delete a row (not cached - write operation).
  pub async fn delete(&self, table: Table, id: &str) -> Result<()> {
    self.inner.delete(table, id).await?;
    self.invalidate(table);
    Ok(())
  }

  /// Drop the cached full listing of `table`.
  pub fn invalidate(&self, table: Table) -> bool {
    self.cache.evict(&BackendQueryKey::All { table }.cache_hash())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::stub::{Reply, StubServer};
  use crate::cache::{CacheConfig, CacheSource};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn unreachable_backend() -> CachedBackend {
    let client = BackendClient::with_credentials(
      "http://127.0.0.1:1",
      "rest/v1",
      "anon".to_string(),
      None,
    )
    .unwrap();
    CachedBackend::new(client, QueryCache::new(CacheConfig::default()))
  }

  fn all_key(table: Table) -> String {
    BackendQueryKey::All { table }.cache_hash()
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_listing_is_served_from_cache() {
    let backend = unreachable_backend();
    backend
      .cache()
      .set(&all_key(Table::Units), vec!["u-1".to_string(), "u-2".to_string()]);

    let result = backend.all::<String>(Table::Units).await.unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data.len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_listing_survives_unreachable_backend() {
    let backend = unreachable_backend();
    backend
      .cache()
      .set(&all_key(Table::Leases), vec!["l-1".to_string()]);
    tokio::time::advance(Duration::from_secs(31)).await;

    let result = backend.all::<String>(Table::Leases).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(*result.data, vec!["l-1".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cold_listing_fails_when_unreachable() {
    let backend = unreachable_backend();
    assert!(backend.all::<String>(Table::Payments).await.is_err());
  }

  #[test]
  fn test_invalidate_drops_full_listing() {
    let backend = unreachable_backend();
    backend.cache().set(&all_key(Table::Properties), Vec::<String>::new());

    assert!(backend.invalidate(Table::Properties));
    assert!(!backend.invalidate(Table::Properties));
    assert!(backend.cache().get::<Vec<String>>(&all_key(Table::Properties)).is_none());
  }

  fn listing(backend: &CachedBackend, table: Table) -> Option<Vec<String>> {
    backend
      .cache()
      .get::<Vec<String>>(&all_key(table))
      .map(|hit| hit.value.as_ref().clone())
  }

  #[tokio::test]
  async fn test_reload_after_write_replaces_slower_earlier_listing() {
    let gets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gets);
    let stub = StubServer::start(move |method, _| match method {
      "GET" if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
        Reply::json(200, r#"["before"]"#).after(Duration::from_millis(300))
      }
      "GET" => Reply::json(200, r#"["after"]"#),
      "DELETE" => Reply::empty(204),
      _ => Reply::empty(404),
    })
    .await;
    let backend = CachedBackend::new(stub.client(), QueryCache::default());

    let early = tokio::spawn({
      let backend = backend.clone();
      async move { backend.all::<String>(Table::Units).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    backend.delete(Table::Units, "u-1").await.unwrap();
    backend.reload::<String>(Table::Units).await.unwrap();
    assert_eq!(listing(&backend, Table::Units), Some(vec!["after".to_string()]));

    // The listing read before the write still answers its caller
    let early = early.await.unwrap().unwrap();
    assert_eq!(*early.data, vec!["before".to_string()]);
    assert_eq!(listing(&backend, Table::Units), Some(vec!["after".to_string()]));
    assert_eq!(stub.count("GET"), 2);
  }

  #[tokio::test]
  async fn test_writes_evict_full_listing() {
    let stub = StubServer::start(|method, _| match method {
      "POST" => Reply::json(201, r#"[{"id":"u-2"}]"#),
      "PATCH" => Reply::json(200, r#"[{"id":"u-1"}]"#),
      "DELETE" => Reply::empty(204),
      _ => Reply::empty(404),
    })
    .await;
    let backend = CachedBackend::new(stub.client(), QueryCache::default());
    let seed = || {
      backend
        .cache()
        .set(&all_key(Table::Units), vec!["u-1".to_string()]);
    };

    seed();
    let inserted: Value = backend
      .insert(Table::Units, &json!({"label": "B1"}))
      .await
      .unwrap();
    assert_eq!(inserted["id"], "u-2");
    assert!(listing(&backend, Table::Units).is_none());

    seed();
    let updated: Value = backend
      .update(Table::Units, "u-1", &json!({"occupied": true}))
      .await
      .unwrap();
    assert_eq!(updated["id"], "u-1");
    assert!(listing(&backend, Table::Units).is_none());

    seed();
    backend.delete(Table::Units, "u-1").await.unwrap();
    assert!(listing(&backend, Table::Units).is_none());

    assert_eq!(
      stub.requests(),
      vec![
        "POST /rest/v1/units".to_string(),
        "PATCH /rest/v1/units?id=eq.u-1".to_string(),
        "DELETE /rest/v1/units?id=eq.u-1".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn test_refused_write_keeps_listing() {
    let stub = StubServer::start(|_, _| Reply::json(409, r#"{"message":"conflict"}"#)).await;
    let backend = CachedBackend::new(stub.client(), QueryCache::default());
    backend
      .cache()
      .set(&all_key(Table::Leases), vec!["l-1".to_string()]);

    let result = backend
      .update::<_, Value>(Table::Leases, "l-1", &json!({"status": "ended"}))
      .await;

    assert!(result.unwrap_err().to_string().contains("409"));
    assert_eq!(listing(&backend, Table::Leases), Some(vec!["l-1".to_string()]));
  }

  #[tokio::test]
  async fn test_reload_fetches_listing_again() {
    let stub = StubServer::start(|_, _| Reply::json(200, r#"["p-1","p-2"]"#)).await;
    let backend = CachedBackend::new(stub.client(), QueryCache::default());
    backend
      .cache()
      .set(&all_key(Table::Properties), vec!["p-1".to_string()]);

    backend.reload::<String>(Table::Properties).await.unwrap();

    assert_eq!(
      listing(&backend, Table::Properties),
      Some(vec!["p-1".to_string(), "p-2".to_string()])
    );
    assert_eq!(stub.count("GET"), 1);
  }

  #[tokio::test]
  async fn test_scoped_sends_the_value_it_caches_under() {
    let stub = StubServer::start(|_, _| Reply::json(200, r#"["u-1"]"#)).await;
    let backend = CachedBackend::new(stub.client(), QueryCache::default());

    let first = backend
      .scoped::<String>(Table::Units, "property_id", " p-1 ")
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert!(stub.requests()[0].ends_with("property_id=eq.p-1"));

    let key = BackendQueryKey::scoped(Table::Units, "property_id", "p-1");
    assert!(backend.cache().get::<Vec<String>>(&key.cache_hash()).is_some());

    let second = backend
      .scoped::<String>(Table::Units, "property_id", "p-1")
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(stub.count("GET"), 1);
  }
}
