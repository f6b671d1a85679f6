//! Incremental page loading for long lists.
//!
//! `PaginatedQuery<T>` accumulates pages from a page fetcher. It does not
//! share the keyed [`QueryCache`](crate::cache::QueryCache): every consumer
//! owns its list.

use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// One page returned by a page fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub has_more: bool,
}

type PageFuture<T> = Pin<Box<dyn Future<Output = Result<Page<T>>> + Send>>;
type PageFetcherFn<T> = Arc<dyn Fn(u32, u32) -> PageFuture<T> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
  /// Page 1, replacing the list
  Replace,
  /// The next page, appended to the list
  Append,
}

struct PendingLoad<T> {
  kind: LoadKind,
  page: u32,
  receiver: oneshot::Receiver<std::result::Result<Page<T>, FetchError>>,
}

/// A list loaded one page at a time.
///
/// Only one page load runs at a time. `load_more` while anything is loading
/// is a no-op; `refresh` supersedes a pending `load_more`, whose result is
/// then ignored.
pub struct PaginatedQuery<T> {
  key: String,
  page_size: u32,
  fetcher: PageFetcherFn<T>,
  items: Vec<T>,
  page: u32,
  has_more: bool,
  error: Option<FetchError>,
  pending: Option<PendingLoad<T>>,
}

impl<T: Send + 'static> PaginatedQuery<T> {
  /// Create a loader for the list identified by `key`.
  ///
  /// `fetcher(page, page_size)` loads one page; pages are numbered from 1.
  pub fn new<F, Fut>(key: impl Into<String>, page_size: u32, fetcher: F) -> Self
  where
    F: Fn(u32, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page<T>>> + Send + 'static,
  {
    let fetcher: PageFetcherFn<T> =
      Arc::new(move |page, size| -> PageFuture<T> { Box::pin(fetcher(page, size)) });
    Self {
      key: key.into(),
      page_size: page_size.max(1),
      fetcher,
      items: Vec::new(),
      page: 1,
      has_more: true,
      error: None,
      pending: None,
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn items(&self) -> &[T] {
    &self.items
  }

  /// Last page loaded.
  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn has_more(&self) -> bool {
    self.has_more
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.error.as_ref()
  }

  /// Initial or refresh load in progress.
  pub fn is_loading(&self) -> bool {
    self
      .pending
      .as_ref()
      .is_some_and(|p| p.kind == LoadKind::Replace)
  }

  /// Trailing load-more in progress.
  pub fn is_loading_more(&self) -> bool {
    self
      .pending
      .as_ref()
      .is_some_and(|p| p.kind == LoadKind::Append)
  }

  /// Load page 1.
  pub fn mount(&mut self) {
    self.refresh();
  }

  /// Switch to another list. A different key resets everything and loads
  /// page 1; the same key is a no-op.
  pub fn set_key(&mut self, key: impl Into<String>) {
    let key = key.into();
    if key == self.key {
      return;
    }
    debug!(from = %self.key, to = %key, "paginated list key changed");
    self.key = key;
    self.items.clear();
    self.page = 1;
    self.has_more = true;
    self.error = None;
    self.pending = None;
    self.refresh();
  }

  /// Request the next page. Returns `false` when it was a no-op.
  pub fn load_more(&mut self) -> bool {
    if !self.has_more || self.pending.is_some() {
      return false;
    }
    self.start(LoadKind::Append, self.page + 1);
    true
  }

  /// Reload page 1 and replace the accumulated list.
  pub fn refresh(&mut self) {
    self.start(LoadKind::Replace, 1);
  }

  /// Apply a completed page load.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let outcome = match &mut self.pending {
      Some(pending) => match pending.receiver.try_recv() {
        Ok(outcome) => outcome,
        Err(oneshot::error::TryRecvError::Empty) => return false,
        Err(oneshot::error::TryRecvError::Closed) => Err(FetchError::Aborted {
          message: "page load was cancelled".to_string(),
        }),
      },
      None => return false,
    };

    let Some(pending) = self.pending.take() else {
      return false;
    };

    match outcome {
      Ok(page) => {
        debug!(key = %self.key, page = pending.page, items = page.items.len(), "page loaded");
        match pending.kind {
          LoadKind::Replace => self.items = page.items,
          LoadKind::Append => self.items.extend(page.items),
        }
        self.page = pending.page;
        self.has_more = page.has_more;
        self.error = None;
      }
      Err(error) => {
        debug!(key = %self.key, page = pending.page, %error, "page load failed");
        self.error = Some(error);
      }
    }
    true
  }

  fn start(&mut self, kind: LoadKind, page: u32) {
    let (tx, rx) = oneshot::channel();
    self.pending = Some(PendingLoad {
      kind,
      page,
      receiver: rx,
    });

    let load = (self.fetcher)(page, self.page_size);
    tokio::spawn(async move {
      let outcome = load.await.map_err(|e| FetchError::from_report(&e));
      // Ignore send errors - the load may have been superseded
      let _ = tx.send(outcome);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PaginatedQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PaginatedQuery")
      .field("key", &self.key)
      .field("items", &self.items.len())
      .field("page", &self.page)
      .field("has_more", &self.has_more)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
  use std::time::Duration;

  async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
  }

  /// Pages of `page_size` numbered items; `total_pages` pages in all.
  struct Pages {
    calls: Arc<AtomicUsize>,
    fail_page: Arc<AtomicU32>,
    offset: Arc<AtomicU32>,
  }

  impl Pages {
    fn new() -> Self {
      Self {
        calls: Arc::new(AtomicUsize::new(0)),
        fail_page: Arc::new(AtomicU32::new(0)),
        offset: Arc::new(AtomicU32::new(0)),
      }
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    fn query(&self, total_pages: u32, delay: Duration) -> PaginatedQuery<u32> {
      let calls = Arc::clone(&self.calls);
      let fail_page = Arc::clone(&self.fail_page);
      let offset = Arc::clone(&self.offset);
      PaginatedQuery::new("payments", 2, move |page, size| {
        calls.fetch_add(1, Ordering::SeqCst);
        let fail = fail_page.load(Ordering::SeqCst) == page;
        let base = offset.load(Ordering::SeqCst);
        async move {
          tokio::time::sleep(delay).await;
          if fail {
            return Err(eyre!("page {} unavailable", page));
          }
          let first = base + (page - 1) * size;
          Ok(Page {
            items: (first..first + size).collect(),
            has_more: page < total_pages,
          })
        }
      })
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_load_more_accumulates_all_pages_in_order() {
    let pages = Pages::new();
    let mut query = pages.query(3, Duration::ZERO);

    query.mount();
    assert!(query.is_loading());
    settle().await;
    assert!(query.poll());

    while query.load_more() {
      assert!(query.is_loading_more());
      settle().await;
      query.poll();
    }

    assert_eq!(query.items(), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(query.page(), 3);
    assert!(!query.has_more());
    assert_eq!(pages.calls(), 3);

    // Exhausted: no further fetch
    assert!(!query.load_more());
    settle().await;
    assert_eq!(pages.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_load_more_while_loading_is_noop() {
    let pages = Pages::new();
    let mut query = pages.query(5, Duration::from_millis(50));
    query.mount();

    assert!(!query.load_more());

    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();
    assert!(query.load_more());
    assert!(!query.load_more());

    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();
    assert_eq!(pages.calls(), 2);
    assert_eq!(query.items(), &[0, 1, 2, 3]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_replaces_instead_of_appending() {
    let pages = Pages::new();
    let mut query = pages.query(3, Duration::ZERO);
    query.mount();
    settle().await;
    query.poll();
    query.load_more();
    settle().await;
    query.poll();
    assert_eq!(query.items().len(), 4);

    pages.offset.store(100, Ordering::SeqCst);
    query.refresh();
    settle().await;
    query.poll();

    assert_eq!(query.items(), &[100, 101]);
    assert_eq!(query.page(), 1);
    assert!(query.has_more());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_page_keeps_accumulated_state() {
    let pages = Pages::new();
    let mut query = pages.query(3, Duration::ZERO);
    query.mount();
    settle().await;
    query.poll();

    pages.fail_page.store(2, Ordering::SeqCst);
    assert!(query.load_more());
    settle().await;
    assert!(query.poll());

    assert_eq!(query.items(), &[0, 1]);
    assert_eq!(query.page(), 1);
    assert!(query.has_more());
    assert_eq!(
      query.error(),
      Some(&FetchError::Failed {
        message: "page 2 unavailable".to_string()
      })
    );
    assert!(!query.is_loading_more());

    // The next attempt succeeds and clears the error
    pages.fail_page.store(0, Ordering::SeqCst);
    query.load_more();
    settle().await;
    query.poll();
    assert_eq!(query.items(), &[0, 1, 2, 3]);
    assert!(query.error().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_supersedes_pending_load_more() {
    let pages = Pages::new();
    let mut query = pages.query(3, Duration::from_millis(50));
    query.mount();
    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();

    query.load_more();
    query.refresh();
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();

    assert_eq!(query.items(), &[0, 1]);
    assert_eq!(query.page(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_key_resets_and_reloads() {
    let pages = Pages::new();
    let mut query = pages.query(3, Duration::from_millis(50));
    query.mount();
    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();
    query.load_more();
    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();
    assert_eq!(query.page(), 2);

    query.set_key("payments:lease-7");
    assert!(query.items().is_empty());
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(60)).await;
    query.poll();
    assert_eq!(query.key(), "payments:lease-7");
    assert_eq!(query.items(), &[0, 1]);
    assert_eq!(query.page(), 1);

    query.set_key("payments:lease-7");
    assert!(!query.is_loading());
  }
}
