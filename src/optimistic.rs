//! Optimistic state updates with rollback on remote failure.
//!
//! The local value changes before the remote call runs. If the remote call
//! fails, the value goes back to the snapshot taken when that call started
//! and the original error is returned to the caller.
//!
//! Concurrent updates on one value are not serialized. Each call snapshots
//! whatever the value is when it starts, so a rollback can land on another
//! call's optimistic value, and a rollback of an earlier call can discard a
//! later call's change. Callers that need strict ordering must await one
//! update before starting the next.

use color_eyre::{Report, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::notify::{Notification, Notifier};

const DEFAULT_ERROR_MESSAGE: &str = "Update failed";

#[derive(Clone, Default)]
struct Feedback {
  notifier: Option<Arc<dyn Notifier>>,
  success: Option<String>,
  error: Option<String>,
}

impl Feedback {
  fn succeeded(&self) {
    if let (Some(notifier), Some(message)) = (&self.notifier, &self.success) {
      notifier.notify(Notification::success(message.clone()));
    }
  }

  fn failed(&self, report: &Report) {
    if let Some(notifier) = &self.notifier {
      let message = self.error.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE);
      notifier.notify(Notification::error(message, format!("{:#}", report)));
    }
  }
}

/// A value that can be changed ahead of remote confirmation.
///
/// Cloning shares the value. Renderers observe it through [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct Optimistic<T> {
  state: Arc<watch::Sender<T>>,
  feedback: Feedback,
}

impl<T: Clone> Optimistic<T> {
  pub fn new(initial: T) -> Self {
    let (state, _) = watch::channel(initial);
    Self {
      state: Arc::new(state),
      feedback: Feedback::default(),
    }
  }

  /// Report outcomes to `notifier`. Failures are always reported once a
  /// notifier is set; successes only with [`on_success`](Self::on_success).
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.feedback.notifier = Some(notifier);
    self
  }

  pub fn on_success(mut self, message: impl Into<String>) -> Self {
    self.feedback.success = Some(message.into());
    self
  }

  pub fn on_error(mut self, message: impl Into<String>) -> Self {
    self.feedback.error = Some(message.into());
    self
  }

  pub fn get(&self) -> T {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<T> {
    self.state.subscribe()
  }

  /// Replace the value without a remote call.
  pub fn set(&self, value: T) {
    self.state.send_replace(value);
  }

  /// Show `value` now, then run `mutation`.
  #[cfg(test)]
  pub async fn update<R, F, Fut>(&self, value: T, mutation: F) -> Result<R>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    self.update_with(move |_| value, mutation).await
  }

  /// Show `updater(current)` now, then run `mutation`.
  pub async fn update_with<R, U, F, Fut>(&self, updater: U, mutation: F) -> Result<R>
  where
    U: FnOnce(&T) -> T,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    let snapshot = self.swap(updater);

    match mutation().await {
      Ok(output) => {
        debug!("optimistic update confirmed");
        self.feedback.succeeded();
        Ok(output)
      }
      Err(report) => {
        warn!(error = %format!("{:#}", report), "optimistic update rolled back");
        self.state.send_replace(snapshot);
        self.feedback.failed(&report);
        Err(report)
      }
    }
  }

  /// Apply `updater` atomically and return the previous value.
  fn swap<U>(&self, updater: U) -> T
  where
    U: FnOnce(&T) -> T,
  {
    let mut snapshot = self.state.borrow().clone();
    self.state.send_modify(|current| {
      let next = updater(current);
      snapshot = std::mem::replace(current, next);
    });
    snapshot
  }
}

/// List elements with a stable identifier.
pub trait Identified {
  type Id: PartialEq + fmt::Debug;

  fn id(&self) -> &Self::Id;
}

/// A list whose add, update and remove operations are optimistic.
///
/// Every operation snapshots the whole list, so a rollback also discards
/// other optimistic changes made to the list while the remote call ran.
#[derive(Clone)]
pub struct OptimisticList<T> {
  inner: Optimistic<Vec<T>>,
}

impl<T: Identified + Clone> OptimisticList<T> {
  pub fn new(items: Vec<T>) -> Self {
    Self {
      inner: Optimistic::new(items),
    }
  }

  pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
    Self {
      inner: self.inner.with_notifier(notifier),
    }
  }

  pub fn on_success(self, message: impl Into<String>) -> Self {
    Self {
      inner: self.inner.on_success(message),
    }
  }

  pub fn on_error(self, message: impl Into<String>) -> Self {
    Self {
      inner: self.inner.on_error(message),
    }
  }

  pub fn items(&self) -> Vec<T> {
    self.inner.get()
  }

  pub fn find(&self, id: &T::Id) -> Option<T> {
    self.inner.state.borrow().iter().find(|item| item.id() == id).cloned()
  }

  pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
    self.inner.subscribe()
  }

  /// Seed or reset the list from fetched data.
  pub fn replace_all(&self, items: Vec<T>) {
    self.inner.set(items);
  }

  /// Append `item` now, then run `mutation`.
  pub async fn add_item<R, F, Fut>(&self, item: T, mutation: F) -> Result<R>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    self
      .inner
      .update_with(
        move |items| {
          let mut next = items.clone();
          next.push(item);
          next
        },
        mutation,
      )
      .await
  }

  /// Replace the element with `id` by `updater(element)` now, then run
  /// `mutation`. An unknown id leaves the list unchanged.
  pub async fn update_item<R, U, F, Fut>(&self, id: &T::Id, updater: U, mutation: F) -> Result<R>
  where
    U: FnOnce(&T) -> T,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    self
      .inner
      .update_with(
        move |items| {
          let mut updater = Some(updater);
          items
            .iter()
            .map(|item| {
              if item.id() == id {
                if let Some(update) = updater.take() {
                  return update(item);
                }
              }
              item.clone()
            })
            .collect()
        },
        mutation,
      )
      .await
  }

  /// Remove the element with `id` now, then run `mutation`.
  pub async fn remove_item<R, F, Fut>(&self, id: &T::Id, mutation: F) -> Result<R>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    self
      .inner
      .update_with(
        move |items| {
          items
            .iter()
            .filter(|item| item.id() != id)
            .cloned()
            .collect()
        },
        mutation,
      )
      .await
  }
}
