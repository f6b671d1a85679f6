//! Backend reachability probe.
//!
//! Periodically pings the backend and turns an offline to online transition
//! into the cache's reconnect event.

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cache::QueryCache;

pub struct ConnectivityMonitor {
  online: watch::Receiver<bool>,
  handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
  /// Start probing every `interval`. The backend is assumed reachable until
  /// a probe fails.
  pub fn spawn<P, Fut>(cache: QueryCache, interval: Duration, probe: P) -> Self
  where
    P: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let (tx, online) = watch::channel(true);
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let reachable = match probe().await {
          Ok(()) => true,
          Err(e) => {
            if *tx.borrow() {
              warn!(error = %format!("{:#}", e), "backend unreachable");
            }
            false
          }
        };

        let was_online = tx.send_replace(reachable);
        if reachable && !was_online {
          info!("backend reachable again");
          cache.notify_reconnect();
        }
      }
    });

    Self { online, handle }
  }

  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
