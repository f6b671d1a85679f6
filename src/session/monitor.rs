//! Runs the idle timer for the signed-in session.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::idle::{IdlePolicy, IdleTimer, IdleTransition, SessionPhase};
use super::{Activity, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
  StayLoggedIn,
  LogOutNow,
}

/// What the console shows about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
  pub phase: SessionPhase,
  pub seconds_remaining: u32,
}

impl SessionSnapshot {
  fn of(timer: &IdleTimer) -> Self {
    Self {
      phase: timer.phase(),
      seconds_remaining: timer.seconds_remaining(),
    }
  }
}

/// Owns the single idle timer of a session.
///
/// Activity and role changes arrive on channels; the termination callback
/// runs once each time the session is terminated. Dropping the monitor (or
/// calling [`stop`](Self::stop)) cancels every timer.
pub struct IdleMonitor {
  commands: mpsc::UnboundedSender<SessionCommand>,
  snapshot: watch::Receiver<SessionSnapshot>,
  handle: JoinHandle<()>,
}

impl IdleMonitor {
  pub fn spawn<F>(
    policy: IdlePolicy,
    activity: mpsc::UnboundedReceiver<Activity>,
    role: watch::Receiver<Option<Role>>,
    on_terminate: F,
  ) -> Self
  where
    F: FnMut() + Send + 'static,
  {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::default());
    let handle = tokio::spawn(run(
      IdleTimer::new(policy),
      activity,
      role,
      command_rx,
      snapshot_tx,
      on_terminate,
    ));

    Self {
      commands,
      snapshot,
      handle,
    }
  }

  /// Dismiss the warning and keep the session.
  pub fn stay_logged_in(&self) {
    let _ = self.commands.send(SessionCommand::StayLoggedIn);
  }

  /// End the session immediately.
  pub fn log_out_now(&self) {
    let _ = self.commands.send(SessionCommand::LogOutNow);
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    *self.snapshot.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
    self.snapshot.clone()
  }

  pub fn stop(self) {
    // Drop aborts the task
  }
}

impl Drop for IdleMonitor {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

async fn wait_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

async fn run<F>(
  mut timer: IdleTimer,
  mut activity: mpsc::UnboundedReceiver<Activity>,
  mut role: watch::Receiver<Option<Role>>,
  mut commands: mpsc::UnboundedReceiver<SessionCommand>,
  snapshot: watch::Sender<SessionSnapshot>,
  mut on_terminate: F,
) where
  F: FnMut(),
{
  let initial = *role.borrow_and_update();
  timer.set_role(initial, Instant::now());
  snapshot.send_replace(SessionSnapshot::of(&timer));

  loop {
    tokio::select! {
      _ = wait_until(timer.next_wakeup()) => {
        for transition in timer.advance(Instant::now()) {
          match transition {
            IdleTransition::Warned { seconds_remaining } => {
              info!(seconds_remaining, "session idle, showing logout warning");
            }
            IdleTransition::Countdown { .. } => {}
            IdleTransition::Terminated => {
              info!("session idle for too long, logging out");
              on_terminate();
            }
          }
        }
      }
      Some(input) = activity.recv() => {
        if timer.record_activity(Instant::now()) {
          debug!(?input, "idle window rearmed");
        }
      }
      changed = role.changed() => {
        if changed.is_err() {
          debug!("role source closed, stopping idle monitor");
          break;
        }
        let current = *role.borrow_and_update();
        if timer.set_role(current, Instant::now()) {
          info!(role = ?current, "session role changed");
        }
      }
      Some(command) = commands.recv() => match command {
        SessionCommand::StayLoggedIn => {
          if timer.stay_logged_in(Instant::now()) {
            info!("user chose to stay logged in");
          }
        }
        SessionCommand::LogOutNow => {
          if timer.log_out_now() {
            info!("user logged out from the idle warning");
            on_terminate();
          }
        }
      },
    }

    snapshot.send_replace(SessionSnapshot::of(&timer));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::WARNING_WINDOW;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  const TIMEOUT: Duration = Duration::from_secs(600);

  struct Harness {
    monitor: IdleMonitor,
    activity: mpsc::UnboundedSender<Activity>,
    role: watch::Sender<Option<Role>>,
    terminations: Arc<AtomicUsize>,
  }

  impl Harness {
    async fn start(role: Option<Role>) -> Self {
      let (activity, activity_rx) = mpsc::unbounded_channel();
      let (role_tx, role_rx) = watch::channel(role);
      let terminations = Arc::new(AtomicUsize::new(0));
      let counter = Arc::clone(&terminations);
      let monitor = IdleMonitor::spawn(
        IdlePolicy {
          elevated_timeout: TIMEOUT,
          standard_timeout: TIMEOUT * 2,
          warning_window: WARNING_WINDOW,
        },
        activity_rx,
        role_rx,
        move || {
          counter.fetch_add(1, Ordering::SeqCst);
        },
      );
      settle().await;
      Self {
        monitor,
        activity,
        role: role_tx,
        terminations,
      }
    }

    fn phase(&self) -> SessionPhase {
      self.monitor.snapshot().phase
    }

    fn terminations(&self) -> usize {
      self.terminations.load(Ordering::SeqCst)
    }
  }

  async fn settle() {
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
  }

  async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_session_warns_then_terminates_once() {
    let h = Harness::start(Some(Role::Landlord)).await;
    assert_eq!(h.phase(), SessionPhase::Active);

    sleep(TIMEOUT).await;
    assert_eq!(h.phase(), SessionPhase::Warning);
    assert_eq!(h.monitor.snapshot().seconds_remaining, 60);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.monitor.snapshot().seconds_remaining, 50);

    sleep(Duration::from_secs(50)).await;
    assert_eq!(h.phase(), SessionPhase::Terminated);
    assert_eq!(h.terminations(), 1);

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.terminations(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_activity_keeps_session_active() {
    let h = Harness::start(Some(Role::Admin)).await;

    for _ in 0..5 {
      sleep(TIMEOUT - Duration::from_secs(1)).await;
      h.activity.send(Activity::PointerMove).unwrap();
      settle().await;
    }

    assert_eq!(h.phase(), SessionPhase::Active);
    assert_eq!(h.terminations(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_activity_during_warning_does_not_dismiss_it() {
    let h = Harness::start(Some(Role::Landlord)).await;
    sleep(TIMEOUT).await;

    h.activity.send(Activity::KeyDown).unwrap();
    h.activity.send(Activity::Scroll).unwrap();
    settle().await;
    assert_eq!(h.phase(), SessionPhase::Warning);

    sleep(WARNING_WINDOW).await;
    assert_eq!(h.terminations(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stay_logged_in_restarts_full_window() {
    let h = Harness::start(Some(Role::Landlord)).await;
    sleep(TIMEOUT + Duration::from_secs(30)).await;

    h.monitor.stay_logged_in();
    settle().await;
    assert_eq!(h.phase(), SessionPhase::Active);

    // The old warning deadline passes without effect
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.phase(), SessionPhase::Active);

    sleep(TIMEOUT - Duration::from_secs(60)).await;
    assert_eq!(h.phase(), SessionPhase::Warning);
    assert_eq!(h.terminations(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_log_out_now_terminates_immediately() {
    let h = Harness::start(Some(Role::Tenant)).await;
    sleep(TIMEOUT * 2).await;

    h.monitor.log_out_now();
    settle().await;

    assert_eq!(h.phase(), SessionPhase::Terminated);
    assert_eq!(h.terminations(), 1);

    sleep(WARNING_WINDOW * 2).await;
    assert_eq!(h.terminations(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unknown_role_disarms_timers() {
    let h = Harness::start(None).await;
    assert_eq!(h.phase(), SessionPhase::Inert);

    h.role.send_replace(Some(Role::Landlord));
    settle().await;
    assert_eq!(h.phase(), SessionPhase::Active);

    h.role.send_replace(None);
    settle().await;
    sleep(TIMEOUT * 10).await;

    assert_eq!(h.phase(), SessionPhase::Inert);
    assert_eq!(h.terminations(), 0);
  }
}
