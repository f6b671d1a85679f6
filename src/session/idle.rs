//! Idle-session state machine.
//!
//! ```text
//!            idle deadline             warning deadline / log out now
//!   Active ─────────────────▶ Warning ─────────────────────────────────▶ Terminated
//!     ▲                          │
//!     └──── stay logged in ──────┘
//! ```
//!
//! The machine is pure: callers pass the current time in and schedule a
//! wakeup at [`IdleTimer::next_wakeup`].

use std::time::Duration;
use tokio::time::Instant;

use super::Role;

/// Length of the warning countdown before a forced logout.
pub const WARNING_WINDOW: Duration = Duration::from_secs(60);

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
  pub elevated_timeout: Duration,
  pub standard_timeout: Duration,
  pub warning_window: Duration,
}

impl Default for IdlePolicy {
  fn default() -> Self {
    Self {
      elevated_timeout: Duration::from_secs(15 * 60),
      standard_timeout: Duration::from_secs(30 * 60),
      warning_window: WARNING_WINDOW,
    }
  }
}

impl IdlePolicy {
  pub fn timeout_for(&self, role: Role) -> Duration {
    if role.is_elevated() {
      self.elevated_timeout
    } else {
      self.standard_timeout
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
  /// No known role; nothing is armed
  #[default]
  Inert,
  Active,
  Warning,
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
  /// Idle deadline elapsed; the countdown started
  Warned { seconds_remaining: u32 },
  /// One second of the countdown passed
  Countdown { seconds_remaining: u32 },
  /// Warning deadline elapsed
  Terminated,
}

#[derive(Debug, Clone)]
pub struct IdleTimer {
  policy: IdlePolicy,
  role: Option<Role>,
  phase: SessionPhase,
  idle_deadline: Option<Instant>,
  warning_deadline: Option<Instant>,
  next_countdown: Option<Instant>,
  seconds_remaining: u32,
}

impl IdleTimer {
  pub fn new(policy: IdlePolicy) -> Self {
    Self {
      policy,
      role: None,
      phase: SessionPhase::Inert,
      idle_deadline: None,
      warning_deadline: None,
      next_countdown: None,
      seconds_remaining: 0,
    }
  }

  pub fn phase(&self) -> SessionPhase {
    self.phase
  }

  /// Seconds left on the warning countdown, zero outside `Warning`.
  pub fn seconds_remaining(&self) -> u32 {
    self.seconds_remaining
  }

  #[cfg(test)]
  pub fn idle_deadline(&self) -> Option<Instant> {
    self.idle_deadline
  }

  /// Follow the role source.
  ///
  /// An unknown role tears everything down. A newly known or different role
  /// starts a fresh `Active` window with that role's timeout. Returns whether
  /// anything changed.
  pub fn set_role(&mut self, role: Option<Role>, now: Instant) -> bool {
    match role {
      None => {
        if self.role.is_none() && self.phase == SessionPhase::Inert {
          return false;
        }
        self.role = None;
        self.clear();
        self.phase = SessionPhase::Inert;
        true
      }
      Some(role) => {
        let running = matches!(self.phase, SessionPhase::Active | SessionPhase::Warning);
        if running && self.role == Some(role) {
          return false;
        }
        self.role = Some(role);
        self.arm(now);
        true
      }
    }
  }

  /// Slide the idle window. Ignored outside `Active`, so incidental input
  /// cannot dismiss a warning.
  pub fn record_activity(&mut self, now: Instant) -> bool {
    if self.phase != SessionPhase::Active {
      return false;
    }
    self.arm(now);
    true
  }

  /// Leave `Warning` and start a fresh idle window.
  pub fn stay_logged_in(&mut self, now: Instant) -> bool {
    if self.phase != SessionPhase::Warning {
      return false;
    }
    self.arm(now);
    true
  }

  /// End the session now. Returns `true` if this call terminated it.
  pub fn log_out_now(&mut self) -> bool {
    if !matches!(self.phase, SessionPhase::Active | SessionPhase::Warning) {
      return false;
    }
    self.terminate();
    true
  }

  /// Process every deadline that is due at `now`.
  pub fn advance(&mut self, now: Instant) -> Vec<IdleTransition> {
    let mut transitions = Vec::new();

    if self.phase == SessionPhase::Active && self.idle_deadline.is_some_and(|d| d <= now) {
      self.warn(now);
      transitions.push(IdleTransition::Warned {
        seconds_remaining: self.seconds_remaining,
      });
    }

    if self.phase == SessionPhase::Warning {
      while let Some(tick) = self.next_countdown.filter(|t| *t <= now) {
        self.seconds_remaining = self.seconds_remaining.saturating_sub(1);
        self.next_countdown = (self.seconds_remaining > 0).then(|| tick + COUNTDOWN_STEP);
        transitions.push(IdleTransition::Countdown {
          seconds_remaining: self.seconds_remaining,
        });
      }

      if self.warning_deadline.is_some_and(|d| d <= now) {
        self.terminate();
        transitions.push(IdleTransition::Terminated);
      }
    }

    transitions
  }

  /// Earliest instant at which [`advance`](Self::advance) has work to do.
  pub fn next_wakeup(&self) -> Option<Instant> {
    match self.phase {
      SessionPhase::Active => self.idle_deadline,
      SessionPhase::Warning => match (self.next_countdown, self.warning_deadline) {
        (Some(tick), Some(deadline)) => Some(tick.min(deadline)),
        (tick, deadline) => tick.or(deadline),
      },
      SessionPhase::Inert | SessionPhase::Terminated => None,
    }
  }

  fn arm(&mut self, now: Instant) {
    let Some(role) = self.role else {
      return;
    };
    self.clear();
    self.phase = SessionPhase::Active;
    self.idle_deadline = Some(now + self.policy.timeout_for(role));
  }

  fn warn(&mut self, now: Instant) {
    self.clear();
    self.phase = SessionPhase::Warning;
    self.warning_deadline = Some(now + self.policy.warning_window);
    self.next_countdown = Some(now + COUNTDOWN_STEP);
    self.seconds_remaining = self.policy.warning_window.as_secs() as u32;
  }

  fn terminate(&mut self) {
    self.clear();
    self.phase = SessionPhase::Terminated;
  }

  fn clear(&mut self) {
    self.idle_deadline = None;
    self.warning_deadline = None;
    self.next_countdown = None;
    self.seconds_remaining = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TIMEOUT: Duration = Duration::from_secs(600);

  fn policy() -> IdlePolicy {
    IdlePolicy {
      elevated_timeout: TIMEOUT,
      standard_timeout: Duration::from_secs(1800),
      warning_window: WARNING_WINDOW,
    }
  }

  fn active_timer(t0: Instant) -> IdleTimer {
    let mut timer = IdleTimer::new(policy());
    timer.set_role(Some(Role::Landlord), t0);
    timer
  }

  fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
  }

  #[test]
  fn test_role_selects_timeout_tier() {
    let t0 = Instant::now();
    let mut timer = IdleTimer::new(policy());

    timer.set_role(Some(Role::Tenant), t0);
    assert_eq!(timer.idle_deadline(), Some(t0 + secs(1800)));

    timer.set_role(Some(Role::Admin), t0);
    assert_eq!(timer.idle_deadline(), Some(t0 + TIMEOUT));
  }

  #[test]
  fn test_idle_deadline_enters_warning() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);

    assert!(timer.advance(t0 + TIMEOUT - secs(1)).is_empty());
    assert_eq!(timer.phase(), SessionPhase::Active);

    let transitions = timer.advance(t0 + TIMEOUT);
    assert_eq!(
      transitions,
      vec![IdleTransition::Warned {
        seconds_remaining: 60
      }]
    );
    assert_eq!(timer.phase(), SessionPhase::Warning);
    assert_eq!(timer.next_wakeup(), Some(t0 + TIMEOUT + secs(1)));
  }

  #[test]
  fn test_activity_slides_the_window() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);

    assert!(timer.record_activity(t0 + secs(500)));
    assert!(timer.advance(t0 + TIMEOUT).is_empty());
    assert_eq!(timer.next_wakeup(), Some(t0 + secs(500) + TIMEOUT));
  }

  #[test]
  fn test_activity_during_warning_is_ignored() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    timer.advance(t0 + TIMEOUT);

    assert!(!timer.record_activity(t0 + TIMEOUT + secs(5)));
    assert_eq!(timer.phase(), SessionPhase::Warning);
  }

  #[test]
  fn test_countdown_decrements_each_second() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    timer.advance(t0 + TIMEOUT);

    let transitions = timer.advance(t0 + TIMEOUT + secs(3));

    assert_eq!(
      transitions,
      vec![
        IdleTransition::Countdown {
          seconds_remaining: 59
        },
        IdleTransition::Countdown {
          seconds_remaining: 58
        },
        IdleTransition::Countdown {
          seconds_remaining: 57
        },
      ]
    );
    assert_eq!(timer.seconds_remaining(), 57);
  }

  #[test]
  fn test_warning_deadline_terminates_once() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    let warned_at = t0 + TIMEOUT;
    timer.advance(warned_at);

    let transitions = timer.advance(warned_at + WARNING_WINDOW);
    assert_eq!(transitions.last(), Some(&IdleTransition::Terminated));
    assert_eq!(
      transitions
        .iter()
        .filter(|t| **t == IdleTransition::Terminated)
        .count(),
      1
    );
    assert_eq!(timer.phase(), SessionPhase::Terminated);
    assert_eq!(timer.next_wakeup(), None);

    assert!(timer.advance(warned_at + WARNING_WINDOW + secs(60)).is_empty());
  }

  #[test]
  fn test_stay_logged_in_starts_fresh_window() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    timer.advance(t0 + TIMEOUT);

    let resumed_at = t0 + TIMEOUT + secs(30);
    assert!(timer.stay_logged_in(resumed_at));

    assert_eq!(timer.phase(), SessionPhase::Active);
    assert_eq!(timer.seconds_remaining(), 0);
    assert_eq!(timer.next_wakeup(), Some(resumed_at + TIMEOUT));
    assert!(timer.advance(resumed_at + TIMEOUT - secs(1)).is_empty());
    // Activity counts again
    assert!(timer.record_activity(resumed_at + secs(1)));
  }

  #[test]
  fn test_stay_logged_in_outside_warning_is_noop() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    assert!(!timer.stay_logged_in(t0 + secs(1)));
    assert_eq!(timer.idle_deadline(), Some(t0 + TIMEOUT));
  }

  #[test]
  fn test_log_out_now_terminates() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    timer.advance(t0 + TIMEOUT);

    assert!(timer.log_out_now());
    assert!(!timer.log_out_now());
    assert_eq!(timer.phase(), SessionPhase::Terminated);
  }

  #[test]
  fn test_unknown_role_makes_machine_inert() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);

    assert!(timer.set_role(None, t0 + secs(1)));
    assert_eq!(timer.phase(), SessionPhase::Inert);
    assert_eq!(timer.next_wakeup(), None);
    assert!(timer.advance(t0 + secs(100_000)).is_empty());
    assert!(!timer.record_activity(t0 + secs(2)));

    // Known again: armed from that moment
    let back = t0 + secs(100_000);
    assert!(timer.set_role(Some(Role::Landlord), back));
    assert_eq!(timer.next_wakeup(), Some(back + TIMEOUT));
  }

  #[test]
  fn test_same_role_does_not_rearm() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    assert!(!timer.set_role(Some(Role::Landlord), t0 + secs(100)));
    assert_eq!(timer.idle_deadline(), Some(t0 + TIMEOUT));
  }

  #[test]
  fn test_role_after_termination_starts_new_session() {
    let t0 = Instant::now();
    let mut timer = active_timer(t0);
    timer.log_out_now();

    assert!(timer.set_role(Some(Role::Landlord), t0 + secs(5)));
    assert_eq!(timer.phase(), SessionPhase::Active);
  }
}
