//! Signed-in session: who the user is and when an idle session ends.

mod idle;
mod monitor;
mod role;

pub use idle::{IdlePolicy, IdleTimer, IdleTransition, SessionPhase, WARNING_WINDOW};
pub use monitor::{IdleMonitor, SessionSnapshot};
pub use role::Role;

/// User input that proves the session is attended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
  PointerDown,
  PointerMove,
  KeyDown,
  Scroll,
  TouchStart,
  Click,
}
