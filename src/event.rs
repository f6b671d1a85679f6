use crossterm::event::{
  self, Event as CrosstermEvent, KeyEvent, KeyEventKind, MouseEvent, MouseEventKind,
};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::session::Activity;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal window regained focus
  FocusGained,
  /// Periodic tick for redraw and query polling
  Tick,
}

/// Event handler that produces events from terminal input and a tick timer.
///
/// Every input that counts as user activity is also forwarded to the idle
/// monitor.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration, activity: mpsc::UnboundedSender<Activity>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // crossterm's poll blocks the thread
    tokio::task::spawn_blocking(move || loop {
      if !event::poll(tick_rate).unwrap_or(false) {
        if tx.send(Event::Tick).is_err() {
          break;
        }
        continue;
      }

      let Ok(evt) = event::read() else {
        continue;
      };

      if let Some(input) = activity_of(&evt) {
        // The monitor may already be gone after logout
        let _ = activity.send(input);
      }

      let forwarded = match evt {
        CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Event::Key(key)),
        CrosstermEvent::FocusGained => Some(Event::FocusGained),
        _ => None,
      };

      if let Some(forwarded) = forwarded {
        if tx.send(forwarded).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Classify a terminal event as user activity.
pub fn activity_of(evt: &CrosstermEvent) -> Option<Activity> {
  match evt {
    CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Activity::KeyDown),
    CrosstermEvent::Paste(_) => Some(Activity::KeyDown),
    CrosstermEvent::Mouse(MouseEvent { kind, .. }) => match kind {
      MouseEventKind::Down(_) => Some(Activity::PointerDown),
      MouseEventKind::Up(_) => Some(Activity::Click),
      MouseEventKind::Moved | MouseEventKind::Drag(_) => Some(Activity::PointerMove),
      MouseEventKind::ScrollDown
      | MouseEventKind::ScrollUp
      | MouseEventKind::ScrollLeft
      | MouseEventKind::ScrollRight => Some(Activity::Scroll),
    },
    _ => None,
  }
}
