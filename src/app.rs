use color_eyre::Result;
use crossterm::event::{
  DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, KeyCode,
  KeyEvent, KeyModifiers,
};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use std::io::{stdout, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::backend::{BackendClient, CachedBackend, Table, Unit};
use crate::cache::QueryCache;
use crate::commands::{self, Command, Invocation};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::event::{Event, EventHandler};
use crate::notify::{ChannelNotifier, Notification, NotificationKind};
use crate::session::{IdleMonitor, Role, SessionPhase, SessionSnapshot};
use crate::view::{View, ViewContext};

const TICK_RATE: Duration = Duration::from_millis(250);

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  cache: QueryCache,

  ctx: ViewContext,

  /// Role source for the idle monitor and command gating
  role: watch::Sender<Option<Role>>,

  /// The list on screen
  view: Option<View>,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  notifications: Option<mpsc::UnboundedReceiver<Notification>>,

  /// Last notification or command feedback
  notice: Option<Notification>,

  /// Printed after the terminal is restored
  exit_message: Option<String>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = BackendClient::new(&config)?;
    Ok(Self::with_client(config, client))
  }

  fn with_client(config: Config, client: BackendClient) -> Self {
    let cache = QueryCache::new(config.cache.to_cache_config());
    let (notifier, notifications) = ChannelNotifier::new();
    let ctx = ViewContext {
      backend: CachedBackend::new(client, cache.clone()),
      page_size: config.pagination.page_size,
      query_options: config.cache.to_query_options(),
      notifier: Arc::new(notifier),
    };
    let (role, _) = watch::channel(config.role);

    Self {
      config,
      cache,
      ctx,
      role,
      view: None,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      notifications: Some(notifications),
      notice: None,
      exit_message: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    stdout().execute(EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Cleanup terminal
    terminal.show_cursor()?;
    stdout().execute(DisableMouseCapture)?;
    stdout().execute(DisableFocusChange)?;
    stdout().execute(LeaveAlternateScreen)?;
    disable_raw_mode()?;

    if let Some(message) = &self.exit_message {
      println!("{}", message);
    }
    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    let (activity_tx, activity_rx) = mpsc::unbounded_channel();
    let mut events = EventHandler::new(TICK_RATE, activity_tx);

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let session = IdleMonitor::spawn(
      self.config.session.to_idle_policy(),
      activity_rx,
      self.role.subscribe(),
      move || {
        let _ = ended_tx.send(());
      },
    );

    let client = self.ctx.backend.client().clone();
    let connectivity = ConnectivityMonitor::spawn(
      self.cache.clone(),
      self.config.connectivity.probe_interval(),
      move || {
        let client = client.clone();
        async move { client.ping().await }
      },
    );

    let Some(mut notifications) = self.notifications.take() else {
      return Ok(());
    };

    self.prefetch();
    self.open_home();

    while !self.should_quit {
      let snapshot = session.snapshot();
      let online = connectivity.is_online();
      terminal.draw(|frame| self.draw(frame, snapshot, online))?;

      tokio::select! {
        event = events.next() => match event {
          Some(event) => self.handle_event(event, &session),
          None => break,
        },
        Some(()) = ended_rx.recv() => self.end_session(),
        Some(notification) = notifications.recv() => self.notice = Some(notification),
      }
    }

    session.stop();
    Ok(())
  }

  fn current_role(&self) -> Option<Role> {
    *self.role.borrow()
  }

  /// Warm the cache with lists that staff open often.
  fn prefetch(&self) {
    if !self.current_role().is_some_and(Role::is_elevated) {
      return;
    }
    let backend = self.ctx.backend.clone();
    tokio::spawn(async move {
      if let Err(e) = backend.all::<Unit>(Table::Units).await {
        warn!(error = %format!("{:#}", e), "unit prefetch failed");
      }
    });
  }

  fn open_home(&mut self) {
    let home = match self.current_role() {
      Some(role) if role.is_elevated() => View::properties(&self.ctx),
      _ => View::leases(&self.ctx),
    };
    self.view = Some(home);
  }

  /// Clear everything the session could see and leave.
  fn end_session(&mut self) {
    info!("session ended, clearing cached data");
    self.view = None;
    self.cache.clear();
    self.role.send_replace(None);
    self.exit_message = Some("Your session ended. Sign in again to continue.".to_string());
    self.should_quit = true;
  }

  fn handle_event(&mut self, event: Event, session: &IdleMonitor) {
    match event {
      Event::Key(key) => self.handle_key(key, session),
      Event::FocusGained => self.cache.notify_focus(),
      Event::Tick => {
        if let Some(view) = &mut self.view {
          view.poll();
        }
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent, session: &IdleMonitor) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key, session),
    }
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('r') => self.refresh(),
      KeyCode::Char('n') => self.load_more(),
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
      }
      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent, session: &IdleMonitor) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command(session);
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        // Navigate autocomplete suggestions
        let suggestions = self.autocomplete_suggestions();
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        // Navigate autocomplete suggestions backwards
        let suggestions = self.autocomplete_suggestions();
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0; // Reset selection on input change
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0; // Reset selection on input change
      }
      _ => {}
    }
  }

  fn execute_command(&mut self, session: &IdleMonitor) {
    let input = std::mem::take(&mut self.command_input);
    let role = self.current_role();

    // A bare word runs the highlighted suggestion; anything with an argument is taken as typed
    let line = if input.trim().contains(char::is_whitespace) {
      input
    } else {
      let suggestions = commands::get_suggestions(&input, role);
      match suggestions.get(self.selected_suggestion) {
        Some(cmd) => cmd.name.to_string(),
        None => input,
      }
    };

    match commands::parse(&line, role) {
      Ok(invocation) => self.run_command(invocation, session),
      Err(e) => self.say_error(e.to_string()),
    }
  }

  fn run_command(&mut self, invocation: Invocation<'_>, session: &IdleMonitor) {
    let argument = invocation.argument;
    match invocation.command.name {
      "properties" => self.view = Some(View::properties(&self.ctx)),
      "units" => {
        self.view = Some(match argument {
          Some(property_id) => View::property_units(&self.ctx, property_id),
          None => View::units(&self.ctx),
        })
      }
      "leases" => self.view = Some(View::leases(&self.ctx)),
      "payments" => {
        let filtered = self
          .view
          .as_mut()
          .is_some_and(|view| view.filter_payments(argument));
        if !filtered {
          self.view = Some(View::payments(&self.ctx, argument));
        }
      }
      "maintenance" => self.view = Some(View::maintenance(&self.ctx)),
      "more" => self.load_more(),
      "refresh" => self.refresh(),
      "resolve" | "delete" => {
        let Some(id) = argument else {
          return;
        };
        let Some(board) = self.view.as_ref().and_then(View::maintenance_board) else {
          self.say_error("open :maintenance first".to_string());
          return;
        };
        if !board.contains(id) {
          self.say_error(format!("no maintenance request {}", id));
          return;
        }
        if invocation.command.name == "resolve" {
          tokio::spawn(board.resolve(&self.ctx, id));
        } else {
          tokio::spawn(board.delete(&self.ctx, id));
        }
      }
      "report" => {
        let Some((unit_id, title)) = argument.and_then(|a| a.split_once(char::is_whitespace)) else {
          self.say_error("usage: report <unit-id> <title>".to_string());
          return;
        };
        if self.view.as_ref().and_then(View::maintenance_board).is_none() {
          self.view = Some(View::maintenance(&self.ctx));
        }
        if let Some(board) = self.view.as_ref().and_then(View::maintenance_board) {
          tokio::spawn(board.report(&self.ctx, unit_id, title.trim()));
        }
      }
      "stay" => session.stay_logged_in(),
      "logout" => session.log_out_now(),
      "quit" => self.should_quit = true,
      other => warn!(command = other, "command has no handler"),
    }
  }

  fn refresh(&mut self) {
    if let Some(view) = &mut self.view {
      view.refresh(&self.ctx);
    }
  }

  fn load_more(&mut self) {
    let requested = self.view.as_mut().is_some_and(View::load_more);
    if !requested {
      self.say_error("nothing more to load".to_string());
    }
  }

  fn say_error(&mut self, message: String) {
    self.notice = Some(Notification {
      kind: NotificationKind::Error,
      message,
      description: None,
    });
  }

  fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input, self.current_role())
  }

  fn draw(&self, frame: &mut Frame, snapshot: SessionSnapshot, online: bool) {
    let warning = snapshot.phase == SessionPhase::Warning;
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1),                  // Header
        Constraint::Min(1),                     // Current view
        Constraint::Length(u16::from(warning)), // Idle warning
        Constraint::Length(1),                  // Status bar
      ])
      .split(frame.area());

    self.draw_header(frame, chunks[0], online);
    self.draw_view(frame, chunks[1]);
    if warning {
      let text = format!(
        " Idle: logging out in {}s. Type :stay to continue or :logout to leave now.",
        snapshot.seconds_remaining
      );
      let paragraph = Paragraph::new(text).style(Style::default().fg(Color::Black).bg(Color::Yellow));
      frame.render_widget(paragraph, chunks[2]);
    }
    self.draw_status_bar(frame, chunks[3]);
  }

  fn draw_header(&self, frame: &mut Frame, area: Rect, online: bool) {
    let role = self
      .current_role()
      .map(Role::label)
      .unwrap_or("no role");
    let (link, link_style) = if online {
      ("online", Style::default().fg(Color::Green))
    } else {
      ("offline", Style::default().fg(Color::Red))
    };
    let cached = if self.cache.is_empty() {
      "cache empty".to_string()
    } else {
      format!("{} cached", self.cache.len())
    };

    let line = Line::from(vec![
      Span::styled(" rentdesk", Style::default().fg(Color::Cyan).bold()),
      Span::styled(" | ", Style::default().fg(Color::DarkGray)),
      Span::raw(role),
      Span::styled(" | ", Style::default().fg(Color::DarkGray)),
      Span::styled(link, link_style),
      Span::styled(" | ", Style::default().fg(Color::DarkGray)),
      Span::styled(cached, Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
  }

  fn draw_view(&self, frame: &mut Frame, area: Rect) {
    let Some(view) = &self.view else {
      let paragraph = Paragraph::new("No view open.").style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    };

    let status = view.status();
    let title = if status.is_empty() {
      format!(" {} ", view.title())
    } else {
      format!(" {} ({}) ", view.title(), status)
    };
    let block = Block::default()
      .title(title)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let rows = view.rows(&self.config.currency);
    if rows.is_empty() {
      let paragraph = Paragraph::new("Nothing to show.")
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = rows.into_iter().map(ListItem::new).collect();
    frame.render_widget(List::new(items).block(block), area);
  }

  fn draw_status_bar(&self, frame: &mut Frame, area: Rect) {
    let (line, style) = match self.mode {
      Mode::Command => {
        let mut spans = vec![Span::raw(format!(":{}   ", self.command_input))];
        for (i, cmd) in self.autocomplete_suggestions().iter().enumerate() {
          let style = if i == self.selected_suggestion {
            Style::default().fg(Color::Black).bg(Color::Yellow)
          } else {
            Style::default().fg(Color::DarkGray)
          };
          spans.push(Span::styled(cmd.name, style));
          spans.push(Span::raw(" "));
        }
        (Line::from(spans), Style::default().fg(Color::Yellow))
      }
      Mode::Normal => match &self.notice {
        Some(notice) => {
          let text = match &notice.description {
            Some(description) => format!(" {}: {}", notice.message, description),
            None => format!(" {}", notice.message),
          };
          let color = match notice.kind {
            NotificationKind::Success => Color::Green,
            NotificationKind::Error => Color::Red,
          };
          (Line::from(text), Style::default().fg(color))
        }
        None => (
          Line::from(" :command  r:refresh  n:more  q:quit"),
          Style::default().fg(Color::DarkGray),
        ),
      },
    };

    frame.render_widget(Paragraph::new(line).style(style), area);
  }
}
