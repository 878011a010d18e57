use std::future::Future;

use chrono::Local;
use color_eyre::Result;
use tokio::sync::mpsc;

use crate::api::{ApiClient, ApiError, ControlResponse};
use crate::commands::{self, Action};
use crate::event::{Event, EventHandler};
use crate::session::Session;
use crate::sync::PollState;

/// Interactive watch console.
///
/// Prints a line whenever the scheduler finishes a poll and reads control
/// commands from stdin.
pub struct App {
  /// Signed-in session, consumed on exit
  session: Session,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Last poll attempt already printed
  rendered_attempts: u64,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(session: Session) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    Self {
      session,
      event_tx: tx,
      rendered_attempts: 0,
      should_quit: false,
    }
  }

  pub async fn run(mut self) -> Result<()> {
    let mut events = EventHandler::new(self.session.scheduler().subscribe());
    self.event_tx = events.sender();

    println!("Watching bot status. Type `help` for commands.");

    while !self.should_quit {
      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }

    self.session.sign_out().await;
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Input(line) => {
        if !line.trim().is_empty() {
          self.execute(&line);
        }
      }
      Event::InputClosed => self.should_quit = true,
      Event::Poll(state) => {
        // Only print once per finished attempt
        if state.attempts != self.rendered_attempts {
          self.rendered_attempts = state.attempts;
          let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), describe_poll(&state));
          if state.is_degraded() {
            eprintln!("{}", line);
          } else {
            println!("{}", line);
          }
        }
      }
      Event::Control { action, result } => {
        if result.is_ok() {
          self.session.scheduler().poll_now();
        }
        println!("{}", describe_control(action, &result));
      }
    }
  }

  fn execute(&mut self, line: &str) {
    let action = match commands::parse(line) {
      Ok(action) => action,
      Err(message) => {
        eprintln!("{}", message);
        return;
      }
    };

    match action {
      Action::Status => {
        println!("{}", describe_poll(&self.session.scheduler().state()));
      }
      Action::Start => {
        self.spawn_control("start", |api| async move { api.start_monitoring().await });
      }
      Action::Stop => {
        self.spawn_control("stop", |api| async move { api.stop_all().await });
      }
      Action::AddCoin {
        symbol,
        order_size_usdt,
      } => {
        self.spawn_control("add-coin", move |api| async move {
          api.add_coin(&symbol, order_size_usdt).await
        });
      }
      Action::RemoveCoin { symbol } => {
        self.spawn_control("remove-coin", move |api| async move {
          api.remove_coin(&symbol).await
        });
      }
      Action::Refresh => self.session.scheduler().poll_now(),
      Action::Help => println!("{}", commands::help_text()),
      Action::Quit => self.should_quit = true,
    }
  }

  fn spawn_control<F, Fut>(&self, action: &'static str, call: F)
  where
    F: FnOnce(ApiClient) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ControlResponse, ApiError>> + Send + 'static,
  {
    let api = self.session.api().clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let result = call(api).await;
      let _ = tx.send(Event::Control { action, result });
    });
  }
}

/// One line describing the scheduler's view of the bot.
pub fn describe_poll(state: &PollState) -> String {
  if !state.polling {
    return "not polling".to_string();
  }

  let mut line = match &state.last_known {
    Some(status) => status.summary(),
    None => "waiting for first status".to_string(),
  };

  if let Some(error) = &state.last_error {
    if error.is_auth() {
      line.push_str(&format!(" | sign-in needed: {}", error));
    } else {
      line.push_str(&format!(" | stale: {}", error));
    }
    if let Some(at) = state.last_success_at {
      line.push_str(&format!(
        " (since {})",
        at.with_timezone(&Local).format("%H:%M:%S")
      ));
    }
  }
  if let Some(interval) = state.last_interval {
    line.push_str(&format!(" | next poll in {}s", interval.as_secs_f64()));
  }
  line
}

pub fn describe_control(action: &str, result: &Result<ControlResponse, ApiError>) -> String {
  match result {
    Ok(response) => match &response.message {
      Some(message) => format!("{}: {}", action, message),
      None => format!("{}: ok ({})", action, response.status.summary()),
    },
    Err(e) if e.is_auth() => format!("{} failed, sign in again: {}", action, e),
    Err(e) => format!("{} failed: {}", action, e),
  }
}
