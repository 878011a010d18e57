use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::api::{ApiError, ControlResponse};
use crate::sync::PollState;

/// Console events
#[derive(Debug)]
pub enum Event {
  /// A line typed on stdin
  Input(String),
  /// Stdin reached end of file
  InputClosed,
  /// The scheduler finished a poll or changed state
  Poll(PollState),
  /// A control call finished
  Control {
    action: &'static str,
    result: Result<ControlResponse, ApiError>,
  },
}

/// Event handler merging stdin lines, poll state changes and task results
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(mut poll_state: watch::Receiver<PollState>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Stdin reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if input_tx.send(Event::Input(line)).is_err() {
              break;
            }
          }
          Ok(None) | Err(_) => {
            let _ = input_tx.send(Event::InputClosed);
            break;
          }
        }
      }
    });

    // Poll state forwarder
    let poll_tx = tx.clone();
    tokio::spawn(async move {
      while poll_state.changed().await.is_ok() {
        let state = poll_state.borrow_and_update().clone();
        if poll_tx.send(Event::Poll(state)).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for async tasks reporting back to the console
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
