use std::future;
use std::time::Duration;

use tokio::time::{self, Instant};

/// A single pending deadline. Arming replaces any previous deadline, so at most
/// one attempt is ever scheduled.
#[derive(Debug, Default)]
pub struct OneShot {
  deadline: Option<Instant>,
}

impl OneShot {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn arm(&mut self, delay: Duration) {
    self.deadline = Some(Instant::now() + delay);
  }

  pub fn cancel(&mut self) {
    self.deadline = None;
  }

  pub fn is_armed(&self) -> bool {
    self.deadline.is_some()
  }

  /// Resolves once the deadline passes, disarming the timer. Never resolves
  /// while disarmed. Safe to drop and re-create inside `select!`.
  pub async fn fired(&mut self) {
    match self.deadline {
      Some(deadline) => {
        time::sleep_until(deadline).await;
        self.deadline = None;
      }
      None => future::pending::<()>().await,
    }
  }
}
