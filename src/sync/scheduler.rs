//! Adaptive status polling.
//!
//! The scheduler is one task owning one [`OneShot`] timer. Each attempt
//! computes the delay to the next from its own outcome, so polls never overlap
//! and the cadence always follows the freshest known state.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connectivity::Connectivity;
use super::timer::OneShot;
use crate::api::{ApiError, BotStatus, StatusSource};

/// Delays between status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
  /// After a poll reporting the bot as running
  pub running: Duration,
  /// After a poll reporting the bot as stopped
  pub stopped: Duration,
  /// After a failed poll
  pub retry: Duration,
}

impl Default for Intervals {
  fn default() -> Self {
    Self {
      running: Duration::from_secs(10),
      stopped: Duration::from_secs(30),
      retry: Duration::from_secs(3),
    }
  }
}

impl Intervals {
  /// Active monitoring polls faster than idle, and a retry is faster than both.
  pub fn validate(&self) -> Result<()> {
    if self.retry.is_zero() {
      return Err(eyre!("retry interval must be greater than zero"));
    }
    if self.retry >= self.running {
      return Err(eyre!(
        "retry interval ({:?}) must be shorter than the running interval ({:?})",
        self.retry,
        self.running
      ));
    }
    if self.running >= self.stopped {
      return Err(eyre!(
        "running interval ({:?}) must be shorter than the stopped interval ({:?})",
        self.running,
        self.stopped
      ));
    }
    Ok(())
  }

  pub fn next_delay(&self, outcome: &Result<BotStatus, ApiError>) -> Duration {
    match outcome {
      Ok(status) if status.is_running => self.running,
      Ok(_) => self.stopped,
      Err(_) => self.retry,
    }
  }
}

/// What the scheduler knows after its latest attempt.
#[derive(Debug, Clone, Default)]
pub struct PollState {
  pub polling: bool,
  /// Delay chosen after the latest attempt
  pub last_interval: Option<Duration>,
  pub last_error: Option<ApiError>,
  /// Last successfully fetched status; failures leave it alone
  pub last_known: Option<BotStatus>,
  pub last_success_at: Option<DateTime<Utc>>,
  pub attempts: u64,
}

impl PollState {
  /// The last attempt failed, so `last_known` may be stale.
  pub fn is_degraded(&self) -> bool {
    self.last_error.is_some()
  }
}

#[derive(Debug)]
enum Command {
  Start,
  Stop,
  PollNow,
}

/// Handle to the polling task.
pub struct SyncScheduler {
  commands: mpsc::UnboundedSender<Command>,
  state: watch::Receiver<PollState>,
  shutdown: CancellationToken,
  task: JoinHandle<()>,
}

impl SyncScheduler {
  /// Spawn the polling task in the idle state.
  ///
  /// With a connectivity receiver, every transition back to online triggers an
  /// immediate poll while polling.
  pub fn spawn(
    source: Arc<dyn StatusSource>,
    intervals: Intervals,
    connectivity: Option<watch::Receiver<Connectivity>>,
  ) -> Self {
    let (commands, rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(PollState::default());
    let shutdown = CancellationToken::new();

    let driver = Driver {
      source,
      intervals,
      state: state_tx,
      timer: OneShot::new(),
      connectivity,
    };
    let task = tokio::spawn(driver.run(rx, shutdown.clone()));

    Self {
      commands,
      state,
      shutdown,
      task,
    }
  }

  /// Enter polling with a fresh immediate attempt.
  pub fn start(&self) {
    self.send(Command::Start);
  }

  /// Leave polling. The pending attempt is cancelled and state is reset.
  pub fn stop(&self) {
    self.send(Command::Stop);
  }

  /// Poll right away instead of waiting for the pending delay.
  pub fn poll_now(&self) {
    self.send(Command::PollNow);
  }

  pub fn state(&self) -> PollState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<PollState> {
    self.state.clone()
  }

  /// Stop the task and wait for it to exit.
  pub async fn shutdown(self) {
    self.shutdown.cancel();
    if let Err(e) = self.task.await {
      warn!(error = %e, "sync scheduler task failed");
    }
  }

  fn send(&self, command: Command) {
    if self.commands.send(command).is_err() {
      warn!("sync scheduler is no longer running");
    }
  }
}

struct Driver {
  source: Arc<dyn StatusSource>,
  intervals: Intervals,
  state: watch::Sender<PollState>,
  timer: OneShot,
  connectivity: Option<watch::Receiver<Connectivity>>,
}

impl Driver {
  async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
    loop {
      tokio::select! {
        biased;

        _ = shutdown.cancelled() => break,

        command = commands.recv() => match command {
          Some(command) => self.apply(command),
          None => break,
        },

        state = connectivity_change(&mut self.connectivity) => {
          if state == Connectivity::Online && self.is_polling() {
            info!("back online, resyncing status");
            self.timer.arm(Duration::ZERO);
          }
        }

        _ = self.timer.fired() => {
          tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = self.poll() => {}
          }
        }
      }
    }
    debug!("sync scheduler stopped");
  }

  fn is_polling(&self) -> bool {
    self.state.borrow().polling
  }

  fn apply(&mut self, command: Command) {
    match command {
      Command::Start => {
        info!("status polling started");
        self.state.send_modify(|state| state.polling = true);
        self.timer.arm(Duration::ZERO);
      }
      Command::Stop => {
        info!("status polling stopped");
        if self.timer.is_armed() {
          debug!("pending poll cancelled");
        }
        self.timer.cancel();
        self.state.send_replace(PollState::default());
      }
      Command::PollNow => {
        if self.is_polling() {
          self.timer.arm(Duration::ZERO);
        }
      }
    }
  }

  async fn poll(&mut self) {
    let outcome = self.source.fetch_status().await;
    let delay = self.intervals.next_delay(&outcome);

    match &outcome {
      Ok(status) => debug!(running = status.is_running, ?delay, "status poll succeeded"),
      Err(e) => warn!(error = %e, ?delay, "status poll failed"),
    }

    self.state.send_modify(|state| {
      state.attempts += 1;
      state.last_interval = Some(delay);
      match outcome {
        Ok(status) => {
          state.last_known = Some(status);
          state.last_error = None;
          state.last_success_at = Some(Utc::now());
        }
        Err(e) => state.last_error = Some(e),
      }
    });
    self.timer.arm(delay);
  }
}

/// Next connectivity transition. Pends forever without a receiver, or once
/// the observer is gone.
async fn connectivity_change(slot: &mut Option<watch::Receiver<Connectivity>>) -> Connectivity {
  if let Some(rx) = slot {
    if rx.changed().await.is_ok() {
      return *rx.borrow_and_update();
    }
    *slot = None;
  }
  future::pending().await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::ConnectivityObserver;
  use crate::testing::ScriptedStatus;
  use tokio::time::sleep;

  fn intervals() -> Intervals {
    Intervals {
      running: Duration::from_secs(10),
      stopped: Duration::from_secs(30),
      retry: Duration::from_secs(3),
    }
  }

  fn gaps(calls: &[tokio::time::Instant]) -> Vec<Duration> {
    calls.windows(2).map(|w| w[1] - w[0]).collect()
  }

  #[test]
  fn test_next_delay_follows_outcome() {
    let intervals = intervals();

    assert_eq!(
      intervals.next_delay(&ScriptedStatus::running(true)),
      intervals.running
    );
    assert_eq!(
      intervals.next_delay(&ScriptedStatus::running(false)),
      intervals.stopped
    );
    assert_eq!(
      intervals.next_delay(&ScriptedStatus::network_error()),
      intervals.retry
    );
    assert!(intervals.retry < intervals.running && intervals.retry < intervals.stopped);
  }

  #[test]
  fn test_validate_rejects_misordered_intervals() {
    assert!(Intervals::default().validate().is_ok());

    let slow_retry = Intervals {
      retry: Duration::from_secs(10),
      ..intervals()
    };
    assert!(slow_retry.validate().is_err());

    let fast_idle = Intervals {
      stopped: Duration::from_secs(5),
      ..intervals()
    };
    assert!(fast_idle.validate().is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_delay_sequence_running_error_stopped() {
    let source = Arc::new(ScriptedStatus::new(vec![
      ScriptedStatus::running(true),
      ScriptedStatus::network_error(),
      ScriptedStatus::running(false),
    ]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(50)).await;

    assert_eq!(
      gaps(&source.calls()),
      vec![
        Duration::from_secs(10),
        Duration::from_secs(3),
        Duration::from_secs(30)
      ]
    );
    assert_eq!(scheduler.state().last_interval, Some(Duration::from_secs(30)));
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_keeps_last_known_status() {
    let source = Arc::new(ScriptedStatus::new(vec![
      ScriptedStatus::running(true),
      ScriptedStatus::network_error(),
    ]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(11)).await;

    let state = scheduler.state();
    assert_eq!(state.attempts, 2);
    assert!(state.is_degraded());
    assert!(state.last_known.as_ref().is_some_and(|s| s.is_running));
    assert_eq!(state.last_interval, Some(Duration::from_secs(3)));
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_cancels_pending_poll() {
    let source = Arc::new(ScriptedStatus::new(vec![ScriptedStatus::running(true)]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls().len(), 1);

    scheduler.stop();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(source.calls().len(), 1);
    let state = scheduler.state();
    assert!(!state.polling);
    assert!(state.last_known.is_none());
    scheduler.shutdown().await;
  }

  /// Source whose fetch takes a while, so a command can arrive mid-flight.
  struct SlowStatus {
    latency: Duration,
    calls: std::sync::Mutex<usize>,
  }

  #[async_trait::async_trait]
  impl StatusSource for SlowStatus {
    async fn fetch_status(&self) -> Result<BotStatus, ApiError> {
      *self.calls.lock().unwrap() += 1;
      sleep(self.latency).await;
      ScriptedStatus::running(false)
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_during_poll_cancels_rearm() {
    let source = Arc::new(SlowStatus {
      latency: Duration::from_secs(5),
      calls: std::sync::Mutex::new(0),
    });
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(*source.calls.lock().unwrap(), 1);

    scheduler.stop();
    sleep(intervals().stopped * 3).await;

    assert_eq!(*source.calls.lock().unwrap(), 1);
    assert!(!scheduler.state().polling);
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_restart_polls_immediately() {
    let source = Arc::new(ScriptedStatus::new(vec![ScriptedStatus::running(false)]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(1)).await;
    scheduler.stop();
    sleep(Duration::from_secs(1)).await;
    scheduler.start();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(gaps(&source.calls()), vec![Duration::from_secs(2)]);
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_triggers_immediate_poll() {
    let observer = ConnectivityObserver::new(Connectivity::Online);
    let source = Arc::new(ScriptedStatus::new(vec![ScriptedStatus::running(true)]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), Some(observer.subscribe()));

    scheduler.start();
    sleep(Duration::from_secs(2)).await;
    observer.set(Connectivity::Offline);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(source.calls().len(), 1);

    observer.set(Connectivity::Online);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(gaps(&source.calls()), vec![Duration::from_secs(4)]);
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_while_idle_does_nothing() {
    let observer = ConnectivityObserver::new(Connectivity::Offline);
    let source = Arc::new(ScriptedStatus::new(vec![]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), Some(observer.subscribe()));

    observer.set(Connectivity::Online);
    sleep(Duration::from_secs(60)).await;

    assert!(source.calls().is_empty());
    scheduler.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_poll_now_bypasses_pending_delay() {
    let source = Arc::new(ScriptedStatus::new(vec![ScriptedStatus::running(false)]));
    let scheduler = SyncScheduler::spawn(source.clone(), intervals(), None);

    scheduler.start();
    sleep(Duration::from_secs(5)).await;
    scheduler.poll_now();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(gaps(&source.calls()), vec![Duration::from_secs(5)]);
    scheduler.shutdown().await;
  }
}
