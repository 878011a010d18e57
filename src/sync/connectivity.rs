//! Process-wide online/offline state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::api::ApiClient;
use crate::net::{Request, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Holder of the connectivity flag. Cheap to clone; all clones share state.
///
/// Consumers subscribe to a watch channel. Only real transitions notify, so a
/// subscriber woken while the state reads `Online` has just seen a reconnect.
#[derive(Clone)]
pub struct ConnectivityObserver {
  tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityObserver {
  pub fn new(initial: Connectivity) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx: Arc::new(tx) }
  }

  pub fn current(&self) -> Connectivity {
    *self.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current() == Connectivity::Online
  }

  /// Record the current state. Returns whether this was a transition.
  pub fn set(&self, state: Connectivity) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        *current = state;
        true
      }
    });
    if changed {
      info!(?state, "connectivity changed");
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
    self.tx.subscribe()
  }
}

/// Derives connectivity by periodically reaching for a URL.
///
/// Any HTTP response counts as online; a transport failure counts as offline.
/// The probe bypasses the cache so a cached copy can never mask an outage.
pub struct ConnectivityProbe {
  transport: Arc<dyn Transport>,
  url: Url,
  interval: Duration,
  observer: ConnectivityObserver,
}

impl ConnectivityProbe {
  pub fn new(
    transport: Arc<dyn Transport>,
    url: Url,
    interval: Duration,
    observer: ConnectivityObserver,
  ) -> Self {
    Self {
      transport,
      url,
      interval,
      observer,
    }
  }

  /// Probe once and record the outcome.
  pub async fn check(&self) -> Connectivity {
    let state = match self.transport.send(&Request::get(self.url.clone())).await {
      Ok(_) => Connectivity::Online,
      Err(e) => {
        debug!(url = %self.url, error = %e, "connectivity probe failed");
        Connectivity::Offline
      }
    };
    self.observer.set(state);
    state
  }

  pub async fn run(self, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;

        _ = shutdown.cancelled() => break,

        _ = ticker.tick() => {
          self.check().await;
        }
      }
    }
  }
}

/// Replay requests deferred while offline every time the network comes back.
pub async fn replay_on_reconnect(
  api: Arc<ApiClient>,
  mut connectivity: watch::Receiver<Connectivity>,
  shutdown: CancellationToken,
) {
  loop {
    tokio::select! {
      biased;

      _ = shutdown.cancelled() => break,

      changed = connectivity.changed() => {
        if changed.is_err() {
          break;
        }
        if *connectivity.borrow_and_update() == Connectivity::Online {
          api.replay_deferred().await;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Response;
  use crate::testing::FakeTransport;

  #[test]
  fn test_set_reports_transitions_only() {
    let observer = ConnectivityObserver::new(Connectivity::Online);

    assert!(!observer.set(Connectivity::Online));
    assert!(observer.set(Connectivity::Offline));
    assert!(!observer.set(Connectivity::Offline));
    assert!(!observer.is_online());
    assert!(observer.set(Connectivity::Online));
    assert!(observer.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let observer = ConnectivityObserver::new(Connectivity::Online);
    let mut rx = observer.subscribe();

    observer.set(Connectivity::Offline);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);

    // Repeating the same state does not wake subscribers
    observer.set(Connectivity::Offline);
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_probe_tracks_reachability() {
    let transport = Arc::new(FakeTransport::new());
    let observer = ConnectivityObserver::new(Connectivity::Online);
    let url = Url::parse("https://bot.example.com/").unwrap();
    let probe = ConnectivityProbe::new(
      transport.clone(),
      url.clone(),
      Duration::from_secs(5),
      observer.clone(),
    );

    transport.fail(url.as_str());
    assert_eq!(probe.check().await, Connectivity::Offline);
    assert!(!observer.is_online());

    // Even an error status proves the network is up
    transport.respond(url.as_str(), Response::new(502, "bad gateway"));
    assert_eq!(probe.check().await, Connectivity::Online);
    assert!(observer.is_online());
  }
}
