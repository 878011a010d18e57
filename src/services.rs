//! Wiring of the long-lived pieces built from configuration.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::cache::{CacheError, CacheStoreManager, InstallOutcome, SqliteStorage};
use crate::classify::Classifier;
use crate::config::Config;
use crate::interceptor::FetchInterceptor;
use crate::net::HttpTransport;
use crate::sync::{replay_on_reconnect, Connectivity, ConnectivityObserver, ConnectivityProbe};

pub struct Services {
  config: Config,
  transport: Arc<HttpTransport>,
  cache: Arc<CacheStoreManager<SqliteStorage>>,
  connectivity: ConnectivityObserver,
}

impl Services {
  /// Open the cache database and build the HTTP transport. Touches no network.
  pub fn open(config: Config) -> Result<Self> {
    let transport = Arc::new(HttpTransport::new(config.polling.fetch_timeout)?);
    let storage = Arc::new(SqliteStorage::open_default()?);
    let cache = Arc::new(CacheStoreManager::new(
      storage,
      config.cache.prefix.clone(),
      config.cache.version(),
    ));

    Ok(Self {
      config,
      transport,
      cache,
      connectivity: ConnectivityObserver::new(Connectivity::Online),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &CacheStoreManager<SqliteStorage> {
    &self.cache
  }

  pub fn connectivity(&self) -> &ConnectivityObserver {
    &self.connectivity
  }

  /// Prime this version's static cache and activate it.
  ///
  /// Activation happens right away when nothing is live yet or when
  /// `skip_waiting` is set; otherwise the new version waits for an explicit
  /// `cache activate`.
  pub async fn prime(&self) -> Result<InstallOutcome, CacheError> {
    let outcome = self
      .cache
      .install(
        self.transport.as_ref(),
        &self.config.api.url,
        &self.config.cache.static_files,
      )
      .await?;

    let active = self.cache.active_version()?;
    let is_current = active.as_deref() == Some(self.cache.version());
    if active.is_none() || (self.config.cache.skip_waiting && !is_current) {
      let deleted = self.cache.activate()?;
      info!(deleted = deleted.len(), "cache version activated");
    } else if !is_current {
      info!(version = %self.cache.version(), "installed version is waiting for activation");
    }

    Ok(outcome)
  }

  /// Bring the cache up and build an interceptor over the live version.
  ///
  /// A failed priming leaves the previously live version serving. With no
  /// live version at all the client cannot become ready.
  ///
  /// `replays` says whether a replayer will run for this process. Without one,
  /// deferral is turned off so a failed request is reported as undelivered
  /// rather than queued and lost at exit.
  pub async fn interceptor(&self, replays: bool) -> Result<Arc<FetchInterceptor>> {
    if let Err(e) = self.prime().await {
      warn!(error = %e, "new cache version not ready");
    }

    let partitions = self.cache.serving_partitions()?.ok_or_else(|| {
      eyre!("No cache version is ready. Run `botwatch cache prime` while online.")
    })?;

    let origin = &self.config.api.url;
    let classifier = Classifier::new(
      origin,
      &self.config.cache.network_first,
      &self.config.cache.static_files,
    );

    let interceptor = FetchInterceptor::new(
      self.transport.clone(),
      self.cache.clone(),
      partitions,
      origin,
      classifier,
      self.connectivity.clone(),
    )
    .with_deferred_limit(if replays {
      self.config.cache.deferred_limit
    } else {
      0
    });

    Ok(Arc::new(interceptor))
  }

  pub fn api(&self, interceptor: Arc<FetchInterceptor>) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(
      interceptor,
      self.config.api.url.clone(),
      self.config.token_source(),
    ))
  }

  /// Start the connectivity probe and the deferred-request replayer.
  pub fn spawn_background(
    &self,
    api: Arc<ApiClient>,
    shutdown: &CancellationToken,
  ) -> Vec<JoinHandle<()>> {
    let probe = ConnectivityProbe::new(
      self.transport.clone(),
      self.config.probe_url(),
      self.config.connectivity.probe_interval,
      self.connectivity.clone(),
    );

    vec![
      tokio::spawn(probe.run(shutdown.clone())),
      tokio::spawn(replay_on_reconnect(
        api,
        self.connectivity.subscribe(),
        shutdown.clone(),
      )),
    ]
  }
}
