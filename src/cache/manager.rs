use std::sync::Arc;

use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey};
use crate::net::{Request, Transport};

/// Meta key recording which version's partitions are live.
const ACTIVE_VERSION: &str = "active_version";

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("Cache priming failed for {url}: {reason}")]
  PrimingFailed { url: String, reason: String },

  #[error("Version {0} has not been installed")]
  NotInstalled(String),

  #[error("Cache storage error: {0}")]
  Storage(String),
}

impl From<color_eyre::Report> for CacheError {
  fn from(e: color_eyre::Report) -> Self {
    Self::Storage(e.to_string())
  }
}

/// The two partition names belonging to one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
  pub static_name: String,
  pub dynamic_name: String,
}

impl Partitions {
  pub fn for_version(prefix: &str, version: &str) -> Self {
    Self {
      static_name: format!("{}-static-{}", prefix, version),
      dynamic_name: format!("{}-dynamic-{}", prefix, version),
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

/// Messages the host can send to the cache lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMessage {
  /// Let a freshly installed version take over immediately.
  SkipWaiting,
  GetVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleReply {
  Activated { deleted: Vec<String> },
  Version(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  /// Static partition for this version was already populated.
  AlreadyInstalled,
  Installed { files: usize },
}

#[derive(Debug, Clone)]
pub struct PartitionSummary {
  pub name: String,
  pub entries: usize,
  pub current: bool,
}

/// Owns partition lifecycle: install-time priming, activation-time garbage
/// collection, and entry reads/writes.
pub struct CacheStoreManager<S: CacheStorage> {
  storage: Arc<S>,
  prefix: String,
  version: String,
}

impl<S: CacheStorage> CacheStoreManager<S> {
  pub fn new(storage: Arc<S>, prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      storage,
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Partition names for the version this build carries.
  pub fn partitions(&self) -> Partitions {
    Partitions::for_version(&self.prefix, &self.version)
  }

  /// Whether this version's static partition has been primed.
  pub fn is_installed(&self) -> Result<bool, CacheError> {
    let static_name = self.partitions().static_name;
    Ok(self.storage.partitions()?.contains(&static_name))
  }

  /// The version whose partitions are currently being served, if any.
  pub fn active_version(&self) -> Result<Option<String>, CacheError> {
    Ok(self.storage.get_meta(ACTIVE_VERSION)?)
  }

  /// Partitions to hand to the interceptor: the active version's.
  pub fn serving_partitions(&self) -> Result<Option<Partitions>, CacheError> {
    Ok(
      self
        .active_version()?
        .map(|version| Partitions::for_version(&self.prefix, &version)),
    )
  }

  /// Prime the static partition with every file in `static_files`.
  ///
  /// All files are fetched before anything is written; a single failure
  /// leaves the cache untouched and returns `PrimingFailed`.
  pub async fn install<T>(
    &self,
    transport: &T,
    origin: &Url,
    static_files: &[String],
  ) -> Result<InstallOutcome, CacheError>
  where
    T: Transport + ?Sized,
  {
    if self.is_installed()? {
      debug!(version = %self.version, "static partition already primed");
      return Ok(InstallOutcome::AlreadyInstalled);
    }

    info!(version = %self.version, files = static_files.len(), "priming static cache");

    let fetches = static_files.iter().map(|file| async move {
      let url = origin.join(file).map_err(|e| CacheError::PrimingFailed {
        url: file.clone(),
        reason: e.to_string(),
      })?;

      let response = transport
        .send(&Request::get(url.clone()))
        .await
        .map_err(|e| CacheError::PrimingFailed {
          url: url.to_string(),
          reason: e.to_string(),
        })?;

      if !response.is_success() {
        return Err(CacheError::PrimingFailed {
          url: url.to_string(),
          reason: format!("status {}", response.status),
        });
      }

      Ok::<_, CacheError>((CacheKey::for_url(&url), CacheEntry::new(&url, response)))
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        error!(version = %self.version, error = %e, "installation failed");
        return Err(e);
      }
    };

    self
      .storage
      .put_all(&self.partitions().static_name, &entries)?;

    info!(version = %self.version, files = entries.len(), "installation completed");
    Ok(InstallOutcome::Installed {
      files: entries.len(),
    })
  }

  /// Make this version the live one and delete every other version's partitions.
  ///
  /// Refuses to run for a version whose static partition was never primed.
  pub fn activate(&self) -> Result<Vec<String>, CacheError> {
    if !self.is_installed()? {
      return Err(CacheError::NotInstalled(self.version.clone()));
    }

    let current = self.partitions();
    let mut deleted = Vec::new();
    for name in self.storage.partitions()? {
      if current.contains(&name) {
        continue;
      }
      info!(partition = %name, "deleting old cache");
      if self.storage.delete_partition(&name)? {
        deleted.push(name);
      }
    }

    self.storage.set_meta(ACTIVE_VERSION, &self.version)?;
    info!(version = %self.version, "activated");

    Ok(deleted)
  }

  pub fn handle_message(&self, message: LifecycleMessage) -> Result<LifecycleReply, CacheError> {
    match message {
      LifecycleMessage::SkipWaiting => Ok(LifecycleReply::Activated {
        deleted: self.activate()?,
      }),
      LifecycleMessage::GetVersion => Ok(LifecycleReply::Version(self.version.clone())),
    }
  }

  pub fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    Ok(self.storage.get(partition, key)?)
  }

  pub fn put(&self, partition: &str, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
    Ok(self.storage.put(partition, key, entry)?)
  }

  /// Look a key up in each partition in order, first hit wins.
  ///
  /// Storage errors are logged and treated as a miss.
  pub fn lookup(&self, partitions: &[&str], key: &CacheKey) -> Option<CacheEntry> {
    for partition in partitions {
      match self.get(partition, key) {
        Ok(Some(entry)) => return Some(entry),
        Ok(None) => {}
        Err(e) => warn!(partition, error = %e, "cache read failed"),
      }
    }
    None
  }

  pub fn summary(&self) -> Result<Vec<PartitionSummary>, CacheError> {
    let current = self.partitions();
    self
      .storage
      .partitions()?
      .into_iter()
      .map(|name| {
        let entries = self.storage.entry_count(&name)?;
        Ok::<_, CacheError>(PartitionSummary {
          current: current.contains(&name),
          name,
          entries,
        })
      })
      .collect()
  }
}
