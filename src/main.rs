mod api;
mod app;
mod cache;
mod classify;
mod commands;
mod config;
mod event;
mod interceptor;
mod net;
mod services;
mod session;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::ControlResponse;
use crate::cache::{InstallOutcome, LifecycleMessage, LifecycleReply};
use crate::net::Request;
use crate::services::Services;
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(name = "botwatch")]
#[command(about = "Offline-resilient terminal client for a crypto trading bot")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/botwatch/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Poll the bot continuously and accept control commands (default)
  Watch,
  /// Print the bot status once
  Status,
  /// Start monitoring
  Start,
  /// Stop all monitoring and trading
  Stop,
  /// Add a coin to monitor
  AddCoin {
    symbol: String,
    /// Order size in USDT (minimum 10)
    order_size_usdt: f64,
  },
  /// Remove a coin
  RemoveCoin { symbol: String },
  /// Fetch a URL through the cache policy
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    document: bool,
  },
  /// Manage the response cache
  #[command(subcommand)]
  Cache(CacheCmd),
  /// Print client and cache versions
  Version,
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
  /// Prime the static cache for this version
  Prime,
  /// Make this version live and delete older caches
  Activate,
  /// List cache partitions
  List,
}

/// Log to a daily file so stdout stays free for command output.
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "botwatch.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("botwatch=info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  let config = config::Config::load(args.config.as_deref())?;
  let services = Services::open(config)?;
  info!(version = %services.cache().version(), "botwatch starting");

  match args.command.unwrap_or(Cmd::Watch) {
    Cmd::Watch => watch(&services).await,
    Cmd::Status => {
      let api = services.api(services.interceptor(false).await?);
      let status = api.status().await?;
      println!("{}", status.summary());
      println!("{}", serde_json::to_string_pretty(&status)?);
      Ok(())
    }
    Cmd::Start => {
      let api = services.api(services.interceptor(false).await?);
      print_control(api.start_monitoring().await?);
      Ok(())
    }
    Cmd::Stop => {
      let api = services.api(services.interceptor(false).await?);
      print_control(api.stop_all().await?);
      Ok(())
    }
    Cmd::AddCoin {
      symbol,
      order_size_usdt,
    } => {
      let api = services.api(services.interceptor(false).await?);
      print_control(api.add_coin(&symbol, order_size_usdt).await?);
      Ok(())
    }
    Cmd::RemoveCoin { symbol } => {
      let api = services.api(services.interceptor(false).await?);
      print_control(api.remove_coin(&symbol).await?);
      Ok(())
    }
    Cmd::Fetch { url, document } => fetch(&services, &url, document).await,
    Cmd::Cache(cmd) => cache_command(&services, cmd).await,
    Cmd::Version => {
      let cache = services.cache();
      let LifecycleReply::Version(version) = cache.handle_message(LifecycleMessage::GetVersion)?
      else {
        return Err(eyre!("Unexpected reply to a version request"));
      };
      println!("botwatch {}", env!("CARGO_PKG_VERSION"));
      println!("cache version: {}", version);
      println!(
        "active cache version: {}",
        cache.active_version()?.as_deref().unwrap_or("none")
      );
      Ok(())
    }
  }
}

async fn watch(services: &Services) -> Result<()> {
  let interceptor = services.interceptor(true).await?;
  let api = services.api(interceptor.clone());

  let shutdown = CancellationToken::new();
  let background = services.spawn_background(api.clone(), &shutdown);

  let session = Session::sign_in(
    api,
    services.config().polling.intervals(),
    services.connectivity(),
  )
  .await?;
  let result = app::App::new(session).run().await;

  shutdown.cancel();
  for task in background {
    let _ = task.await;
  }

  let pending = interceptor.deferred_len();
  if pending > 0 {
    warn!(pending, "exiting with undelivered deferred requests");
  }
  result
}

async fn fetch(services: &Services, url: &str, document: bool) -> Result<()> {
  let url = services
    .config()
    .api
    .url
    .join(url)
    .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let request = if document {
    Request::navigate(url)
  } else {
    Request::get(url)
  };

  let interceptor = services.interceptor(false).await?;
  let fetched = interceptor.handle(&request).await?;

  println!("status: {}", fetched.response.status);
  println!("source: {}", fetched.source);
  if let Some(cached_at) = fetched.cached_at {
    println!("cached at: {}", cached_at.to_rfc3339());
  }
  if let Some(content_type) = fetched.response.header("content-type") {
    println!("content-type: {}", content_type);
  }
  println!();
  println!("{}", fetched.response.text());
  Ok(())
}

async fn cache_command(services: &Services, cmd: CacheCmd) -> Result<()> {
  let cache = services.cache();
  match cmd {
    CacheCmd::Prime => match services.prime().await? {
      InstallOutcome::AlreadyInstalled => {
        println!("cache version {} is already primed", cache.version())
      }
      InstallOutcome::Installed { files } => {
        println!("primed {} files for cache version {}", files, cache.version())
      }
    },
    CacheCmd::Activate => {
      if let LifecycleReply::Activated { deleted } =
        cache.handle_message(LifecycleMessage::SkipWaiting)?
      {
        println!("cache version {} is live", cache.version());
        for name in deleted {
          println!("deleted {}", name);
        }
      }
    }
    CacheCmd::List => {
      for partition in cache.summary()? {
        let marker = if partition.current { "*" } else { " " };
        println!("{} {:<40} {:>6} entries", marker, partition.name, partition.entries);
      }
    }
  }
  Ok(())
}

fn print_control(response: ControlResponse) {
  if let Some(message) = &response.message {
    println!("{}", message);
  }
  println!("{}", response.status.summary());
}
