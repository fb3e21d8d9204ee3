use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use outpost::config::Config;
use outpost::event::Trigger;
use outpost::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline resilience worker for embeddable chat widgets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory holding cache and queue state
  #[arg(short, long)]
  data_dir: Option<PathBuf>,

  /// Verbose logging
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(data_dir) = args.data_dir {
    config.data_dir = Some(data_dir);
  }

  // The host context owns stdout, so logs go to a rolling file.
  let _log_guard = init_tracing(&config, args.verbose)?;

  let (worker, mut host_rx) = Worker::new(config)?;
  let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

  // Host messages out: one JSON line per event on stdout.
  tokio::spawn(async move {
    while let Some(message) = host_rx.recv().await {
      if let Ok(line) = serde_json::to_string(&message) {
        println!("{}", line);
      }
    }
  });

  // Triggers in: one word per line on stdin ("reconnected", "retry", ...).
  let stdin_tx = trigger_tx.clone();
  tokio::spawn(async move {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      if let Some(trigger) = Trigger::parse(&line) {
        if stdin_tx.send(trigger).is_err() {
          break;
        }
      }
    }
  });

  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      let _ = trigger_tx.send(Trigger::Shutdown);
    }
  });

  worker.run(trigger_rx).await
}

/// Set up tracing to a daily-rolling file next to the worker's database.
fn init_tracing(
  config: &Config,
  verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config
    .db_path()?
    .parent()
    .map(|p| p.to_path_buf())
    .unwrap_or_else(|| PathBuf::from("."));
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "outpost.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let default_filter = if verbose { "outpost=debug" } else { "outpost=info" };
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into()),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
