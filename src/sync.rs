//! Queue replay once connectivity returns.
//!
//! One drain pass per trigger: a single FIFO sweep over the queue, each
//! entry attempted once. A trigger arriving mid-pass is dropped; the next
//! natural trigger picks up whatever remains.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::net::{is_gateway_error, NetError, Network};
use crate::queue::{QueuedRequest, SqliteQueue};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
  /// Entries replayed and removed.
  pub replayed: usize,
  /// Entries that failed again and stay queued.
  pub failed: usize,
  /// Queue length after the pass.
  pub remaining: usize,
}

/// Drains the persistent queue when woken by a connectivity or retry
/// trigger. The only component that removes queue entries.
pub struct SyncCoordinator {
  queue: Arc<SqliteQueue>,
  network: Arc<dyn Network>,
  timeout: Duration,
  /// Process-local latch: never persisted, re-derived false at start.
  draining: AtomicBool,
}

impl SyncCoordinator {
  pub fn new(queue: Arc<SqliteQueue>, network: Arc<dyn Network>, config: &Config) -> Self {
    Self {
      queue,
      network,
      timeout: config.network_timeout(),
      draining: AtomicBool::new(false),
    }
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::SeqCst)
  }

  /// Run one drain pass. Returns `None` when a pass is already running:
  /// the trigger is dropped, not queued.
  pub async fn drain(&self) -> Result<Option<DrainSummary>> {
    if self
      .draining
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("drain already in progress, dropping trigger");
      return Ok(None);
    }

    let result = self.drain_pass().await;

    // Latch released on every exit path, success or not.
    self.draining.store(false, Ordering::SeqCst);
    result.map(Some)
  }

  async fn drain_pass(&self) -> Result<DrainSummary> {
    let entries = self.queue.list_all()?;
    let total = entries.len();

    let mut replayed = 0;
    let mut failed = 0;

    for entry in entries {
      match self.replay(&entry).await {
        Ok(()) => {
          // Idempotent: another instance removing it first is harmless.
          self.queue.remove(&entry.id)?;
          replayed += 1;
        }
        Err(error) => {
          warn!(
            id = %entry.id,
            url = %entry.url,
            attempts = entry.attempts + 1,
            %error,
            "replay failed, entry kept for next trigger"
          );
          self.queue.increment_attempts(&entry.id)?;
          failed += 1;
        }
      }
    }

    let remaining = self.queue.len()?;
    info!(total, replayed, failed, remaining, "drain pass complete");

    Ok(DrainSummary {
      replayed,
      failed,
      remaining,
    })
  }

  /// Replay one captured request. Reaching the server settles the entry
  /// whatever it answers: an application-level rejection will not improve
  /// on retry. Only connectivity failures keep the entry queued.
  async fn replay(&self, entry: &QueuedRequest) -> std::result::Result<(), NetError> {
    let response = self.network.send(&entry.to_request(), self.timeout).await?;

    if is_gateway_error(response.status) {
      return Err(NetError::Connect(format!("gateway status {}", response.status)));
    }
    Ok(())
  }
}
