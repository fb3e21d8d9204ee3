//! Worker composition and run loop.
//!
//! `Worker` is the transparent interception point in front of every
//! outbound call the widget's UI layer makes: GETs go through the cache
//! router, everything else through the offline interceptor. The run loop
//! owns install/activate and wakes the sync coordinator on triggers.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Config;
use crate::event::{HostMessage, Trigger};
use crate::interceptor::OfflineInterceptor;
use crate::lifecycle::LifecycleManager;
use crate::net::{Network, ReqwestNetwork, WidgetRequest, WidgetResponse};
use crate::queue::SqliteQueue;
use crate::router::Router;
use crate::store::{CacheStore, NoopStore, SqliteStore};
use crate::sync::SyncCoordinator;

/// The offline resilience worker for one widget instance.
pub struct Worker {
  config: Config,
  router: Router,
  interceptor: OfflineInterceptor,
  sync: SyncCoordinator,
  lifecycle: LifecycleManager,
  host_tx: mpsc::UnboundedSender<HostMessage>,
}

impl Worker {
  /// Build a worker against the real network and the on-disk stores.
  pub fn new(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<HostMessage>)> {
    let db_path = config.db_path()?;
    let store: Arc<dyn CacheStore> = if config.cache_enabled {
      Arc::new(SqliteStore::open(&db_path)?)
    } else {
      Arc::new(NoopStore)
    };
    let queue = Arc::new(SqliteQueue::open(&db_path)?);
    let network: Arc<dyn Network> = Arc::new(ReqwestNetwork::new()?);

    Ok(Self::with_parts(config, store, queue, network))
  }

  /// Build with explicit storage and network backends.
  pub fn with_parts(
    config: Config,
    store: Arc<dyn CacheStore>,
    queue: Arc<SqliteQueue>,
    network: Arc<dyn Network>,
  ) -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
    let (host_tx, host_rx) = mpsc::unbounded_channel();

    let router = Router::new(Arc::clone(&store), Arc::clone(&network), config.clone());
    let interceptor =
      OfflineInterceptor::new(Arc::clone(&queue), Arc::clone(&network), config.clone());
    let sync = SyncCoordinator::new(Arc::clone(&queue), Arc::clone(&network), &config);
    let lifecycle = LifecycleManager::new(store, network, config.clone());

    let worker = Self {
      config,
      router,
      interceptor,
      sync,
      lifecycle,
      host_tx,
    };
    (worker, host_rx)
  }

  /// Install this generation's caches and activate it. On error the caller
  /// keeps its previous worker generation; nothing has been deleted.
  pub async fn bootstrap(&self) -> Result<()> {
    self.lifecycle.install().await?;
    self.lifecycle.activate().await?;
    self.notify(HostMessage::ready(self.config.cache_version));
    Ok(())
  }

  /// Bootstrap, then serve triggers until shutdown or channel close.
  pub async fn run(&self, mut triggers: mpsc::UnboundedReceiver<Trigger>) -> Result<()> {
    self.bootstrap().await?;

    while let Some(trigger) = triggers.recv().await {
      match trigger {
        Trigger::Reconnected | Trigger::RetrySync => self.sync_now().await,
        Trigger::Shutdown => break,
      }
    }
    Ok(())
  }

  /// The interception point: every outbound request from the UI layer.
  pub async fn handle(&self, request: WidgetRequest) -> Result<WidgetResponse> {
    let request = self.resolve(request);

    if request.is_get() {
      self.router.handle(&request).await
    } else {
      self.interceptor.handle(&request).await
    }
  }

  /// Run one drain pass and notify the host. A failed pass never takes the
  /// worker down; the queue is intact for the next trigger.
  async fn sync_now(&self) {
    match self.sync.drain().await {
      Ok(Some(summary)) => {
        self.notify(HostMessage::sync_complete(summary.replayed, summary.remaining));
      }
      Ok(None) => {} // Pass already running; trigger dropped.
      Err(error) => warn!(%error, "drain pass aborted"),
    }
  }

  fn resolve(&self, mut request: WidgetRequest) -> WidgetRequest {
    request.url = self.config.resolve_url(&request.url);
    request
  }

  fn notify(&self, message: HostMessage) {
    // A host that went away just stops listening.
    let _ = self.host_tx.send(message);
  }
}
