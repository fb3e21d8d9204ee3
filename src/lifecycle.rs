//! Install and activation of cache namespace generations.
//!
//! Install populates the new generation's static namespace from the fixed
//! manifest, all-or-nothing. Activation deletes every namespace outside the
//! current generation's expected set; only then does this generation own
//! request interception. A failed install leaves the previous generation's
//! namespaces untouched, so the old worker keeps serving.

use color_eyre::{eyre::eyre, Result};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::net::{Network, WidgetRequest};
use crate::store::{cache_key, CacheRecord, CacheStore};

/// Manifest items fetched concurrently during install.
const INSTALL_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Populating the new static namespace from the manifest.
  Installing,
  /// Manifest fully cached; stale generations being deleted.
  Activating,
  /// Steady state: this generation owns interception.
  Active,
}

/// Owns install/activate/version-upgrade of the cache namespaces.
pub struct LifecycleManager {
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  config: Config,
  state: Mutex<LifecycleState>,
}

impl LifecycleManager {
  pub fn new(store: Arc<dyn CacheStore>, network: Arc<dyn Network>, config: Config) -> Self {
    Self {
      store,
      network,
      config,
      state: Mutex::new(LifecycleState::Installing),
    }
  }

  pub fn state(&self) -> LifecycleState {
    // The state is Copy, so a poisoned lock is still readable.
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Fetch every manifest item into this generation's static namespace.
  ///
  /// All-or-nothing: every item must fetch with a 2xx before anything is
  /// written, and every write must land before the transition to
  /// Activating. On failure nothing is deleted and the previous generation
  /// stays active.
  pub async fn install(&self) -> Result<()> {
    if self.state() != LifecycleState::Installing {
      return Err(eyre!("Install already ran for this generation"));
    }

    let namespace = self.config.static_namespace();
    let manifest: Vec<String> = self
      .config
      .routes
      .manifest
      .iter()
      .map(|path| self.config.resolve_url(path))
      .collect();

    info!(namespace = %namespace, items = manifest.len(), "installing static manifest");

    let network = Arc::clone(&self.network);
    let timeout = self.config.network_timeout();

    let fetched: Vec<(WidgetRequest, crate::net::WidgetResponse)> =
      futures::stream::iter(manifest)
        .map(|url| {
          let network = Arc::clone(&network);
          async move {
            let request = WidgetRequest::get(&url);
            let response = network
              .send(&request, timeout)
              .await
              .map_err(|e| eyre!("Failed to fetch manifest item {}: {}", url, e))?;
            Ok::<_, color_eyre::Report>((request, response))
          }
        })
        .buffered(INSTALL_CONCURRENCY)
        .try_collect()
        .await?;

    // Validate the whole manifest before writing anything.
    for (request, response) in &fetched {
      if !response.is_success() {
        return Err(eyre!(
          "Install aborted: {} returned status {}",
          request.url,
          response.status
        ));
      }
    }

    for (request, response) in &fetched {
      let record = CacheRecord::from_response(response);
      self
        .store
        .put(&namespace, &cache_key(request), &record)
        .map_err(|e| eyre!("Install aborted: failed to cache {}: {}", request.url, e))?;
    }

    self.set_state(LifecycleState::Activating);
    info!(namespace = %namespace, "install complete");
    Ok(())
  }

  /// Delete every namespace outside this generation's expected set and take
  /// ownership of interception.
  pub async fn activate(&self) -> Result<()> {
    if self.state() != LifecycleState::Activating {
      return Err(eyre!("Activate requires a completed install"));
    }

    let expected = self.config.expected_namespaces();
    let existing = self.store.list_namespaces()?;

    for namespace in existing.difference(&expected) {
      info!(namespace = %namespace, "deleting stale cache generation");
      if let Err(error) = self.store.delete_namespace(namespace) {
        // Leftover stale data wastes space but cannot corrupt this
        // generation; it gets retried at the next activation.
        warn!(namespace = %namespace, %error, "failed to delete stale namespace");
      }
    }

    self.set_state(LifecycleState::Active);
    info!(version = self.config.cache_version, "generation active");
    Ok(())
  }
}
