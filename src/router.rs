//! Request classification and per-route caching strategies.
//!
//! `classify` is a pure function so routing policy stays testable without
//! any I/O; the strategies below do the actual cache/network orchestration.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Config, RouteTable};
use crate::net::{Network, WidgetRequest, WidgetResponse};
use crate::store::{cache_key, CacheRecord, CacheStore};

/// The category a GET request is bound to before a strategy is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Install-manifest asset: cache-first.
  Static,
  /// Read-only idempotent API endpoint: network-first with cache fallback
  /// and a synthesized last-resort default.
  CacheableApi,
  /// Everything else: network-first with best-effort cache fallback.
  Dynamic,
}

/// Classify a GET request. First match wins: Static > CacheableApi > Dynamic.
pub fn classify(routes: &RouteTable, request: &WidgetRequest) -> RouteClass {
  let path = request.path();
  if routes.is_static(&path) {
    RouteClass::Static
  } else if routes.is_cacheable_api(&path) {
    RouteClass::CacheableApi
  } else {
    RouteClass::Dynamic
  }
}

/// Safe defaults served when a config read can reach neither network nor
/// cache. The UI layer never receives missing required fields.
pub fn synthesized_config() -> serde_json::Value {
  serde_json::json!({
    "widget_enabled": true,
    "theme": "light",
    "locale": "en",
    "features": {},
    "offline": true,
  })
}

/// Executes the caching strategy matching each GET request's route class.
pub struct Router {
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  config: Config,
}

impl Router {
  pub fn new(store: Arc<dyn CacheStore>, network: Arc<dyn Network>, config: Config) -> Self {
    Self {
      store,
      network,
      config,
    }
  }

  /// Route a GET request through its strategy.
  pub async fn handle(&self, request: &WidgetRequest) -> Result<WidgetResponse> {
    match classify(&self.config.routes, request) {
      RouteClass::Static => self.cache_first(request).await,
      RouteClass::CacheableApi => {
        self
          .network_first(
            request,
            &self.config.api_namespace(),
            Some(synthesized_config()),
          )
          .await
      }
      RouteClass::Dynamic => {
        self
          .network_first(request, &self.config.dynamic_namespace(), None)
          .await
      }
    }
  }

  /// Cache-first: a hit never touches the network. A miss fetches, stores
  /// the successful response, and returns it; fetch failure with nothing
  /// cached degrades to a 503.
  async fn cache_first(&self, request: &WidgetRequest) -> Result<WidgetResponse> {
    let namespace = self.config.static_namespace();
    let key = cache_key(request);

    if let Some(record) = self.lookup(&namespace, &key) {
      debug!(url = %request.url, "static cache hit");
      return Ok(record.into_response());
    }

    match self.network.send(request, self.timeout()).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(&namespace, &key, &response);
        }
        Ok(response)
      }
      Err(error) => {
        warn!(url = %request.url, %error, "static asset unreachable with no cache entry");
        Ok(WidgetResponse::json(
          503,
          &serde_json::json!({"error": "service unavailable"}),
        ))
      }
    }
  }

  /// Network-first: a 2xx is stored and returned; a network failure falls
  /// back to the most recent cached record, then to `default` if given,
  /// else the failure propagates.
  async fn network_first(
    &self,
    request: &WidgetRequest,
    namespace: &str,
    default: Option<serde_json::Value>,
  ) -> Result<WidgetResponse> {
    let key = cache_key(request);

    match self.network.send(request, self.timeout()).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(namespace, &key, &response);
        }
        Ok(response)
      }
      Err(error) => {
        warn!(url = %request.url, %error, "network failed, falling back to cache");

        if let Some(record) = self.lookup(namespace, &key) {
          return Ok(record.into_response());
        }
        if let Some(default) = default {
          debug!(url = %request.url, "serving synthesized default");
          return Ok(WidgetResponse::json(200, &default));
        }
        Err(eyre!("Network unreachable for {}: {}", request.url, error))
      }
    }
  }

  /// Cache read with quota/IO failures downgraded to a miss; the request
  /// falls through to the network instead of failing.
  fn lookup(&self, namespace: &str, key: &str) -> Option<CacheRecord> {
    match self.store.get(namespace, key) {
      Ok(record) => record,
      Err(error) => {
        warn!(namespace, %error, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Cache write, best-effort: the response is already in hand, so a failed
  /// store must not fail the request.
  fn store_response(&self, namespace: &str, key: &str, response: &WidgetResponse) {
    let record = CacheRecord::from_response(response);
    if let Err(error) = self.store.put(namespace, key, &record) {
      warn!(namespace, %error, "cache write failed, response served uncached");
    }
  }

  fn timeout(&self) -> Duration {
    self.config.network_timeout()
  }
}
