//! Cache store contract and record types.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::net::{WidgetRequest, WidgetResponse};

/// A cached response. Mutated only by overwrite; destroyed by namespace
/// deletion or explicit eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheRecord {
  pub fn from_response(response: &WidgetResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> WidgetResponse {
    WidgetResponse {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// Stable cache key for a request: method + URL, plus the `accept` header
/// when present (the same URL can serve different representations).
pub fn cache_key(request: &WidgetRequest) -> String {
  let mut input = format!("{}:{}", request.method.to_uppercase(), request.url);
  if let Some(accept) = request.headers.get("accept") {
    input.push(':');
    input.push_str(accept);
  }

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Trait for cache storage backends. Writes are durable before the call
/// returns; there is no write-behind.
pub trait CacheStore: Send + Sync {
  /// Look up a record. `None` is a miss.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheRecord>>;

  /// Store a record, overwriting any previous one under the same key.
  fn put(&self, namespace: &str, key: &str, record: &CacheRecord) -> Result<()>;

  /// Drop a namespace and everything in it.
  fn delete_namespace(&self, namespace: &str) -> Result<()>;

  /// Names of all namespaces currently holding records.
  fn list_namespaces(&self) -> Result<BTreeSet<String>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn get(&self, _namespace: &str, _key: &str) -> Result<Option<CacheRecord>> {
    Ok(None) // Always miss
  }

  fn put(&self, _namespace: &str, _key: &str, _record: &CacheRecord) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete_namespace(&self, _namespace: &str) -> Result<()> {
    Ok(())
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    Ok(BTreeSet::new())
  }
}
