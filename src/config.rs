//! Worker configuration: compiled-in route tables plus optional YAML overrides.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current cache generation. Bumped whenever the static asset set changes;
/// the lifecycle manager migrates namespaces on the next install.
pub const CACHE_VERSION: u32 = 2;

/// Static assets cached verbatim at install time.
const BASELINE_MANIFEST: &[&str] = &["/", "/widget-frame.html", "/widget.css", "/widget.js"];

/// Read-only, idempotent endpoints eligible for stale-cache fallback.
const BASELINE_CACHEABLE_API: &[&str] = &["/api/health", "/api/config"];

/// Mutating chat endpoints that queue for replay on connectivity failure.
const BASELINE_CHAT_SEND: &[&str] = &["/api/chat/send", "/api/chat/messages"];

/// URL-pattern tables driving route classification. Fixed at build time;
/// the YAML config may replace them wholesale for embedders with a
/// different backend layout, but they are never mutated at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteTable {
  /// Exact paths of the install manifest.
  pub manifest: Vec<String>,
  /// Exact paths of cacheable API reads.
  pub cacheable_api: Vec<String>,
  /// Path prefixes of chat-send endpoints.
  pub chat_send: Vec<String>,
}

impl Default for RouteTable {
  fn default() -> Self {
    Self::baseline()
  }
}

impl RouteTable {
  /// The compiled-in route tables.
  pub fn baseline() -> Self {
    Self {
      manifest: BASELINE_MANIFEST.iter().map(|s| s.to_string()).collect(),
      cacheable_api: BASELINE_CACHEABLE_API.iter().map(|s| s.to_string()).collect(),
      chat_send: BASELINE_CHAT_SEND.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn is_static(&self, path: &str) -> bool {
    self.manifest.iter().any(|p| p == path)
  }

  pub fn is_cacheable_api(&self, path: &str) -> bool {
    self.cacheable_api.iter().any(|p| p == path)
  }

  pub fn is_chat_send(&self, path: &str) -> bool {
    self.chat_send.iter().any(|p| path.starts_with(p.as_str()))
  }
}

/// Worker configuration. Every field has a usable default so the worker can
/// start with no config file at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the chat backend. Bare-path requests are resolved against
  /// it before hitting the network; absolute URLs pass through unchanged.
  pub base_url: Option<String>,
  /// Cache generation for namespace names.
  pub cache_version: u32,
  /// Bound on a single network attempt, in seconds. Exceeding it counts as
  /// a network failure for fallback purposes.
  pub network_timeout_secs: u64,
  /// Disable response caching entirely (the queue stays durable).
  pub cache_enabled: bool,
  /// Directory holding the cache/queue database (defaults to the platform
  /// data dir).
  pub data_dir: Option<PathBuf>,
  pub routes: RouteTable,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: None,
      cache_version: CACHE_VERSION,
      network_timeout_secs: 5,
      cache_enabled: true,
      data_dir: None,
      routes: RouteTable::baseline(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  ///
  /// With no file found, the compiled-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  /// Path of the cache/queue database.
  pub fn db_path(&self) -> Result<PathBuf> {
    let dir = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory"))?
        .join("outpost"),
    };
    Ok(dir.join("outpost.db"))
  }

  /// Resolve a bare path against the configured base URL. Absolute URLs and
  /// unconfigured setups pass through unchanged.
  pub fn resolve_url(&self, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
      return url.to_string();
    }
    match &self.base_url {
      Some(base) => format!("{}{}", base.trim_end_matches('/'), url),
      None => url.to_string(),
    }
  }

  pub fn static_namespace(&self) -> String {
    self.namespace("static")
  }

  pub fn api_namespace(&self) -> String {
    self.namespace("api")
  }

  pub fn dynamic_namespace(&self) -> String {
    self.namespace("dynamic")
  }

  fn namespace(&self, class: &str) -> String {
    format!("outpost-{}-v{}", class, self.cache_version)
  }

  /// The namespace set owned by this generation. Anything else found in the
  /// store at activation time is a stale generation and gets deleted.
  pub fn expected_namespaces(&self) -> BTreeSet<String> {
    [
      self.static_namespace(),
      self.api_namespace(),
      self.dynamic_namespace(),
    ]
    .into_iter()
    .collect()
  }
}
