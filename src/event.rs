//! Trigger input and host-facing notifications.

use serde::Serialize;

/// Connectivity and retry signals feeding the worker's run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  /// Connectivity returned; drain the queue.
  Reconnected,
  /// Explicit retry requested by the host.
  RetrySync,
  /// Stop the worker loop.
  Shutdown,
}

impl Trigger {
  /// Parse the line format the sidecar binary reads on stdin.
  pub fn parse(line: &str) -> Option<Self> {
    match line.trim() {
      "reconnected" | "online" => Some(Self::Reconnected),
      "retry" => Some(Self::RetrySync),
      "shutdown" | "quit" => Some(Self::Shutdown),
      _ => None,
    }
  }
}

/// Typed message posted back to the host context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostMessage {
  #[serde(rename = "type")]
  pub kind: String,
  pub event: String,
  pub payload: serde_json::Value,
}

impl HostMessage {
  fn new(event: &str, payload: serde_json::Value) -> Self {
    Self {
      kind: "outpost".to_string(),
      event: event.to_string(),
      payload,
    }
  }

  /// The worker generation finished install/activate and owns interception.
  pub fn ready(version: u32) -> Self {
    Self::new("ready", serde_json::json!({ "version": version }))
  }

  /// A drain pass finished.
  pub fn sync_complete(replayed: usize, remaining: usize) -> Self {
    Self::new(
      "sync-complete",
      serde_json::json!({ "replayed": replayed, "remaining": remaining }),
    )
  }
}
