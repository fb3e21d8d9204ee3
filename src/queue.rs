//! Durable FIFO queue of failed outbound chat sends.
//!
//! Entries survive process restarts; every mutation is committed before the
//! call returns. The interceptor only appends, the sync coordinator owns the
//! drain path.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::net::WidgetRequest;

/// A captured outbound request awaiting replay. Created exactly once per
/// failed mutation; only `attempts` is ever mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// Opaque unique id. Never reused, even after removal.
  pub id: String,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<serde_json::Value>,
  /// Milliseconds since the epoch at enqueue time.
  pub enqueued_at: i64,
  /// Failed replay count.
  pub attempts: u32,
}

impl QueuedRequest {
  /// Capture a request that failed against the network.
  pub fn capture(request: &WidgetRequest) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      url: request.url.clone(),
      method: request.method.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at: Utc::now().timestamp_millis(),
      attempts: 0,
    }
  }

  /// Rebuild the request for replay.
  pub fn to_request(&self) -> WidgetRequest {
    WidgetRequest {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Schema for the queue table. `seq` is the FIFO replay order; `id` is the
/// stable identity entries keep across passes.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS send_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);
"#;

/// SQLite-backed queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open or create the queue at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  /// In-memory queue for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }

  /// Append an entry. Committed before return; a failure here means the
  /// entry was not persisted and the caller must not pretend it was.
  pub fn enqueue(&self, entry: &QueuedRequest) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let body = entry
      .body
      .as_ref()
      .map(|b| serde_json::to_string(b))
      .transpose()
      .map_err(|e| eyre!("Failed to serialize body: {}", e))?;

    conn
      .execute(
        "INSERT INTO send_queue (id, url, method, headers, body, enqueued_at, attempts)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.id,
          entry.url,
          entry.method,
          headers,
          body,
          entry.enqueued_at,
          entry.attempts
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;

    Ok(())
  }

  /// All entries in insertion order.
  pub fn list_all(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at, attempts
         FROM send_queue ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String, String, Option<String>, i64, u32)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (id, url, method, headers, body, enqueued_at, attempts) in rows {
      let headers = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to parse queued headers: {}", e))?;
      let body = body
        .map(|b| serde_json::from_str(&b))
        .transpose()
        .map_err(|e| eyre!("Failed to parse queued body: {}", e))?;
      entries.push(QueuedRequest {
        id,
        url,
        method,
        headers,
        body,
        enqueued_at,
        attempts,
      });
    }

    Ok(entries)
  }

  /// Remove an entry. Idempotent: removing an id twice (or an id another
  /// worker instance already removed) is not an error.
  pub fn remove(&self, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM send_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queue entry {}: {}", id, e))?;

    Ok(())
  }

  /// Record one more failed replay for an entry.
  pub fn increment_attempts(&self, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE send_queue SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to update attempts for {}: {}", id, e))?;

    Ok(())
  }

  /// Manually drop an entry, e.g. one that can never replay. Returns whether
  /// anything was removed.
  pub fn purge(&self, id: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute("DELETE FROM send_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to purge queue entry {}: {}", id, e))?;

    Ok(removed > 0)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: Option<i64> = conn
      .query_row("SELECT COUNT(*) FROM send_queue", [], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count.unwrap_or(0) as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}
