//! End-to-end scenarios for the offline worker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outpost::config::{Config, RouteTable};
use outpost::event::Trigger;
use outpost::net::{NetError, Network, WidgetRequest, WidgetResponse};
use outpost::queue::SqliteQueue;
use outpost::store::{CacheStore, SqliteStore};
use outpost::worker::Worker;

/// Scripted network: canned responses per URL, an offline switch, call counts.
#[derive(Default)]
struct ScriptedNetwork {
  offline: AtomicBool,
  responses: Mutex<HashMap<String, WidgetResponse>>,
  calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedNetwork {
  fn new() -> Self {
    Self::default()
  }

  fn respond(&self, url: &str, status: u16, body: serde_json::Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), WidgetResponse::json(status, &body));
  }

  fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  fn calls(&self, url: &str) -> u32 {
    self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn send(
    &self,
    request: &WidgetRequest,
    _timeout: Duration,
  ) -> Result<WidgetResponse, NetError> {
    *self
      .calls
      .lock()
      .unwrap()
      .entry(request.url.clone())
      .or_insert(0) += 1;

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetError::Connect("offline".to_string()));
    }
    self
      .responses
      .lock()
      .unwrap()
      .get(&request.url)
      .cloned()
      .ok_or_else(|| NetError::Connect(format!("no route to {}", request.url)))
  }
}

fn scenario_config(version: u32) -> Config {
  Config {
    cache_version: version,
    network_timeout_secs: 1,
    routes: RouteTable {
      manifest: vec!["/".to_string(), "/widget-frame.html".to_string()],
      ..RouteTable::baseline()
    },
    ..Config::default()
  }
}

fn serve_manifest(network: &ScriptedNetwork) {
  network.respond("/", 200, serde_json::json!({"page": "root"}));
  network.respond("/widget-frame.html", 200, serde_json::json!({"page": "frame"}));
}

/// Scenario A: after install, static assets are served from cache with zero
/// further network calls.
#[tokio::test]
async fn scenario_a_install_then_cache_first() {
  let network = Arc::new(ScriptedNetwork::new());
  serve_manifest(&network);

  let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
  let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker, _host_rx) =
    Worker::with_parts(scenario_config(1), store, queue, network.clone());

  worker.bootstrap().await.unwrap();
  let calls_after_install = network.calls("/");

  let first = worker.handle(WidgetRequest::get("/")).await.unwrap();
  let second = worker.handle(WidgetRequest::get("/")).await.unwrap();

  // Exact bytes fetched at install time, no network traffic since.
  assert_eq!(first.body, b"{\"page\":\"root\"}".to_vec());
  assert_eq!(second.body, first.body);
  assert_eq!(network.calls("/"), calls_after_install);
}

/// Scenario B: a config read cached once keeps being served unchanged across
/// at least 5 consecutive failed network attempts.
#[tokio::test]
async fn scenario_b_stale_config_fallback() {
  let network = Arc::new(ScriptedNetwork::new());
  serve_manifest(&network);
  network.respond("/api/config", 200, serde_json::json!({"theme": "dark", "locale": "de"}));

  let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
  let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker, _host_rx) =
    Worker::with_parts(scenario_config(1), store, queue, network.clone());
  worker.bootstrap().await.unwrap();

  let fresh = worker.handle(WidgetRequest::get("/api/config")).await.unwrap();
  network.set_offline(true);

  for _ in 0..5 {
    let stale = worker.handle(WidgetRequest::get("/api/config")).await.unwrap();
    assert_eq!(stale.body, fresh.body);
  }
}

/// Scenario C: a chat send failing offline grows the queue to 1 and returns
/// a degraded success; a reconnect trigger drains it back to 0.
#[tokio::test]
async fn scenario_c_queue_and_drain() {
  let network = Arc::new(ScriptedNetwork::new());
  serve_manifest(&network);

  let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
  let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker, mut host_rx) = Worker::with_parts(
    scenario_config(1),
    store,
    queue.clone(),
    network.clone(),
  );
  let worker = Arc::new(worker);

  let (trigger_tx, trigger_rx) = tokio::sync::mpsc::unbounded_channel();
  let run_handle = {
    let worker = Arc::clone(&worker);
    tokio::spawn(async move { worker.run(trigger_rx).await })
  };

  // Wait for install/activate before touching the worker.
  let ready = host_rx.recv().await.unwrap();
  assert_eq!(ready.event, "ready");

  network.set_offline(true);
  assert_eq!(queue.len().unwrap(), 0);

  let request = WidgetRequest::post("/api/chat/send", serde_json::json!({"content": "hello"}));
  let response = worker.handle(request).await.unwrap();

  assert_eq!(queue.len().unwrap(), 1);
  let body = response.body_json().unwrap();
  assert_eq!(body["offline"], serde_json::json!(true));
  assert!(body["session_id"].as_str().unwrap().starts_with("offline-"));

  // Connectivity returns.
  network.set_offline(false);
  network.respond("/api/chat/send", 200, serde_json::json!({"id": "srv-1"}));
  trigger_tx.send(Trigger::Reconnected).unwrap();

  let sync_done = host_rx.recv().await.unwrap();
  assert_eq!(sync_done.event, "sync-complete");
  assert_eq!(sync_done.payload["replayed"], serde_json::json!(1));
  assert_eq!(queue.len().unwrap(), 0);

  trigger_tx.send(Trigger::Shutdown).unwrap();
  run_handle.await.unwrap().unwrap();
}

/// Scenario D: upgrading from generation v1 to v2 deletes the v1 namespaces
/// and fully populates v2 from the new manifest.
#[tokio::test]
async fn scenario_d_generation_migration() {
  let network = Arc::new(ScriptedNetwork::new());
  serve_manifest(&network);

  let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());

  // Generation v1 installs and serves.
  let queue_v1 = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker_v1, _host_rx_v1) = Worker::with_parts(
    scenario_config(1),
    Arc::clone(&store),
    queue_v1,
    network.clone(),
  );
  worker_v1.bootstrap().await.unwrap();
  assert!(store.list_namespaces().unwrap().contains("outpost-static-v1"));

  // Generation v2 takes over the same storage.
  let queue_v2 = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker_v2, _host_rx_v2) = Worker::with_parts(
    scenario_config(2),
    Arc::clone(&store),
    queue_v2,
    network.clone(),
  );
  worker_v2.bootstrap().await.unwrap();

  let namespaces = store.list_namespaces().unwrap();
  assert!(!namespaces.contains("outpost-static-v1"));
  assert!(namespaces.contains("outpost-static-v2"));

  // The new manifest is fully present: both assets serve from cache.
  let calls_root = network.calls("/");
  let calls_frame = network.calls("/widget-frame.html");
  worker_v2.handle(WidgetRequest::get("/")).await.unwrap();
  worker_v2
    .handle(WidgetRequest::get("/widget-frame.html"))
    .await
    .unwrap();
  assert_eq!(network.calls("/"), calls_root);
  assert_eq!(network.calls("/widget-frame.html"), calls_frame);
}

/// A failed install must leave the previous generation's caches untouched.
#[tokio::test]
async fn failed_upgrade_keeps_old_generation_serving() {
  let network = Arc::new(ScriptedNetwork::new());
  serve_manifest(&network);

  let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());

  let queue_v1 = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker_v1, _host_rx_v1) = Worker::with_parts(
    scenario_config(1),
    Arc::clone(&store),
    queue_v1,
    network.clone(),
  );
  worker_v1.bootstrap().await.unwrap();

  // v2 tries to install while the backend is unreachable.
  network.set_offline(true);
  let queue_v2 = Arc::new(SqliteQueue::open_in_memory().unwrap());
  let (worker_v2, _host_rx_v2) = Worker::with_parts(
    scenario_config(2),
    Arc::clone(&store),
    queue_v2,
    network.clone(),
  );
  assert!(worker_v2.bootstrap().await.is_err());

  // v1 namespaces survive and still serve cache-first.
  assert!(store.list_namespaces().unwrap().contains("outpost-static-v1"));
  let response = worker_v1.handle(WidgetRequest::get("/")).await.unwrap();
  assert!(response.is_success());
}
