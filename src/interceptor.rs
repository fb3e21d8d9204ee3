//! Offline interception for mutating chat sends.
//!
//! Non-GET requests bypass the router entirely. Sends that fail for
//! connectivity reasons are captured into the durable queue and answered
//! with a synthesized degraded-success body so the UI can render an
//! optimistic "sent" state; application-level rejections pass through
//! untouched, since retrying them would not help.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::net::{is_gateway_error, Network, WidgetRequest, WidgetResponse};
use crate::queue::{QueuedRequest, SqliteQueue};

/// Wraps outbound mutations, queueing chat sends that fail while offline.
pub struct OfflineInterceptor {
  queue: Arc<SqliteQueue>,
  network: Arc<dyn Network>,
  config: Config,
}

impl OfflineInterceptor {
  pub fn new(queue: Arc<SqliteQueue>, network: Arc<dyn Network>, config: Config) -> Self {
    Self {
      queue,
      network,
      config,
    }
  }

  /// Handle a non-GET request.
  pub async fn handle(&self, request: &WidgetRequest) -> Result<WidgetResponse> {
    let is_chat_send = self.config.routes.is_chat_send(&request.path());

    match self.network.send(request, self.timeout()).await {
      Ok(response) if is_chat_send && is_gateway_error(response.status) => {
        warn!(url = %request.url, status = response.status, "gateway error on chat send");
        self.queue_and_degrade(request)
      }
      // Real responses pass through unmodified, 4xx rejections included.
      Ok(response) => Ok(response),
      Err(error) if is_chat_send => {
        warn!(url = %request.url, %error, "chat send unreachable, queueing");
        self.queue_and_degrade(request)
      }
      Err(error) => Err(eyre!("Request to {} failed: {}", request.url, error)),
    }
  }

  /// Capture the request into the queue and synthesize a degraded-success
  /// response. A failed enqueue surfaces as a real error: silently dropping
  /// user input behind an optimistic "sent" would be worse than failing.
  fn queue_and_degrade(&self, request: &WidgetRequest) -> Result<WidgetResponse> {
    let entry = QueuedRequest::capture(request);

    self
      .queue
      .enqueue(&entry)
      .map_err(|e| eyre!("Failed to queue message for retry: {}", e))?;

    info!(id = %entry.id, url = %entry.url, "send queued for replay");
    Ok(degraded_response(&entry))
  }

  fn timeout(&self) -> Duration {
    self.config.network_timeout()
  }
}

/// Success-shaped body standing in for the server's response while the real
/// send waits in the queue. The session id is local, so it can never collide
/// with a server-assigned one.
fn degraded_response(entry: &QueuedRequest) -> WidgetResponse {
  WidgetResponse::json(
    202,
    &serde_json::json!({
      "content": "Message queued for delivery",
      "session_id": format!("offline-{}", entry.id),
      "offline": true,
    }),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::FakeNetwork;
  use crate::net::NetError;

  fn interceptor() -> (OfflineInterceptor, Arc<SqliteQueue>, Arc<FakeNetwork>) {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let config = Config {
      network_timeout_secs: 1,
      ..Config::default()
    };
    let interceptor = OfflineInterceptor::new(queue.clone(), network.clone(), config);
    (interceptor, queue, network)
  }

  fn send_request() -> WidgetRequest {
    WidgetRequest::post("/api/chat/send", serde_json::json!({"content": "hello"}))
  }

  #[tokio::test]
  async fn test_successful_send_passes_through() {
    let (interceptor, queue, network) = interceptor();
    network.respond_json("/api/chat/send", 200, serde_json::json!({"id": "srv-1"}));

    let response = interceptor.handle(&send_request()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_send_queues_exactly_once() {
    let (interceptor, queue, network) = interceptor();
    network.set_offline(true);

    let response = interceptor.handle(&send_request()).await.unwrap();

    assert_eq!(queue.len().unwrap(), 1);
    let body = response.body_json().unwrap();
    assert_eq!(body["offline"], serde_json::json!(true));

    let session_id = body["session_id"].as_str().unwrap();
    assert!(session_id.starts_with("offline-"));
  }

  #[tokio::test]
  async fn test_gateway_error_queues() {
    let (interceptor, queue, network) = interceptor();
    network.respond_json("/api/chat/send", 503, serde_json::json!({"error": "down"}));

    let response = interceptor.handle(&send_request()).await.unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_application_rejection_is_not_queued() {
    let (interceptor, queue, network) = interceptor();
    network.respond_json("/api/chat/send", 422, serde_json::json!({"error": "too long"}));

    let response = interceptor.handle(&send_request()).await.unwrap();

    // Surfaced as-is: the server rejected it, a retry would not help.
    assert_eq!(response.status, 422);
    assert_eq!(queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_non_chat_mutation_failure_propagates() {
    let (interceptor, queue, network) = interceptor();
    network.fail("/api/telemetry", NetError::Timeout);

    let request = WidgetRequest::post("/api/telemetry", serde_json::json!({"event": "open"}));
    let result = interceptor.handle(&request).await;

    assert!(result.is_err());
    assert_eq!(queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_queued_entry_captures_request() {
    let (interceptor, queue, network) = interceptor();
    network.set_offline(true);

    let request = send_request().with_header("x-widget-session", "w-7");
    interceptor.handle(&request).await.unwrap();

    let entry = queue.list_all().unwrap().remove(0);
    assert_eq!(entry.to_request(), request);
    assert_eq!(entry.attempts, 0);
  }
}
