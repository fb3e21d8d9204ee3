//! HTTP types and the network seam.
//!
//! The worker never touches `reqwest` types directly outside this module:
//! everything upstream works on `WidgetRequest`/`WidgetResponse` so the
//! routing and replay logic can run against a fake network in tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// An outbound request as seen from the widget's UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetRequest {
  pub method: String,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<serde_json::Value>,
}

impl WidgetRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
    Self {
      method: "POST".to_string(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: Some(body),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Path component of the URL, without the query string.
  ///
  /// Requests may arrive as absolute URLs or as bare paths (the widget is
  /// served from the same origin as its backend); both classify the same.
  pub fn path(&self) -> String {
    match url::Url::parse(&self.url) {
      Ok(parsed) => parsed.path().to_string(),
      Err(_) => self
        .url
        .split('?')
        .next()
        .unwrap_or(&self.url)
        .to_string(),
    }
  }
}

/// A response handed back to the widget's UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl WidgetResponse {
  /// Build a JSON response with the given status.
  pub fn json(status: u16, body: &serde_json::Value) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Self {
      status,
      headers,
      body: body.to_string().into_bytes(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Parse the body as JSON.
  pub fn body_json(&self) -> Result<serde_json::Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

/// Transport-layer failures. Application-level statuses are not errors here;
/// they travel inside `WidgetResponse`.
#[derive(Debug, Clone, Error)]
pub enum NetError {
  #[error("request timed out")]
  Timeout,
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("invalid request: {0}")]
  BadRequest(String),
}

/// Gateway statuses that indicate a connectivity problem between the widget
/// and the chat backend rather than an application-level rejection.
pub fn is_gateway_error(status: u16) -> bool {
  matches!(status, 502 | 503 | 504)
}

/// The network seam. `ReqwestNetwork` talks to the real chat backend; tests
/// substitute a scripted fake.
#[async_trait]
pub trait Network: Send + Sync {
  /// Perform one bounded network attempt. Exceeding `timeout` is a failure
  /// like any other; the attempt is not otherwise cancelled.
  async fn send(
    &self,
    request: &WidgetRequest,
    timeout: Duration,
  ) -> std::result::Result<WidgetResponse, NetError>;
}

/// Real network backend over reqwest.
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn send(
    &self,
    request: &WidgetRequest,
    timeout: Duration,
  ) -> std::result::Result<WidgetResponse, NetError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| NetError::BadRequest(format!("bad method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, &request.url).timeout(timeout);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        NetError::Timeout
      } else {
        NetError::Connect(e.to_string())
      }
    })?;

    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str().to_string(), value.to_string());
      }
    }
    let body = response
      .bytes()
      .await
      .map_err(|e| NetError::Connect(e.to_string()))?
      .to_vec();

    Ok(WidgetResponse {
      status,
      headers,
      body,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_path_from_absolute_url() {
    let req = WidgetRequest::get("https://chat.example.com/api/config?v=2");
    assert_eq!(req.path(), "/api/config");
  }

  #[test]
  fn test_path_from_bare_path() {
    let req = WidgetRequest::get("/widget-frame.html?cache=no");
    assert_eq!(req.path(), "/widget-frame.html");
  }

  #[test]
  fn test_gateway_errors() {
    assert!(is_gateway_error(502));
    assert!(is_gateway_error(503));
    assert!(is_gateway_error(504));
    assert!(!is_gateway_error(500));
    assert!(!is_gateway_error(400));
  }

  #[test]
  fn test_json_response_roundtrip() {
    let body = serde_json::json!({"offline": true});
    let resp = WidgetResponse::json(202, &body);
    assert_eq!(resp.status, 202);
    assert!(resp.is_success());
    assert_eq!(resp.body_json().unwrap(), body);
  }
}
