//! The remote system offline operations are synchronized to.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::offline::OfflineOperation;

/// Path, relative to the remote base URL, operations are posted to.
pub const SYNC_PATH: &str = "offline/sync";

/// Accepts queued operations once connectivity returns.
#[async_trait]
pub trait RemoteSink: Send + Sync {
  /// Submit one operation. Any error counts as a failed submission.
  async fn submit(&self, operation: &OfflineOperation) -> Result<()>;
}

/// Remote that POSTs each operation as JSON to `<base_url>/offline/sync`.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpRemote {
  pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
    let endpoint = sync_endpoint(base_url)?;
    let client = reqwest::Client::builder()
      .timeout(request_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, endpoint })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }
}

/// Join the sync path onto a base URL, keeping any path prefix the base has.
fn sync_endpoint(base_url: &str) -> Result<Url> {
  let mut base =
    Url::parse(base_url).map_err(|e| eyre!("Invalid remote URL {}: {}", base_url, e))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  base
    .join(SYNC_PATH)
    .map_err(|e| eyre!("Invalid remote URL {}: {}", base_url, e))
}

#[async_trait]
impl RemoteSink for HttpRemote {
  async fn submit(&self, operation: &OfflineOperation) -> Result<()> {
    let response = self
      .client
      .post(self.endpoint.clone())
      .json(operation)
      .send()
      .await
      .map_err(|e| eyre!("Failed to submit {}: {}", operation.id, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Remote rejected {}: HTTP {}", operation.id, status));
    }
    Ok(())
  }
}

/// Remote used when none is configured: every submission fails, so queued
/// operations stay put.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedRemote;

#[async_trait]
impl RemoteSink for DisconnectedRemote {
  async fn submit(&self, operation: &OfflineOperation) -> Result<()> {
    Err(eyre!("No remote configured, cannot submit {}", operation.id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::offline::{NewOperation, OperationId};
  use chrono::Utc;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  fn operation() -> OfflineOperation {
    OfflineOperation::from_new(
      OperationId(7),
      NewOperation::new("task_completion").with_field("task_id", "t1"),
      Utc::now(),
    )
  }

  /// Serve a single HTTP response and hand back the raw request.
  async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = vec![0u8; 8192];
      let n = socket.read(&mut buf).await.unwrap();
      let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
      socket.write_all(response.as_bytes()).await.unwrap();
      String::from_utf8_lossy(&buf[..n]).to_string()
    });
    (format!("http://{}/api", addr), handle)
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    assert_eq!(
      sync_endpoint("https://example.com/edge-ai").unwrap().as_str(),
      "https://example.com/edge-ai/offline/sync"
    );
    assert_eq!(
      sync_endpoint("https://example.com/").unwrap().as_str(),
      "https://example.com/offline/sync"
    );
    assert!(sync_endpoint("not a url").is_err());
  }

  #[tokio::test]
  async fn test_submit_posts_json() {
    let (base, server) = serve_once("200 OK").await;
    let remote = HttpRemote::new(&base, Duration::from_secs(5)).unwrap();

    remote.submit(&operation()).await.unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /api/offline/sync"));
  }

  #[tokio::test]
  async fn test_non_success_status_is_failure() {
    let (base, server) = serve_once("503 Service Unavailable").await;
    let remote = HttpRemote::new(&base, Duration::from_secs(5)).unwrap();

    let err = remote.submit(&operation()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
    server.await.unwrap();
  }

  #[tokio::test]
  async fn test_disconnected_always_fails() {
    assert!(DisconnectedRemote.submit(&operation()).await.is_err());
  }
}
