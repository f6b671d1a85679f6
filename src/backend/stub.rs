//! Minimal HTTP server standing in for the backend in tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::client::BackendClient;

/// What the server answers to one request.
pub struct Reply {
  pub status: u16,
  pub body: String,
  pub delay: Duration,
}

impl Reply {
  pub fn json(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
      delay: Duration::ZERO,
    }
  }

  pub fn empty(status: u16) -> Self {
    Self::json(status, "")
  }

  pub fn after(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

type Responder = dyn Fn(&str, &str) -> Reply + Send + Sync;

/// Serves every request with `respond(method, path_and_query)` and records
/// the requests in arrival order.
pub struct StubServer {
  url: String,
  requests: Arc<Mutex<Vec<String>>>,
  handle: JoinHandle<()>,
}

impl StubServer {
  pub async fn start<F>(respond: F) -> Self
  where
    F: Fn(&str, &str) -> Reply + Send + Sync + 'static,
  {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond: Arc<Responder> = Arc::new(respond);

    let seen = Arc::clone(&requests);
    let handle = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let seen = Arc::clone(&seen);
        let respond = Arc::clone(&respond);
        tokio::spawn(serve(stream, seen, respond));
      }
    });

    Self {
      url,
      requests,
      handle,
    }
  }

  pub fn client(&self) -> BackendClient {
    BackendClient::with_credentials(&self.url, "rest/v1", "anon".to_string(), None).unwrap()
  }

  /// `"METHOD /path?query"` for every request so far.
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }

  pub fn count(&self, method: &str) -> usize {
    let prefix = format!("{} ", method);
    self
      .requests()
      .iter()
      .filter(|r| r.starts_with(&prefix))
      .count()
  }
}

impl Drop for StubServer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

async fn serve(mut stream: TcpStream, seen: Arc<Mutex<Vec<String>>>, respond: Arc<Responder>) {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];
  let head_end = loop {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos + 4;
    }
    match stream.read(&mut chunk).await {
      Ok(0) | Err(_) => return,
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
    }
  };

  let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
  let mut lines = head.lines();
  let mut request_line = lines.next().unwrap_or_default().split_whitespace();
  let method = request_line.next().unwrap_or_default().to_string();
  let path = request_line.next().unwrap_or_default().to_string();
  let content_length = lines
    .filter_map(|line| line.split_once(':'))
    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);

  while buf.len() < head_end + content_length {
    match stream.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
    }
  }

  seen.lock().unwrap().push(format!("{} {}", method, path));
  let reply = respond(&method, &path);
  if !reply.delay.is_zero() {
    tokio::time::sleep(reply.delay).await;
  }

  let response = format!(
    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
    reply.status,
    reply.body.len(),
    reply.body
  );
  let _ = stream.write_all(response.as_bytes()).await;
  let _ = stream.shutdown().await;
}
