//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use health_watch::health::HealthStatus;
use health_watch::probe::{
    HealthClient, HealthEndpointsRequest, HealthRequest, HealthResponse, ProbeError,
};

/// Canned HTTP answer of a programmable backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Start a programmable mock backend on an ephemeral port.
///
/// The closure receives the raw request head (request line and headers).
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let response = f(head).await;
                        let status_text = match response.status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let mut out = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                            status_text,
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            out.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        out.push_str("\r\n");
                        out.push_str(&response.body);

                        let _ = socket.write_all(out.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Scripted `HealthClient` that records how it is used.
#[derive(Default)]
pub struct FakeHealthClient {
    batch: Mutex<HashMap<String, HealthStatus>>,
    pushes: Mutex<HashMap<String, Vec<HealthResponse>>>,
    subscribed: Mutex<Vec<String>>,
    fail_monitors: AtomicBool,
    batch_calls: AtomicUsize,
    monitor_calls: AtomicUsize,
}

impl FakeHealthClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer of batch checks for `url`.
    pub fn set_batch(&self, url: &str, health: HealthStatus) {
        self.batch.lock().unwrap().insert(url.to_string(), health);
    }

    /// Push `health` once from every monitor subscribed to `url`.
    pub fn push(&self, url: &str, health: HealthStatus) {
        let response = HealthResponse {
            request: HealthRequest {
                url: url.to_string(),
                protocol: health_watch::probe::Protocol::Http,
            },
            health,
        };
        self.push_raw(url, response);
    }

    /// Push an arbitrary response from monitors subscribed to `url`.
    pub fn push_raw(&self, url: &str, response: HealthResponse) {
        self.pushes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(response);
    }

    pub fn fail_monitors(&self, fail: bool) {
        self.fail_monitors.store(fail, Ordering::SeqCst);
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn monitor_calls(&self) -> usize {
        self.monitor_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthClient for FakeHealthClient {
    async fn health_check_endpoints(
        &self,
        req: &HealthEndpointsRequest,
    ) -> Result<HashMap<String, HealthStatus>, ProbeError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let batch = self.batch.lock().unwrap();
        Ok(req
            .endpoints
            .iter()
            .map(|url| (url.clone(), batch.get(url).copied().unwrap_or_default()))
            .collect())
    }

    async fn health_monitor(
        &self,
        req: HealthRequest,
        responses: mpsc::Sender<HealthResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ProbeError> {
        self.monitor_calls.fetch_add(1, Ordering::SeqCst);
        self.subscribed.lock().unwrap().push(req.url.clone());

        if self.fail_monitors.load(Ordering::SeqCst) {
            return Err(ProbeError::Request {
                url: req.url,
                reason: "scripted failure".to_string(),
            });
        }

        let scripted = self
            .pushes
            .lock()
            .unwrap()
            .get(&req.url)
            .cloned()
            .unwrap_or_default();
        for response in scripted {
            if responses.send(response).await.is_err() {
                return Err(ProbeError::Closed { url: req.url });
            }
        }

        cancel.cancelled().await;
        Ok(())
    }
}
