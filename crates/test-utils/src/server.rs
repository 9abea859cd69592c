//! In-process HTTP target for load tests.
//!
//! Binds an axum router to an ephemeral loopback port and counts every hit
//! per path, so tests can assert on how load was distributed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// The last request seen by `/echo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoedRequest {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EchoedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct TargetState {
    hits: Mutex<HashMap<String, u64>>,
    last_echo: Mutex<Option<EchoedRequest>>,
}

/// Mock HTTP server.
///
/// Routes:
/// - `/ok` returns 200
/// - `/status/:code` returns the given status
/// - `/slow/:ms` sleeps, then returns 200
/// - `/echo` records method, headers and body, then returns 200
///
/// The server task is aborted when the target is dropped.
pub struct MockTarget {
    addr: SocketAddr,
    state: Arc<TargetState>,
    handle: JoinHandle<()>,
}

impl MockTarget {
    /// Start a target on `127.0.0.1:0`.
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(TargetState::default());
        let app = Router::new()
            .route("/ok", get(ok_handler))
            .route("/status/:code", any(status_handler))
            .route("/slow/:ms", get(slow_handler))
            .route("/echo", any(echo_handler))
            .layer(middleware::from_fn_with_state(state.clone(), count_hits))
            .with_state(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        debug!(%addr, "Mock target listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                debug!(error = %e, "Mock target stopped");
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// Absolute URL for `path` on this target.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests seen on `path` (routing not required to match).
    pub fn hits(&self, path: &str) -> u64 {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> u64 {
        self.state.hits.lock().unwrap().values().sum()
    }

    pub fn last_echo(&self) -> Option<EchoedRequest> {
        self.state.last_echo.lock().unwrap().clone()
    }
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn count_hits(State(state): State<Arc<TargetState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    *state.hits.lock().unwrap().entry(path).or_insert(0) += 1;
    next.run(request).await
}

async fn ok_handler() -> &'static str {
    "ok"
}

async fn status_handler(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn slow_handler(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn echo_handler(
    State(state): State<Arc<TargetState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let headers = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();

    *state.last_echo.lock().unwrap() = Some(EchoedRequest {
        method: method.to_string(),
        headers,
        body: body.to_vec(),
    });
    StatusCode::OK
}
