use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use ptero_pilot_engine::{
    ClientOptions, Credential, EngineOptions, MonitorConfig, PanelEngine, RetryPolicy,
    WizardConfig,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APP_KEY: &str = "ptla_integration";
pub const CLIENT_KEY: &str = "ptlc_integration";

/// Find a free TCP port by binding to port 0
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener.local_addr().unwrap().port()
}

/// Wait for a TCP port to accept connections
pub async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for port {} to be ready", port);
        }
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Canned reply for one route.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Value>,
    pub delay: Option<Duration>,
    pub retry_after: Option<u64>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            delay: None,
            retry_after: None,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: None,
            delay: None,
            retry_after: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }
}

/// A request as the fake panel saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct PanelState {
    routes: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Recorded>>,
}

impl PanelState {
    /// Pops queued replies until one is left, then keeps repeating it.
    fn reply_for(&self, method: &str, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&(method.to_string(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Scripted panel served over real HTTP on an ephemeral port.
pub struct FakePanel {
    pub port: u16,
    state: Arc<PanelState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakePanel {
    pub async fn start() -> Self {
        let port = find_free_port();
        let state = Arc::new(PanelState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("Failed to bind fake panel");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake panel crashed");
        });

        wait_for_port(port, Duration::from_secs(5)).await;
        Self {
            port,
            state,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Queue a reply for `method` on an absolute path such as `/api/application/nodes`.
    pub fn on(&self, method: Method, path: &str, reply: Reply) {
        self.state
            .routes
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn on_app(&self, method: Method, path: &str, reply: Reply) {
        self.on(method, &format!("/api/application/{path}"), reply);
    }

    pub fn on_client(&self, method: Method, path: &str, reply: Reply) {
        self.on(method, &format!("/api/client/{path}"), reply);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method.as_str() && c.path == path)
            .collect()
    }

    pub fn credential(&self) -> Credential {
        Credential::new(&self.url(), APP_KEY)
            .unwrap()
            .with_client_key(CLIENT_KEY)
            .unwrap()
    }

    /// Engine with fast, deterministic retries.
    pub fn engine(&self, timeout: Duration, retry: RetryPolicy, wizard: WizardConfig) -> PanelEngine {
        let options = EngineOptions {
            client: ClientOptions {
                timeout,
                retry,
                ..ClientOptions::default()
            },
            wizard,
            monitor: MonitorConfig {
                min_interval: Duration::from_millis(10),
            },
        };
        PanelEngine::new(&self.credential(), options).expect("engine")
    }
}

impl Drop for FakePanel {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
        jitter: false,
    }
}

async fn handle(
    State(state): State<Arc<PanelState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.calls.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: header("authorization"),
        accept: header("accept"),
        body: serde_json::from_slice(&body).ok(),
    });

    let Some(reply) = state.reply_for(method.as_str(), uri.path()) else {
        let body = serde_json::json!({"errors": [{
            "code": "NotFoundHttpException",
            "status": "404",
            "detail": "The requested resource could not be found on the server."
        }]});
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match reply.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };
    if let Some(secs) = reply.retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(secs));
    }
    response
}

/// `meta.pagination` block of a listing page.
pub fn page(data: Vec<Value>, current: u32, total: u32) -> Value {
    let count = data.len();
    serde_json::json!({
        "object": "list",
        "data": data,
        "meta": {"pagination": {
            "total": count,
            "count": count,
            "per_page": 100,
            "current_page": current,
            "total_pages": total
        }}
    })
}

pub fn item(object: &str, attributes: Value) -> Value {
    serde_json::json!({"object": object, "attributes": attributes})
}
