//! In-process HTTP fixtures for unit tests.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub(crate) const VMSET_PATH: &str = "/mux/vms1-2";

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeInner {
    requests: Vec<Recorded>,
    responses: HashMap<String, (StatusCode, Value)>,
}

/// Records every request and answers with a canned response per path
/// (200 `{}` unless told otherwise).
#[derive(Clone, Default)]
pub(crate) struct FakeSimulator {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeSimulator {
    pub fn respond(&self, path: &str, status: StatusCode, body: Value) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .insert(path.to_string(), (status, body));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Start serving and return the vmset base URL.
    pub async fn start(&self) -> String {
        let router = Router::new().fallback(record).with_state(self.clone());
        let addr = serve(router).await;
        format!("http://{addr}{VMSET_PATH}")
    }
}

async fn record(
    State(fake): State<FakeSimulator>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    let body = serde_json::from_slice(&body).ok();
    let mut inner = fake.inner.lock().unwrap();
    inner.requests.push(Recorded {
        method,
        path: path.clone(),
        headers,
        body,
    });
    let (status, response) = inner
        .responses
        .get(&path)
        .cloned()
        .unwrap_or((StatusCode::OK, json!({})));
    (status, Json(response))
}

pub(crate) async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Accepts connections and closes them without answering.
pub(crate) async fn hang_up_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    addr
}

/// An address nothing is listening on.
pub(crate) fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
