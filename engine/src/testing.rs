//! Scripted in-memory transport for unit tests.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ApiError;
use crate::transport::{Query, Transport};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Query,
}

#[derive(Default)]
struct Inner {
    // The last queued response for a route repeats once the queue drains.
    routes: HashMap<(Method, String), VecDeque<Result<Value, ApiError>>>,
    delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, response: Result<Value, ApiError>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    pub fn on_get(&self, path: &str, response: Result<Value, ApiError>) {
        self.on(Method::GET, path, response);
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.inner
            .lock()
            .unwrap()
            .delays
            .insert(path.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method != Method::GET)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let (response, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(RecordedCall {
                method: method.clone(),
                path: path.to_string(),
                body,
                query: query.to_vec(),
            });
            let delay = inner.delays.get(path).copied();
            let response = match inner.routes.get_mut(&(method.clone(), path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            (response, delay)
        };

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        response.unwrap_or_else(|| {
            Err(ApiError::from_response(
                404,
                format!("no scripted response for {method} {path}").as_bytes(),
            ))
        })
    }
}
