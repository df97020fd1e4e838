use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pagination::{paginate, DEFAULT_PAGE_SIZE};
use super::retry::RetryPolicy;
use super::{Query, Transport};
use crate::credential::{ApiScope, Credential};
use crate::error::{ApiError, ApiErrorKind, ClientError};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// reqwest-backed transport for one API scope of one panel.
#[derive(Clone)]
pub struct PanelClient {
    base_url: Url,
    http: reqwest::Client,
    api_key: Arc<str>,
    user_agent: String,
    retry: RetryPolicy,
    page_size: u32,
}

impl PanelClient {
    pub fn new(
        credential: &Credential,
        scope: ApiScope,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = credential.scope_url(scope)?;
        let api_key = credential
            .key_for(scope)
            .ok_or(ClientError::MissingClientKey)?;
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            base_url,
            http,
            api_key: Arc::from(api_key),
            user_agent: format!("ptero-pilot/{}", env!("CARGO_PKG_VERSION")),
            retry: options.retry,
            page_size: options.page_size.max(1),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn build_url(&self, path: &str) -> Result<Url, ApiError> {
        let relative = path.trim_start_matches('/');
        self.base_url.join(relative).map_err(|e| {
            ApiError::new(
                ApiErrorKind::Validation,
                None,
                format!("invalid request path {relative:?}: {e}"),
            )
        })
    }

    /// Flattened items of every page under `path`.
    pub fn paginate<'a>(
        &'a self,
        path: &str,
        query: Query,
    ) -> impl Stream<Item = Result<Value, ApiError>> + Send + 'a {
        paginate(self, path, query, self.page_size)
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        query: &[(String, String)],
        attempt: u32,
    ) -> Result<Value, (ApiError, Option<Duration>)> {
        let req_id = Uuid::new_v4().to_string();
        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .header("x-request-id", &req_id);

        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        debug!(%method, %url, attempt, request_id = %req_id, "panel request");
        let resp = req
            .send()
            .await
            .map_err(|e| (ApiError::from_reqwest(&e), None))?;
        let status = resp.status();

        if status.is_success() {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| (ApiError::from_reqwest(&e), None))?;
            return decode_success(status, &bytes).map_err(|e| (e, None));
        }

        let retry_after = parse_retry_after(resp.headers());
        let bytes = resp.bytes().await.unwrap_or_default();
        Err((ApiError::from_response(status.as_u16(), &bytes), retry_after))
    }
}

#[async_trait]
impl Transport for PanelClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let url = self.build_url(path)?;

        let mut retries: u32 = 0;
        loop {
            let (err, retry_after) = match self
                .attempt(&method, &url, body.as_ref(), query, retries + 1)
                .await
            {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if !self.retry.should_retry(&err, retries) {
                return Err(err);
            }

            let sleep_dur = self.retry.sleep_for(&err, retry_after, retries);
            warn!(
                %method,
                path,
                kind = %err.kind,
                status = ?err.status,
                retry = retries + 1,
                max_retries = self.retry.max_retries,
                delay_ms = sleep_dur.as_millis() as u64,
                "retrying panel request"
            );
            retries += 1;
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// 204 and empty bodies decode to `{}`.
fn decode_success(status: StatusCode, bytes: &[u8]) -> Result<Value, ApiError> {
    if status == StatusCode::NO_CONTENT || bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(bytes).map_err(|_| {
        ApiError::new(
            ApiErrorKind::Server,
            Some(status.as_u16()),
            "panel returned a non-JSON body",
        )
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn client() -> PanelClient {
        let cred = Credential::new("https://panel.example.com", "ptla_key").unwrap();
        PanelClient::new(&cred, ApiScope::Application, ClientOptions::default()).unwrap()
    }

    #[test]
    fn test_build_url_is_scoped() {
        let c = client();
        assert_eq!(
            c.build_url("servers/5").unwrap().as_str(),
            "https://panel.example.com/api/application/servers/5"
        );
        assert_eq!(
            c.build_url("/nodes/1/allocations").unwrap().as_str(),
            "https://panel.example.com/api/application/nodes/1/allocations"
        );
    }

    #[test]
    fn test_client_scope_needs_key() {
        let cred = Credential::new("https://panel.example.com", "ptla_key").unwrap();
        assert!(matches!(
            PanelClient::new(&cred, ApiScope::Client, ClientOptions::default()),
            Err(ClientError::MissingClientKey)
        ));
    }

    #[test]
    fn test_decode_success_bodies() {
        assert_eq!(
            decode_success(StatusCode::NO_CONTENT, b"").unwrap(),
            serde_json::json!({})
        );
        assert_eq!(
            decode_success(StatusCode::OK, b"  \n").unwrap(),
            serde_json::json!({})
        );
        assert_eq!(
            decode_success(StatusCode::OK, br#"{"object":"server"}"#).unwrap()["object"],
            "server"
        );
        let err = decode_success(StatusCode::OK, b"<html>").unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Server);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
