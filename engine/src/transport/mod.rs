pub mod http_client;
pub mod pagination;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;

pub use http_client::{ClientOptions, PanelClient};
pub use pagination::{paginate, PageCursor, DEFAULT_PAGE_SIZE};
pub use reqwest::Method;
pub use retry::RetryPolicy;

/// Query string pairs, sent in order.
pub type Query = Vec<(String, String)>;

/// One JSON call against the panel. Paths are relative to the API scope root
/// (`servers/5`, not `/api/application/servers/5`).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(String, String)],
    ) -> Result<Value, ApiError>;
}

/// Build a query from string pairs.
pub fn query<const N: usize>(pairs: [(&str, &str); N]) -> Query {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
