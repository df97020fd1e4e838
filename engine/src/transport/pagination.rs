use futures::stream::{self, Stream};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;

use super::{Query, Transport};
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Position inside a paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub current: u32,
    pub total: u32,
    pub per_page: u32,
}

impl PageCursor {
    pub fn first(per_page: u32) -> Self {
        Self {
            current: 1,
            total: 1,
            per_page,
        }
    }

    pub fn is_last(&self) -> bool {
        self.current >= self.total
    }

    /// The following page, or `None` once the listing is exhausted.
    pub fn next(&self) -> Option<Self> {
        if self.is_last() {
            return None;
        }
        Some(Self {
            current: self.current + 1,
            ..*self
        })
    }

    /// Cursor from a `meta.pagination` block. Listings without one are a
    /// single page. `current` is clamped so that `current <= total` holds.
    pub fn from_meta(body: &Value, per_page: u32) -> Self {
        let meta = body
            .get("meta")
            .and_then(|m| m.get("pagination"))
            .and_then(|p| serde_json::from_value::<PaginationMeta>(p.clone()).ok());

        match meta {
            Some(m) => {
                let total = m.total_pages.max(1);
                Self {
                    current: m.current_page.clamp(1, total),
                    total,
                    per_page: m.per_page.unwrap_or(per_page),
                }
            }
            None => Self::first(per_page),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaginationMeta {
    current_page: u32,
    total_pages: u32,
    per_page: Option<u32>,
}

struct PageState<'a> {
    transport: &'a dyn Transport,
    path: String,
    query: Query,
    per_page: u32,
    buffered: VecDeque<Value>,
    next_page: Option<u32>,
}

/// Lazily walk every page of a listing and yield the items of `data` in page
/// order. Stops at the first error. Re-invoke to restart from page 1.
pub fn paginate<'a>(
    transport: &'a dyn Transport,
    path: &str,
    query: Query,
    per_page: u32,
) -> impl Stream<Item = Result<Value, ApiError>> + Send + 'a {
    let state = PageState {
        transport,
        path: path.to_string(),
        query,
        per_page: per_page.max(1),
        buffered: VecDeque::new(),
        next_page: Some(1),
    };

    stream::try_unfold(state, next_item)
}

async fn next_item(mut state: PageState<'_>) -> Result<Option<(Value, PageState<'_>)>, ApiError> {
    loop {
        if let Some(item) = state.buffered.pop_front() {
            return Ok(Some((item, state)));
        }
        let Some(page) = state.next_page else {
            return Ok(None);
        };

        let mut query = state.query.clone();
        query.push(("page".to_string(), page.to_string()));
        query.push(("per_page".to_string(), state.per_page.to_string()));

        let body = state
            .transport
            .request(Method::GET, &state.path, None, &query)
            .await?;

        let cursor = PageCursor::from_meta(&body, state.per_page);
        state.next_page = if cursor.current < page {
            // Panel echoed an earlier page; stop rather than loop forever.
            None
        } else {
            cursor.next().map(|c| c.current)
        };

        if let Some(Value::Array(items)) = body.get("data") {
            state.buffered.extend(items.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use futures::TryStreamExt;
    use serde_json::json;

    fn page(items: &[u64], current: u32, total: u32) -> Value {
        json!({
            "object": "list",
            "data": items.iter().map(|id| json!({"object": "node", "attributes": {"id": id}})).collect::<Vec<_>>(),
            "meta": {"pagination": {"total": 0, "count": items.len(), "per_page": 2, "current_page": current, "total_pages": total}}
        })
    }

    fn ids(items: &[Value]) -> Vec<u64> {
        items
            .iter()
            .map(|v| v["attributes"]["id"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_cursor_advances_to_terminal() {
        let cursor = PageCursor {
            current: 1,
            total: 2,
            per_page: 50,
        };
        let second = cursor.next().unwrap();
        assert_eq!(second.current, 2);
        assert!(second.is_last());
        assert!(second.next().is_none());
    }

    #[test]
    fn test_cursor_from_meta_clamps() {
        let body = json!({"meta": {"pagination": {"current_page": 9, "total_pages": 3}}});
        let cursor = PageCursor::from_meta(&body, 100);
        assert_eq!(cursor.current, 3);
        assert_eq!(cursor.total, 3);
        assert_eq!(cursor.per_page, 100);

        let cursor = PageCursor::from_meta(&json!({"data": []}), 25);
        assert_eq!(cursor, PageCursor::first(25));
    }

    #[tokio::test]
    async fn test_concatenates_pages_in_order() {
        let fake = FakeTransport::new();
        fake.on_get("nodes", Ok(page(&[1, 2], 1, 3)));
        fake.on_get("nodes", Ok(page(&[3, 4], 2, 3)));
        fake.on_get("nodes", Ok(page(&[5], 3, 3)));

        let items: Vec<Value> = paginate(&fake, "nodes", Vec::new(), 2)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids(&items), vec![1, 2, 3, 4, 5]);
        let calls = fake.calls();
        assert_eq!(calls.len(), 3);
        for (i, call) in calls.iter().enumerate() {
            assert!(call.query.contains(&("page".to_string(), (i + 1).to_string())));
            assert!(call.query.contains(&("per_page".to_string(), "2".to_string())));
        }
    }

    #[tokio::test]
    async fn test_single_page_without_meta() {
        let fake = FakeTransport::new();
        fake.on_get("nests/1/eggs", Ok(json!({"data": [{"attributes": {"id": 7}}]})));

        let items: Vec<Value> = paginate(&fake, "nests/1/eggs", Vec::new(), 100)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids(&items), vec![7]);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_is_lazy() {
        use futures::StreamExt;

        let fake = FakeTransport::new();
        fake.on_get("servers", Ok(page(&[1, 2], 1, 2)));
        fake.on_get("servers", Ok(page(&[3], 2, 2)));

        let stream = paginate(&fake, "servers", Vec::new(), 2);
        futures::pin_mut!(stream);
        let first = stream.next().await.unwrap().unwrap();

        assert_eq!(first["attributes"]["id"], 1);
        assert_eq!(fake.calls().len(), 1, "second page fetched too early");
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let fake = FakeTransport::new();
        fake.on_get("users", Ok(page(&[1], 1, 2)));
        fake.on_get("users", Err(ApiError::from_response(500, b"")));

        let result: Result<Vec<Value>, ApiError> = paginate(&fake, "users", Vec::new(), 1)
            .try_collect()
            .await;

        assert!(result.is_err());
    }
}
