//! Typed wrappers over the panel's documented endpoints.

pub mod client;
pub mod eggs;
pub mod nodes;
pub mod relations;
pub mod servers;

use futures::{Stream, TryStreamExt};
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ApiError, ApiErrorKind};
use crate::transport::{paginate, Query, Transport};

pub use client::ClientApi;
pub use nodes::{parse_ports, AllocationRequest};
pub use relations::{HostedDatabase, MountRelation, NestServers};

/// Collections that support plain list/get/create/update/delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Nodes,
    Servers,
    Users,
    Roles,
    Nests,
    Mounts,
    DatabaseHosts,
    Locations,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        Self::Nodes,
        Self::Servers,
        Self::Users,
        Self::Roles,
        Self::Nests,
        Self::Mounts,
        Self::DatabaseHosts,
        Self::Locations,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Servers => "servers",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::Nests => "nests",
            Self::Mounts => "mounts",
            Self::DatabaseHosts => "database-hosts",
            Self::Locations => "locations",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.path() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Application API surface. Cheap to clone; shares one transport.
#[derive(Clone)]
pub struct PanelApi {
    transport: Arc<dyn Transport>,
    page_size: u32,
}

impl PanelApi {
    pub fn new(transport: Arc<dyn Transport>, page_size: u32) -> Self {
        Self {
            transport,
            page_size: page_size.max(1),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(String, String)],
    ) -> Result<Value, ApiError> {
        self.transport.request(method, path, body, query).await
    }

    /// Lazy item stream over every page of `path`.
    pub fn stream<'a>(
        &'a self,
        path: &str,
        query: Query,
    ) -> impl Stream<Item = Result<Value, ApiError>> + Send + 'a {
        paginate(self.transport.as_ref(), path, query, self.page_size)
    }

    pub async fn collect(&self, path: &str, query: Query) -> Result<Vec<Value>, ApiError> {
        self.stream(path, query).try_collect().await
    }

    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<Value>, ApiError> {
        self.collect(kind.path(), Vec::new()).await
    }

    pub async fn get(&self, kind: ResourceKind, id: u64) -> Result<Value, ApiError> {
        self.request(Method::GET, &format!("{}/{}", kind.path(), id), None, &[])
            .await
    }

    pub async fn create(&self, kind: ResourceKind, payload: Value) -> Result<Value, ApiError> {
        self.request(Method::POST, kind.path(), Some(payload), &[])
            .await
    }

    pub async fn update(
        &self,
        kind: ResourceKind,
        id: u64,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.request(
            Method::PATCH,
            &format!("{}/{}", kind.path(), id),
            Some(payload),
            &[],
        )
        .await
    }

    pub async fn delete(&self, kind: ResourceKind, id: u64) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("{}/{}", kind.path(), id), None, &[])
            .await
            .map(|_| ())
    }
}

/// Reject identifiers that would escape their path segment.
pub(crate) fn path_segment(value: &str, field: &str) -> Result<String, ApiError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(value.to_string())
    } else {
        Err(ApiError::new(
            ApiErrorKind::Validation,
            None,
            format!("{field} {value:?} is not a valid identifier"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use serde_json::json;

    #[test]
    fn test_resource_kind_round_trips_path() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.path().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("eggs".parse::<ResourceKind>().is_err());
    }

    #[tokio::test]
    async fn test_crud_paths() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(Method::PATCH, "roles/4", Ok(json!({"attributes": {"id": 4}})));
        fake.on(Method::DELETE, "mounts/9", Ok(json!({})));
        fake.on(Method::POST, "database-hosts", Ok(json!({"attributes": {"id": 2}})));
        let api = PanelApi::new(fake.clone(), 100);

        api.update(ResourceKind::Roles, 4, json!({"name": "ops"}))
            .await
            .unwrap();
        api.delete(ResourceKind::Mounts, 9).await.unwrap();
        let created = api
            .create(ResourceKind::DatabaseHosts, json!({"name": "db"}))
            .await
            .unwrap();

        assert_eq!(created["attributes"]["id"], 2);
        assert_eq!(fake.count(&Method::PATCH, "roles/4"), 1);
        assert_eq!(fake.count(&Method::DELETE, "mounts/9"), 1);
        let calls = fake.calls();
        assert_eq!(calls[0].body.as_ref().unwrap()["name"], "ops");
    }

    #[test]
    fn test_path_segment_rejects_traversal() {
        assert!(path_segment("1a2b3c4d", "identifier").is_ok());
        assert!(path_segment("../users", "identifier").is_err());
        assert!(path_segment("", "identifier").is_err());
    }
}
