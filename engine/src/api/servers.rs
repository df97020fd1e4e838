use futures::TryStreamExt;
use reqwest::Method;
use serde_json::Value;

use super::PanelApi;
use crate::error::ApiError;
use crate::transport::query;
use crate::types::{attributes, ServerRef};

const SERVER_INCLUDES: &str = "allocations,user,egg,nest,variables,location,node,databases";

impl PanelApi {
    /// Server with every relationship expanded.
    pub async fn get_server(&self, server_id: u64) -> Result<Value, ApiError> {
        self.request(
            Method::GET,
            &format!("servers/{server_id}"),
            None,
            &query([("include", SERVER_INCLUDES)]),
        )
        .await
    }

    pub async fn get_server_by_external_id(&self, external_id: &str) -> Result<Value, ApiError> {
        let external_id = super::path_segment(external_id, "external id")?;
        self.request(
            Method::GET,
            &format!("servers/external/{external_id}"),
            None,
            &[],
        )
        .await
    }

    pub async fn create_server(&self, payload: Value) -> Result<Value, ApiError> {
        self.request(Method::POST, "servers", Some(payload), &[])
            .await
    }

    /// Name, owner, external id, description.
    pub async fn update_server_details(
        &self,
        server_id: u64,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.request(
            Method::PATCH,
            &format!("servers/{server_id}/details"),
            Some(payload),
            &[],
        )
        .await
    }

    /// Limits, feature limits, allocation.
    pub async fn update_server_build(
        &self,
        server_id: u64,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.request(
            Method::PATCH,
            &format!("servers/{server_id}/build"),
            Some(payload),
            &[],
        )
        .await
    }

    /// Startup command, image, egg, environment.
    pub async fn update_server_startup(
        &self,
        server_id: u64,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.request(
            Method::PATCH,
            &format!("servers/{server_id}/startup"),
            Some(payload),
            &[],
        )
        .await
    }

    pub async fn suspend_server(&self, server_id: u64) -> Result<(), ApiError> {
        self.server_action(server_id, "suspend").await
    }

    pub async fn unsuspend_server(&self, server_id: u64) -> Result<(), ApiError> {
        self.server_action(server_id, "unsuspend").await
    }

    pub async fn reinstall_server(&self, server_id: u64) -> Result<(), ApiError> {
        self.server_action(server_id, "reinstall").await
    }

    async fn server_action(&self, server_id: u64, action: &str) -> Result<(), ApiError> {
        self.request(
            Method::POST,
            &format!("servers/{server_id}/{action}"),
            None,
            &[],
        )
        .await
        .map(|_| ())
    }

    /// `force` skips the daemon-side cleanup the panel normally waits for.
    pub async fn delete_server(&self, server_id: u64, force: bool) -> Result<(), ApiError> {
        let path = if force {
            format!("servers/{server_id}/force")
        } else {
            format!("servers/{server_id}")
        };
        self.request(Method::DELETE, &path, None, &[])
            .await
            .map(|_| ())
    }

    pub async fn list_server_databases(&self, server_id: u64) -> Result<Vec<Value>, ApiError> {
        self.collect(&format!("servers/{server_id}/databases"), Vec::new())
            .await
    }

    /// Servers whose name matches exactly. The panel filter is a prefix/like
    /// match, so results are narrowed locally.
    pub async fn find_servers(&self, name: &str) -> Result<Vec<ServerRef>, ApiError> {
        let wanted = name.to_string();
        self.stream("servers", query([("filter[name]", name)]))
            .and_then(|obj| async move { attributes::<ServerRef>(&obj) })
            .try_filter(move |server| futures::future::ready(server.name == wanted))
            .try_collect()
            .await
    }
}
