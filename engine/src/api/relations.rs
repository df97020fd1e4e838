//! Cross-resource lookups the application API has no filter for. Each one
//! reads the full listing and narrows it locally.

use futures::TryStreamExt;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use super::{PanelApi, ResourceKind};
use crate::error::ApiError;
use crate::transport::query;

const MOUNT_INCLUDES: &str = "servers,nodes,eggs";

/// Resources a mount can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountRelation {
    Servers,
    Nodes,
    Eggs,
}

impl MountRelation {
    pub fn key(self) -> &'static str {
        match self {
            Self::Servers => "servers",
            Self::Nodes => "nodes",
            Self::Eggs => "eggs",
        }
    }
}

/// Servers of one nest, matched through the nest's eggs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestServers {
    pub nest_id: u64,
    pub name: String,
    pub servers: Vec<Value>,
}

/// A server database living on a particular database host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostedDatabase {
    pub server_id: u64,
    pub server_name: String,
    pub database: Value,
}

fn attr_u64(obj: &Value, key: &str) -> Option<u64> {
    obj["attributes"][key].as_u64()
}

fn attr_str(obj: &Value, key: &str) -> String {
    obj["attributes"][key]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Host id of a database object. The panel sends it as a bare id; expanded
/// forms carry it nested.
fn database_host(database: &Value) -> Option<u64> {
    let attrs = &database["attributes"];
    attrs["host"]
        .as_u64()
        .or_else(|| attrs["host"]["id"].as_u64())
        .or_else(|| attrs["relationships"]["host"]["attributes"]["id"].as_u64())
}

impl PanelApi {
    async fn servers_where(&self, key: &'static str, id: u64) -> Result<Vec<Value>, ApiError> {
        self.stream("servers", Vec::new())
            .try_filter(move |server| futures::future::ready(attr_u64(server, key) == Some(id)))
            .try_collect()
            .await
    }

    pub async fn servers_on_node(&self, node_id: u64) -> Result<Vec<Value>, ApiError> {
        self.servers_where("node", node_id).await
    }

    pub async fn servers_using_egg(&self, egg_id: u64) -> Result<Vec<Value>, ApiError> {
        self.servers_where("egg", egg_id).await
    }

    /// Every nest with the servers built from its eggs, in nest order.
    pub async fn servers_by_nest(&self) -> Result<Vec<NestServers>, ApiError> {
        let nests = self.list(ResourceKind::Nests).await?;
        let servers = self.list(ResourceKind::Servers).await?;

        let mut grouped = Vec::with_capacity(nests.len());
        for nest in &nests {
            let Some(nest_id) = attr_u64(nest, "id") else {
                continue;
            };
            let eggs: BTreeSet<u64> = self
                .list_eggs(nest_id)
                .await?
                .iter()
                .filter_map(|egg| attr_u64(egg, "id"))
                .collect();
            let members = servers
                .iter()
                .filter(|s| attr_u64(s, "egg").is_some_and(|egg| eggs.contains(&egg)))
                .cloned()
                .collect();
            grouped.push(NestServers {
                nest_id,
                name: attr_str(nest, "name"),
                servers: members,
            });
        }
        Ok(grouped)
    }

    /// Mount with its servers, nodes and eggs expanded.
    pub async fn get_mount(&self, mount_id: u64) -> Result<Value, ApiError> {
        self.request(
            Method::GET,
            &format!("mounts/{mount_id}"),
            None,
            &query([("include", MOUNT_INCLUDES)]),
        )
        .await
    }

    pub async fn mount_relation(
        &self,
        mount_id: u64,
        relation: MountRelation,
    ) -> Result<Vec<Value>, ApiError> {
        let mount = self.get_mount(mount_id).await?;
        let key = relation.key();
        let related = mount["attributes"]["relationships"][key]["data"]
            .as_array()
            .or_else(|| mount["relationships"][key]["data"].as_array());
        Ok(related.cloned().unwrap_or_default())
    }

    /// Databases on `host_id` across all servers. One listing per server.
    pub async fn databases_on_host(&self, host_id: u64) -> Result<Vec<HostedDatabase>, ApiError> {
        let servers = self.list(ResourceKind::Servers).await?;

        let mut hosted = Vec::new();
        for server in &servers {
            let Some(server_id) = attr_u64(server, "id") else {
                continue;
            };
            for database in self.list_server_databases(server_id).await? {
                if database_host(&database) == Some(host_id) {
                    hosted.push(HostedDatabase {
                        server_id,
                        server_name: attr_str(server, "name"),
                        database,
                    });
                }
            }
        }
        Ok(hosted)
    }
}
