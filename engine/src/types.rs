use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiErrorKind};

/// Image used when an egg declares none at all.
pub const FALLBACK_DOCKER_IMAGE: &str = "ghcr.io/pterodactyl/yolks:java_17";

/// Deserialize the `attributes` block of a panel object.
pub fn attributes<T: DeserializeOwned>(object: &Value) -> Result<T, ApiError> {
    let attrs = object.get("attributes").unwrap_or(object);
    serde_json::from_value(attrs.clone()).map_err(|e| {
        ApiError::new(
            ApiErrorKind::Server,
            None,
            format!("unexpected panel response shape: {e}"),
        )
    })
}

// ============================================================================
// Allocations
// ============================================================================

/// An IP:port on a node that a server can bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRef {
    pub id: u64,
    #[serde(default)]
    pub node_id: u64,
    pub ip: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub assigned: bool,
}

impl AllocationRef {
    pub fn from_object(object: &Value, node_id: u64) -> Result<Self, ApiError> {
        let mut alloc: Self = attributes(object)?;
        alloc.node_id = node_id;
        Ok(alloc)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.alias.as_deref().unwrap_or(&self.ip), self.port)
    }
}

// ============================================================================
// Eggs
// ============================================================================

/// One configurable variable declared by an egg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EggVariable {
    pub name: String,
    pub env_variable: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub default_value: String,
    #[serde(default)]
    pub user_editable: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rules: String,
}

/// Server template as fetched for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EggDefinition {
    pub id: u64,
    pub nest_id: u64,
    pub name: String,
    pub startup: String,
    /// Display name -> image reference.
    pub docker_images: BTreeMap<String, String>,
    /// In panel order.
    pub variables: Vec<EggVariable>,
}

#[derive(Debug, Deserialize)]
struct RawEgg {
    id: u64,
    nest: u64,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    startup: String,
    #[serde(default)]
    docker_image: Option<String>,
    #[serde(default)]
    docker_images: Option<Value>,
    #[serde(default)]
    relationships: Option<Value>,
}

impl EggDefinition {
    /// Parse `nests/{nest}/eggs/{egg}?include=variables`.
    pub fn from_object(object: &Value) -> Result<Self, ApiError> {
        let raw: RawEgg = attributes(object)?;

        let mut docker_images = BTreeMap::new();
        if let Some(Value::Object(map)) = &raw.docker_images {
            for (label, image) in map {
                if let Some(image) = image.as_str() {
                    docker_images.insert(label.clone(), image.to_string());
                }
            }
        }
        if docker_images.is_empty() {
            if let Some(image) = raw.docker_image.filter(|i| !i.is_empty()) {
                let label = image.rsplit(':').next().unwrap_or(&image).to_string();
                docker_images.insert(label, image);
            }
        }
        if docker_images.is_empty() {
            docker_images.insert("default".to_string(), FALLBACK_DOCKER_IMAGE.to_string());
        }

        let variables = raw
            .relationships
            .as_ref()
            .and_then(|r| r.get("variables"))
            .and_then(|v| v.get("data"))
            .and_then(Value::as_array)
            .map(|items| items.iter().map(attributes::<EggVariable>).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            id: raw.id,
            nest_id: raw.nest,
            name: raw.name,
            startup: raw.startup,
            docker_images,
            variables,
        })
    }

    /// First image by display name; every egg has at least one.
    pub fn default_image(&self) -> &str {
        self.docker_images
            .values()
            .next()
            .map(String::as_str)
            .unwrap_or(FALLBACK_DOCKER_IMAGE)
    }

    pub fn offers_image(&self, image: &str) -> bool {
        self.docker_images.values().any(|i| i == image)
    }
}

fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

// ============================================================================
// Servers
// ============================================================================

/// Identifying attributes of an existing server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    pub id: u64,
    #[serde(default)]
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub allocation: Option<u64>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Kill => "kill",
        }
    }
}

// ============================================================================
// Live resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    Stopped,
    /// Panel unreachable for this tick.
    Offline,
}

impl PowerState {
    /// Map the panel's `current_state`. The panel calls a stopped server "offline".
    pub fn from_panel(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "starting" => Self::Starting,
            "stopping" => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// One reading of a server's live usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub server: String,
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub state: PowerState,
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub disk_bytes: Option<u64>,
    pub network_rx_bytes: Option<u64>,
    pub network_tx_bytes: Option<u64>,
    pub uptime_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStats {
    current_state: String,
    #[serde(default)]
    resources: RawUsage,
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    cpu_absolute: Option<f64>,
    memory_bytes: Option<u64>,
    disk_bytes: Option<u64>,
    network_rx_bytes: Option<u64>,
    network_tx_bytes: Option<u64>,
    uptime: Option<u64>,
}

impl ResourceSnapshot {
    /// Parse `servers/{identifier}/resources` from the client API.
    pub fn from_stats(
        server: &str,
        sequence: u64,
        at: OffsetDateTime,
        body: &Value,
    ) -> Result<Self, ApiError> {
        let raw: RawStats = attributes(body)?;
        let usage = raw.resources;
        Ok(Self {
            server: server.to_string(),
            sequence,
            at,
            state: PowerState::from_panel(&raw.current_state),
            cpu_percent: usage.cpu_absolute,
            memory_bytes: usage.memory_bytes,
            disk_bytes: usage.disk_bytes,
            network_rx_bytes: usage.network_rx_bytes,
            network_tx_bytes: usage.network_tx_bytes,
            uptime_ms: usage.uptime,
        })
    }

    /// Reading for a tick whose fetch failed.
    pub fn degraded(server: &str, sequence: u64, at: OffsetDateTime) -> Self {
        Self {
            server: server.to_string(),
            sequence,
            at,
            state: PowerState::Offline,
            cpu_percent: None,
            memory_bytes: None,
            disk_bytes: None,
            network_rx_bytes: None,
            network_tx_bytes: None,
            uptime_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn egg_body(images: Value, image: Value) -> Value {
        json!({
            "object": "egg",
            "attributes": {
                "id": 3,
                "nest": 1,
                "name": "Paper",
                "docker_image": image,
                "docker_images": images,
                "startup": "java -jar {{SERVER_JARFILE}}",
                "relationships": {"variables": {"object": "list", "data": [
                    {"object": "egg_variable", "attributes": {
                        "name": "Max Players", "env_variable": "MAX_PLAYERS",
                        "default_value": "10", "user_editable": true, "rules": "required|integer|between:1,100"}},
                    {"object": "egg_variable", "attributes": {
                        "name": "Motd", "env_variable": "MOTD",
                        "default_value": null, "user_editable": true, "rules": "nullable|string"}}
                ]}}
            }
        })
    }

    #[test]
    fn test_parse_egg_with_variables() {
        let egg = EggDefinition::from_object(&egg_body(
            json!({"Java 17": "ghcr.io/pterodactyl/yolks:java_17", "Java 21": "ghcr.io/pterodactyl/yolks:java_21"}),
            Value::Null,
        ))
        .unwrap();

        assert_eq!(egg.id, 3);
        assert_eq!(egg.nest_id, 1);
        assert_eq!(egg.variables.len(), 2);
        assert_eq!(egg.variables[0].env_variable, "MAX_PLAYERS");
        assert_eq!(egg.variables[0].rules, "required|integer|between:1,100");
        assert_eq!(egg.variables[1].default_value, "");
        assert_eq!(egg.default_image(), "ghcr.io/pterodactyl/yolks:java_17");
        assert!(egg.offers_image("ghcr.io/pterodactyl/yolks:java_21"));
    }

    #[test]
    fn test_egg_image_fallbacks() {
        let single = EggDefinition::from_object(&egg_body(
            json!({}),
            json!("ghcr.io/pterodactyl/yolks:java_11"),
        ))
        .unwrap();
        assert_eq!(
            single.docker_images.get("java_11").map(String::as_str),
            Some("ghcr.io/pterodactyl/yolks:java_11")
        );

        let none = EggDefinition::from_object(&egg_body(Value::Null, Value::Null)).unwrap();
        assert_eq!(none.default_image(), FALLBACK_DOCKER_IMAGE);
        assert!(none.docker_images.contains_key("default"));
    }

    #[test]
    fn test_snapshot_from_stats() {
        let body = json!({"object": "stats", "attributes": {
            "current_state": "running", "is_suspended": false,
            "resources": {"memory_bytes": 1024, "cpu_absolute": 12.5, "disk_bytes": 2048,
                          "network_rx_bytes": 10, "network_tx_bytes": 20, "uptime": 5000}}});
        let at = OffsetDateTime::now_utc();
        let snap = ResourceSnapshot::from_stats("abcd1234", 4, at, &body).unwrap();

        assert_eq!(snap.state, PowerState::Running);
        assert_eq!(snap.cpu_percent, Some(12.5));
        assert_eq!(snap.memory_bytes, Some(1024));
        assert_eq!(snap.uptime_ms, Some(5000));
        assert_eq!(snap.sequence, 4);
    }

    #[test]
    fn test_panel_offline_means_stopped() {
        assert_eq!(PowerState::from_panel("offline"), PowerState::Stopped);
        assert_eq!(PowerState::from_panel("starting"), PowerState::Starting);
        let degraded = ResourceSnapshot::degraded("x", 1, OffsetDateTime::now_utc());
        assert_eq!(degraded.state, PowerState::Offline);
        assert!(degraded.cpu_percent.is_none());
    }

    #[test]
    fn test_allocation_address_prefers_alias() {
        let obj = json!({"object": "allocation", "attributes": {
            "id": 11, "ip": "10.0.0.5", "alias": "play.example.com", "port": 25565, "assigned": false}});
        let alloc = AllocationRef::from_object(&obj, 5).unwrap();
        assert_eq!(alloc.node_id, 5);
        assert_eq!(alloc.address(), "play.example.com:25565");
    }
}
