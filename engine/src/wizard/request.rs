use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::FieldError;
use crate::types::EggDefinition;

pub const MAX_NAME_LEN: usize = 191;

/// Container limits in MiB / percent. Zero memory, disk or cpu means unlimited;
/// swap -1 means unlimited swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: u32,
    pub cpu: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: 1024,
            swap: 0,
            disk: 5120,
            io: 500,
            cpu: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureLimits {
    pub databases: u32,
    pub backups: u32,
    pub allocations: u32,
}

impl Default for FeatureLimits {
    fn default() -> Self {
        Self {
            databases: 5,
            backups: 3,
            allocations: 1,
        }
    }
}

/// What the caller wants provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    pub user_id: u64,
    pub node_id: u64,
    pub egg_id: u64,
    /// Looked up from the egg when absent.
    #[serde(default)]
    pub nest_id: Option<u64>,
    /// Must be one of the egg's images; the egg's first image when absent.
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub startup: Option<String>,
    /// Env key -> value, merged over the egg's defaults.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub feature_limits: FeatureLimits,
}

impl ProvisionRequest {
    pub fn new(name: impl Into<String>, user_id: u64, node_id: u64, egg_id: u64) -> Self {
        Self {
            name: name.into(),
            description: None,
            external_id: None,
            user_id,
            node_id,
            egg_id,
            nest_id: None,
            docker_image: None,
            startup: None,
            overrides: BTreeMap::new(),
            limits: ResourceLimits::default(),
            feature_limits: FeatureLimits::default(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Checks that do not depend on the egg.
    pub(crate) fn check_fields(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let len = self.name.trim().chars().count();
        if len == 0 || self.name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError {
                field: Some("name".to_string()),
                rule: Some("between".to_string()),
                detail: format!("server name must be 1 to {MAX_NAME_LEN} characters"),
            });
        }
        if self.limits.swap < -1 {
            errors.push(FieldError {
                field: Some("limits.swap".to_string()),
                rule: Some("min".to_string()),
                detail: "swap must be -1 (unlimited) or more".to_string(),
            });
        }
        for (field, value) in [
            ("limits.memory", self.limits.memory),
            ("limits.disk", self.limits.disk),
            ("limits.cpu", self.limits.cpu),
        ] {
            if value < 0 {
                errors.push(FieldError {
                    field: Some(field.to_string()),
                    rule: Some("min".to_string()),
                    detail: format!("{field} may not be negative"),
                });
            }
        }
        errors
    }

    /// Pick the docker image, rejecting one the egg does not offer.
    pub(crate) fn image_for<'a>(&'a self, egg: &'a EggDefinition) -> Result<&'a str, FieldError> {
        match self.docker_image.as_deref() {
            Some(image) if egg.offers_image(image) => Ok(image),
            Some(image) => Err(FieldError {
                field: Some("docker_image".to_string()),
                rule: Some("in".to_string()),
                detail: format!("image {image} is not offered by egg {}", egg.name),
            }),
            None => Ok(egg.default_image()),
        }
    }

    /// Body of `POST servers`.
    pub(crate) fn creation_payload(
        &self,
        egg: &EggDefinition,
        image: &str,
        environment: &BTreeMap<String, String>,
        allocation_id: u64,
    ) -> Value {
        let mut payload = json!({
            "name": self.name,
            "user": self.user_id,
            "egg": egg.id,
            "docker_image": image,
            "startup": self.startup.as_deref().unwrap_or(&egg.startup),
            "environment": environment,
            "limits": {
                "memory": self.limits.memory,
                "swap": self.limits.swap,
                "disk": self.limits.disk,
                "io": self.limits.io.clamp(10, 1000),
                "cpu": self.limits.cpu,
            },
            "feature_limits": self.feature_limits,
            "allocation": { "default": allocation_id },
            "start_on_completion": false,
            "skip_scripts": false,
        });
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            payload["description"] = json!(description);
        }
        if let Some(external_id) = self.external_id.as_deref().filter(|e| !e.is_empty()) {
            payload["external_id"] = json!(external_id);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn egg() -> EggDefinition {
        EggDefinition {
            id: 3,
            nest_id: 1,
            name: "Paper".to_string(),
            startup: "java -jar server.jar".to_string(),
            docker_images: BTreeMap::from([
                ("Java 17".to_string(), "ghcr.io/pterodactyl/yolks:java_17".to_string()),
                ("Java 21".to_string(), "ghcr.io/pterodactyl/yolks:java_21".to_string()),
            ]),
            variables: Vec::new(),
        }
    }

    #[test]
    fn test_payload_shape() {
        let mut req = ProvisionRequest::new("survival", 1, 5, 3);
        req.description = Some("main world".to_string());
        req.limits.io = 5000;
        let env = BTreeMap::from([("MAX_PLAYERS".to_string(), "20".to_string())]);

        let payload = req.creation_payload(&egg(), "ghcr.io/pterodactyl/yolks:java_17", &env, 11);

        assert_eq!(payload["allocation"]["default"], 11);
        assert_eq!(payload["egg"], 3);
        assert_eq!(payload["startup"], "java -jar server.jar");
        assert_eq!(payload["environment"]["MAX_PLAYERS"], "20");
        assert_eq!(payload["limits"]["io"], 1000);
        assert_eq!(payload["feature_limits"]["backups"], 3);
        assert_eq!(payload["description"], "main world");
        assert!(payload.get("external_id").is_none());
        assert_eq!(payload["start_on_completion"], false);
    }

    #[test]
    fn test_image_must_be_offered() {
        let egg = egg();
        let mut req = ProvisionRequest::new("s", 1, 5, 3);
        assert_eq!(req.image_for(&egg).unwrap(), "ghcr.io/pterodactyl/yolks:java_17");

        req.docker_image = Some("ghcr.io/pterodactyl/yolks:java_21".to_string());
        assert!(req.image_for(&egg).is_ok());

        req.docker_image = Some("alpine:latest".to_string());
        assert_eq!(req.image_for(&egg).unwrap_err().field.as_deref(), Some("docker_image"));
    }

    #[test]
    fn test_field_checks() {
        let mut req = ProvisionRequest::new("", 1, 5, 3);
        req.limits.swap = -2;
        let fields: Vec<_> = req
            .check_fields()
            .into_iter()
            .filter_map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["name", "limits.swap"]);

        let long = ProvisionRequest::new("x".repeat(MAX_NAME_LEN + 1), 1, 5, 3);
        assert_eq!(long.check_fields().len(), 1);
        assert!(ProvisionRequest::new("ok", 1, 5, 3).check_fields().is_empty());
    }

    #[test]
    fn test_request_from_json_uses_defaults() {
        let req: ProvisionRequest = serde_json::from_value(serde_json::json!({
            "name": "survival", "user_id": 1, "node_id": 5, "egg_id": 3,
            "overrides": {"MAX_PLAYERS": "20"},
            "limits": {"memory": 2048}
        }))
        .unwrap();
        assert_eq!(req.limits.memory, 2048);
        assert_eq!(req.limits.disk, 5120);
        assert_eq!(req.feature_limits, FeatureLimits::default());
    }
}
