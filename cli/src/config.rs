use anyhow::{Context, Result};
use ptero_pilot_engine::{
    ClientOptions, Credential, EngineOptions, MonitorConfig, RetryPolicy, WizardConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Values read from the JSON config file. Anything given on the command line
/// or in the environment wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub client_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub page_size: Option<u32>,
    pub monitor_interval_ms: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create dir {:?}", parent))?;
        }
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize config")?;
        fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("ptero-pilot");
    dir.push("config.json");
    dir
}

/// Command-line overrides, already merged with the environment by clap.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub panel_url: Option<String>,
    pub api_key: Option<String>,
    pub client_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

/// Fully resolved connection settings.
#[derive(Debug)]
pub struct Settings {
    pub credential: Credential,
    pub options: EngineOptions,
    pub monitor_interval: Duration,
}

impl Settings {
    pub fn resolve(overrides: &Overrides, config: &Config) -> Result<Self> {
        let base_url = overrides
            .panel_url
            .as_deref()
            .or(config.base_url.as_deref())
            .context("No panel URL; pass --panel-url or set PTERODACTYL_URL")?;
        let api_key = overrides
            .api_key
            .as_deref()
            .or(config.api_key.as_deref())
            .context("No application API key; pass --api-key or set PTERODACTYL_API_KEY")?;

        let mut credential =
            Credential::new(base_url, api_key).context("Invalid panel credentials")?;
        if let Some(key) = overrides.client_key.as_deref().or(config.client_key.as_deref()) {
            credential = credential
                .with_client_key(key)
                .context("Invalid client API key")?;
        }

        let defaults = ClientOptions::default();
        let retry = RetryPolicy {
            max_retries: overrides
                .retries
                .or(config.retries)
                .unwrap_or(defaults.retry.max_retries),
            ..defaults.retry.clone()
        };
        let client = ClientOptions {
            timeout: overrides
                .timeout_secs
                .or(config.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry,
            page_size: config.page_size.unwrap_or(defaults.page_size),
        };

        let monitor = MonitorConfig::default();
        let monitor_interval = config
            .monitor_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(monitor.min_interval);

        Ok(Self {
            credential,
            options: EngineOptions {
                client,
                wizard: WizardConfig::default(),
                monitor,
            },
            monitor_interval,
        })
    }
}
