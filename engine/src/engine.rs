use std::sync::Arc;
use tracing::info;

use crate::api::{ClientApi, PanelApi};
use crate::credential::{ApiScope, Credential};
use crate::error::ClientError;
use crate::monitor::{MonitorConfig, ResourceMonitor};
use crate::transport::{ClientOptions, PanelClient, Transport};
use crate::wizard::{ProvisionWizard, WizardConfig};

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub client: ClientOptions,
    pub wizard: WizardConfig,
    pub monitor: MonitorConfig,
}

/// Everything a front end needs, wired from one credential.
pub struct PanelEngine {
    api: PanelApi,
    wizard: ProvisionWizard,
    client: Option<ClientApi>,
    monitor: Option<ResourceMonitor>,
}

impl PanelEngine {
    pub fn new(credential: &Credential, options: EngineOptions) -> Result<Self, ClientError> {
        let page_size = options.client.page_size;
        let app: Arc<dyn Transport> = Arc::new(PanelClient::new(
            credential,
            ApiScope::Application,
            options.client.clone(),
        )?);

        let client = if credential.has_client_key() {
            let transport: Arc<dyn Transport> = Arc::new(PanelClient::new(
                credential,
                ApiScope::Client,
                options.client,
            )?);
            Some(ClientApi::new(transport))
        } else {
            None
        };

        info!(
            "Panel engine ready for {} (client API {})",
            credential.base_url(),
            if client.is_some() { "enabled" } else { "disabled" }
        );
        Ok(Self::from_parts(
            PanelApi::new(app, page_size),
            client,
            options.wizard,
            options.monitor,
        ))
    }

    /// Assemble from already-built transports.
    pub fn from_parts(
        api: PanelApi,
        client: Option<ClientApi>,
        wizard: WizardConfig,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            wizard: ProvisionWizard::new(api.clone(), wizard),
            monitor: client
                .clone()
                .map(|c| ResourceMonitor::new(c, monitor)),
            api,
            client,
        }
    }

    pub fn api(&self) -> &PanelApi {
        &self.api
    }

    pub fn wizard(&self) -> &ProvisionWizard {
        &self.wizard
    }

    pub fn client(&self) -> Result<&ClientApi, ClientError> {
        self.client.as_ref().ok_or(ClientError::MissingClientKey)
    }

    pub fn monitor(&self) -> Result<&ResourceMonitor, ClientError> {
        self.monitor.as_ref().ok_or(ClientError::MissingClientKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_features_need_client_key() {
        let credential = Credential::new("https://panel.example.com", "ptla_key").unwrap();
        let engine = PanelEngine::new(&credential, EngineOptions::default()).unwrap();
        assert!(matches!(engine.monitor(), Err(ClientError::MissingClientKey)));
        assert!(engine.client().is_err());

        let credential = credential.with_client_key("ptlc_key").unwrap();
        let engine = PanelEngine::new(&credential, EngineOptions::default()).unwrap();
        assert!(engine.monitor().is_ok());
        assert!(engine.client().is_ok());
    }
}
