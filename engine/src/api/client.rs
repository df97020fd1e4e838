//! Client API (`/api/client/`): live usage and power signals.

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;

use super::path_segment;
use crate::error::ApiError;
use crate::transport::Transport;
use crate::types::PowerSignal;

#[derive(Clone)]
pub struct ClientApi {
    transport: Arc<dyn Transport>,
}

impl ClientApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Raw `stats` object for a server identifier.
    pub async fn resources(&self, identifier: &str) -> Result<Value, ApiError> {
        let identifier = path_segment(identifier, "server identifier")?;
        self.transport
            .request(
                Method::GET,
                &format!("servers/{identifier}/resources"),
                None,
                &[],
            )
            .await
    }

    pub async fn power(&self, identifier: &str, signal: PowerSignal) -> Result<(), ApiError> {
        let identifier = path_segment(identifier, "server identifier")?;
        self.transport
            .request(
                Method::POST,
                &format!("servers/{identifier}/power"),
                Some(json!({ "signal": signal.as_str() })),
                &[],
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    #[tokio::test]
    async fn test_power_sends_signal() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(Method::POST, "servers/ab12cd34/power", Ok(json!({})));
        let client = ClientApi::new(fake.clone());

        client.power("ab12cd34", PowerSignal::Restart).await.unwrap();
        let body = fake.calls()[0].body.clone().unwrap();
        assert_eq!(body, json!({"signal": "restart"}));
    }

    #[tokio::test]
    async fn test_bad_identifier_never_hits_transport() {
        let fake = Arc::new(FakeTransport::new());
        let client = ClientApi::new(fake.clone());

        assert!(client.resources("../admin").await.is_err());
        assert!(fake.calls().is_empty());
    }
}
