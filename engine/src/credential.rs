use reqwest::Url;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid panel URL: {0}")]
    InvalidUrl(String),
    #[error("panel URL must use http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("{0} API key is empty")]
    EmptyKey(&'static str),
}

/// Which of the panel's two API surfaces a transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiScope {
    /// `/api/application/`, admin key.
    Application,
    /// `/api/client/`, account key. Needed for live stats and power signals.
    Client,
}

impl ApiScope {
    fn prefix(self) -> &'static str {
        match self {
            Self::Application => "api/application/",
            Self::Client => "api/client/",
        }
    }
}

/// Panel auth context. Built once at start-up and shared read-only.
#[derive(Clone)]
pub struct Credential {
    base_url: Url,
    api_key: Arc<str>,
    client_key: Option<Arc<str>>,
}

impl Credential {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CredentialError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let mut url =
            Url::parse(trimmed).map_err(|e| CredentialError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CredentialError::UnsupportedScheme(url.scheme().to_string()));
        }
        // Url::join only keeps the last path segment when it ends with '/'.
        url.set_path(&format!("{}/", url.path().trim_end_matches('/')));

        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(CredentialError::EmptyKey("application"));
        }

        Ok(Self {
            base_url: url,
            api_key: Arc::from(api_key),
            client_key: None,
        })
    }

    pub fn with_client_key(mut self, client_key: &str) -> Result<Self, CredentialError> {
        let client_key = client_key.trim();
        if client_key.is_empty() {
            return Err(CredentialError::EmptyKey("client"));
        }
        self.client_key = Some(Arc::from(client_key));
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn has_client_key(&self) -> bool {
        self.client_key.is_some()
    }

    /// Root URL for a scope, always ending in '/'.
    pub fn scope_url(&self, scope: ApiScope) -> Result<Url, CredentialError> {
        self.base_url
            .join(scope.prefix())
            .map_err(|e| CredentialError::InvalidUrl(e.to_string()))
    }

    pub(crate) fn key_for(&self, scope: ApiScope) -> Option<&str> {
        match scope {
            ApiScope::Application => Some(self.api_key.as_ref()),
            ApiScope::Client => self.client_key.as_deref(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
