use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure of a panel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiErrorKind {
    Validation,
    Auth,
    NotFound,
    RateLimited,
    Server,
    Network,
}

impl ApiErrorKind {
    /// Kinds that the retry loop is allowed to try again.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Server | Self::RateLimited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::NotFound => "not-found",
            Self::RateLimited => "rate-limited",
            Self::Server => "server",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the panel's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: Option<String>,
    pub rule: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error{}: {detail}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub detail: String,
    pub field_errors: Vec<FieldError>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            detail: detail.into(),
            field_errors: Vec::new(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, None, detail)
    }

    /// Classify a non-success response. Deterministic in `(status, body)`.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let kind = match status {
            401 | 403 => ApiErrorKind::Auth,
            404 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::RateLimited,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Validation,
        };

        let parsed = serde_json::from_slice::<ErrorResponse>(body).ok();
        let field_errors: Vec<FieldError> = parsed
            .map(|r| r.errors.into_iter().map(FieldError::from).collect())
            .unwrap_or_default();

        let detail = match field_errors.first() {
            Some(first) => first.detail.clone(),
            None if body.is_empty() => default_detail(status).to_string(),
            None => truncate(&String::from_utf8_lossy(body), 500),
        };

        Self {
            kind,
            status: Some(status),
            detail,
            field_errors,
        }
    }

    /// Classify a failure that never produced a response.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let detail = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::network(detail)
    }

    /// Every field name the panel flagged, in response order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.field_errors.iter().filter_map(|f| f.field.as_deref())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Failure to construct a transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Credential(#[from] crate::credential::CredentialError),
    #[error("no client API key configured; live stats and power signals need one")]
    MissingClientKey,
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Panel error body: `{"errors":[{"code":..,"status":..,"detail":..,"meta":{..}}]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<PanelErrorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelErrorEntry {
    pub code: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub detail: String,
    pub meta: Option<PanelErrorMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelErrorMeta {
    pub source_field: Option<String>,
    pub rule: Option<String>,
}

impl From<PanelErrorEntry> for FieldError {
    fn from(e: PanelErrorEntry) -> Self {
        let (field, rule) = match e.meta {
            Some(m) => (m.source_field, m.rule),
            None => (None, None),
        };
        let detail = if e.detail.is_empty() {
            e.code.unwrap_or_else(|| "unknown error".to_string())
        } else {
            e.detail
        };
        Self { field, rule, detail }
    }
}

fn default_detail(status: u16) -> &'static str {
    match status {
        401 => "unauthorized",
        403 => "forbidden",
        404 => "resource not found",
        429 => "rate limited",
        500..=599 => "panel error",
        _ => "request rejected",
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ApiError::from_response(401, b"").kind, ApiErrorKind::Auth);
        assert_eq!(ApiError::from_response(403, b"").kind, ApiErrorKind::Auth);
        assert_eq!(ApiError::from_response(404, b"").kind, ApiErrorKind::NotFound);
        assert_eq!(ApiError::from_response(422, b"").kind, ApiErrorKind::Validation);
        assert_eq!(ApiError::from_response(400, b"").kind, ApiErrorKind::Validation);
        assert_eq!(ApiError::from_response(429, b"").kind, ApiErrorKind::RateLimited);
        assert_eq!(ApiError::from_response(502, b"").kind, ApiErrorKind::Server);
    }

    #[test]
    fn test_validation_keeps_every_field() {
        let body = br#"{"errors":[
            {"code":"ValidationException","status":"422","detail":"The name field is required.","meta":{"source_field":"name","rule":"required"}},
            {"code":"ValidationException","status":"422","detail":"The memory must be an integer.","meta":{"source_field":"limits.memory","rule":"integer"}}
        ]}"#;
        let err = ApiError::from_response(422, body);

        assert_eq!(err.kind, ApiErrorKind::Validation);
        assert_eq!(err.detail, "The name field is required.");
        assert_eq!(err.fields().collect::<Vec<_>>(), vec!["name", "limits.memory"]);
        assert_eq!(err.field_errors[1].rule.as_deref(), Some("integer"));
    }

    #[test]
    fn test_non_json_body_is_kept_as_detail() {
        let err = ApiError::from_response(500, b"<html>bad gateway</html>");
        assert_eq!(err.kind, ApiErrorKind::Server);
        assert_eq!(err.detail, "<html>bad gateway</html>");
        assert!(err.field_errors.is_empty());
    }

    #[test]
    fn test_display_includes_status() {
        let err = ApiError::from_response(404, b"");
        assert_eq!(err.to_string(), "not-found error (HTTP 404): resource not found");
        assert_eq!(ApiError::network("request timed out").to_string(), "network error: request timed out");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ApiError::network("x").is_retryable());
        assert!(ApiError::from_response(503, b"").is_retryable());
        assert!(ApiError::from_response(429, b"").is_retryable());
        assert!(!ApiError::from_response(404, b"").is_retryable());
        assert!(!ApiError::from_response(401, b"").is_retryable());
    }
}
