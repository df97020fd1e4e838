use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Method;
use serde::Serialize;

use super::PanelApi;
use crate::error::{ApiError, ApiErrorKind, FieldError};
use crate::types::AllocationRef;

/// Panel accepts at most this many ports in one range entry.
const MAX_RANGE_LEN: u32 = 1000;

/// Body of `POST nodes/{id}/allocations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRequest {
    pub ip: String,
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Parse a comma separated port list such as `25565,25570-25575`.
pub fn parse_ports(spec: &str) -> Result<Vec<String>, ApiError> {
    let mut ports = Vec::new();
    for raw in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let entry = match raw.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start)?;
                let end = parse_port(end)?;
                if start >= end || u32::from(end - start) >= MAX_RANGE_LEN {
                    return Err(ports_error(format!("invalid port range {raw}")));
                }
                format!("{start}-{end}")
            }
            None => parse_port(raw)?.to_string(),
        };
        ports.push(entry);
    }
    if ports.is_empty() {
        return Err(ports_error("no ports given".to_string()));
    }
    Ok(ports)
}

fn parse_port(s: &str) -> Result<u16, ApiError> {
    match s.trim().parse::<u16>() {
        Ok(p) if p > 1024 => Ok(p),
        _ => Err(ports_error(format!("port {s:?} must be between 1025 and 65535"))),
    }
}

fn ports_error(detail: String) -> ApiError {
    let mut err = ApiError::new(ApiErrorKind::Validation, None, detail.clone());
    err.field_errors.push(FieldError {
        field: Some("ports".to_string()),
        rule: None,
        detail,
    });
    err
}

impl PanelApi {
    pub async fn list_allocations(&self, node_id: u64) -> Result<Vec<AllocationRef>, ApiError> {
        self.stream(&format!("nodes/{node_id}/allocations"), Vec::new())
            .and_then(move |obj| async move { AllocationRef::from_object(&obj, node_id) })
            .try_collect()
            .await
    }

    /// Unassigned allocations on a node, lazily, in panel order.
    pub fn unassigned_allocations<'a>(
        &'a self,
        node_id: u64,
    ) -> impl Stream<Item = Result<AllocationRef, ApiError>> + Send + 'a {
        self.stream(&format!("nodes/{node_id}/allocations"), Vec::new())
            .and_then(move |obj| async move { AllocationRef::from_object(&obj, node_id) })
            .try_filter(|alloc| futures::future::ready(!alloc.assigned))
            .boxed()
    }

    pub async fn create_allocations(
        &self,
        node_id: u64,
        request: &AllocationRequest,
    ) -> Result<(), ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::new(ApiErrorKind::Validation, None, e.to_string()))?;
        self.request(
            Method::POST,
            &format!("nodes/{node_id}/allocations"),
            Some(body),
            &[],
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_allocation(&self, node_id: u64, allocation_id: u64) -> Result<(), ApiError> {
        self.request(
            Method::DELETE,
            &format!("nodes/{node_id}/allocations/{allocation_id}"),
            None,
            &[],
        )
        .await
        .map(|_| ())
    }
}
