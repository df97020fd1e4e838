use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

use crate::error::{ApiErrorKind, FieldError};
use crate::types::AllocationRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProvisionStep {
    Idle,
    AllocationSelected,
    VariablesResolved,
    Submitting,
    Committed,
    RollingBack,
    Failed,
}

impl ProvisionStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Forward-only transitions. `Submitting` and `RollingBack` may repeat to
    /// record allocation retries and rollback actions.
    pub fn can_transition_to(self, next: ProvisionStep) -> bool {
        use ProvisionStep::*;
        match (self, next) {
            (Committed | Failed, _) => false,
            (_, Failed) => true,
            (Idle, AllocationSelected)
            | (AllocationSelected, VariablesResolved)
            | (VariablesResolved, Submitting)
            | (Submitting, Submitting | Committed | RollingBack)
            | (RollingBack, RollingBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Side effect attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    AllocationRetry { allocation: u64 },
    /// Servers already holding an allocation the panel reported as taken.
    ConflictLookup { allocation: u64, found: usize },
    RollbackLookup { found: usize },
    RollbackDelete { server_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub step: ProvisionStep,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<AuditEntry>);

impl AuditTrail {
    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    /// Step sequence with consecutive repeats collapsed.
    pub fn steps(&self) -> Vec<ProvisionStep> {
        let mut steps: Vec<ProvisionStep> = self.0.iter().map(|e| e.step).collect();
        steps.dedup();
        steps
    }

    pub fn deletes(&self) -> usize {
        self.0
            .iter()
            .filter(|e| matches!(e.action, Some(AuditAction::RollbackDelete { .. })))
            .count()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.0.last()
    }

    fn push(&mut self, entry: AuditEntry) {
        self.0.push(entry);
    }
}

/// Terminal failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    NoCapacity,
    AllocationConflict,
    Validation,
    /// Panel rejected or could not serve a call that created nothing.
    Api(ApiErrorKind),
    /// Ambiguous creation; the server was found and deleted.
    RolledBack,
    /// Ambiguous creation; the server was confirmed absent.
    NotCreated,
    /// Ambiguous creation that could not be resolved; a server may exist.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("provisioning failed at {step}: {reason}")]
pub struct ProvisionFailure {
    /// Step that was being attempted.
    pub step: ProvisionStep,
    pub kind: FailureKind,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
}

impl ProvisionFailure {
    pub fn new(step: ProvisionStep, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            reason: reason.into(),
            field_errors: Vec::new(),
        }
    }

    pub fn with_fields(mut self, field_errors: Vec<FieldError>) -> Self {
        self.field_errors = field_errors;
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.field_errors.iter().filter_map(|f| f.field.as_deref())
    }
}

/// In-flight record of one provisioning run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionState {
    step: Option<ProvisionStep>,
    pub allocation: Option<AllocationRef>,
    pub environment: BTreeMap<String, String>,
    pub server_id: Option<u64>,
    pub error: Option<ProvisionFailure>,
    audit: AuditTrail,
}

impl ProvisionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> ProvisionStep {
        self.step.unwrap_or(ProvisionStep::Idle)
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn into_audit(self) -> AuditTrail {
        self.audit
    }

    /// Move to `next` and record why. Returns false, leaving the state
    /// untouched, if the transition is not allowed.
    pub fn advance(
        &mut self,
        next: ProvisionStep,
        reason: impl Into<String>,
        action: Option<AuditAction>,
    ) -> bool {
        let current = self.step();
        if !current.can_transition_to(next) {
            tracing::error!("Rejected wizard transition {} -> {}", current, next);
            return false;
        }
        self.step = Some(next);
        self.audit.push(AuditEntry {
            at: OffsetDateTime::now_utc(),
            step: next,
            reason: reason.into(),
            action,
        });
        true
    }

    /// Record a terminal failure.
    pub fn fail(&mut self, failure: ProvisionFailure) {
        self.advance(ProvisionStep::Failed, failure.reason.clone(), None);
        self.error = Some(failure);
    }
}
