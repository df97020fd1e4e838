//! Automation engine for the Pterodactyl panel: a retrying, paginating
//! transport, typed API wrappers, a live resource monitor and a server
//! provisioning wizard with rollback.

pub mod api;
pub mod credential;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod transport;
pub mod types;
pub mod wizard;

#[cfg(test)]
mod testing;

pub use api::{ClientApi, PanelApi, ResourceKind};
pub use credential::{ApiScope, Credential, CredentialError};
pub use engine::{EngineOptions, PanelEngine};
pub use error::{ApiError, ApiErrorKind, ClientError, FieldError};
pub use monitor::{MonitorConfig, ResourceMonitor, SessionHandle, SnapshotSink};
pub use transport::{ClientOptions, PageCursor, PanelClient, RetryPolicy, Transport};
pub use types::{
    AllocationRef, EggDefinition, EggVariable, PowerSignal, PowerState, ResourceSnapshot,
    ServerRef,
};
pub use wizard::{
    AcceptedResponse, AuditTrail, FailureKind, ProvisionFailure, ProvisionOutcome,
    ProvisionRequest, ProvisionStep, ProvisionWizard, WizardConfig,
};
