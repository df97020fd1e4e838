//! Server provisioning: allocation selection, egg variable resolution,
//! creation, and compensating rollback when the creation outcome is unknown.

pub mod request;
pub mod rules;
pub mod state;

use futures::{pin_mut, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::PanelApi;
use crate::error::{ApiError, ApiErrorKind, FieldError};
use crate::types::{AllocationRef, EggDefinition, ServerRef};

pub use request::{FeatureLimits, ProvisionRequest, ResourceLimits};
pub use rules::{resolve_environment, Rule, RuleSet};
pub use state::{
    AuditAction, AuditEntry, AuditTrail, FailureKind, ProvisionFailure, ProvisionState,
    ProvisionStep,
};

/// What to do with a 2xx creation response that carries no server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptedResponse {
    /// Look the server up and commit with its id.
    #[default]
    Adopt,
    /// Treat as ambiguous and verify/undo.
    RollBack,
}

#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Total allocations tried when the panel reports the chosen one taken.
    pub max_allocation_attempts: u32,
    /// Deadline per panel call; elapsing counts as a network failure.
    pub step_timeout: Option<Duration>,
    /// Look for (and delete) a partially created server after an ambiguous failure.
    pub verify_after_timeout: bool,
    pub accepted_response: AcceptedResponse,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            max_allocation_attempts: 3,
            step_timeout: None,
            verify_after_timeout: true,
            accepted_response: AcceptedResponse::Adopt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Committed { server_id: u64, audit: AuditTrail },
    Failed { failure: ProvisionFailure, audit: AuditTrail },
}

impl ProvisionOutcome {
    pub fn audit(&self) -> &AuditTrail {
        match self {
            Self::Committed { audit, .. } | Self::Failed { audit, .. } => audit,
        }
    }

    pub fn server_id(&self) -> Option<u64> {
        match self {
            Self::Committed { server_id, .. } => Some(*server_id),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ProvisionFailure> {
        match self {
            Self::Failed { failure, .. } => Some(failure),
            Self::Committed { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct ProvisionWizard {
    api: PanelApi,
    config: WizardConfig,
}

/// Early exit from a run; the failure has already been recorded in the state.
struct Halt;

impl ProvisionWizard {
    pub fn new(api: PanelApi, config: WizardConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    /// Drive one provisioning run to a terminal outcome.
    pub async fn run(&self, request: &ProvisionRequest) -> ProvisionOutcome {
        let mut state = ProvisionState::new();
        info!(
            name = %request.name,
            node = request.node_id,
            egg = request.egg_id,
            "Provisioning started"
        );

        let result = self.drive(request, &mut state).await;
        match (result, state.server_id) {
            (Ok(()), Some(server_id)) => {
                info!("Provisioned server {} ({})", request.name, server_id);
                ProvisionOutcome::Committed {
                    server_id,
                    audit: state.into_audit(),
                }
            }
            _ => {
                let failure = state.error.take().unwrap_or_else(|| {
                    ProvisionFailure::new(
                        state.step(),
                        FailureKind::Unverified,
                        "run ended without an outcome",
                    )
                });
                warn!("Provisioning {} failed: {}", request.name, failure);
                ProvisionOutcome::Failed {
                    failure,
                    audit: state.into_audit(),
                }
            }
        }
    }

    async fn drive(
        &self,
        request: &ProvisionRequest,
        state: &mut ProvisionState,
    ) -> Result<(), Halt> {
        let mut tried: Vec<u64> = Vec::new();
        let allocation = self.select_allocation(request.node_id, &tried, state).await?;
        tried.push(allocation.id);
        state.allocation = Some(allocation.clone());
        advance(
            state,
            ProvisionStep::AllocationSelected,
            format!(
                "allocation {} ({}) on node {}",
                allocation.id,
                allocation.address(),
                request.node_id
            ),
        );

        let (egg, image) = self.resolve_variables(request, state).await?;

        let mut allocation = allocation;
        advance(
            state,
            ProvisionStep::Submitting,
            format!("creating server {} on allocation {}", request.name, allocation.id),
        );
        loop {
            let payload =
                request.creation_payload(&egg, &image, &state.environment, allocation.id);
            let created = self.bounded(self.api.create_server(payload)).await;

            match created {
                Ok(body) => match created_id(&body) {
                    Some(server_id) => return commit(state, server_id, "server created"),
                    None => return self.handle_accepted(request, allocation.id, state).await,
                },
                Err(e) if is_allocation_conflict(&e) => {
                    // The transport may have retried this create after an earlier
                    // attempt already took the allocation.
                    if let Some(server) =
                        self.held_by_this_run(request, allocation.id, state).await?
                    {
                        return match self.config.accepted_response {
                            AcceptedResponse::Adopt => commit(
                                state,
                                server.id,
                                "allocation held by a server from a retried attempt; adopted",
                            ),
                            AcceptedResponse::RollBack => {
                                self.handle_ambiguous(
                                    request,
                                    allocation.id,
                                    "allocation held by a server from a retried attempt",
                                    state,
                                )
                                .await
                            }
                        };
                    }
                    if tried.len() as u32 >= self.config.max_allocation_attempts {
                        return halt(
                            state,
                            ProvisionFailure::new(
                                ProvisionStep::Submitting,
                                FailureKind::AllocationConflict,
                                format!(
                                    "allocation {} taken and {} attempts used: {}",
                                    allocation.id,
                                    tried.len(),
                                    e.detail
                                ),
                            ),
                        );
                    }
                    warn!("Allocation {} taken, selecting another: {}", allocation.id, e.detail);
                    let next = self.select_allocation(request.node_id, &tried, state).await?;
                    tried.push(next.id);
                    state.advance(
                        ProvisionStep::Submitting,
                        format!(
                            "allocation {} already assigned; retrying with {} ({})",
                            allocation.id,
                            next.id,
                            next.address()
                        ),
                        Some(AuditAction::AllocationRetry {
                            allocation: next.id,
                        }),
                    );
                    state.allocation = Some(next.clone());
                    allocation = next;
                }
                Err(e) if matches!(e.kind, ApiErrorKind::Network | ApiErrorKind::Server) => {
                    return self
                        .handle_ambiguous(request, allocation.id, &e.to_string(), state)
                        .await;
                }
                Err(e) => {
                    return halt(
                        state,
                        ProvisionFailure::new(
                            ProvisionStep::Submitting,
                            FailureKind::Api(e.kind),
                            format!("panel rejected the server: {e}"),
                        )
                        .with_fields(e.field_errors.clone()),
                    );
                }
            }
        }
    }

    /// First unassigned allocation on the node not already tried.
    async fn select_allocation(
        &self,
        node_id: u64,
        tried: &[u64],
        state: &mut ProvisionState,
    ) -> Result<AllocationRef, Halt> {
        let step = if tried.is_empty() {
            ProvisionStep::AllocationSelected
        } else {
            ProvisionStep::Submitting
        };
        let candidates = self
            .api
            .unassigned_allocations(node_id)
            .try_filter(|a| futures::future::ready(!tried.contains(&a.id)));
        pin_mut!(candidates);

        match self.bounded(candidates.try_next()).await {
            Ok(Some(allocation)) => Ok(allocation),
            Ok(None) => halt(
                state,
                ProvisionFailure::new(
                    step,
                    FailureKind::NoCapacity,
                    format!("no free allocations on node {node_id}"),
                ),
            ),
            Err(e) => halt(
                state,
                ProvisionFailure::new(
                    step,
                    FailureKind::Api(e.kind),
                    format!("could not list allocations on node {node_id}: {e}"),
                ),
            ),
        }
    }

    /// Fetch the egg and run every precheck, recording all problems at once.
    async fn resolve_variables(
        &self,
        request: &ProvisionRequest,
        state: &mut ProvisionState,
    ) -> Result<(EggDefinition, String), Halt> {
        let step = ProvisionStep::VariablesResolved;
        let fetched = match request.nest_id {
            Some(nest) => self.bounded(self.api.get_egg(nest, request.egg_id)).await,
            None => self.bounded(self.api.find_egg(request.egg_id)).await,
        };
        let egg = match fetched {
            Ok(egg) => egg,
            Err(e) => {
                return halt(
                    state,
                    ProvisionFailure::new(
                        step,
                        FailureKind::Api(e.kind),
                        format!("could not load egg {}: {e}", request.egg_id),
                    ),
                )
            }
        };

        let mut errors = request.check_fields();
        let image = match request.image_for(&egg) {
            Ok(image) => image.to_string(),
            Err(e) => {
                errors.push(e);
                String::new()
            }
        };
        match resolve_environment(&egg.variables, &request.overrides) {
            Ok(env) if errors.is_empty() => {
                advance(
                    state,
                    step,
                    format!("{} variables resolved for egg {}", env.len(), egg.name),
                );
                state.environment = env;
                Ok((egg, image))
            }
            Ok(_) => reject(state, errors),
            Err(var_errors) => {
                errors.extend(var_errors);
                reject(state, errors)
            }
        }
    }

    async fn handle_accepted(
        &self,
        request: &ProvisionRequest,
        allocation_id: u64,
        state: &mut ProvisionState,
    ) -> Result<(), Halt> {
        match self.config.accepted_response {
            AcceptedResponse::RollBack => {
                let cause = "creation accepted without a server id";
                self.handle_ambiguous(request, allocation_id, cause, state)
                    .await
            }
            AcceptedResponse::Adopt => {
                let found = self
                    .bounded(self.matching_servers(&request.name, allocation_id))
                    .await;
                match found.as_deref() {
                    Ok([server, ..]) => {
                        commit(state, server.id, "creation accepted; adopted matching server")
                    }
                    Ok([]) => halt(
                        state,
                        ProvisionFailure::new(
                            ProvisionStep::Submitting,
                            FailureKind::Unverified,
                            "creation accepted but no matching server found yet; it may still appear",
                        ),
                    ),
                    Err(e) => halt(
                        state,
                        ProvisionFailure::new(
                            ProvisionStep::Submitting,
                            FailureKind::Unverified,
                            format!("creation accepted but the server could not be located: {e}; it may exist"),
                        ),
                    ),
                }
            }
        }
    }

    /// The creation call may or may not have taken effect. Find and undo it.
    async fn handle_ambiguous(
        &self,
        request: &ProvisionRequest,
        allocation_id: u64,
        cause: &str,
        state: &mut ProvisionState,
    ) -> Result<(), Halt> {
        if !self.config.verify_after_timeout {
            return halt(
                state,
                ProvisionFailure::new(
                    ProvisionStep::Submitting,
                    FailureKind::Unverified,
                    format!("creation outcome unknown ({cause}); server {} may exist", request.name),
                ),
            );
        }

        let step = ProvisionStep::RollingBack;
        state.advance(
            step,
            format!("creation outcome unknown ({cause}); checking for a partial server"),
            None,
        );

        let matches = match self
            .bounded(self.matching_servers(&request.name, allocation_id))
            .await
        {
            Ok(m) => m,
            Err(e) => {
                return halt(
                    state,
                    ProvisionFailure::new(
                        step,
                        FailureKind::Unverified,
                        format!("could not check for server {}: {e}; it may exist", request.name),
                    ),
                )
            }
        };
        state.advance(
            step,
            format!(
                "{} server(s) named {} on allocation {}",
                matches.len(),
                request.name,
                allocation_id
            ),
            Some(AuditAction::RollbackLookup {
                found: matches.len(),
            }),
        );

        if matches.is_empty() {
            return halt(
                state,
                ProvisionFailure::new(
                    step,
                    FailureKind::NotCreated,
                    format!("creation failed ({cause}); no server was created"),
                ),
            );
        }

        for server in &matches {
            let reason = match self.bounded(self.api.delete_server(server.id, false)).await {
                Ok(()) => format!("deleted partial server {}", server.id),
                Err(e) if e.kind == ApiErrorKind::NotFound => {
                    format!("partial server {} already gone", server.id)
                }
                Err(e) => {
                    return halt(
                        state,
                        ProvisionFailure::new(
                            step,
                            FailureKind::Unverified,
                            format!("could not delete partial server {}: {e}; it still exists", server.id),
                        ),
                    )
                }
            };
            state.advance(
                step,
                reason,
                Some(AuditAction::RollbackDelete {
                    server_id: server.id,
                }),
            );
        }

        halt(
            state,
            ProvisionFailure::new(
                step,
                FailureKind::RolledBack,
                format!("creation failed ({cause}); partial server rolled back"),
            ),
        )
    }

    /// Server with this run's name already on `allocation_id`, if any.
    async fn held_by_this_run(
        &self,
        request: &ProvisionRequest,
        allocation_id: u64,
        state: &mut ProvisionState,
    ) -> Result<Option<ServerRef>, Halt> {
        let matches = match self
            .bounded(self.matching_servers(&request.name, allocation_id))
            .await
        {
            Ok(m) => m,
            Err(e) => {
                return halt(
                    state,
                    ProvisionFailure::new(
                        ProvisionStep::Submitting,
                        FailureKind::Unverified,
                        format!(
                            "allocation {allocation_id} reported taken and the holder could not be checked: {e}; server {} may exist",
                            request.name
                        ),
                    ),
                )
            }
        };
        state.advance(
            ProvisionStep::Submitting,
            format!(
                "allocation {} reported taken; {} server(s) named {} hold it",
                allocation_id,
                matches.len(),
                request.name
            ),
            Some(AuditAction::ConflictLookup {
                allocation: allocation_id,
                found: matches.len(),
            }),
        );
        Ok(matches.into_iter().next())
    }

    async fn matching_servers(
        &self,
        name: &str,
        allocation_id: u64,
    ) -> Result<Vec<ServerRef>, ApiError> {
        let servers = self.api.find_servers(name).await?;
        Ok(servers
            .into_iter()
            .filter(|s| s.allocation == Some(allocation_id))
            .collect())
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, ApiError>>) -> Result<T, ApiError> {
        match self.config.step_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                Err(ApiError::network(format!(
                    "no response within {} ms",
                    limit.as_millis()
                )))
            }),
            None => fut.await,
        }
    }
}

fn advance(state: &mut ProvisionState, step: ProvisionStep, reason: String) {
    info!("Provisioning step {}: {}", step, reason);
    state.advance(step, reason, None);
}

fn commit(state: &mut ProvisionState, server_id: u64, reason: &str) -> Result<(), Halt> {
    state.server_id = Some(server_id);
    advance(
        state,
        ProvisionStep::Committed,
        format!("{reason}: id {server_id}"),
    );
    Ok(())
}

fn halt<T>(state: &mut ProvisionState, failure: ProvisionFailure) -> Result<T, Halt> {
    state.fail(failure);
    Err(Halt)
}

fn reject<T>(state: &mut ProvisionState, errors: Vec<FieldError>) -> Result<T, Halt> {
    let fields: Vec<&str> = errors.iter().filter_map(|e| e.field.as_deref()).collect();
    let reason = format!("invalid request: {}", fields.join(", "));
    halt(
        state,
        ProvisionFailure::new(ProvisionStep::VariablesResolved, FailureKind::Validation, reason)
            .with_fields(errors),
    )
}

fn created_id(body: &Value) -> Option<u64> {
    body.get("attributes")
        .and_then(|a| a.get("id"))
        .or_else(|| body.get("id"))
        .and_then(Value::as_u64)
}

/// Wording the panel uses when an allocation already belongs to a server.
const TAKEN_PHRASES: [&str; 3] = ["already assigned", "taken", "in use"];

/// The panel rejects an allocation that is already assigned with a 400
/// DisplayException or a 422 on `allocation.*`.
fn is_allocation_conflict(err: &ApiError) -> bool {
    err.kind == ApiErrorKind::Validation
        && (err.field_errors.iter().any(names_taken_allocation)
            || (err.field_errors.is_empty() && mentions_taken_allocation(&err.detail)))
}

fn names_taken_allocation(error: &FieldError) -> bool {
    match error.field.as_deref() {
        Some(field) => {
            (field == "allocation" || field.starts_with("allocation."))
                && (error.rule.as_deref() == Some("unique") || says_taken(&error.detail))
        }
        None => mentions_taken_allocation(&error.detail),
    }
}

fn mentions_taken_allocation(detail: &str) -> bool {
    detail.to_ascii_lowercase().contains("allocation") && says_taken(detail)
}

fn says_taken(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    TAKEN_PHRASES.iter().any(|p| detail.contains(p))
}
