// Agora Runtime - Tool server
//
// The fixed RPC surface of the marketplace: seven namespaced operations,
// each passing through the same pipeline — verify identity, check
// permission, check the halt flag, validate parameters, dispatch to the
// store, audit. User overrides enter through a separate privileged entry
// point and never through the seven operations.

pub mod ops;

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{
    AgentRole, AgoraConfig, AgoraError, AgoraResult, AuditOutcome, Decision, IdGenerator,
    IdPrefix, IdentityVerifier, Operation, PermissionEngine, PermissionScope, Principal,
    ToolRequest, ToolResponse, BROADCAST_TARGET, DEFAULT_PRIORITY, USER_AUTHORITY,
};
use agora_fabric::EventFabric;
use agora_store::{CoordinationStore, OverrideAction, Reducer, ReducerRequest};

use ops::{
    parse, AssignParams, QueryDataParams, RegisterParams, SendParams, UpdateParams,
    WorkflowStartParams,
};

/// The `agora.*` tool server
pub struct ToolServer {
    store: CoordinationStore,
    fabric: Arc<EventFabric>,
    verifier: IdentityVerifier,
    permissions: PermissionEngine,
    config: AgoraConfig,
    started_at: DateTime<Utc>,
}

impl ToolServer {
    pub fn new(store: CoordinationStore, fabric: Arc<EventFabric>, config: AgoraConfig) -> Self {
        Self {
            store,
            fabric,
            verifier: IdentityVerifier::new(),
            permissions: PermissionEngine::new(),
            config,
            started_at: Utc::now(),
        }
    }

    /// Handle one request end to end.
    ///
    /// The per-request deadline is enforced here; a reducer that already
    /// committed is not cancelled by an expiring deadline — the caller
    /// simply never sees the reply.
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let deadline = Duration::from_millis(self.config.effective_deadline_ms(request.deadline_ms));
        match tokio::time::timeout(deadline, self.process(&request)).await {
            Ok(Ok((result, commit_sequence))) => ToolResponse::success(result, commit_sequence),
            Ok(Err(err)) => ToolResponse::failure(&err),
            Err(_) => ToolResponse::failure(&AgoraError::deadline_exceeded(format!(
                "request exceeded its {}ms deadline",
                deadline.as_millis()
            ))),
        }
    }

    /// The privileged user entry point; not one of the seven operations.
    pub async fn user_override(
        &self,
        action: OverrideAction,
        reason: impl Into<String>,
    ) -> AgoraResult<(serde_json::Value, u64)> {
        let reason = reason.into();
        let decision = self
            .permissions
            .evaluate_override(&Principal::User, USER_AUTHORITY);
        if let Decision::Denied(why) = decision {
            self.audit("user", "user_override", action.subject(), AuditOutcome::Denied, &why, USER_AUTHORITY);
            return Err(AgoraError::permission_denied(why));
        }

        // Releasing a name also clears the project's lock file, so capture
        // the directory before the binding disappears.
        let release_dir = match &action {
            OverrideAction::ReleaseAgentName { agent_name } => {
                let state = self.store.state().await;
                state
                    .agent_by_name(agent_name)
                    .map(|a| a.project_directory.clone())
            }
            _ => None,
        };

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::UserOverride {
                    action,
                    reason,
                    authority_level: USER_AUTHORITY,
                },
                authority: USER_AUTHORITY,
                actor: "user".to_string(),
                actor_agent_id: None,
            })
            .await?;

        if let Some(dir) = release_dir {
            self.verifier.clear(&dir).await?;
        }

        Ok((committed.result, committed.commit_sequence))
    }

    /// Aggregate health snapshot backing `agora.system.status`
    pub async fn system_status(&self) -> serde_json::Value {
        let state = self.store.state().await;
        let live_tasks = state.tasks.values().filter(|t| !t.status.is_terminal()).count();
        let running_workflows = state
            .workflows
            .values()
            .filter(|w| w.status == agora_core::WorkflowStatus::Running)
            .count();
        json!({
            "healthy": true,
            "halted": state.halted,
            "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
            "commit_sequence": state.commit_sequence,
            "agents": {
                "total": state.agents.len(),
                "active": state.active_agents().count(),
            },
            "tasks": {
                "total": state.tasks.len(),
                "in_flight": live_tasks,
            },
            "workflows": {
                "total": state.workflows.len(),
                "running": running_workflows,
            },
            "messages": state.messages.len(),
            "events": state.events.len(),
            "subscriber_queue_depth": self.fabric.total_depth(),
        })
    }

    async fn process(
        &self,
        request: &ToolRequest,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let op = Operation::parse(&request.op).ok_or_else(|| {
            AgoraError::invalid_argument(format!("unknown operation '{}'", request.op))
        })?;

        // Registration is the one operation that may arrive before an
        // identity lock exists.
        if op == Operation::AgentRegister {
            return self.register(request).await;
        }

        let (principal, agent_id) = self.authenticate(request).await?;
        let authority = principal.authority();

        if self.store.is_halted().await && authority < USER_AUTHORITY {
            self.audit(
                principal.actor(),
                op.as_str(),
                "*",
                AuditOutcome::Denied,
                "emergency halt in force",
                authority,
            );
            return Err(AgoraError::halted("emergency halt is in force"));
        }

        match op {
            Operation::MessagingSend => self.messaging_send(request, &principal, &agent_id).await,
            Operation::TaskAssign => self.task_assign(request, &principal, &agent_id).await,
            Operation::TaskUpdate => self.task_update(request, &principal, &agent_id).await,
            Operation::WorkflowStart => self.workflow_start(request, &principal, &agent_id).await,
            Operation::QueryData => self.query_data(request, &principal, &agent_id).await,
            Operation::SystemStatus => self.status_op(&principal, &agent_id).await,
            Operation::AgentRegister => unreachable!("handled above"),
        }
    }

    /// Verify the identity lock and resolve the caller's agent record
    async fn authenticate(&self, request: &ToolRequest) -> AgoraResult<(Principal, String)> {
        let claims = request.claims();
        if let Err(err) = self.verifier.verify(&claims).await {
            if matches!(err, AgoraError::IdentitySpoofing(_)) {
                self.audit(
                    claims.agent_name.as_str(),
                    request.op.as_str(),
                    claims.project_directory.display().to_string(),
                    AuditOutcome::Denied,
                    &err.to_string(),
                    0,
                );
            }
            return Err(err);
        }

        let state = self.store.state().await;
        let agent = state.agent_by_name(&claims.agent_name).ok_or_else(|| {
            AgoraError::not_found(format!("agent '{}' is not registered", claims.agent_name))
        })?;
        if agent.project_directory != claims.project_directory {
            let err = AgoraError::identity_spoofing(format!(
                "agent '{}' is registered under a different project directory",
                claims.agent_name
            ));
            self.audit(
                claims.agent_name.as_str(),
                request.op.as_str(),
                claims.project_directory.display().to_string(),
                AuditOutcome::Denied,
                &err.to_string(),
                0,
            );
            return Err(err);
        }

        Ok((
            Principal::Agent {
                agent_id: agent.agent_id.clone(),
                agent_name: agent.agent_name.clone(),
                role: agent.role,
            },
            agent.agent_id.clone(),
        ))
    }

    async fn register(
        &self,
        request: &ToolRequest,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: RegisterParams = parse(&request.params)?;
        let claims = request.claims();
        let role = params.requested_role()?;
        let tier = params.requested_tier()?;

        let existing_lock = self.verifier.load(&claims.project_directory).await?;
        if let Some(lock) = &existing_lock {
            if lock.agent_name != claims.agent_name {
                let err = AgoraError::identity_spoofing(format!(
                    "project {} is locked to '{}'",
                    claims.project_directory.display(),
                    lock.agent_name
                ));
                self.audit(
                    claims.agent_name.as_str(),
                    Operation::AgentRegister.as_str(),
                    claims.project_directory.display().to_string(),
                    AuditOutcome::Denied,
                    &err.to_string(),
                    0,
                );
                return Err(err);
            }
        }

        // A fresh registrant has observer-floor authority for the
        // permission check; an existing agent re-registers with its
        // current role.
        let principal = {
            let state = self.store.state().await;
            match state.agent_by_name(&claims.agent_name) {
                Some(agent) => Principal::Agent {
                    agent_id: agent.agent_id.clone(),
                    agent_name: agent.agent_name.clone(),
                    role: agent.role,
                },
                None => Principal::Agent {
                    agent_id: String::new(),
                    agent_name: claims.agent_name.clone(),
                    role: AgentRole::Observer,
                },
            }
        };
        let scope = PermissionScope {
            requested_role: Some(role),
            ..Default::default()
        };
        match self
            .permissions
            .evaluate(&principal, Operation::AgentRegister, &scope)
        {
            Decision::Granted => {}
            Decision::Denied(why) | Decision::RequiresOverride(why) => {
                self.audit(
                    claims.agent_name.as_str(),
                    Operation::AgentRegister.as_str(),
                    claims.agent_name.clone(),
                    AuditOutcome::Denied,
                    &why,
                    principal.authority(),
                );
                return Err(AgoraError::permission_denied(why));
            }
        }

        if self.store.is_halted().await {
            return Err(AgoraError::halted("emergency halt is in force"));
        }

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::RegisterAgent {
                    agent_name: claims.agent_name.clone(),
                    project_directory: claims.project_directory.clone(),
                    role,
                    capabilities: params.capabilities.clone(),
                    tier,
                },
                authority: principal.authority(),
                actor: claims.agent_name.clone(),
                actor_agent_id: None,
            })
            .await?;

        // The one-way lock is written only after the store accepted the
        // registration.
        if existing_lock.is_none() {
            self.verifier
                .lock(&claims.project_directory, &claims.agent_name)
                .await?;
        }

        self.audit(
            claims.agent_name.as_str(),
            Operation::AgentRegister.as_str(),
            committed.result["agent_id"].as_str().unwrap_or_default().to_string(),
            AuditOutcome::Granted,
            "",
            principal.authority(),
        );

        let mut result = committed.result.clone();
        if let Some(obj) = result.as_object_mut() {
            obj.insert("agent_type".to_string(), json!(params.agent_type));
        }
        Ok((result, Some(committed.commit_sequence)))
    }

    async fn messaging_send(
        &self,
        request: &ToolRequest,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: SendParams = parse(&request.params)?;
        if params.to_agent != BROADCAST_TARGET
            && !IdGenerator::is_valid_for(&params.to_agent, IdPrefix::Agent)
        {
            return Err(AgoraError::invalid_argument(format!(
                "malformed recipient id '{}'",
                params.to_agent
            )));
        }

        self.check(principal, Operation::MessagingSend, &PermissionScope::default(), &params.to_agent)?;

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::SendMessage {
                    from_agent: agent_id.to_string(),
                    to_agent: params.to_agent.clone(),
                    message_type: params.message_type,
                    payload: params.payload,
                    priority: params.priority.unwrap_or(DEFAULT_PRIORITY),
                    thread_id: params.thread_id,
                },
                authority: principal.authority(),
                actor: principal.actor().to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;

        self.audit(
            principal.actor(),
            Operation::MessagingSend.as_str(),
            params.to_agent,
            AuditOutcome::Granted,
            "",
            principal.authority(),
        );
        Ok((committed.result, Some(committed.commit_sequence)))
    }

    async fn task_assign(
        &self,
        request: &ToolRequest,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: AssignParams = parse(&request.params)?;
        if !IdGenerator::is_valid_for(&params.assignee, IdPrefix::Agent) {
            return Err(AgoraError::invalid_argument(format!(
                "malformed assignee id '{}'",
                params.assignee
            )));
        }
        if let Some(wf) = &params.workflow_id {
            if !IdGenerator::is_valid_for(wf, IdPrefix::Wf) {
                return Err(AgoraError::invalid_argument(format!(
                    "malformed workflow id '{}'",
                    wf
                )));
            }
        }

        let scope = PermissionScope {
            self_scoped: params.assignee == agent_id,
            ..Default::default()
        };
        self.check(principal, Operation::TaskAssign, &scope, &params.assignee)?;

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::AssignTask {
                    assignee: params.assignee.clone(),
                    task_type: params.task_type,
                    payload: params.payload,
                    priority: params.priority.unwrap_or(DEFAULT_PRIORITY),
                    deadline: params.deadline,
                    workflow_id: params.workflow_id,
                    step_id: None,
                    idempotency_key: request.idempotency_key.clone(),
                },
                authority: principal.authority(),
                actor: principal.actor().to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;

        self.audit(
            principal.actor(),
            Operation::TaskAssign.as_str(),
            committed.result["task_id"].as_str().unwrap_or_default().to_string(),
            AuditOutcome::Granted,
            "",
            principal.authority(),
        );
        Ok((committed.result, Some(committed.commit_sequence)))
    }

    async fn task_update(
        &self,
        request: &ToolRequest,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: UpdateParams = parse(&request.params)?;
        if !IdGenerator::is_valid_for(&params.task_id, IdPrefix::Task) {
            return Err(AgoraError::invalid_argument(format!(
                "malformed task id '{}'",
                params.task_id
            )));
        }

        let assignee = {
            let state = self.store.state().await;
            state
                .tasks
                .get(&params.task_id)
                .map(|t| t.assignee.clone())
                .ok_or_else(|| AgoraError::not_found(format!("task {}", params.task_id)))?
        };
        let scope = PermissionScope {
            self_scoped: assignee == agent_id,
            ..Default::default()
        };
        self.check(principal, Operation::TaskUpdate, &scope, &params.task_id)?;

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::UpdateTask {
                    task_id: params.task_id.clone(),
                    status: params.status,
                    progress: params.progress,
                    result: params.result,
                },
                authority: principal.authority(),
                actor: principal.actor().to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;

        self.audit(
            principal.actor(),
            Operation::TaskUpdate.as_str(),
            params.task_id,
            AuditOutcome::Granted,
            "",
            principal.authority(),
        );
        Ok((committed.result, Some(committed.commit_sequence)))
    }

    async fn workflow_start(
        &self,
        request: &ToolRequest,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: WorkflowStartParams = parse(&request.params)?;
        self.check(
            principal,
            Operation::WorkflowStart,
            &PermissionScope::default(),
            &params.workflow_name,
        )?;

        let committed = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::StartWorkflow {
                    initiator: agent_id.to_string(),
                    workflow_name: params.workflow_name,
                    steps: params.steps,
                    metadata: params.metadata,
                    idempotency_key: request.idempotency_key.clone(),
                },
                authority: principal.authority(),
                actor: principal.actor().to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await?;

        self.audit(
            principal.actor(),
            Operation::WorkflowStart.as_str(),
            committed.result["workflow_id"].as_str().unwrap_or_default().to_string(),
            AuditOutcome::Granted,
            "",
            principal.authority(),
        );
        Ok((committed.result, Some(committed.commit_sequence)))
    }

    async fn query_data(
        &self,
        request: &ToolRequest,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        let params: QueryDataParams = parse(&request.params)?;
        let scope = PermissionScope {
            query_entity: Some(params.entity.as_str()),
            ..Default::default()
        };
        self.check(principal, Operation::QueryData, &scope, &params.entity)?;
        self.touch(principal, agent_id).await;

        let query = agora_store::QueryParams {
            entity: params.entity.clone(),
            filter: params.filter,
            limit: params.limit,
            cursor: params.cursor,
        };
        let audit_records = if params.entity == "audit" {
            Some(self.store.audit().all())
        } else {
            None
        };
        let page = {
            let state = self.store.state().await;
            agora_store::query::run(&state, audit_records.as_deref(), &query)?
        };

        Ok((serde_json::to_value(page)?, None))
    }

    async fn status_op(
        &self,
        principal: &Principal,
        agent_id: &str,
    ) -> AgoraResult<(serde_json::Value, Option<u64>)> {
        self.check(
            principal,
            Operation::SystemStatus,
            &PermissionScope::default(),
            "*",
        )?;
        self.touch(principal, agent_id).await;
        Ok((self.system_status().await, None))
    }

    /// Permission check with denial auditing
    fn check(
        &self,
        principal: &Principal,
        op: Operation,
        scope: &PermissionScope,
        subject: &str,
    ) -> AgoraResult<()> {
        match self.permissions.evaluate(principal, op, scope) {
            Decision::Granted => Ok(()),
            Decision::Denied(why) | Decision::RequiresOverride(why) => {
                self.audit(
                    principal.actor(),
                    op.as_str(),
                    subject,
                    AuditOutcome::Denied,
                    &why,
                    principal.authority(),
                );
                Err(AgoraError::permission_denied(why))
            }
        }
    }

    /// Read-only operations still refresh `last_seen_at`
    async fn touch(&self, principal: &Principal, agent_id: &str) {
        let result = self
            .store
            .submit(ReducerRequest {
                reducer: Reducer::Heartbeat {
                    agent_id: agent_id.to_string(),
                },
                authority: principal.authority(),
                actor: principal.actor().to_string(),
                actor_agent_id: Some(agent_id.to_string()),
            })
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "heartbeat fold-in failed");
        }
    }

    fn audit(
        &self,
        actor: impl Into<String>,
        operation: impl Into<String>,
        subject: impl Into<String>,
        outcome: AuditOutcome,
        reason: &str,
        authority_level: u8,
    ) {
        if let Err(e) = self.store.audit().record(
            actor,
            operation,
            subject,
            outcome,
            reason,
            authority_level,
        ) {
            tracing::error!(error = %e, "failed to write audit record");
        }
    }
}
