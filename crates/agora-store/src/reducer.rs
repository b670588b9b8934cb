// Agora Store - Reducers
//
// Reducers are the only way entities are mutated. Each one validates
// against the current state before touching it, assigns the commit
// sequence, and returns the events it emits. The writer applies reducers
// to a working copy and swaps on success, so a failed reducer leaves the
// store unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use agora_core::{
    validate_priority, validate_step_dag, Agent, AgentRole, AgentStatus, AuditOutcome,
    AuditRecord, Capability, CapabilitySpec, EventRecord, EventType, IdGenerator, IdPrefix,
    Message, ServiceTier, StepSpec, TaskAssignment, TaskStatus, Workflow, WorkflowStatus,
    WorkflowStep, AgoraError, AgoraResult, BROADCAST_TARGET, DEFAULT_PRIORITY,
    EMERGENCY_PRIORITY, USER_AUTHORITY,
};

use crate::state::StoreState;

/// A state transition request submitted to the single writer
#[derive(Debug, Clone)]
pub struct ReducerRequest {
    pub reducer: Reducer,

    /// Authority level of the submitting principal
    pub authority: u8,

    /// Actor name recorded in events and audit entries
    pub actor: String,

    /// Registered agent behind the actor, when known; its `last_seen_at`
    /// is refreshed as part of the commit
    pub actor_agent_id: Option<String>,
}

/// The atomic state transitions of the coordination store.
///
/// The first eight are the public reducers behind the tool-server surface;
/// the remainder are internal to the workflow coordinator and event fabric
/// but funnel through the same writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reducer")]
pub enum Reducer {
    RegisterAgent {
        agent_name: String,
        project_directory: std::path::PathBuf,
        role: AgentRole,
        capabilities: Vec<CapabilitySpec>,
        tier: ServiceTier,
    },
    RegisterCapability {
        agent_id: String,
        spec: CapabilitySpec,
    },
    SendMessage {
        from_agent: String,
        to_agent: String,
        message_type: String,
        payload: serde_json::Value,
        priority: u8,
        thread_id: Option<String>,
    },
    AssignTask {
        assignee: String,
        task_type: String,
        payload: serde_json::Value,
        priority: u8,
        deadline: Option<DateTime<Utc>>,
        workflow_id: Option<String>,
        /// Set by the coordinator when the task realizes a workflow step
        step_id: Option<String>,
        /// Makes the insert safe to retry
        idempotency_key: Option<String>,
    },
    UpdateTask {
        task_id: String,
        status: Option<TaskStatus>,
        progress: Option<u8>,
        result: Option<serde_json::Value>,
    },
    StartWorkflow {
        initiator: String,
        workflow_name: String,
        steps: Vec<StepSpec>,
        metadata: serde_json::Value,
        /// Makes the insert safe to retry
        idempotency_key: Option<String>,
    },
    UserOverride {
        action: OverrideAction,
        reason: String,
        authority_level: u8,
    },
    Heartbeat {
        agent_id: String,
    },
    /// Mirror task states into a workflow's steps and aggregate status
    SyncWorkflow {
        workflow_id: String,
        retry_limit: u32,
        retry_backoff_secs: u64,
    },
    /// The only path for `failed -> pending`; resets progress to zero
    RetryTask {
        step_id: String,
        retry_limit: u32,
    },
    /// Advance a subscriber's durable cursor; acknowledges every event at
    /// or below `sequence`
    CommitCursor {
        agent_id: String,
        sequence: u64,
    },
    /// Drop events older than the retention window and advance the prune
    /// horizon per target
    PruneEvents {
        older_than: DateTime<Utc>,
    },
}

impl Reducer {
    /// Reducer name used in audit entries and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterAgent { .. } => "register_agent",
            Self::RegisterCapability { .. } => "register_capability",
            Self::SendMessage { .. } => "send_message",
            Self::AssignTask { .. } => "assign_task",
            Self::UpdateTask { .. } => "update_task",
            Self::StartWorkflow { .. } => "start_workflow",
            Self::UserOverride { .. } => "user_override",
            Self::Heartbeat { .. } => "heartbeat",
            Self::SyncWorkflow { .. } => "sync_workflow",
            Self::RetryTask { .. } => "retry_task",
            Self::CommitCursor { .. } => "commit_cursor",
            Self::PruneEvents { .. } => "prune_events",
        }
    }

    /// Caller-supplied idempotency key, for the two insert reducers that
    /// honor one
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            Self::AssignTask {
                idempotency_key, ..
            }
            | Self::StartWorkflow {
                idempotency_key, ..
            } => idempotency_key.as_deref(),
            _ => None,
        }
    }
}

/// User override actions; all require authority 255
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum OverrideAction {
    /// Halt every running workflow, pause every reachable agent, and
    /// reject non-user reducers until resume
    EmergencyHalt,
    /// Lift the halt; paused agents return to active
    Resume,
    ForceAgentStatus { agent_id: String, status: AgentStatus },
    ForceTaskStatus { task_id: String, status: TaskStatus },
    ForceWorkflowStatus {
        workflow_id: String,
        status: WorkflowStatus,
    },
    /// Release a locked agent name so the project can re-register
    ReleaseAgentName { agent_name: String },
}

impl OverrideAction {
    pub fn subject(&self) -> String {
        match self {
            Self::EmergencyHalt | Self::Resume => "*".to_string(),
            Self::ForceAgentStatus { agent_id, .. } => agent_id.clone(),
            Self::ForceTaskStatus { task_id, .. } => task_id.clone(),
            Self::ForceWorkflowStatus { workflow_id, .. } => workflow_id.clone(),
            Self::ReleaseAgentName { agent_name } => agent_name.clone(),
        }
    }
}

/// Everything a committed reducer produced
#[derive(Debug, Clone)]
pub struct ReducerOutcome {
    /// Structured result handed back to the caller
    pub result: serde_json::Value,

    /// Events emitted atomically with the commit
    pub events: Vec<EventRecord>,

    /// Audit entries produced by the reducer itself
    pub audits: Vec<AuditRecord>,

    /// Commit sequence of this outcome; for an idempotent replay this is
    /// the original commit's sequence
    pub commit_sequence: u64,

    /// True when an idempotency key matched and no state changed
    pub replayed: bool,
}

impl ReducerOutcome {
    fn committed(result: serde_json::Value, events: Vec<EventRecord>, audits: Vec<AuditRecord>) -> Self {
        Self {
            result,
            events,
            audits,
            commit_sequence: 0,
            replayed: false,
        }
    }
}

/// Apply one reducer to the state, assigning the next commit sequence.
///
/// On error the state may be partially advanced; the caller (the writer)
/// applies reducers to a working copy and discards it on failure.
pub fn apply(
    state: &mut StoreState,
    req: &ReducerRequest,
    now: DateTime<Utc>,
) -> AgoraResult<ReducerOutcome> {
    // Idempotent replay: an identical request under a known key returns
    // the original result without committing anything.
    if let Some(key) = req.reducer.idempotency_key() {
        if let Some(entry) = state.idempotency.get(key) {
            let params = serde_json::to_value(&req.reducer)
                .map_err(|e| AgoraError::internal(format!("failed to fingerprint reducer: {}", e)))?;
            if entry.params == params {
                return Ok(ReducerOutcome {
                    result: entry.result.clone(),
                    events: Vec::new(),
                    audits: Vec::new(),
                    commit_sequence: entry.commit_sequence,
                    replayed: true,
                });
            }
            return Err(AgoraError::conflict(format!(
                "idempotency key '{}' was used with a different payload",
                key
            )));
        }
    }

    let commit_sequence = state.commit_sequence + 1;

    let mut outcome = match &req.reducer {
        Reducer::RegisterAgent {
            agent_name,
            project_directory,
            role,
            capabilities,
            tier,
        } => register_agent(
            state,
            commit_sequence,
            now,
            agent_name,
            project_directory,
            *role,
            capabilities,
            *tier,
        ),
        Reducer::RegisterCapability { agent_id, spec } => {
            register_capability(state, commit_sequence, now, agent_id, spec, true)
        }
        Reducer::SendMessage {
            from_agent,
            to_agent,
            message_type,
            payload,
            priority,
            thread_id,
        } => send_message(
            state,
            commit_sequence,
            now,
            from_agent,
            to_agent,
            message_type,
            payload,
            *priority,
            thread_id.clone(),
        ),
        Reducer::AssignTask {
            assignee,
            task_type,
            payload,
            priority,
            deadline,
            workflow_id,
            step_id,
            idempotency_key: _,
        } => assign_task(
            state,
            commit_sequence,
            now,
            assignee,
            task_type,
            payload,
            *priority,
            *deadline,
            workflow_id.clone(),
            step_id.clone(),
        ),
        Reducer::UpdateTask {
            task_id,
            status,
            progress,
            result,
        } => update_task(
            state,
            commit_sequence,
            now,
            task_id,
            *status,
            *progress,
            result.clone(),
        ),
        Reducer::StartWorkflow {
            initiator,
            workflow_name,
            steps,
            metadata,
            idempotency_key: _,
        } => start_workflow(
            state,
            commit_sequence,
            now,
            initiator,
            workflow_name,
            steps,
            metadata.clone(),
        ),
        Reducer::UserOverride {
            action,
            reason,
            authority_level,
        } => user_override(
            state,
            commit_sequence,
            now,
            &req.actor,
            action,
            reason,
            *authority_level,
        ),
        Reducer::Heartbeat { agent_id } => heartbeat(state, now, agent_id),
        Reducer::SyncWorkflow {
            workflow_id,
            retry_limit,
            retry_backoff_secs,
        } => sync_workflow(
            state,
            commit_sequence,
            now,
            workflow_id,
            *retry_limit,
            *retry_backoff_secs,
        ),
        Reducer::RetryTask {
            step_id,
            retry_limit,
        } => retry_task(state, commit_sequence, now, step_id, *retry_limit),
        Reducer::CommitCursor { agent_id, sequence } => {
            commit_cursor(state, agent_id, *sequence)
        }
        Reducer::PruneEvents { older_than } => prune_events(state, *older_than),
    }?;

    // Fold the actor's heartbeat into the commit.
    if let Some(actor_id) = &req.actor_agent_id {
        if let Some(agent) = state.agents.get_mut(actor_id) {
            agent.last_seen_at = now;
        }
    }

    state.commit_sequence = commit_sequence;
    state.events.extend(outcome.events.iter().cloned());
    outcome.commit_sequence = commit_sequence;

    if let Some(key) = req.reducer.idempotency_key() {
        let params = serde_json::to_value(&req.reducer)
            .map_err(|e| AgoraError::internal(format!("failed to fingerprint reducer: {}", e)))?;
        state.idempotency.insert(
            key.to_string(),
            crate::state::IdempotencyEntry {
                op: req.reducer.name().to_string(),
                params,
                result: outcome.result.clone(),
                commit_sequence,
            },
        );
    }

    Ok(outcome)
}

// ----------------------------------------------------------------------------
// Individual reducers
// ----------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn register_agent(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    agent_name: &str,
    project_directory: &std::path::Path,
    role: AgentRole,
    capabilities: &[CapabilitySpec],
    tier: ServiceTier,
) -> AgoraResult<ReducerOutcome> {
    if agent_name.trim().is_empty() {
        return Err(AgoraError::invalid_argument("agent name must not be empty"));
    }
    if !project_directory.is_absolute() {
        return Err(AgoraError::invalid_argument(
            "project directory must be an absolute path",
        ));
    }
    for spec in capabilities {
        spec.validate().map_err(AgoraError::invalid_argument)?;
    }

    let agent_id = match state.agent_names.get(agent_name) {
        Some(existing_id) => {
            // Name already locked: the binding must match exactly.
            let existing = state
                .agents
                .get(existing_id)
                .ok_or_else(|| AgoraError::internal("name index points at missing agent"))?;
            if existing.project_directory != project_directory {
                return Err(AgoraError::identity_spoofing(format!(
                    "agent name '{}' is locked to a different project directory",
                    agent_name
                )));
            }
            existing_id.clone()
        }
        None => IdGenerator::generate(IdPrefix::Agent)?,
    };

    let is_new = !state.agents.contains_key(&agent_id);
    if is_new {
        state.agents.insert(
            agent_id.clone(),
            Agent {
                agent_id: agent_id.clone(),
                agent_name: agent_name.to_string(),
                project_directory: project_directory.to_path_buf(),
                role,
                status: AgentStatus::Active,
                registered_at: now,
                last_seen_at: now,
                service_tier: tier,
            },
        );
        state
            .agent_names
            .insert(agent_name.to_string(), agent_id.clone());
    } else if let Some(agent) = state.agents.get_mut(&agent_id) {
        // Re-registration reactivates and may update role and tier.
        agent.status = AgentStatus::Active;
        agent.role = role;
        agent.service_tier = tier;
        agent.last_seen_at = now;
    }

    // Upsert the declared capabilities; previously-active capabilities
    // absent from the declaration are deactivated (assignments already
    // made against them are untouched).
    let declared: std::collections::HashSet<&str> =
        capabilities.iter().map(|c| c.capability_type.as_str()).collect();
    let mut capability_ids = Vec::new();
    for spec in capabilities {
        let sub = register_capability(state, commit_sequence, now, &agent_id, spec, false)?;
        if let Some(id) = sub.result.get("capability_id").and_then(|v| v.as_str()) {
            capability_ids.push(id.to_string());
        }
    }
    let owned: Vec<String> = state
        .capabilities
        .values()
        .filter(|c| c.agent_id == agent_id && c.active && !declared.contains(c.capability_type.as_str()))
        .map(|c| c.capability_id.clone())
        .collect();
    for id in owned {
        if let Some(cap) = state.capabilities.get_mut(&id) {
            cap.active = false;
        }
    }

    let payload = json!({
        "agent_id": agent_id,
        "agent_name": agent_name,
        "role": role,
        "capabilities": capability_ids,
    });
    let events = broadcast_event(
        state,
        EventType::AgentRegistered,
        &agent_id,
        DEFAULT_PRIORITY,
        commit_sequence,
        now,
        payload.clone(),
        ActiveOnly::Yes,
    )?;

    Ok(ReducerOutcome::committed(
        json!({
            "agent_id": agent_id,
            "agent_name": agent_name,
            "reactivated": !is_new,
            "capability_ids": capability_ids,
        }),
        events,
        Vec::new(),
    ))
}

fn register_capability(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    agent_id: &str,
    spec: &CapabilitySpec,
    emit: bool,
) -> AgoraResult<ReducerOutcome> {
    spec.validate().map_err(AgoraError::invalid_argument)?;
    if !state.agents.contains_key(agent_id) {
        return Err(AgoraError::not_found(format!("agent {}", agent_id)));
    }

    let key = StoreState::capability_key(agent_id, &spec.capability_type);
    let capability_id = match state.capability_index.get(&key) {
        Some(id) => {
            let cap = state
                .capabilities
                .get_mut(id)
                .ok_or_else(|| AgoraError::internal("capability index points at missing row"))?;
            cap.proficiency_level = spec.proficiency;
            cap.max_concurrent_tasks = spec.max_concurrent;
            cap.active = true;
            id.clone()
        }
        None => {
            let id = IdGenerator::generate(IdPrefix::Cap)?;
            state.capabilities.insert(
                id.clone(),
                Capability {
                    capability_id: id.clone(),
                    agent_id: agent_id.to_string(),
                    capability_type: spec.capability_type.clone(),
                    proficiency_level: spec.proficiency,
                    max_concurrent_tasks: spec.max_concurrent,
                    active: true,
                },
            );
            state.capability_index.insert(key, id.clone());
            id
        }
    };

    let events = if emit {
        broadcast_event(
            state,
            EventType::CapabilityUpdated,
            agent_id,
            DEFAULT_PRIORITY,
            commit_sequence,
            now,
            json!({
                "capability_id": capability_id,
                "agent_id": agent_id,
                "type": spec.capability_type,
                "proficiency": spec.proficiency,
                "max": spec.max_concurrent,
            }),
            ActiveOnly::Yes,
        )?
    } else {
        Vec::new()
    };

    Ok(ReducerOutcome::committed(
        json!({ "capability_id": capability_id }),
        events,
        Vec::new(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn send_message(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    from_agent: &str,
    to_agent: &str,
    message_type: &str,
    payload: &serde_json::Value,
    priority: u8,
    thread_id: Option<String>,
) -> AgoraResult<ReducerOutcome> {
    validate_priority(priority).map_err(AgoraError::invalid_argument)?;
    if !state.agents.contains_key(from_agent) {
        return Err(AgoraError::not_found(format!("sender {}", from_agent)));
    }
    if to_agent != BROADCAST_TARGET && !state.agents.contains_key(to_agent) {
        return Err(AgoraError::not_found(format!("recipient {}", to_agent)));
    }

    let message_id = IdGenerator::generate(IdPrefix::Msg)?;
    let message = Message {
        message_id: message_id.clone(),
        from_agent: from_agent.to_string(),
        to_agent: to_agent.to_string(),
        message_type: message_type.to_string(),
        payload: payload.clone(),
        priority,
        thread_id: thread_id.clone(),
        created_at: now,
        delivered_count: 0,
    };

    let event_payload = json!({
        "message_id": message_id,
        "from_agent": from_agent,
        "message_type": message_type,
        "payload": payload,
        "priority": priority,
        "thread_id": thread_id,
    });

    let events = if to_agent == BROADCAST_TARGET {
        // One delivery per non-sender agent that is not offline, expanded
        // at commit time; the event_id is shared across recipients.
        broadcast_event(
            state,
            EventType::MessageSent,
            from_agent,
            priority,
            commit_sequence,
            now,
            event_payload,
            ActiveOnly::Reachable,
        )?
    } else {
        vec![targeted_event(
            state,
            EventType::MessageSent,
            from_agent,
            to_agent,
            priority,
            commit_sequence,
            now,
            event_payload,
        )?]
    };

    let delivery_count = events.len();
    state.messages.insert(message_id.clone(), message);

    Ok(ReducerOutcome::committed(
        json!({
            "message_id": message_id,
            "deliveries": delivery_count,
        }),
        events,
        Vec::new(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn assign_task(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    assignee: &str,
    task_type: &str,
    payload: &serde_json::Value,
    priority: u8,
    deadline: Option<DateTime<Utc>>,
    workflow_id: Option<String>,
    step_id: Option<String>,
) -> AgoraResult<ReducerOutcome> {
    validate_priority(priority).map_err(AgoraError::invalid_argument)?;

    let agent = state
        .agents
        .get(assignee)
        .ok_or_else(|| AgoraError::not_found(format!("assignee {}", assignee)))?;
    if agent.status != AgentStatus::Active {
        return Err(AgoraError::conflict(format!(
            "assignee {} is {:?}, not active",
            assignee, agent.status
        )));
    }

    let capability = state
        .capability_of(assignee, task_type)
        .filter(|c| c.active)
        .ok_or_else(|| {
            AgoraError::invalid_argument(format!(
                "assignee {} has no active capability '{}'",
                assignee, task_type
            ))
        })?;

    // The writer applies reducers serially, so this check-then-insert is
    // the atomic arbiter of concurrency slots: proposals built on stale
    // snapshots are rejected here.
    let in_flight = state.in_flight_count(assignee, task_type);
    if in_flight >= capability.max_concurrent_tasks {
        return Err(AgoraError::conflict(format!(
            "assignee {} already holds {} '{}' assignments (max {})",
            assignee, in_flight, task_type, capability.max_concurrent_tasks
        )));
    }

    if let Some(wf_id) = &workflow_id {
        if !state.workflows.contains_key(wf_id) {
            return Err(AgoraError::not_found(format!("workflow {}", wf_id)));
        }
    }
    if let Some(sid) = &step_id {
        let step = state
            .steps
            .get(sid)
            .ok_or_else(|| AgoraError::not_found(format!("step {}", sid)))?;
        if workflow_id.as_deref() != Some(step.workflow_id.as_str()) {
            return Err(AgoraError::invalid_argument(
                "step does not belong to the given workflow",
            ));
        }
        if step.assigned_task_id.is_some() {
            return Err(AgoraError::conflict(format!("step {} is already assigned", sid)));
        }
    }

    let task_id = IdGenerator::generate(IdPrefix::Task)?;
    let task = TaskAssignment {
        task_id: task_id.clone(),
        workflow_id: workflow_id.clone(),
        assignee: assignee.to_string(),
        task_type: task_type.to_string(),
        payload: payload.clone(),
        priority,
        deadline,
        status: TaskStatus::Pending,
        progress: 0,
        created_at: now,
        updated_at: now,
        result: None,
        retry_count: 0,
    };
    state.tasks.insert(task_id.clone(), task);

    if let Some(sid) = &step_id {
        if let Some(step) = state.steps.get_mut(sid) {
            step.assigned_task_id = Some(task_id.clone());
            step.status = TaskStatus::Pending;
            step.next_retry_at = None;
        }
        if let Some(wf_id) = &workflow_id {
            if let Some(wf) = state.workflows.get_mut(wf_id) {
                if wf.status == WorkflowStatus::Pending {
                    wf.status = WorkflowStatus::Running;
                }
            }
        }
    }

    let events = vec![targeted_event(
        state,
        EventType::TaskAssigned,
        assignee,
        assignee,
        priority,
        commit_sequence,
        now,
        json!({
            "task_id": task_id,
            "task_type": task_type,
            "payload": payload,
            "priority": priority,
            "deadline": deadline,
            "workflow_id": workflow_id,
            "step_id": step_id,
        }),
    )?];

    Ok(ReducerOutcome::committed(
        json!({ "task_id": task_id }),
        events,
        Vec::new(),
    ))
}

fn update_task(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    task_id: &str,
    status: Option<TaskStatus>,
    progress: Option<u8>,
    result: Option<serde_json::Value>,
) -> AgoraResult<ReducerOutcome> {
    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| AgoraError::not_found(format!("task {}", task_id)))?;

    let current = task.status;
    let next = status.unwrap_or(current);

    if current.is_terminal() {
        return Err(AgoraError::invalid_transition(format!(
            "task {} is already {:?}",
            task_id, current
        )));
    }
    if !current.can_transition(next) {
        return Err(AgoraError::invalid_transition(format!(
            "task {} cannot move {:?} -> {:?}",
            task_id, current, next
        )));
    }
    if let Some(p) = progress {
        if p > 100 {
            return Err(AgoraError::invalid_argument(format!(
                "progress must be within 0..=100, got {}",
                p
            )));
        }
        // Progress is non-decreasing within a single run.
        if p < task.progress {
            return Err(AgoraError::invalid_transition(format!(
                "task {} progress is {}, refusing decrease to {}",
                task_id, task.progress, p
            )));
        }
    }

    let task = state.tasks.get_mut(task_id).expect("checked above");
    task.status = next;
    if let Some(p) = progress {
        task.progress = p;
    }
    if next == TaskStatus::Completed {
        task.progress = progress.unwrap_or(100).max(task.progress);
    }
    if let Some(r) = result {
        task.result = Some(r);
    }
    task.updated_at = now;

    let assignee = task.assignee.clone();
    let priority = task.priority;
    let workflow_id = task.workflow_id.clone();
    let event_payload = json!({
        "task_id": task_id,
        "status": next,
        "progress": state.tasks[task_id].progress,
        "result": state.tasks[task_id].result,
        "workflow_id": workflow_id,
    });

    let mut events = vec![targeted_event(
        state,
        EventType::TaskUpdated,
        &assignee,
        &assignee,
        priority,
        commit_sequence,
        now,
        event_payload.clone(),
    )?];

    // The workflow initiator observes updates to workflow tasks too.
    if let Some(wf_id) = &workflow_id {
        if let Some(initiator) = state.workflows.get(wf_id).map(|w| w.initiator_agent.clone()) {
            if initiator != assignee {
                events.push(targeted_event(
                    state,
                    EventType::TaskUpdated,
                    &assignee,
                    &initiator,
                    priority,
                    commit_sequence,
                    now,
                    event_payload,
                )?);
            }
        }
    }

    Ok(ReducerOutcome::committed(
        json!({
            "task_id": task_id,
            "status": next,
            "progress": state.tasks[task_id].progress,
        }),
        events,
        Vec::new(),
    ))
}

fn start_workflow(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    initiator: &str,
    workflow_name: &str,
    steps: &[StepSpec],
    metadata: serde_json::Value,
) -> AgoraResult<ReducerOutcome> {
    if workflow_name.trim().is_empty() {
        return Err(AgoraError::invalid_argument("workflow name must not be empty"));
    }
    if !state.agents.contains_key(initiator) {
        return Err(AgoraError::not_found(format!("initiator {}", initiator)));
    }
    validate_step_dag(steps).map_err(AgoraError::invalid_argument)?;

    let workflow_id = IdGenerator::generate(IdPrefix::Wf)?;

    // Resolve dependency names to step identifiers.
    let mut ids_by_name = std::collections::HashMap::new();
    let mut step_rows = Vec::new();
    for (ordinal, spec) in steps.iter().enumerate() {
        let step_id = IdGenerator::generate(IdPrefix::Step)?;
        ids_by_name.insert(spec.name.clone(), step_id.clone());
        step_rows.push((step_id, ordinal as u32, spec));
    }

    let mut step_ids = Vec::new();
    for (step_id, ordinal, spec) in &step_rows {
        let depends_on = spec
            .depends_on
            .iter()
            .map(|name| ids_by_name[name].clone())
            .collect();
        state.steps.insert(
            step_id.clone(),
            WorkflowStep {
                step_id: step_id.clone(),
                workflow_id: workflow_id.clone(),
                ordinal: *ordinal,
                name: spec.name.clone(),
                required_capability: spec.required_capability.clone(),
                assigned_task_id: None,
                status: TaskStatus::Pending,
                depends_on,
                payload: spec.payload.clone(),
                retry_count: 0,
                next_retry_at: None,
            },
        );
        step_ids.push(step_id.clone());
    }

    state.workflows.insert(
        workflow_id.clone(),
        Workflow {
            workflow_id: workflow_id.clone(),
            workflow_name: workflow_name.to_string(),
            initiator_agent: initiator.to_string(),
            status: WorkflowStatus::Pending,
            steps: step_ids.clone(),
            metadata,
            created_at: now,
            completed_at: None,
        },
    );

    let events = vec![targeted_event(
        state,
        EventType::WorkflowStarted,
        initiator,
        initiator,
        DEFAULT_PRIORITY,
        commit_sequence,
        now,
        json!({
            "workflow_id": workflow_id,
            "workflow_name": workflow_name,
            "steps": step_ids,
        }),
    )?];

    Ok(ReducerOutcome::committed(
        json!({
            "workflow_id": workflow_id,
            "step_ids": step_ids,
        }),
        events,
        Vec::new(),
    ))
}

fn user_override(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    actor: &str,
    action: &OverrideAction,
    reason: &str,
    authority_level: u8,
) -> AgoraResult<ReducerOutcome> {
    if authority_level != USER_AUTHORITY {
        return Err(AgoraError::permission_denied(format!(
            "user_override requires authority {}, got {}",
            USER_AUTHORITY, authority_level
        )));
    }

    match action {
        OverrideAction::EmergencyHalt => {
            state.halted = true;
            for wf in state.workflows.values_mut() {
                if matches!(wf.status, WorkflowStatus::Pending | WorkflowStatus::Running) {
                    wf.status = WorkflowStatus::Halted;
                }
            }
            for agent in state.agents.values_mut() {
                if agent.status != AgentStatus::Offline {
                    agent.status = AgentStatus::Paused;
                }
            }
            tracing::warn!(reason, "emergency halt engaged");
        }
        OverrideAction::Resume => {
            state.halted = false;
            for agent in state.agents.values_mut() {
                if agent.status == AgentStatus::Paused {
                    agent.status = AgentStatus::Active;
                }
            }
            for wf in state.workflows.values_mut() {
                if wf.status == WorkflowStatus::Halted {
                    wf.status = WorkflowStatus::Running;
                }
            }
            tracing::info!(reason, "emergency halt lifted");
        }
        OverrideAction::ForceAgentStatus { agent_id, status } => {
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| AgoraError::not_found(format!("agent {}", agent_id)))?;
            agent.status = *status;
        }
        OverrideAction::ForceTaskStatus { task_id, status } => {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AgoraError::not_found(format!("task {}", task_id)))?;
            task.status = *status;
            task.updated_at = now;
        }
        OverrideAction::ForceWorkflowStatus {
            workflow_id,
            status,
        } => {
            let wf = state
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| AgoraError::not_found(format!("workflow {}", workflow_id)))?;
            wf.status = *status;
            if status.is_terminal() {
                wf.completed_at = Some(now);
            }
        }
        OverrideAction::ReleaseAgentName { agent_name } => {
            state
                .agent_names
                .remove(agent_name)
                .ok_or_else(|| AgoraError::not_found(format!("agent name '{}'", agent_name)))?;
        }
    }

    let action_value = serde_json::to_value(action)
        .map_err(|e| AgoraError::internal(format!("failed to serialize override: {}", e)))?;
    let events = broadcast_event(
        state,
        EventType::UserOverride,
        actor,
        EMERGENCY_PRIORITY,
        commit_sequence,
        now,
        json!({
            "action": action_value,
            "reason": reason,
        }),
        ActiveOnly::Reachable,
    )?;

    let audit = AuditRecord {
        audit_id: IdGenerator::generate(IdPrefix::Audit)?,
        actor: actor.to_string(),
        operation: "user_override".to_string(),
        subject: action.subject(),
        outcome: AuditOutcome::Granted,
        reason: reason.to_string(),
        authority_level,
        at: now,
    };

    Ok(ReducerOutcome::committed(
        json!({ "applied": action_value }),
        events,
        vec![audit],
    ))
}

fn heartbeat(
    state: &mut StoreState,
    now: DateTime<Utc>,
    agent_id: &str,
) -> AgoraResult<ReducerOutcome> {
    let agent = state
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| AgoraError::not_found(format!("agent {}", agent_id)))?;
    agent.last_seen_at = now;
    Ok(ReducerOutcome::committed(
        json!({ "agent_id": agent_id, "last_seen_at": now }),
        Vec::new(),
        Vec::new(),
    ))
}

fn sync_workflow(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    workflow_id: &str,
    retry_limit: u32,
    retry_backoff_secs: u64,
) -> AgoraResult<ReducerOutcome> {
    let wf = state
        .workflows
        .get(workflow_id)
        .ok_or_else(|| AgoraError::not_found(format!("workflow {}", workflow_id)))?;
    if wf.status.is_terminal() || wf.status == WorkflowStatus::Halted {
        return Ok(ReducerOutcome::committed(
            json!({ "workflow_id": workflow_id, "status": wf.status }),
            Vec::new(),
            Vec::new(),
        ));
    }
    let initiator = wf.initiator_agent.clone();
    let previous_progress = state.workflow_progress(workflow_id);

    // Mirror bound task states into steps.
    let step_ids: Vec<String> = state
        .steps
        .values()
        .filter(|s| s.workflow_id == workflow_id)
        .map(|s| s.step_id.clone())
        .collect();

    let mut newly_completed = Vec::new();
    let mut exhausted_failure = false;
    let mut cancelled = false;
    for sid in &step_ids {
        let task_status = {
            let step = &state.steps[sid];
            step.assigned_task_id
                .as_deref()
                .and_then(|tid| state.tasks.get(tid))
                .map(|t| t.status)
        };
        let Some(task_status) = task_status else {
            continue;
        };
        let step = state.steps.get_mut(sid).expect("step listed above");
        let before = step.status;
        step.status = task_status;
        match task_status {
            TaskStatus::Completed if before != TaskStatus::Completed => {
                newly_completed.push(step.name.clone());
            }
            TaskStatus::Failed => {
                if step.retry_count >= retry_limit {
                    exhausted_failure = true;
                } else if step.next_retry_at.is_none() {
                    // Exponential backoff: base * 2^retries_so_far.
                    let exp = step.retry_count.min(16);
                    let delay = chrono::Duration::seconds((retry_backoff_secs as i64) << exp);
                    step.next_retry_at = Some(now + delay);
                }
            }
            TaskStatus::Cancelled => cancelled = true,
            _ => {}
        }
    }

    let all_completed = state
        .workflow_steps(workflow_id)
        .iter()
        .all(|s| s.status == TaskStatus::Completed);
    let progress = state.workflow_progress(workflow_id);

    let mut events = Vec::new();
    let wf = state.workflows.get(workflow_id).expect("checked above");
    let mut status = wf.status;
    if status == WorkflowStatus::Pending
        && state
            .workflow_steps(workflow_id)
            .iter()
            .any(|s| s.assigned_task_id.is_some())
    {
        status = WorkflowStatus::Running;
    }
    if all_completed {
        status = WorkflowStatus::Completed;
    } else if exhausted_failure || cancelled {
        status = WorkflowStatus::Failed;
    }

    let terminal_event = match status {
        WorkflowStatus::Completed => Some(EventType::WorkflowCompleted),
        WorkflowStatus::Failed => Some(EventType::WorkflowFailed),
        _ => None,
    };
    let status_changed = status != state.workflows[workflow_id].status;

    {
        let wf = state.workflows.get_mut(workflow_id).expect("checked above");
        wf.status = status;
        if status.is_terminal() && wf.completed_at.is_none() {
            wf.completed_at = Some(now);
        }
    }

    // workflow_progress fires on step completion and on every 25% band
    // the aggregate crosses.
    let crossed_band = progress / 25 != previous_progress / 25;
    if !newly_completed.is_empty() || crossed_band {
        events.push(targeted_event(
            state,
            EventType::WorkflowProgress,
            &initiator,
            &initiator,
            DEFAULT_PRIORITY,
            commit_sequence,
            now,
            json!({
                "workflow_id": workflow_id,
                "progress": progress,
                "completed_steps": newly_completed,
            }),
        )?);
    }
    if status_changed {
        if let Some(event_type) = terminal_event {
            events.push(targeted_event(
                state,
                event_type,
                &initiator,
                &initiator,
                DEFAULT_PRIORITY,
                commit_sequence,
                now,
                json!({
                    "workflow_id": workflow_id,
                    "status": status,
                    "progress": progress,
                }),
            )?);
        }
    }

    Ok(ReducerOutcome::committed(
        json!({
            "workflow_id": workflow_id,
            "status": status,
            "progress": progress,
        }),
        events,
        Vec::new(),
    ))
}

fn retry_task(
    state: &mut StoreState,
    commit_sequence: u64,
    now: DateTime<Utc>,
    step_id: &str,
    retry_limit: u32,
) -> AgoraResult<ReducerOutcome> {
    let step = state
        .steps
        .get(step_id)
        .ok_or_else(|| AgoraError::not_found(format!("step {}", step_id)))?;
    let task_id = step
        .assigned_task_id
        .clone()
        .ok_or_else(|| AgoraError::invalid_transition(format!("step {} has no task", step_id)))?;
    let task = state
        .tasks
        .get(&task_id)
        .ok_or_else(|| AgoraError::not_found(format!("task {}", task_id)))?;
    if task.status != TaskStatus::Failed {
        return Err(AgoraError::invalid_transition(format!(
            "task {} is {:?}; only failed tasks retry",
            task_id, task.status
        )));
    }
    if step.retry_count >= retry_limit {
        return Err(AgoraError::invalid_transition(format!(
            "step {} has exhausted its {} retries",
            step_id, retry_limit
        )));
    }

    let assignee;
    let priority;
    {
        let task = state.tasks.get_mut(&task_id).expect("checked above");
        task.status = TaskStatus::Pending;
        task.progress = 0;
        task.result = None;
        task.retry_count += 1;
        task.updated_at = now;
        assignee = task.assignee.clone();
        priority = task.priority;
    }
    {
        let step = state.steps.get_mut(step_id).expect("checked above");
        step.retry_count += 1;
        step.status = TaskStatus::Pending;
        step.next_retry_at = None;
    }

    let retry_count = state.steps[step_id].retry_count;
    let events = vec![targeted_event(
        state,
        EventType::TaskUpdated,
        &assignee,
        &assignee,
        priority,
        commit_sequence,
        now,
        json!({
            "task_id": task_id,
            "status": TaskStatus::Pending,
            "progress": 0,
            "retry": retry_count,
        }),
    )?];

    Ok(ReducerOutcome::committed(
        json!({
            "task_id": task_id,
            "retry": retry_count,
        }),
        events,
        Vec::new(),
    ))
}

fn commit_cursor(
    state: &mut StoreState,
    agent_id: &str,
    sequence: u64,
) -> AgoraResult<ReducerOutcome> {
    let current = state.cursors.get(agent_id).copied().unwrap_or(0);
    let cursor = current.max(sequence);
    state.cursors.insert(agent_id.to_string(), cursor);

    // Acknowledge newly-covered events; count message deliveries once.
    let mut message_ids = Vec::new();
    for event in state.events.iter_mut() {
        if event.target_agent == agent_id && event.sequence <= cursor && !event.acked {
            event.acked = true;
            if event.event_type == EventType::MessageSent {
                if let Some(id) = event.payload.get("message_id").and_then(|v| v.as_str()) {
                    message_ids.push(id.to_string());
                }
            }
        }
    }
    for id in message_ids {
        if let Some(message) = state.messages.get_mut(&id) {
            message.delivered_count += 1;
        }
    }

    Ok(ReducerOutcome::committed(
        json!({ "agent_id": agent_id, "cursor": cursor }),
        Vec::new(),
        Vec::new(),
    ))
}

fn prune_events(
    state: &mut StoreState,
    older_than: DateTime<Utc>,
) -> AgoraResult<ReducerOutcome> {
    let mut pruned = 0usize;
    let mut kept = Vec::with_capacity(state.events.len());
    for event in state.events.drain(..) {
        if event.created_at < older_than {
            let horizon = state
                .pruned_through
                .entry(event.target_agent.clone())
                .or_insert(0);
            if event.sequence > *horizon {
                *horizon = event.sequence;
            }
            pruned += 1;
        } else {
            kept.push(event);
        }
    }
    state.events = kept;

    if pruned > 0 {
        tracing::debug!(pruned, "retention sweep pruned events");
    }
    Ok(ReducerOutcome::committed(
        json!({ "pruned": pruned }),
        Vec::new(),
        Vec::new(),
    ))
}

// ----------------------------------------------------------------------------
// Event construction
// ----------------------------------------------------------------------------

enum ActiveOnly {
    /// Deliver to active agents only
    Yes,
    /// Deliver to every agent that is not offline
    Reachable,
}

#[allow(clippy::too_many_arguments)]
fn targeted_event(
    state: &mut StoreState,
    event_type: EventType,
    source: &str,
    target: &str,
    priority: u8,
    commit_sequence: u64,
    now: DateTime<Utc>,
    payload: serde_json::Value,
) -> AgoraResult<EventRecord> {
    let event_id = IdGenerator::generate(IdPrefix::Evt)?;
    let sequence = state.next_sequence_for(target);
    Ok(EventRecord {
        event_id,
        event_type,
        source_agent: source.to_string(),
        target_agent: target.to_string(),
        sequence,
        commit_sequence,
        priority,
        created_at: now,
        payload,
        acked: false,
    })
}

/// Expand one logical event into per-recipient records sharing an event id
#[allow(clippy::too_many_arguments)]
fn broadcast_event(
    state: &mut StoreState,
    event_type: EventType,
    source: &str,
    priority: u8,
    commit_sequence: u64,
    now: DateTime<Utc>,
    payload: serde_json::Value,
    reach: ActiveOnly,
) -> AgoraResult<Vec<EventRecord>> {
    let event_id = IdGenerator::generate(IdPrefix::Evt)?;
    let targets: Vec<String> = match reach {
        ActiveOnly::Yes => state
            .active_agents()
            .filter(|a| a.agent_id != source)
            .map(|a| a.agent_id.clone())
            .collect(),
        ActiveOnly::Reachable => state
            .reachable_agents()
            .filter(|a| a.agent_id != source)
            .map(|a| a.agent_id.clone())
            .collect(),
    };

    let mut events = Vec::with_capacity(targets.len());
    for target in targets {
        let sequence = state.next_sequence_for(&target);
        events.push(EventRecord {
            event_id: event_id.clone(),
            event_type,
            source_agent: source.to_string(),
            target_agent: target,
            sequence,
            commit_sequence,
            priority,
            created_at: now,
            payload: payload.clone(),
            acked: false,
        });
    }
    Ok(events)
}
