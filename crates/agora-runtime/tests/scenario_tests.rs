//! Marketplace Scenario Tests
//!
//! End-to-end tests driving the tool server, store, fabric, and
//! coordinator together: registration and identity locking, broadcast
//! delivery, the task state machine, dependent workflows, emergency halt,
//! and capability-matching tie-breaks.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use agora_core::{AgoraConfig, TaskStatus, ToolRequest, ToolResponse, WorkflowStatus};
use agora_runtime::Marketplace;
use agora_store::OverrideAction;

// ============================================================================
// Harness
// ============================================================================

async fn start_marketplace(dir: &TempDir) -> Marketplace {
    let mut config = AgoraConfig::new(dir.path());
    // Fast ticks and immediate retries keep the tests snappy.
    config.coordinator.tick_interval_ms = 25;
    config.coordinator.task_retry_backoff_secs = 0;
    Marketplace::start(config).await.unwrap()
}

fn project_dir(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

async fn call(
    market: &Marketplace,
    name: &str,
    project: &PathBuf,
    op: &str,
    params: serde_json::Value,
) -> ToolResponse {
    market
        .server
        .handle(ToolRequest::new(name, project.clone(), op, params))
        .await
}

async fn must_call(
    market: &Marketplace,
    name: &str,
    project: &PathBuf,
    op: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let response = call(market, name, project, op, params).await;
    assert!(
        response.ok,
        "{} failed: {:?} {:?}",
        op, response.error_kind, response.message
    );
    response.result.unwrap()
}

/// Register an agent and return its id
async fn register(
    market: &Marketplace,
    dir: &TempDir,
    name: &str,
    capabilities: serde_json::Value,
    metadata: serde_json::Value,
) -> String {
    let project = project_dir(dir, name);
    let result = must_call(
        market,
        name,
        &project,
        "agora.agent.register",
        json!({
            "agent_type": "generic",
            "capabilities": capabilities,
            "metadata": metadata,
        }),
    )
    .await;
    result["agent_id"].as_str().unwrap().to_string()
}

/// Poll until a condition holds or give up after five seconds
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {{
        let mut ok = false;
        for _ in 0..200 {
            if $cond {
                ok = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(ok, "timed out waiting for {}", $what);
    }};
}

// ============================================================================
// S1 - Registration and identity lock
// ============================================================================

#[tokio::test]
async fn test_registration_locks_identity() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;
    let project = project_dir(&dir, "alpha");

    let result = must_call(
        &market,
        "alpha",
        &project,
        "agora.agent.register",
        json!({
            "agent_type": "documentation",
            "capabilities": [{"type": "docs", "proficiency": 80, "max": 3}],
        }),
    )
    .await;

    let agent_id = result["agent_id"].as_str().unwrap();
    assert!(
        is_agent_id_shape(agent_id),
        "agent id {} does not match agent_[0-9a-f]{{16}}",
        agent_id
    );

    // The lock file now binds the name to the project directory.
    let lock: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(project.join(".agora-identity.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(lock["agent_name"], "alpha");
    assert_eq!(lock["project_directory"], project.to_str().unwrap());

    // A different project claiming the same name is spoofing.
    let imposter_project = project_dir(&dir, "imposter");
    std::fs::create_dir_all(&imposter_project).unwrap();
    let response = call(
        &market,
        "alpha",
        &imposter_project,
        "agora.agent.register",
        json!({ "agent_type": "documentation" }),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("IdentitySpoofingError"));
}

fn is_agent_id_shape(id: &str) -> bool {
    id.len() == "agent_".len() + 16
        && id.starts_with("agent_")
        && id["agent_".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[tokio::test]
async fn test_registration_is_idempotent_on_name() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let first = register(&market, &dir, "alpha", json!([]), json!({})).await;
    let second = register(&market, &dir, "alpha", json!([]), json!({})).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unverified_caller_is_rejected() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;
    register(&market, &dir, "alpha", json!([]), json!({})).await;

    // No lock file exists for this project: every operation but
    // registration is spoofing.
    let rogue = project_dir(&dir, "rogue");
    std::fs::create_dir_all(&rogue).unwrap();
    let response = call(&market, "alpha", &rogue, "agora.system.status", json!({})).await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("IdentitySpoofingError"));
}

#[tokio::test]
async fn test_privileged_role_requires_override() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let project = project_dir(&dir, "admin-wannabe");
    let response = call(
        &market,
        "admin-wannabe",
        &project,
        "agora.agent.register",
        json!({
            "agent_type": "generic",
            "metadata": {"role": "FRAMEWORK_ADMIN"},
        }),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("PermissionDenied"));
}

// ============================================================================
// S2 - Broadcast delivery
// ============================================================================

#[tokio::test]
async fn test_broadcast_delivers_to_active_non_senders() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let a1 = register(&market, &dir, "a1", json!([]), json!({})).await;
    let a2 = register(&market, &dir, "a2", json!([]), json!({})).await;
    let a3 = register(&market, &dir, "a3", json!([]), json!({})).await;
    let a4 = register(&market, &dir, "a4", json!([]), json!({})).await;

    // a4 goes offline before the broadcast.
    market
        .server
        .user_override(
            OverrideAction::ForceAgentStatus {
                agent_id: a4.clone(),
                status: agora_core::AgentStatus::Offline,
            },
            "test",
        )
        .await
        .unwrap();

    market.fabric.subscribe(&a2, None).await.unwrap();
    market.fabric.subscribe(&a3, None).await.unwrap();

    let p1 = project_dir(&dir, "a1");
    let result = must_call(
        &market,
        "a1",
        &p1,
        "agora.messaging.send",
        json!({"to_agent": "*", "message_type": "hello", "payload": {}, "priority": 2}),
    )
    .await;
    assert_eq!(result["deliveries"], 2);
    let message_id = result["message_id"].as_str().unwrap().to_string();

    // Both recipients poll and acknowledge; the sender and the offline
    // agent never see a delivery.
    for recipient in [&a2, &a3] {
        wait_until!(
            "delivery to reach the subscriber",
            market.fabric.queue_depth(recipient) > 0
        );
        let events = market.fabric.poll(recipient, 10);
        let delivery = events
            .iter()
            .find(|e| e.payload["message_id"] == json!(message_id))
            .expect("message delivery event");
        market
            .fabric
            .ack(recipient, delivery.sequence)
            .await
            .unwrap();
    }
    assert_eq!(market.fabric.queue_depth(&a1), 0);
    assert_eq!(market.fabric.queue_depth(&a4), 0);

    let state = market.store.state().await;
    assert_eq!(state.messages[&message_id].delivered_count, 2);
}

// ============================================================================
// S3 - Task state machine
// ============================================================================

#[tokio::test]
async fn test_task_state_machine_end_to_end() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _boss = register(
        &market,
        &dir,
        "boss",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    let a2 = register(
        &market,
        &dir,
        "a2",
        json!([{"type": "docs", "proficiency": 80, "max": 3}]),
        json!({}),
    )
    .await;

    let boss_project = project_dir(&dir, "boss");
    let a2_project = project_dir(&dir, "a2");

    let result = must_call(
        &market,
        "boss",
        &boss_project,
        "agora.task.assign",
        json!({"assignee": a2, "task_type": "docs", "payload": {"file": "x.md"}, "priority": 2}),
    )
    .await;
    let task_id = result["task_id"].as_str().unwrap().to_string();

    must_call(
        &market,
        "a2",
        &a2_project,
        "agora.task.update",
        json!({"task_id": task_id, "status": "accepted"}),
    )
    .await;
    must_call(
        &market,
        "a2",
        &a2_project,
        "agora.task.update",
        json!({"task_id": task_id, "status": "in_progress", "progress": 40}),
    )
    .await;

    // Progress must not decrease within a run.
    let response = call(
        &market,
        "a2",
        &a2_project,
        "agora.task.update",
        json!({"task_id": task_id, "progress": 30}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(
        response.error_kind.as_deref(),
        Some("InvalidTransitionError")
    );

    must_call(
        &market,
        "a2",
        &a2_project,
        "agora.task.update",
        json!({"task_id": task_id, "status": "completed", "progress": 100, "result": {"ok": true}}),
    )
    .await;

    let state = market.store.state().await;
    let task = &state.tasks[&task_id];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(task.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_worker_cannot_assign_to_another_agent() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _w1 = register(&market, &dir, "w1", json!([]), json!({})).await;
    let w2 = register(
        &market,
        &dir,
        "w2",
        json!([{"type": "docs", "proficiency": 50, "max": 1}]),
        json!({}),
    )
    .await;

    let p1 = project_dir(&dir, "w1");
    let response = call(
        &market,
        "w1",
        &p1,
        "agora.task.assign",
        json!({"assignee": w2, "task_type": "docs", "payload": {}}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("PermissionDenied"));
}

#[tokio::test]
async fn test_assignment_idempotency_key() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let boss = register(
        &market,
        &dir,
        "boss",
        json!([{"type": "docs", "proficiency": 80, "max": 5}]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    let project = project_dir(&dir, "boss");

    let request = ToolRequest::new(
        "boss",
        project.clone(),
        "agora.task.assign",
        json!({"assignee": boss, "task_type": "docs", "payload": {"n": 1}}),
    )
    .with_idempotency_key("retry-123");

    let first = market.server.handle(request.clone()).await;
    let second = market.server.handle(request).await;
    assert!(first.ok && second.ok);
    assert_eq!(
        first.result.unwrap()["task_id"],
        second.result.unwrap()["task_id"]
    );
    assert_eq!(market.store.state().await.tasks.len(), 1);

    // Same key, different payload: rejected.
    let conflicting = ToolRequest::new(
        "boss",
        project,
        "agora.task.assign",
        json!({"assignee": boss, "task_type": "docs", "payload": {"n": 2}}),
    )
    .with_idempotency_key("retry-123");
    let response = market.server.handle(conflicting).await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("Conflict"));
}

#[tokio::test]
async fn test_capability_concurrency_bound() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _boss = register(
        &market,
        &dir,
        "boss",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    let worker = register(
        &market,
        &dir,
        "worker",
        json!([{"type": "docs", "proficiency": 80, "max": 2}]),
        json!({}),
    )
    .await;
    let project = project_dir(&dir, "boss");

    for _ in 0..2 {
        must_call(
            &market,
            "boss",
            &project,
            "agora.task.assign",
            json!({"assignee": worker, "task_type": "docs", "payload": {}}),
        )
        .await;
    }
    let response = call(
        &market,
        "boss",
        &project,
        "agora.task.assign",
        json!({"assignee": worker, "task_type": "docs", "payload": {}}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("Conflict"));
}

// ============================================================================
// S4 - Workflow with dependency
// ============================================================================

#[tokio::test]
async fn test_workflow_dependency_ordering() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _init = register(
        &market,
        &dir,
        "initiator",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    let builder = register(
        &market,
        &dir,
        "builder",
        json!([{"type": "build", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;
    let tester = register(
        &market,
        &dir,
        "tester",
        json!([{"type": "test", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;

    let init_project = project_dir(&dir, "initiator");
    let result = must_call(
        &market,
        "initiator",
        &init_project,
        "agora.workflow.start",
        json!({
            "workflow_name": "w1",
            "steps": [
                {"name": "build", "required_capability": "build", "depends_on": []},
                {"name": "test", "required_capability": "test", "depends_on": ["build"]},
            ],
        }),
    )
    .await;
    let workflow_id = result["workflow_id"].as_str().unwrap().to_string();
    let step_ids: Vec<String> = result["step_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();

    // Only the build step is scheduled; test waits on its dependency.
    wait_until!("build step to be assigned", {
        let state = market.store.state().await;
        state.steps[&step_ids[0]].assigned_task_id.is_some()
    });
    {
        let state = market.store.state().await;
        assert!(state.steps[&step_ids[1]].assigned_task_id.is_none());
        assert_eq!(state.workflows[&workflow_id].status, WorkflowStatus::Running);
        let build_task = state.steps[&step_ids[0]].assigned_task_id.clone().unwrap();
        assert_eq!(state.tasks[&build_task].assignee, builder);
    }

    // The builder completes its task; the test step unlocks.
    let build_task = {
        let state = market.store.state().await;
        state.steps[&step_ids[0]].assigned_task_id.clone().unwrap()
    };
    drive_to_completion(&market, &dir, "builder", &build_task).await;

    wait_until!("test step to be assigned", {
        let state = market.store.state().await;
        state.steps[&step_ids[1]].assigned_task_id.is_some()
    });
    let test_task = {
        let state = market.store.state().await;
        let task = state.steps[&step_ids[1]].assigned_task_id.clone().unwrap();
        assert_eq!(state.tasks[&task].assignee, tester);
        task
    };
    drive_to_completion(&market, &dir, "tester", &test_task).await;

    wait_until!("workflow to complete", {
        let state = market.store.state().await;
        state.workflows[&workflow_id].status == WorkflowStatus::Completed
    });
    let state = market.store.state().await;
    assert!(state.workflows[&workflow_id].completed_at.is_some());
}

async fn drive_to_completion(market: &Marketplace, dir: &TempDir, agent: &str, task_id: &str) {
    let project = project_dir(dir, agent);
    for (status, progress) in [("accepted", 0), ("in_progress", 50), ("completed", 100)] {
        must_call(
            market,
            agent,
            &project,
            "agora.task.update",
            json!({"task_id": task_id, "status": status, "progress": progress}),
        )
        .await;
    }
}

#[tokio::test]
async fn test_failed_step_is_retried() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _init = register(
        &market,
        &dir,
        "initiator",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    register(
        &market,
        &dir,
        "builder",
        json!([{"type": "build", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;

    let init_project = project_dir(&dir, "initiator");
    let result = must_call(
        &market,
        "initiator",
        &init_project,
        "agora.workflow.start",
        json!({
            "workflow_name": "flaky",
            "steps": [{"name": "build", "required_capability": "build", "depends_on": []}],
        }),
    )
    .await;
    let workflow_id = result["workflow_id"].as_str().unwrap().to_string();
    let step_id = result["step_ids"][0].as_str().unwrap().to_string();

    wait_until!("step to be assigned", {
        let state = market.store.state().await;
        state.steps[&step_id].assigned_task_id.is_some()
    });
    let task_id = {
        let state = market.store.state().await;
        state.steps[&step_id].assigned_task_id.clone().unwrap()
    };

    // First attempt fails; the zero-backoff test config retries at once.
    let builder_project = project_dir(&dir, "builder");
    must_call(
        &market,
        "builder",
        &builder_project,
        "agora.task.update",
        json!({"task_id": task_id, "status": "failed"}),
    )
    .await;

    wait_until!("task to be re-queued", {
        let state = market.store.state().await;
        state.tasks[&task_id].status == TaskStatus::Pending && state.tasks[&task_id].retry_count == 1
    });

    // Second attempt succeeds and the workflow completes.
    drive_to_completion(&market, &dir, "builder", &task_id).await;
    wait_until!("workflow to complete", {
        let state = market.store.state().await;
        state.workflows[&workflow_id].status == WorkflowStatus::Completed
    });
}

#[tokio::test]
async fn test_overdue_task_failed_with_reason() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let boss = register(
        &market,
        &dir,
        "boss",
        json!([{"type": "docs", "proficiency": 80, "max": 1}]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    let project = project_dir(&dir, "boss");

    let deadline = chrono::Utc::now() + chrono::Duration::milliseconds(50);
    let result = must_call(
        &market,
        "boss",
        &project,
        "agora.task.assign",
        json!({"assignee": boss, "task_type": "docs", "payload": {}, "deadline": deadline}),
    )
    .await;
    let task_id = result["task_id"].as_str().unwrap().to_string();

    wait_until!("overdue task to be failed", {
        let state = market.store.state().await;
        state.tasks[&task_id].status == TaskStatus::Failed
    });
    let state = market.store.state().await;
    assert_eq!(
        state.tasks[&task_id].result,
        Some(json!({"reason": "deadline_exceeded"}))
    );
}

// ============================================================================
// S5 - Emergency halt
// ============================================================================

#[tokio::test]
async fn test_emergency_halt_and_resume() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _a1 = register(&market, &dir, "a1", json!([]), json!({})).await;
    let project = project_dir(&dir, "a1");

    market
        .server
        .user_override(OverrideAction::EmergencyHalt, "incident")
        .await
        .unwrap();

    // Every non-user operation is rejected while halted.
    let response = call(
        &market,
        "a1",
        &project,
        "agora.messaging.send",
        json!({"to_agent": "*", "message_type": "hello", "payload": {}}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("Halted"));

    market
        .server
        .user_override(OverrideAction::Resume, "resolved")
        .await
        .unwrap();

    must_call(
        &market,
        "a1",
        &project,
        "agora.messaging.send",
        json!({"to_agent": "*", "message_type": "hello", "payload": {}}),
    )
    .await;

    // Both overrides were audited as granted at authority 255.
    let overrides: Vec<_> = market
        .store
        .audit()
        .all()
        .into_iter()
        .filter(|r| r.operation == "user_override")
        .collect();
    assert_eq!(overrides.len(), 2);
    for record in overrides {
        assert_eq!(record.outcome, agora_core::AuditOutcome::Granted);
        assert_eq!(record.authority_level, 255);
    }
}

#[tokio::test]
async fn test_halt_halts_running_workflows() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _init = register(
        &market,
        &dir,
        "initiator",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;
    register(
        &market,
        &dir,
        "builder",
        json!([{"type": "build", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;

    let init_project = project_dir(&dir, "initiator");
    let result = must_call(
        &market,
        "initiator",
        &init_project,
        "agora.workflow.start",
        json!({
            "workflow_name": "w1",
            "steps": [{"name": "build", "required_capability": "build", "depends_on": []}],
        }),
    )
    .await;
    let workflow_id = result["workflow_id"].as_str().unwrap().to_string();

    wait_until!("workflow to start running", {
        let state = market.store.state().await;
        state.workflows[&workflow_id].status == WorkflowStatus::Running
    });

    market
        .server
        .user_override(OverrideAction::EmergencyHalt, "incident")
        .await
        .unwrap();
    assert_eq!(
        market.store.state().await.workflows[&workflow_id].status,
        WorkflowStatus::Halted
    );
}

// ============================================================================
// S6 - Capability matching tie-break
// ============================================================================

#[tokio::test]
async fn test_tie_break_prefers_oldest_last_seen() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    let _init = register(
        &market,
        &dir,
        "initiator",
        json!([]),
        json!({"role": "SPECIALIST"}),
    )
    .await;

    // a1 registers first, so its last_seen_at is older; both agents have
    // the same proficiency and zero in-flight work.
    let a1 = register(
        &market,
        &dir,
        "a1",
        json!([{"type": "review", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _a2 = register(
        &market,
        &dir,
        "a2",
        json!([{"type": "review", "proficiency": 80, "max": 1}]),
        json!({}),
    )
    .await;

    let init_project = project_dir(&dir, "initiator");
    let result = must_call(
        &market,
        "initiator",
        &init_project,
        "agora.workflow.start",
        json!({
            "workflow_name": "review-run",
            "steps": [{"name": "review", "required_capability": "review", "depends_on": []}],
        }),
    )
    .await;
    let step_id = result["step_ids"][0].as_str().unwrap().to_string();

    wait_until!("review step to be assigned", {
        let state = market.store.state().await;
        state.steps[&step_id].assigned_task_id.is_some()
    });
    let state = market.store.state().await;
    let task_id = state.steps[&step_id].assigned_task_id.clone().unwrap();
    assert_eq!(state.tasks[&task_id].assignee, a1);
}

// ============================================================================
// Query and status surface
// ============================================================================

#[tokio::test]
async fn test_query_and_status() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;

    register(&market, &dir, "a1", json!([]), json!({})).await;
    register(&market, &dir, "a2", json!([]), json!({})).await;
    let project = project_dir(&dir, "a1");

    let page = must_call(
        &market,
        "a1",
        &project,
        "agora.query.data",
        json!({"entity": "agents", "filter": {"status": "active"}}),
    )
    .await;
    assert_eq!(page["total"], 2);

    let status = must_call(&market, "a1", &project, "agora.system.status", json!({})).await;
    assert_eq!(status["healthy"], true);
    assert_eq!(status["agents"]["active"], 2);
    assert_eq!(status["halted"], false);

    // Audit queries need FRAMEWORK_ADMIN.
    let response = call(
        &market,
        "a1",
        &project,
        "agora.query.data",
        json!({"entity": "audit"}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("PermissionDenied"));
}

#[tokio::test]
async fn test_unknown_operation_rejected() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;
    register(&market, &dir, "a1", json!([]), json!({})).await;
    let project = project_dir(&dir, "a1");

    let response = call(&market, "a1", &project, "agora.messaging.recall", json!({})).await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("InvalidArgument"));
}

#[tokio::test]
async fn test_malformed_identifier_rejected() {
    let dir = TempDir::new().unwrap();
    let market = start_marketplace(&dir).await;
    register(&market, &dir, "boss", json!([]), json!({"role": "SPECIALIST"})).await;
    let project = project_dir(&dir, "boss");

    let response = call(
        &market,
        "boss",
        &project,
        "agora.task.assign",
        json!({"assignee": "agent-123", "task_type": "docs", "payload": {}}),
    )
    .await;
    assert!(!response.ok);
    assert_eq!(response.error_kind.as_deref(), Some("InvalidArgument"));
}
