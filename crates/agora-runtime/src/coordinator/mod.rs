// Agora Runtime - Workflow coordinator
//
// Drives workflows from pending to terminal states: schedules ready steps
// onto capable agents, mirrors task updates into step and workflow
// status, applies the retry policy, and fails overdue tasks. The
// coordinator never mutates anything directly; every change it wants is
// proposed as a reducer, and the reducer rejects proposals built on a
// stale snapshot.

pub mod matching;

use chrono::Utc;
use serde_json::json;

use agora_core::{
    AgoraResult, CoordinatorConfig, EventType, TaskStatus, WorkflowStatus, DEFAULT_PRIORITY,
};
use agora_store::{CoordinationStore, Reducer, ReducerRequest};

/// Authority the coordinator submits reducers at
const COORDINATOR_AUTHORITY: u8 = 150;

/// Multi-step orchestration driver
pub struct WorkflowCoordinator {
    store: CoordinationStore,
    config: CoordinatorConfig,
}

impl WorkflowCoordinator {
    pub fn new(store: CoordinationStore, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    /// Spawn the drive loop: one pass per state change, plus a steady
    /// tick so deadlines and retry backoffs fire without traffic.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut commits = self.store.subscribe_commits();
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(self.config.tick_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    notice = commits.recv() => match notice {
                        Ok(notice) => {
                            if notice.halt || notice.events.iter().any(|e| self.relevant(e.event_type)) {
                                self.tick().await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            self.tick().await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::debug!("workflow coordinator stopped");
        })
    }

    fn relevant(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::TaskAssigned
                | EventType::TaskUpdated
                | EventType::WorkflowStarted
                | EventType::CapabilityUpdated
                | EventType::AgentRegistered
                | EventType::UserOverride
        )
    }

    /// One coordination pass. Public so tests can drive the coordinator
    /// deterministically without the background loop.
    pub async fn tick(&self) {
        if self.store.state().await.halted {
            return;
        }
        for result in [
            self.fail_overdue_tasks().await,
            self.sync_dirty_workflows().await,
            self.retry_due_steps().await,
            self.schedule_ready_steps().await,
        ] {
            if let Err(e) = result {
                tracing::warn!(error = %e, "coordination pass step failed");
            }
        }
    }

    /// Deadlines are policy, not preemption: an overdue task is failed
    /// and its executor is expected to observe the update and stop.
    async fn fail_overdue_tasks(&self) -> AgoraResult<()> {
        let now = Utc::now();
        let overdue: Vec<String> = {
            let state = self.store.state().await;
            state
                .tasks
                .values()
                .filter(|t| t.is_overdue(now))
                .map(|t| t.task_id.clone())
                .collect()
        };

        for task_id in overdue {
            tracing::info!(task_id = %task_id, "failing overdue task");
            let result = self
                .submit(Reducer::UpdateTask {
                    task_id: task_id.clone(),
                    status: Some(TaskStatus::Failed),
                    progress: None,
                    result: Some(json!({ "reason": "deadline_exceeded" })),
                })
                .await;
            if let Err(e) = result {
                tracing::debug!(task_id = %task_id, error = %e, "overdue update rejected");
            }
        }
        Ok(())
    }

    /// Propose a sync for every workflow whose steps have drifted from
    /// their tasks
    async fn sync_dirty_workflows(&self) -> AgoraResult<()> {
        let dirty: Vec<String> = {
            let state = self.store.state().await;
            state
                .workflows
                .values()
                .filter(|wf| {
                    !wf.status.is_terminal() && wf.status != WorkflowStatus::Halted
                })
                .filter(|wf| {
                    state.workflow_steps(&wf.workflow_id).iter().any(|step| {
                        step.assigned_task_id
                            .as_deref()
                            .and_then(|tid| state.tasks.get(tid))
                            .map(|t| t.status != step.status)
                            .unwrap_or(false)
                    })
                })
                .map(|wf| wf.workflow_id.clone())
                .collect()
        };

        for workflow_id in dirty {
            let result = self
                .submit(Reducer::SyncWorkflow {
                    workflow_id: workflow_id.clone(),
                    retry_limit: self.config.task_retry_limit,
                    retry_backoff_secs: self.config.task_retry_backoff_secs,
                })
                .await;
            if let Err(e) = result {
                tracing::debug!(workflow_id = %workflow_id, error = %e, "sync rejected");
            }
        }
        Ok(())
    }

    /// Re-queue failed steps whose backoff has elapsed
    async fn retry_due_steps(&self) -> AgoraResult<()> {
        let now = Utc::now();
        let due: Vec<String> = {
            let state = self.store.state().await;
            state
                .steps
                .values()
                .filter(|step| {
                    step.status == TaskStatus::Failed
                        && step.retry_count < self.config.task_retry_limit
                        && step.next_retry_at.map(|t| t <= now).unwrap_or(false)
                })
                .filter(|step| {
                    state
                        .workflows
                        .get(&step.workflow_id)
                        .map(|wf| wf.status == WorkflowStatus::Running)
                        .unwrap_or(false)
                })
                .map(|step| step.step_id.clone())
                .collect()
        };

        for step_id in due {
            tracing::info!(step_id = %step_id, "retrying failed step");
            let result = self
                .submit(Reducer::RetryTask {
                    step_id: step_id.clone(),
                    retry_limit: self.config.task_retry_limit,
                })
                .await;
            if let Err(e) = result {
                tracing::debug!(step_id = %step_id, error = %e, "retry rejected");
            }
        }
        Ok(())
    }

    /// Assign every ready, unassigned step to the best candidate agent
    async fn schedule_ready_steps(&self) -> AgoraResult<()> {
        let proposals: Vec<(String, String, String, String, serde_json::Value)> = {
            let state = self.store.state().await;
            let mut out = Vec::new();
            for wf in state.workflows.values() {
                if !matches!(wf.status, WorkflowStatus::Pending | WorkflowStatus::Running) {
                    continue;
                }
                for step in state.workflow_steps(&wf.workflow_id) {
                    if step.assigned_task_id.is_some() || step.status != TaskStatus::Pending {
                        continue;
                    }
                    let ready = step.depends_on.iter().all(|dep| {
                        state
                            .steps
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    });
                    if !ready {
                        continue;
                    }
                    // No candidate: the step stays pending and is
                    // reconsidered on the next state change or tick.
                    if let Some(pick) = matching::select(&state, &step.required_capability) {
                        out.push((
                            wf.workflow_id.clone(),
                            step.step_id.clone(),
                            pick.agent_id,
                            step.required_capability.clone(),
                            step.payload.clone(),
                        ));
                    }
                }
            }
            out
        };

        for (workflow_id, step_id, assignee, capability, payload) in proposals {
            tracing::info!(
                step_id = %step_id,
                assignee = %assignee,
                capability = %capability,
                "scheduling workflow step"
            );
            let result = self
                .submit(Reducer::AssignTask {
                    assignee,
                    task_type: capability,
                    payload,
                    priority: DEFAULT_PRIORITY,
                    deadline: None,
                    workflow_id: Some(workflow_id),
                    step_id: Some(step_id.clone()),
                    idempotency_key: None,
                })
                .await;
            if let Err(e) = result {
                // A stale proposal (slot taken, step assigned meanwhile)
                // is rejected atomically by the reducer; the next pass
                // reconsiders.
                tracing::debug!(step_id = %step_id, error = %e, "assignment proposal rejected");
            }
        }
        Ok(())
    }

    async fn submit(&self, reducer: Reducer) -> AgoraResult<()> {
        self.store
            .submit(ReducerRequest {
                reducer,
                authority: COORDINATOR_AUTHORITY,
                actor: "coordinator".to_string(),
                actor_agent_id: None,
            })
            .await
            .map(|_| ())
    }
}
