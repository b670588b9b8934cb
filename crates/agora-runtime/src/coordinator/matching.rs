// Agora Runtime - Capability matching
//
// Picks the agent a ready step should go to. The ranking is fixed:
// highest proficiency, then fewest in-flight assignments against the
// capability, then oldest last-seen (spreading load), then lexicographic
// agent id so the result is deterministic.

use chrono::{DateTime, Utc};

use agora_core::AgentStatus;
use agora_store::StoreState;

/// One schedulable agent for a required capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub agent_id: String,
    pub proficiency: u8,
    pub in_flight: u32,
    pub last_seen_at: DateTime<Utc>,
}

/// All agents currently able to take a task of this capability type:
/// active agents with an active matching capability and a free
/// concurrency slot.
pub fn candidates(state: &StoreState, required_capability: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    for capability in state.capabilities.values() {
        if !capability.active || capability.capability_type != required_capability {
            continue;
        }
        let Some(agent) = state.agents.get(&capability.agent_id) else {
            continue;
        };
        if agent.status != AgentStatus::Active {
            continue;
        }
        let in_flight = state.in_flight_count(&agent.agent_id, required_capability);
        if in_flight >= capability.max_concurrent_tasks {
            continue;
        }
        out.push(Candidate {
            agent_id: agent.agent_id.clone(),
            proficiency: capability.proficiency_level,
            in_flight,
            last_seen_at: agent.last_seen_at,
        });
    }
    out
}

/// The agent a ready step should be proposed to, if any
pub fn select(state: &StoreState, required_capability: &str) -> Option<Candidate> {
    let mut ranked = candidates(state, required_capability);
    ranked.sort_by(|a, b| {
        b.proficiency
            .cmp(&a.proficiency)
            .then(a.in_flight.cmp(&b.in_flight))
            .then(a.last_seen_at.cmp(&b.last_seen_at))
            .then(a.agent_id.cmp(&b.agent_id))
    });
    ranked.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Agent, AgentRole, Capability, ServiceTier, TaskAssignment, TaskStatus};
    use chrono::Duration;

    fn seed_agent(state: &mut StoreState, id: &str, last_seen_offset_secs: i64) {
        let now = Utc::now();
        state.agents.insert(
            id.to_string(),
            Agent {
                agent_id: id.to_string(),
                agent_name: id.to_string(),
                project_directory: "/tmp/p".into(),
                role: AgentRole::Worker,
                status: AgentStatus::Active,
                registered_at: now,
                last_seen_at: now + Duration::seconds(last_seen_offset_secs),
                service_tier: ServiceTier::Basic,
            },
        );
    }

    fn seed_capability(state: &mut StoreState, agent_id: &str, ty: &str, proficiency: u8, max: u32) {
        let cap_id = format!("cap_{:016x}", state.capabilities.len() as u64 + 1);
        state.capabilities.insert(
            cap_id.clone(),
            Capability {
                capability_id: cap_id.clone(),
                agent_id: agent_id.to_string(),
                capability_type: ty.to_string(),
                proficiency_level: proficiency,
                max_concurrent_tasks: max,
                active: true,
            },
        );
        state
            .capability_index
            .insert(StoreState::capability_key(agent_id, ty), cap_id);
    }

    fn seed_task(state: &mut StoreState, assignee: &str, ty: &str) {
        let now = Utc::now();
        let task_id = format!("task_{:016x}", state.tasks.len() as u64 + 1);
        state.tasks.insert(
            task_id.clone(),
            TaskAssignment {
                task_id,
                workflow_id: None,
                assignee: assignee.to_string(),
                task_type: ty.to_string(),
                payload: serde_json::json!({}),
                priority: 2,
                deadline: None,
                status: TaskStatus::InProgress,
                progress: 0,
                created_at: now,
                updated_at: now,
                result: None,
                retry_count: 0,
            },
        );
    }

    #[test]
    fn test_highest_proficiency_wins() {
        let mut state = StoreState::default();
        seed_agent(&mut state, "agent_0000000000000001", 0);
        seed_agent(&mut state, "agent_0000000000000002", 0);
        seed_capability(&mut state, "agent_0000000000000001", "review", 70, 2);
        seed_capability(&mut state, "agent_0000000000000002", "review", 90, 2);

        let pick = select(&state, "review").unwrap();
        assert_eq!(pick.agent_id, "agent_0000000000000002");
    }

    #[test]
    fn test_lower_in_flight_breaks_proficiency_tie() {
        let mut state = StoreState::default();
        seed_agent(&mut state, "agent_0000000000000001", 0);
        seed_agent(&mut state, "agent_0000000000000002", 0);
        seed_capability(&mut state, "agent_0000000000000001", "review", 80, 3);
        seed_capability(&mut state, "agent_0000000000000002", "review", 80, 3);
        seed_task(&mut state, "agent_0000000000000001", "review");

        let pick = select(&state, "review").unwrap();
        assert_eq!(pick.agent_id, "agent_0000000000000002");
    }

    #[test]
    fn test_oldest_last_seen_breaks_load_tie() {
        let mut state = StoreState::default();
        seed_agent(&mut state, "agent_0000000000000001", -60);
        seed_agent(&mut state, "agent_0000000000000002", 0);
        seed_capability(&mut state, "agent_0000000000000001", "review", 80, 1);
        seed_capability(&mut state, "agent_0000000000000002", "review", 80, 1);

        // a1 was seen earlier: it wins the tie-break.
        let pick = select(&state, "review").unwrap();
        assert_eq!(pick.agent_id, "agent_0000000000000001");
    }

    #[test]
    fn test_lexicographic_id_is_final_tie_break() {
        let mut state = StoreState::default();
        let now = Utc::now();
        for id in ["agent_0000000000000002", "agent_0000000000000001"] {
            state.agents.insert(
                id.to_string(),
                Agent {
                    agent_id: id.to_string(),
                    agent_name: id.to_string(),
                    project_directory: "/tmp/p".into(),
                    role: AgentRole::Worker,
                    status: AgentStatus::Active,
                    registered_at: now,
                    last_seen_at: now,
                    service_tier: ServiceTier::Basic,
                },
            );
            seed_capability(&mut state, id, "review", 80, 1);
        }

        let pick = select(&state, "review").unwrap();
        assert_eq!(pick.agent_id, "agent_0000000000000001");
    }

    #[test]
    fn test_saturated_agents_are_excluded() {
        let mut state = StoreState::default();
        seed_agent(&mut state, "agent_0000000000000001", 0);
        seed_capability(&mut state, "agent_0000000000000001", "review", 80, 1);
        seed_task(&mut state, "agent_0000000000000001", "review");

        assert!(select(&state, "review").is_none());
    }

    #[test]
    fn test_inactive_capability_excluded() {
        let mut state = StoreState::default();
        seed_agent(&mut state, "agent_0000000000000001", 0);
        seed_capability(&mut state, "agent_0000000000000001", "review", 80, 1);
        for cap in state.capabilities.values_mut() {
            cap.active = false;
        }

        assert!(select(&state, "review").is_none());
    }
}
