// Agora Store - Read-only query projections
//
// Backs `agora.query.data`: equality filters over the serialized rows of
// one table, with a limit and an opaque offset cursor. Readers run against
// the committed snapshot; no locks are held across await points.

use serde::{Deserialize, Serialize};

use agora_core::{AgoraError, AgoraResult, AuditRecord};

use crate::state::StoreState;

/// Default page size when the caller does not pass a limit
const DEFAULT_LIMIT: usize = 100;

/// Hard cap on page size
const MAX_LIMIT: usize = 1_000;

/// Tables exposed through the query surface
pub const QUERYABLE_ENTITIES: &[&str] = &[
    "agents",
    "capabilities",
    "messages",
    "tasks",
    "workflows",
    "steps",
    "events",
    "audit",
];

/// Parameters of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    /// One of [`QUERYABLE_ENTITIES`]
    pub entity: String,

    /// Top-level field equality filter
    #[serde(default)]
    pub filter: serde_json::Map<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Opaque cursor returned by a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// One page of query results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    pub items: Vec<serde_json::Value>,

    /// Present when more rows match beyond this page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Total matching rows, before paging
    pub total: usize,
}

/// Run a query against a committed snapshot.
///
/// Audit rows are passed in separately because the audit log is not part
/// of the snapshot; the caller enforces who may query them.
pub fn run(
    state: &StoreState,
    audit_records: Option<&[AuditRecord]>,
    params: &QueryParams,
) -> AgoraResult<QueryPage> {
    let mut rows = collect_rows(state, audit_records, &params.entity)?;

    rows.retain(|row| matches_filter(row, &params.filter));

    // Deterministic order: primary identifier, falling back to insertion
    // order for rows without one.
    let key_field = primary_key_field(&params.entity);
    rows.sort_by(|a, b| {
        let ka = a.get(key_field).and_then(|v| v.as_str()).unwrap_or("");
        let kb = b.get(key_field).and_then(|v| v.as_str()).unwrap_or("");
        ka.cmp(kb)
    });

    let total = rows.len();
    let offset = match &params.cursor {
        Some(cursor) => decode_cursor(cursor)?,
        None => 0,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let page: Vec<serde_json::Value> = rows.into_iter().skip(offset).take(limit).collect();
    let consumed = offset + page.len();
    let next_cursor = if consumed < total {
        Some(encode_cursor(consumed))
    } else {
        None
    };

    Ok(QueryPage {
        items: page,
        next_cursor,
        total,
    })
}

fn collect_rows(
    state: &StoreState,
    audit_records: Option<&[AuditRecord]>,
    entity: &str,
) -> AgoraResult<Vec<serde_json::Value>> {
    let rows = match entity {
        "agents" => to_rows(state.agents.values())?,
        "capabilities" => to_rows(state.capabilities.values())?,
        "messages" => to_rows(state.messages.values())?,
        "tasks" => to_rows(state.tasks.values())?,
        "workflows" => to_rows(state.workflows.values())?,
        "steps" => to_rows(state.steps.values())?,
        "events" => to_rows(state.events.iter())?,
        "audit" => match audit_records {
            Some(records) => to_rows(records.iter())?,
            None => Vec::new(),
        },
        other => {
            return Err(AgoraError::invalid_argument(format!(
                "unknown entity '{}'; expected one of {:?}",
                other, QUERYABLE_ENTITIES
            )))
        }
    };
    Ok(rows)
}

fn to_rows<'a, T: Serialize + 'a>(
    values: impl Iterator<Item = &'a T>,
) -> AgoraResult<Vec<serde_json::Value>> {
    values
        .map(|v| {
            serde_json::to_value(v)
                .map_err(|e| AgoraError::internal(format!("failed to serialize row: {}", e)))
        })
        .collect()
}

fn primary_key_field(entity: &str) -> &'static str {
    match entity {
        "agents" => "agent_id",
        "capabilities" => "capability_id",
        "messages" => "message_id",
        "tasks" => "task_id",
        "workflows" => "workflow_id",
        "steps" => "step_id",
        "events" => "event_id",
        "audit" => "audit_id",
        _ => "id",
    }
}

fn matches_filter(
    row: &serde_json::Value,
    filter: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filter
        .iter()
        .all(|(field, expected)| row.get(field) == Some(expected))
}

fn encode_cursor(offset: usize) -> String {
    format!("offset:{}", offset)
}

fn decode_cursor(cursor: &str) -> AgoraResult<usize> {
    cursor
        .strip_prefix("offset:")
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| AgoraError::invalid_argument(format!("malformed cursor '{}'", cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Agent, AgentRole, AgentStatus, ServiceTier};
    use chrono::Utc;

    fn state_with_agents(count: usize) -> StoreState {
        let mut state = StoreState::default();
        for i in 0..count {
            let id = format!("agent_{:016x}", i);
            state.agents.insert(
                id.clone(),
                Agent {
                    agent_id: id.clone(),
                    agent_name: format!("agent-{}", i),
                    project_directory: "/tmp/p".into(),
                    role: AgentRole::Worker,
                    status: if i % 2 == 0 {
                        AgentStatus::Active
                    } else {
                        AgentStatus::Offline
                    },
                    registered_at: Utc::now(),
                    last_seen_at: Utc::now(),
                    service_tier: ServiceTier::Basic,
                },
            );
        }
        state
    }

    fn params(entity: &str) -> QueryParams {
        QueryParams {
            entity: entity.to_string(),
            filter: serde_json::Map::new(),
            limit: None,
            cursor: None,
        }
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let state = StoreState::default();
        let err = run(&state, None, &params("widgets")).unwrap_err();
        assert!(matches!(err, AgoraError::InvalidArgument(_)));
    }

    #[test]
    fn test_filter_equality() {
        let state = state_with_agents(4);
        let mut p = params("agents");
        p.filter
            .insert("status".to_string(), serde_json::json!("active"));
        let page = run(&state, None, &p).unwrap();
        assert_eq!(page.total, 2);
        assert!(page
            .items
            .iter()
            .all(|row| row["status"] == serde_json::json!("active")));
    }

    #[test]
    fn test_pagination_round_trip() {
        let state = state_with_agents(5);
        let mut p = params("agents");
        p.limit = Some(2);

        let page1 = run(&state, None, &p).unwrap();
        assert_eq!(page1.items.len(), 2);
        assert_eq!(page1.total, 5);
        let cursor = page1.next_cursor.clone().unwrap();

        p.cursor = Some(cursor);
        let page2 = run(&state, None, &p).unwrap();
        assert_eq!(page2.items.len(), 2);

        p.cursor = page2.next_cursor.clone();
        let page3 = run(&state, None, &p).unwrap();
        assert_eq!(page3.items.len(), 1);
        assert!(page3.next_cursor.is_none());

        // Pages never overlap.
        let ids: Vec<&str> = page1
            .items
            .iter()
            .chain(&page2.items)
            .chain(&page3.items)
            .map(|row| row["agent_id"].as_str().unwrap())
            .collect();
        let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        let state = state_with_agents(1);
        let mut p = params("agents");
        p.cursor = Some("page-two-please".to_string());
        assert!(run(&state, None, &p).is_err());
    }

    #[test]
    fn test_audit_entity_empty_without_records() {
        let state = StoreState::default();
        let page = run(&state, None, &params("audit")).unwrap();
        assert!(page.items.is_empty());
    }
}
