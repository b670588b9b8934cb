//! Halt command - issue an emergency halt or resume as the user
//!
//! This is the operator's path to user supreme authority: it does not go
//! through the seven `agora.*` operations, and every use lands in the
//! audit log at authority 255.

use anyhow::Context;

use agora_store::{CoordinationStore, OverrideAction, Reducer, ReducerRequest};

use super::serve::load_config;

pub async fn execute(file: &str, reason: &str, resume: bool) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let store = CoordinationStore::open(
        config.project_root.join(&config.store_path),
        config.project_root.join(&config.audit_path),
        config.reducer_queue_depth,
    )
    .await?;

    let action = if resume {
        OverrideAction::Resume
    } else {
        OverrideAction::EmergencyHalt
    };
    let committed = store
        .submit(ReducerRequest {
            reducer: Reducer::UserOverride {
                action,
                reason: reason.to_string(),
                authority_level: agora_core::USER_AUTHORITY,
            },
            authority: agora_core::USER_AUTHORITY,
            actor: "user".to_string(),
            actor_agent_id: None,
        })
        .await
        .context("override rejected")?;

    if resume {
        println!("resume applied at commit {}", committed.commit_sequence);
    } else {
        println!("emergency halt applied at commit {}", committed.commit_sequence);
    }
    Ok(())
}
