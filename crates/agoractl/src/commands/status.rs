//! Status command - inspect a marketplace store
//!
//! Opens the coordination store behind a configuration file and prints
//! the aggregate counters, without starting the coordinator or sweeper.

use agora_store::CoordinationStore;

use super::serve::load_config;

pub async fn execute(file: &str, output: &str) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let store = CoordinationStore::open(
        config.project_root.join(&config.store_path),
        config.project_root.join(&config.audit_path),
        config.reducer_queue_depth,
    )
    .await?;

    let state = store.state().await;
    let status = serde_json::json!({
        "halted": state.halted,
        "commit_sequence": state.commit_sequence,
        "agents": {
            "total": state.agents.len(),
            "active": state.active_agents().count(),
        },
        "tasks": state.tasks.len(),
        "workflows": state.workflows.len(),
        "messages": state.messages.len(),
        "events": state.events.len(),
        "audit_records": store.audit().len(),
    });

    match output {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => {
            println!("halted:          {}", state.halted);
            println!("commit sequence: {}", state.commit_sequence);
            println!(
                "agents:          {} ({} active)",
                state.agents.len(),
                state.active_agents().count()
            );
            println!("tasks:           {}", state.tasks.len());
            println!("workflows:       {}", state.workflows.len());
            println!("messages:        {}", state.messages.len());
            println!("events:          {}", state.events.len());
            println!("audit records:   {}", store.audit().len());
        }
    }
    Ok(())
}
