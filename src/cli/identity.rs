//! CLI `identity` commands.

use anyhow::{Context, Result};

use cortex::identity::{Identity, Role};

use crate::server::AppState;

pub async fn current(state: &AppState) -> Result<()> {
    let identity = state.identity.current_identity().await?;
    let paths = state.identity.current_paths().await?;
    println!("Active identity:  {} ({})", identity.id, identity.role);
    println!("  Display name:   {}", identity.display_name);
    println!("  Created:        {}", identity.created_at);
    println!("  Facts DB:       {}", paths.facts_db.display());
    println!("  Graph port:     {}", state.config.host_port_for(&identity.id));
    Ok(())
}

pub async fn list(state: &AppState) -> Result<()> {
    let current = state.identity.current().await.ok();
    let identities = state.identity.registry().list()?;
    println!("{:<2} {:<24} {:<8} {:<6} Display name", "", "ID", "Role", "Port");
    for identity in identities {
        let marker = if current.as_deref() == Some(identity.id.as_str()) { "*" } else { "" };
        println!(
            "{:<2} {:<24} {:<8} {:<6} {}",
            marker,
            identity.id,
            identity.role,
            state.config.host_port_for(&identity.id),
            identity.display_name
        );
    }
    Ok(())
}

pub async fn add(state: &AppState, id: &str, display_name: Option<&str>, role: &str) -> Result<()> {
    let role: Role = role.parse().map_err(anyhow::Error::msg)?;
    let identity = Identity::new(id, display_name.unwrap_or(id), role);
    let registered = state
        .identity
        .registry()
        .register(identity)
        .with_context(|| format!("failed to register identity {id}"))?;
    println!("Registered identity {} ({})", registered.id, registered.role);
    Ok(())
}

pub async fn switch(state: &AppState, id: &str) -> Result<()> {
    let outcome = state
        .identity
        .switch(id)
        .await
        .with_context(|| format!("switch to {id} failed; the active identity is unchanged"))?;
    println!(
        "Switched identity: {} -> {}",
        outcome.previous.as_deref().unwrap_or("(none)"),
        outcome.current
    );
    let service = state.lifecycle.status(&outcome.current).await;
    println!("Graph service:     {} on port {}", service.state, service.host_port);
    Ok(())
}
