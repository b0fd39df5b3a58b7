//! CLI `service` commands: drive the active identity's graph service.

use anyhow::Result;

use cortex::lifecycle::ServiceInstance;

use crate::server::AppState;

fn print_instance(instance: &ServiceInstance) {
    println!("Graph service for {}", instance.identity_id);
    println!("{}", "=".repeat(40));
    println!("  State:            {}", instance.state);
    println!("  Host port:        {}", instance.host_port);
    println!("  Container port:   {}", instance.container_port);
    if let Some(ref id) = instance.container_id {
        println!("  Container:        {id}");
    }
    if let Some(ref err) = instance.last_error {
        println!("  Last error:       {err}");
    }
    println!("  Updated:          {}", instance.updated_at);
}

pub async fn start(state: &AppState) -> Result<()> {
    let id = state.identity.current().await?;
    let instance = state.lifecycle.start(&id).await?;
    print_instance(&instance);
    Ok(())
}

pub async fn stop(state: &AppState) -> Result<()> {
    let id = state.identity.current().await?;
    let instance = state.lifecycle.stop(&id).await?;
    print_instance(&instance);
    Ok(())
}

pub async fn restart(state: &AppState) -> Result<()> {
    let id = state.identity.current().await?;
    let instance = state.lifecycle.restart(&id).await?;
    print_instance(&instance);
    Ok(())
}

pub async fn status(state: &AppState) -> Result<()> {
    let id = state.identity.current().await?;
    print_instance(&state.lifecycle.status(&id).await);
    match state.lifecycle.runtime_running(&id).await {
        Ok(up) => println!("  Container up:     {}", super::yes_no(up)),
        Err(e) => println!("  Container up:     unknown ({e})"),
    }
    Ok(())
}
