//! Identity-scoped compose definitions.
//!
//! Each identity gets its own compose file and `.env` under
//! `<home>/identities/<id>/graph/`, rendered fresh before every start so the
//! identity id and host port are always current.

use std::collections::BTreeMap;

use crate::config::GraphConfig;
use crate::error::{CortexError, Result};
use crate::identity::paths::write_atomic;
use crate::identity::IdentityPaths;

const DEFAULT_TEMPLATE: &str = r#"name: cortex-${IDENTITY_ID}
services:
  graph:
    image: ${IMAGE}
    container_name: cortex-graph-${IDENTITY_ID}
    env_file: .env
    ports:
      - "${HOST_PORT}:${CONTAINER_PORT}"
    volumes:
      - ./data:/app/data
    restart: unless-stopped
"#;

/// Compose project name for an identity.
pub fn project_name(identity_id: &str) -> String {
    format!("cortex-{}", identity_id.to_lowercase())
}

fn variables(
    identity_id: &str,
    host_port: u16,
    config: &GraphConfig,
) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("IDENTITY_ID", identity_id.to_string()),
        ("HOST_PORT", host_port.to_string()),
        ("CONTAINER_PORT", config.container_port.to_string()),
        ("IMAGE", config.image.clone()),
    ])
}

/// Substitute `${NAME}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &BTreeMap<&'static str, String>) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("${{{name}}}"), value)
    })
}

fn render_env(vars: &BTreeMap<&'static str, String>) -> String {
    let mut env = String::new();
    for (name, value) in vars {
        env.push_str(&format!("{name}={value}\n"));
    }
    // The service reads its listen port from PORT.
    if let Some(port) = vars.get("CONTAINER_PORT") {
        env.push_str(&format!("PORT={port}\n"));
    }
    env
}

/// Render and write the compose file and `.env` for `paths.identity_id`.
pub fn write_definition(paths: &IdentityPaths, host_port: u16, config: &GraphConfig) -> Result<()> {
    let template = match &config.compose_template {
        Some(path) => std::fs::read_to_string(crate::config::expand_tilde(path)).map_err(|e| {
            CortexError::Config(format!("failed to read compose template {path}: {e}"))
        })?,
        None => DEFAULT_TEMPLATE.to_string(),
    };
    let vars = variables(&paths.identity_id, host_port, config);

    std::fs::create_dir_all(&paths.graph_data)?;
    write_atomic(&paths.compose_file, render(&template, &vars).as_bytes())?;
    write_atomic(&paths.env_file, render_env(&vars).as_bytes())?;
    tracing::debug!(
        identity = %paths.identity_id,
        compose = %paths.compose_file.display(),
        "compose definition rendered"
    );
    Ok(())
}
