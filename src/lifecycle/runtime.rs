//! Container runtime seam and the compose-CLI implementation.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::error::{CortexError, Result};

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Bring the project up detached. Returns the container id when known.
    async fn up(&self, project: &str, compose_file: &Path) -> Result<Option<String>>;

    /// Stop and remove the project's containers.
    async fn down(&self, project: &str, compose_file: &Path) -> Result<()>;

    async fn is_running(&self, project: &str, compose_file: &Path) -> Result<bool>;
}

/// Shells out to `<bin> compose -p <project> -f <file> ...`.
pub struct DockerCompose {
    bin: String,
}

impl DockerCompose {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, project: &str, compose_file: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("compose")
            .arg("-p")
            .arg(project)
            .arg("-f")
            .arg(compose_file)
            .kill_on_drop(true);
        if let Some(dir) = compose_file.parent() {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run(&self, project: &str, compose_file: &Path, args: &[&str]) -> Result<String> {
        let output = self
            .command(project, compose_file)
            .args(args)
            .output()
            .await
            .map_err(|e| CortexError::LifecycleFailed {
                identity: project.to_string(),
                reason: format!("failed to run {} compose {}: {e}", self.bin, args.join(" ")),
            })?;
        if !output.status.success() {
            return Err(CortexError::LifecycleFailed {
                identity: project.to_string(),
                reason: format!(
                    "{} compose {} exited with {}: {}",
                    self.bin,
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn up(&self, project: &str, compose_file: &Path) -> Result<Option<String>> {
        self.run(project, compose_file, &["up", "-d", "--remove-orphans"])
            .await?;
        let ids = self.run(project, compose_file, &["ps", "-q"]).await?;
        Ok(ids.lines().next().map(str::to_string))
    }

    async fn down(&self, project: &str, compose_file: &Path) -> Result<()> {
        self.run(project, compose_file, &["down", "--remove-orphans"])
            .await?;
        Ok(())
    }

    async fn is_running(&self, project: &str, compose_file: &Path) -> Result<bool> {
        let ids = self
            .run(project, compose_file, &["ps", "-q", "--status", "running"])
            .await?;
        Ok(!ids.is_empty())
    }
}
