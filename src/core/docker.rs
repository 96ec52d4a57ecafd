/// Docker container lifecycle
///
/// Containers are listed in start order. Stopping walks the list backwards
/// so dependants go down before what they depend on.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::core::command::{command_line, CommandRunner};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stop the containers in exactly the given order
    async fn stop(&self, containers: &[String]) -> Result<()>;

    /// Start the containers in exactly the given order
    async fn start(&self, containers: &[String]) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the `docker` command line tool
pub struct DockerCli<R> {
    runner: R,
}

impl<R: CommandRunner> DockerCli<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Execute a docker command against a list of containers
    async fn docker_command(&self, action: &str, containers: &[String]) -> Result<()> {
        let mut args = vec![action.to_string()];
        args.extend(containers.iter().cloned());

        let line = command_line("docker", &args);
        self.runner.run("docker", &args).await?.check(&line)?;
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> ContainerRuntime for DockerCli<R> {
    async fn stop(&self, containers: &[String]) -> Result<()> {
        self.docker_command("stop", containers).await
    }

    async fn start(&self, containers: &[String]) -> Result<()> {
        self.docker_command("start", containers).await
    }
}

pub struct ContainerController<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> ContainerController<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Stop `containers` last-started first. An empty list never reaches the runtime.
    pub async fn stop(&self, group: &str, containers: &[String]) -> Result<()> {
        if containers.is_empty() {
            return Ok(());
        }

        let reversed: Vec<String> = containers.iter().rev().cloned().collect();
        tracing::debug!(containers = ?reversed, "Stopping {} container(s)", group);
        self.runtime
            .stop(&reversed)
            .await
            .with_context(|| format!("Failed to stop {} container(s)", group))
    }

    /// Start `containers` in configured order. An empty list never reaches the runtime.
    pub async fn start(&self, group: &str, containers: &[String]) -> Result<()> {
        if containers.is_empty() {
            return Ok(());
        }

        tracing::debug!(containers = ?containers, "Starting {} container(s)", group);
        self.runtime
            .start(containers)
            .await
            .with_context(|| format!("Failed to start {} container(s)", group))
    }
}
