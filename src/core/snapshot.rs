/// ZFS snapshot store
///
/// Snapshots are addressed as `<dataset>@backup` for the newest one and
/// `<dataset>@backup-<N>` for archived generations, `1` being the most
/// recently archived. All mutating operations are recursive so descendant
/// datasets move in lockstep with their parent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;

use crate::args;
use crate::core::command::{command_line, CommandRunner};
use crate::utils::SNAPSHOT_TAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Current,
    Archived(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    dataset: String,
    generation: Generation,
}

impl SnapshotId {
    pub fn new(dataset: impl Into<String>, generation: Generation) -> Self {
        Self {
            dataset: dataset.into(),
            generation,
        }
    }

    pub fn current(dataset: impl Into<String>) -> Self {
        Self::new(dataset, Generation::Current)
    }

    pub fn archived(dataset: impl Into<String>, age: u32) -> Self {
        Self::new(dataset, Generation::Archived(age))
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Same generation of a descendant dataset (`tank/app` -> `tank/app/db`)
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}/{}", self.dataset, name), self.generation)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation {
            Generation::Current => write!(f, "{}@{}", self.dataset, SNAPSHOT_TAG),
            Generation::Archived(age) => write!(f, "{}@{}-{}", self.dataset, SNAPSHOT_TAG, age),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Whether the snapshot exists. Absence is not an error.
    async fn exists(&self, snapshot: &SnapshotId) -> Result<bool>;

    /// Create the snapshot for its dataset and every descendant
    async fn create(&self, snapshot: &SnapshotId) -> Result<()>;

    async fn rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<()>;

    /// Destroy the snapshot and the same-named snapshots of all descendants
    async fn destroy(&self, snapshot: &SnapshotId) -> Result<()>;
}

/// [`SnapshotStore`] backed by the `zfs` command line tool
pub struct ZfsSnapshotStore<R> {
    runner: R,
}

impl<R: CommandRunner> ZfsSnapshotStore<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    async fn zfs(&self, args: Vec<String>) -> Result<()> {
        let line = command_line("zfs", &args);
        self.runner.run("zfs", &args).await?.check(&line)?;
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> SnapshotStore for ZfsSnapshotStore<R> {
    async fn exists(&self, snapshot: &SnapshotId) -> Result<bool> {
        let output = self
            .runner
            .run("zfs", &args!["list", "-r", "-t", "snapshot", snapshot])
            .await
            .with_context(|| format!("Failed to query snapshot {}", snapshot))?;
        Ok(output.success())
    }

    async fn create(&self, snapshot: &SnapshotId) -> Result<()> {
        self.zfs(args!["snapshot", "-r", snapshot]).await
    }

    async fn rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<()> {
        self.zfs(args!["rename", "-r", from, to]).await
    }

    async fn destroy(&self, snapshot: &SnapshotId) -> Result<()> {
        self.zfs(args!["destroy", "-r", snapshot]).await
    }
}
