/// Mount publication of the newest snapshot
///
/// Each storage mount is exposed read-only at its destination by mounting
/// `<origin>@backup` there, with child datasets mounted at
/// `<destination>/<child>`. Children always sit inside the parent mount, so
/// they are detached first and attached last.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::args;
use crate::core::command::{command_line, CommandRunner};
use crate::core::config::StorageMount;
use crate::core::snapshot::SnapshotId;
use crate::utils::SNAPSHOT_FS_TYPE;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MountTool: Send + Sync {
    async fn is_mount_point(&self, path: &Path) -> Result<bool>;

    async fn unmount(&self, path: &Path) -> Result<()>;

    async fn mount(&self, snapshot: &SnapshotId, path: &Path) -> Result<()>;

    async fn make_dir_all(&self, path: &Path) -> Result<()>;
}

/// [`MountTool`] backed by `mountpoint`, `mount` and `umount`
pub struct SystemMountTool<R> {
    runner: R,
}

impl<R: CommandRunner> SystemMountTool<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: CommandRunner> MountTool for SystemMountTool<R> {
    async fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let output = self
            .runner
            .run("mountpoint", &args!["-q", path.display()])
            .await?;
        Ok(output.success())
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        let args = args![path.display()];
        let line = command_line("umount", &args);
        self.runner.run("umount", &args).await?.check(&line)?;
        Ok(())
    }

    async fn mount(&self, snapshot: &SnapshotId, path: &Path) -> Result<()> {
        let args = args!["-t", SNAPSHOT_FS_TYPE, snapshot, path.display()];
        let line = command_line("mount", &args);
        self.runner.run("mount", &args).await?.check(&line)?;
        Ok(())
    }

    async fn make_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

pub struct MountPublisher<'a> {
    tool: &'a dyn MountTool,
}

impl<'a> MountPublisher<'a> {
    pub fn new(tool: &'a dyn MountTool) -> Self {
        Self { tool }
    }

    /// Replace whatever is mounted at the destination with the newest snapshot
    pub async fn republish(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        self.unpublish(mount, app_name).await?;
        self.publish(mount, app_name).await
    }

    /// Detach the destination and its children, if the destination is mounted
    pub async fn unpublish(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        let destination = mount.destination.as_path();

        if !self.tool.is_mount_point(destination).await? {
            tracing::debug!(
                app = app_name,
                destination = %destination.display(),
                "destination not mounted, nothing to unmount"
            );
            return Ok(());
        }

        for child in &mount.children {
            let path = child_path(destination, child);
            if self.tool.is_mount_point(&path).await? {
                tracing::debug!(
                    "Unmounting previous {} {} snapshot",
                    app_name,
                    path.display()
                );
                self.tool.unmount(&path).await.with_context(|| {
                    format!("Failed to unmount {} {} snapshot", app_name, path.display())
                })?;
            }
        }

        tracing::debug!(
            "Unmounting previous {} {} snapshot",
            app_name,
            destination.display()
        );
        self.tool.unmount(destination).await.with_context(|| {
            format!(
                "Failed to unmount {} {} snapshot",
                app_name,
                destination.display()
            )
        })
    }

    /// Attach `<origin>@backup` at the destination, then each child under it
    pub async fn publish(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        let destination = mount.destination.as_path();

        self.tool.make_dir_all(destination).await.with_context(|| {
            format!(
                "Failed to create {} {} top-level directory",
                app_name,
                destination.display()
            )
        })?;

        let snapshot = SnapshotId::current(mount.origin.as_str());
        tracing::debug!("Mounting {} {} snapshot", app_name, destination.display());
        self.tool.mount(&snapshot, destination).await.with_context(|| {
            format!(
                "Failed to mount {} snapshot {} at {}",
                app_name,
                snapshot,
                destination.display()
            )
        })?;

        for child in &mount.children {
            let path = child_path(destination, child);
            let child_snapshot = snapshot.child(child);
            tracing::debug!("Mounting {} {} snapshot", app_name, path.display());
            self.tool.mount(&child_snapshot, &path).await.with_context(|| {
                format!(
                    "Failed to mount {} snapshot {} at {}",
                    app_name,
                    child_snapshot,
                    path.display()
                )
            })?;
        }

        Ok(())
    }
}

fn child_path(destination: &Path, child: &str) -> PathBuf {
    destination.join(child)
}
