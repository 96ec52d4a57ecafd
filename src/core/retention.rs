/// Snapshot rotation
///
/// Each mount keeps a ring of generations: `@backup` is the newest, then
/// `@backup-1` up to `@backup-<retention>`. A run archives the ring (shifts
/// every generation up by one), captures a fresh `@backup`, and after the
/// mounts are republished prunes whatever landed in the oldest slot.
///
/// Lookups that find nothing are the normal state of a young ring and are
/// skipped silently. Any failed rename or destroy aborts the run: a ring
/// left half-shifted has to be looked at by an operator.

use anyhow::{Context, Result};

use crate::core::config::StorageMount;
use crate::core::snapshot::{SnapshotId, SnapshotStore};

pub struct Rotation<'a> {
    store: &'a dyn SnapshotStore,
    retention: u32,
}

impl<'a> Rotation<'a> {
    pub fn new(store: &'a dyn SnapshotStore, retention: u32) -> Self {
        Self { store, retention }
    }

    /// Shift every generation up by one, making room for a new `@backup`.
    /// Must run before [`Rotation::capture`].
    pub async fn archive(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        self.remove_oldest(mount, app_name).await?;

        // Descending, so a rename never lands on a generation still waiting to move
        for age in (1..self.retention).rev() {
            let from = SnapshotId::archived(mount.origin.as_str(), age);
            if !self.store.exists(&from).await? {
                continue;
            }

            let to = SnapshotId::archived(mount.origin.as_str(), age + 1);
            tracing::debug!(
                "Renaming previous {} {} snapshot with age {}",
                app_name,
                mount.origin,
                age
            );
            self.store.rename(&from, &to).await.with_context(|| {
                format!(
                    "Failed to rename {} {} snapshot with age {}",
                    app_name, mount.origin, age
                )
            })?;
        }

        let latest = SnapshotId::current(mount.origin.as_str());
        if self.store.exists(&latest).await? {
            tracing::debug!("Renaming previous {} {} snapshot", app_name, mount.origin);
            let first = SnapshotId::archived(mount.origin.as_str(), 1);
            self.store.rename(&latest, &first).await.with_context(|| {
                format!("Failed to rename {} {} snapshot", app_name, mount.origin)
            })?;
        }

        Ok(())
    }

    /// Take the new `@backup` snapshot of the mount's origin and its descendants
    pub async fn capture(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        let snapshot = SnapshotId::current(mount.origin.as_str());
        tracing::debug!("Performing {} {} snapshot", app_name, mount.origin);
        self.store.create(&snapshot).await.with_context(|| {
            format!("Failed to create {} {} snapshot", app_name, mount.origin)
        })
    }

    /// Destroy the generation in the oldest slot, if any. Runs after the
    /// mounts are republished so a slow destroy never delays them.
    pub async fn prune(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        self.remove_oldest(mount, app_name).await
    }

    async fn remove_oldest(&self, mount: &StorageMount, app_name: &str) -> Result<()> {
        let oldest = SnapshotId::archived(mount.origin.as_str(), self.retention);
        if !self.store.exists(&oldest).await? {
            return Ok(());
        }

        tracing::debug!(
            "Removing previous {} {} snapshot with age {}",
            app_name,
            mount.origin,
            self.retention
        );
        self.store.destroy(&oldest).await.with_context(|| {
            format!(
                "Failed to destroy {} {} snapshot with age {}",
                app_name, mount.origin, self.retention
            )
        })
    }
}
