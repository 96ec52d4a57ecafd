//! In-memory host shared by the engine tests.
//!
//! Models the ZFS snapshot namespace (with recursive operations over
//! descendant datasets), the mount table, the container runtime and the
//! health monitor. Every mutation is appended to an event log, and any
//! mutation can be made to fail by event prefix.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::core::docker::ContainerRuntime;
use crate::core::health::{MonitorStatus, Notifier};
use crate::core::mount::MountTool;
use crate::core::snapshot::{SnapshotId, SnapshotStore};

#[derive(Default)]
struct HostState {
    clock: u64,
    datasets: BTreeSet<String>,
    snapshots: BTreeMap<String, u64>,
    directories: BTreeSet<PathBuf>,
    mounted: BTreeMap<PathBuf, String>,
    events: Vec<String>,
    failures: Vec<String>,
}

impl HostState {
    fn record(&mut self, event: String) -> Result<()> {
        if self.failures.iter().any(|prefix| event.starts_with(prefix)) {
            bail!("injected failure: {}", event);
        }
        self.events.push(event);
        Ok(())
    }

    /// The dataset itself plus every known descendant
    fn family(&self, dataset: &str) -> Vec<String> {
        let prefix = format!("{}/", dataset);
        std::iter::once(dataset.to_string())
            .chain(
                self.datasets
                    .iter()
                    .filter(|d| d.starts_with(&prefix))
                    .cloned(),
            )
            .collect()
    }
}

fn tag_of(snapshot: &SnapshotId) -> String {
    let name = snapshot.to_string();
    name[snapshot.dataset().len()..].to_string()
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Declare a descendant dataset so recursive operations include it
    pub fn add_dataset(&self, dataset: &str) {
        self.state().datasets.insert(dataset.to_string());
    }

    pub fn seed_snapshot(&self, name: &str) {
        let mut state = self.state();
        let clock = state.clock;
        state.snapshots.insert(name.to_string(), clock);
    }

    pub fn seed_mount(&self, path: &str, source: &str) {
        self.state()
            .mounted
            .insert(PathBuf::from(path), source.to_string());
    }

    /// Advance the clock between runs
    pub fn tick(&self) {
        self.state().clock += 1;
    }

    /// Make every mutation whose event starts with `prefix` fail
    pub fn fail_on(&self, prefix: &str) {
        self.state().failures.push(prefix.to_string());
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.state().snapshots.keys().cloned().collect()
    }

    pub fn snapshot_time(&self, name: &str) -> Option<u64> {
        self.state().snapshots.get(name).copied()
    }

    /// Source currently mounted at each mount point
    pub fn mounts(&self) -> Vec<(PathBuf, String)> {
        self.state()
            .mounted
            .iter()
            .map(|(path, source)| (path.clone(), source.clone()))
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub fn snapshot_events(&self) -> Vec<String> {
        self.events_matching(&["create ", "rename ", "destroy "])
    }

    pub fn mount_events(&self) -> Vec<String> {
        self.events_matching(&["mount ", "unmount ", "mkdir "])
    }

    pub fn events_matching(&self, prefixes: &[&str]) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter(|e| prefixes.iter().any(|p| e.starts_with(p)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for FakeHost {
    async fn exists(&self, snapshot: &SnapshotId) -> Result<bool> {
        Ok(self.state().snapshots.contains_key(&snapshot.to_string()))
    }

    async fn create(&self, snapshot: &SnapshotId) -> Result<()> {
        let mut state = self.state();
        state.record(format!("create {}", snapshot))?;

        let tag = tag_of(snapshot);
        let clock = state.clock;
        for dataset in state.family(snapshot.dataset()) {
            let name = format!("{}{}", dataset, tag);
            if state.snapshots.insert(name.clone(), clock).is_some() {
                bail!("cannot create snapshot '{}': dataset already exists", name);
            }
        }
        Ok(())
    }

    async fn rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<()> {
        let mut state = self.state();
        state.record(format!("rename {} {}", from, to))?;

        let (from_tag, to_tag) = (tag_of(from), tag_of(to));
        for dataset in state.family(from.dataset()) {
            let old = format!("{}{}", dataset, from_tag);
            let new = format!("{}{}", dataset, to_tag);
            if state.snapshots.contains_key(&new) {
                bail!("cannot rename to '{}': dataset already exists", new);
            }
            if let Some(created) = state.snapshots.remove(&old) {
                state.snapshots.insert(new, created);
            }
        }
        Ok(())
    }

    async fn destroy(&self, snapshot: &SnapshotId) -> Result<()> {
        let mut state = self.state();
        state.record(format!("destroy {}", snapshot))?;

        let tag = tag_of(snapshot);
        for dataset in state.family(snapshot.dataset()) {
            state.snapshots.remove(&format!("{}{}", dataset, tag));
        }
        Ok(())
    }
}

#[async_trait]
impl MountTool for FakeHost {
    async fn is_mount_point(&self, path: &Path) -> Result<bool> {
        Ok(self.state().mounted.contains_key(path))
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        if !state.mounted.contains_key(path) {
            bail!("umount: {}: not mounted", path.display());
        }
        if state
            .mounted
            .keys()
            .any(|other| other != path && other.starts_with(path))
        {
            bail!("umount: {}: target is busy", path.display());
        }
        state.record(format!("unmount {}", path.display()))?;
        state.mounted.remove(path);
        Ok(())
    }

    async fn mount(&self, snapshot: &SnapshotId, path: &Path) -> Result<()> {
        let mut state = self.state();
        let name = snapshot.to_string();
        if !state.snapshots.contains_key(&name) {
            bail!("cannot open '{}': dataset does not exist", name);
        }
        if state.mounted.contains_key(path) {
            bail!("mount: {}: already mounted", path.display());
        }
        let inside_mount = path
            .parent()
            .map(|parent| state.mounted.contains_key(parent))
            .unwrap_or(false);
        if !state.directories.contains(path) && !inside_mount {
            bail!("mount: {}: mount point does not exist", path.display());
        }
        state.record(format!("mount {} {}", name, path.display()))?;
        state.mounted.insert(path.to_path_buf(), name);
        Ok(())
    }

    async fn make_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.record(format!("mkdir {}", path.display()))?;
        state.directories.insert(path.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeHost {
    async fn stop(&self, containers: &[String]) -> Result<()> {
        if containers.is_empty() {
            return Err(anyhow!("docker stop requires at least 1 argument"));
        }
        self.state().record(format!("stop {}", containers.join(" ")))
    }

    async fn start(&self, containers: &[String]) -> Result<()> {
        if containers.is_empty() {
            return Err(anyhow!("docker start requires at least 1 argument"));
        }
        self.state().record(format!("start {}", containers.join(" ")))
    }
}

#[async_trait]
impl Notifier for FakeHost {
    async fn notify(&self, status: MonitorStatus, message: &str) {
        let _ = self.state().record(format!("notify {} {}", status, message));
    }
}
