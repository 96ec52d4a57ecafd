/// Backup run coordination
///
/// One run walks every configured app through three passes:
///
/// 1. snapshot: archive the ring, stop the app's containers, take
///    `@backup` of every mount, start the containers again
/// 2. remount: with the backup container group stopped, republish every
///    mount from its new `@backup`, then start the group
/// 3. prune: drop whatever sits in the oldest generation slot
///
/// Containers are only down for the snapshot itself, and the backup group
/// never sees a half-updated set of mounts. The first failure aborts the
/// run where it stands: nothing is rolled back, the monitor is told the run
/// went down, and the error is handed to the caller.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::core::config::{Application, BackupRunConfig};
use crate::core::docker::{ContainerController, ContainerRuntime};
use crate::core::health::{MonitorStatus, Notifier};
use crate::core::mount::{MountPublisher, MountTool};
use crate::core::retention::Rotation;
use crate::core::snapshot::SnapshotStore;
use crate::utils::BACKUP_GROUP;

/// The host capabilities a run drives
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub snapshots: &'a dyn SnapshotStore,
    pub mounts: &'a dyn MountTool,
    pub containers: &'a dyn ContainerRuntime,
    pub notifier: Option<&'a dyn Notifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Failed,
    Interrupted,
}

impl AbortReason {
    /// Message sent along with the `down` notification
    pub fn message(&self) -> &'static str {
        match self {
            AbortReason::Failed => "exception",
            AbortReason::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    NotifyingStart,
    Snapshotting { app: String },
    StoppingBackupGroup,
    Remounting { app: String },
    StartingBackupGroup,
    Pruning { app: String },
    NotifyingFinish,
    Done,
    Aborted { during: Box<Phase>, reason: AbortReason },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::NotifyingStart => write!(f, "notifying start"),
            Phase::Snapshotting { app } => write!(f, "snapshotting {}", app),
            Phase::StoppingBackupGroup => write!(f, "stopping backup containers"),
            Phase::Remounting { app } => write!(f, "remounting {}", app),
            Phase::StartingBackupGroup => write!(f, "starting backup containers"),
            Phase::Pruning { app } => write!(f, "pruning {}", app),
            Phase::NotifyingFinish => write!(f, "notifying finish"),
            Phase::Done => write!(f, "done"),
            Phase::Aborted { during, reason } => {
                write!(f, "aborted ({}) while {}", reason.message(), during)
            }
        }
    }
}

/// What a completed run covered
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub apps: usize,
    pub mounts: usize,
}

pub struct BackupRun<'a> {
    config: &'a BackupRunConfig,
    backends: Backends<'a>,
    phase: Phase,
}

impl RunSummary {
    /// Elapsed time rounded to whole milliseconds, for display
    pub fn elapsed_display(&self) -> humantime::FormattedDuration {
        let millis = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX);
        humantime::format_duration(Duration::from_millis(millis))
    }
}

impl<'a> BackupRun<'a> {
    pub fn new(config: &'a BackupRunConfig, backends: Backends<'a>) -> Self {
        Self {
            config,
            backends,
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Execute the whole run. On failure the run is aborted (with a `down`
    /// notification) before the error is returned.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let span = tracing::info_span!(
            "backup_run",
            retention = self.config.retention,
            apps = self.config.apps.len()
        );

        let result = self.execute().instrument(span.clone()).await;
        if result.is_err() {
            self.abort(AbortReason::Failed).instrument(span).await;
        }
        result
    }

    /// Move to the aborted state and report the run as down. Nothing that
    /// was already applied is undone.
    pub async fn abort(&mut self, reason: AbortReason) {
        if matches!(self.phase, Phase::Done | Phase::Aborted { .. }) {
            return;
        }

        let during = std::mem::replace(&mut self.phase, Phase::NotStarted);
        match reason {
            AbortReason::Failed => tracing::error!("Aborting backup run while {}", during),
            AbortReason::Interrupted => {
                tracing::warn!("Interrupt received while {}, aborting backup run", during)
            }
        }
        self.phase = Phase::Aborted {
            during: Box::new(during),
            reason,
        };

        self.notify(MonitorStatus::Down, reason.message()).await;
    }

    async fn execute(&mut self) -> Result<RunSummary> {
        let config = self.config;
        let backends = self.backends;
        let started_at = Local::now();
        let clock = Instant::now();

        let rotation = Rotation::new(backends.snapshots, config.retention);
        let controller = ContainerController::new(backends.containers);
        let publisher = MountPublisher::new(backends.mounts);

        tracing::info!("Start backup snapshot");
        self.enter(Phase::NotifyingStart);
        self.notify(MonitorStatus::Up, "start").await;

        for app in &config.apps {
            self.enter(Phase::Snapshotting {
                app: app.name.clone(),
            });
            snapshot_app(&rotation, &controller, app)
                .instrument(tracing::info_span!("app", app = %app.name))
                .await?;
        }

        self.enter(Phase::StoppingBackupGroup);
        if !config.backup_containers.is_empty() {
            tracing::info!("Stopping backup container(s)");
            controller
                .stop(BACKUP_GROUP, &config.backup_containers)
                .await?;
        }

        for app in &config.apps {
            self.enter(Phase::Remounting {
                app: app.name.clone(),
            });
            tracing::info!("Mounting snapshot for app {}", app.name);
            for mount in &app.mounts {
                publisher
                    .republish(mount, &app.name)
                    .instrument(tracing::info_span!("app", app = %app.name))
                    .await?;
            }
        }

        self.enter(Phase::StartingBackupGroup);
        if !config.backup_containers.is_empty() {
            tracing::info!("Starting backup container(s)");
            controller
                .start(BACKUP_GROUP, &config.backup_containers)
                .await?;
        }

        for app in &config.apps {
            self.enter(Phase::Pruning {
                app: app.name.clone(),
            });
            tracing::info!("Removing snapshot past retention for app {}", app.name);
            for mount in &app.mounts {
                rotation
                    .prune(mount, &app.name)
                    .instrument(tracing::info_span!("app", app = %app.name))
                    .await?;
            }
        }

        self.enter(Phase::NotifyingFinish);
        self.notify(MonitorStatus::Up, "finish").await;
        self.enter(Phase::Done);

        Ok(RunSummary {
            started_at,
            elapsed: clock.elapsed(),
            apps: config.apps.len(),
            mounts: config.apps.iter().map(|app| app.mounts.len()).sum(),
        })
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    async fn notify(&self, status: MonitorStatus, message: &str) {
        if let Some(notifier) = self.backends.notifier {
            notifier.notify(status, message).await;
        }
    }
}

/// Archive, pause, snapshot, resume: the containers are only down for the
/// snapshot itself
async fn snapshot_app(
    rotation: &Rotation<'_>,
    controller: &ContainerController<'_>,
    app: &Application,
) -> Result<()> {
    tracing::info!("Snapshotting app {}", app.name);

    for mount in &app.mounts {
        rotation.archive(mount, &app.name).await?;
    }

    controller.stop(&app.name, &app.containers).await?;

    for mount in &app.mounts {
        rotation.capture(mount, &app.name).await?;
    }

    controller.start(&app.name, &app.containers).await
}
