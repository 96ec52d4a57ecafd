pub mod backup;
pub mod command;
pub mod config;
pub mod docker;
pub mod health;
pub mod mount;
pub mod retention;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{AbortReason, Backends, BackupRun, Phase, RunSummary};
pub use command::{CommandRunner, SystemRunner};
pub use config::{Application, BackupRunConfig, ConfigError, Overrides, StorageMount};
pub use docker::{ContainerController, ContainerRuntime, DockerCli};
pub use health::{MonitorStatus, Notifier, UptimeKumaNotifier};
pub use mount::{MountPublisher, MountTool, SystemMountTool};
pub use retention::Rotation;
pub use snapshot::{Generation, SnapshotId, SnapshotStore, ZfsSnapshotStore};
