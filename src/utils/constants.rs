/// Snapshot Manager defaults and naming conventions

/// Archived generations kept per mount when neither the command line nor the
/// configuration file says otherwise
pub const DEFAULT_RETENTION: u32 = 14;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Snapshot name suffix: `<dataset>@backup`, `<dataset>@backup-<N>`
pub const SNAPSHOT_TAG: &str = "backup";

/// Filesystem type passed to `mount -t`
pub const SNAPSHOT_FS_TYPE: &str = "zfs";

/// Upper bound on a single health-check push
pub const NOTIFY_TIMEOUT_SECS: u64 = 20;

/// Name used for the shared backup container group in logs and errors
pub const BACKUP_GROUP: &str = "backup";

/// Process exit status after an interrupt (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;
