/// CLI argument parsing

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::core::Overrides;
use crate::utils::DEFAULT_CONFIG_PATH;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built: ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Makes periodic snapshots of app storage and mounts them for backup.
#[derive(Debug, Parser)]
#[command(name = "snapshot-manager")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file to use
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Number of snapshots to retain
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub retention: Option<u32>,

    /// Backup containers to stop before updating mounts and start after
    #[arg(short, long, num_args = 0..)]
    pub backup_containers: Option<Vec<String>>,

    /// Uptime Kuma-compatible push URL to report run status to
    #[arg(short, long)]
    pub monitor_url: Option<String>,

    /// Verbose output (repeat to increase verbosity)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Command line values that take precedence over the configuration file
    pub fn overrides(&self) -> Overrides {
        Overrides {
            retention: self.retention,
            backup_containers: self.backup_containers.clone(),
            monitor_url: self.monitor_url.clone(),
        }
    }
}
