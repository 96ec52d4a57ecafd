/// Backup configuration
///
/// Loaded once per invocation from a TOML file, with command line values
/// taking precedence over the file and the file over built-in defaults.
/// Everything is validated here so the engine can rely on the invariants.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::utils::DEFAULT_RETENTION;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file \"{}\" does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file \"{}\"", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file \"{}\"", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One dataset published at one destination, with nested child datasets
/// mounted under the destination in the listed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMount {
    pub origin: String,
    pub destination: PathBuf,
    pub children: Vec<String>,
}

/// A backup unit: the containers to pause while its mounts are snapshotted.
/// `containers` is in start order; they are stopped in reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    pub containers: Vec<String>,
    pub mounts: Vec<StorageMount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupRunConfig {
    pub retention: u32,
    pub backup_containers: Vec<String>,
    pub monitor_url: Option<reqwest::Url>,
    pub apps: Vec<Application>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub retention: Option<u32>,
    pub backup_containers: Option<Vec<String>>,
    pub monitor_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    config: GeneralSection,
    #[serde(default)]
    apps: Vec<AppSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct GeneralSection {
    retention: Option<u32>,
    backup_containers: Option<Vec<String>>,
    monitor_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppSection {
    name: String,
    #[serde(default)]
    containers: Vec<String>,
    #[serde(default)]
    mounts: Vec<MountSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MountSection {
    origin: String,
    destination: PathBuf,
    #[serde(default)]
    children: Vec<String>,
}

impl BackupRunConfig {
    /// Load configuration from a TOML file and apply overrides
    pub fn load<P: AsRef<Path>>(path: P, overrides: &Overrides) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Reading configuration file \"{}\"", path.display());

        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        Self::resolve(file, overrides)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::resolve(file, overrides)
    }

    fn resolve(file: ConfigFile, overrides: &Overrides) -> Result<Self, ConfigError> {
        let retention = overrides
            .retention
            .or(file.config.retention)
            .unwrap_or(DEFAULT_RETENTION);
        if retention == 0 {
            return Err(ConfigError::Invalid(
                "retention must be at least 1".to_string(),
            ));
        }
        tracing::debug!("Using retention: {}", retention);

        let backup_containers = overrides
            .backup_containers
            .clone()
            .or(file.config.backup_containers)
            .unwrap_or_default();
        validate_containers("backup-containers", &backup_containers)?;
        tracing::debug!(
            "Using backup containers: \"{}\"",
            backup_containers.join(", ")
        );

        let monitor_url = overrides
            .monitor_url
            .clone()
            .or(file.config.monitor_url)
            .map(|url| parse_monitor_url(&url))
            .transpose()?;
        match &monitor_url {
            Some(url) => tracing::debug!("Using monitor url: \"{}\"", url),
            None => tracing::debug!("Using monitor url: no monitor"),
        }

        let mut names = HashSet::new();
        let mut apps = Vec::with_capacity(file.apps.len());
        for app in file.apps {
            if app.name.trim().is_empty() {
                return Err(ConfigError::Invalid("app name must not be empty".to_string()));
            }
            if !names.insert(app.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "app \"{}\" is declared more than once",
                    app.name
                )));
            }
            validate_containers(&app.name, &app.containers)?;

            let mounts = app
                .mounts
                .into_iter()
                .map(|mount| validate_mount(&app.name, mount))
                .collect::<Result<Vec<_>, _>>()?;

            apps.push(Application {
                name: app.name,
                containers: app.containers,
                mounts,
            });
        }
        tracing::debug!(
            "Using apps: \"{}\"",
            apps.iter()
                .map(|app| app.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            retention,
            backup_containers,
            monitor_url,
            apps,
        })
    }
}

fn parse_monitor_url(url: &str) -> Result<reqwest::Url, ConfigError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ConfigError::Invalid(format!("monitor url \"{}\": {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::Invalid(format!(
            "monitor url \"{}\": unsupported scheme {}",
            url, scheme
        ))),
    }
}

fn validate_containers(owner: &str, containers: &[String]) -> Result<(), ConfigError> {
    if containers.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "{}: container names must not be empty",
            owner
        )));
    }
    Ok(())
}

fn validate_mount(app_name: &str, mount: MountSection) -> Result<StorageMount, ConfigError> {
    if mount.origin.is_empty() || mount.origin.contains('@') {
        return Err(ConfigError::Invalid(format!(
            "{}: mount origin \"{}\" is not a dataset name",
            app_name, mount.origin
        )));
    }

    if !mount.destination.is_absolute() {
        return Err(ConfigError::Invalid(format!(
            "{}: mount destination \"{}\" must be an absolute path",
            app_name,
            mount.destination.display()
        )));
    }

    for child in &mount.children {
        let mut components = Path::new(child).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal || child.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "{}: child \"{}\" of {} must be a single relative name",
                app_name, child, mount.origin
            )));
        }
    }

    Ok(StorageMount {
        origin: mount.origin,
        destination: mount.destination,
        children: mount.children,
    })
}
