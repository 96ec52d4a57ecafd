use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;

use snapshot_manager::cli::Cli;
use snapshot_manager::core::{
    AbortReason, Backends, BackupRun, BackupRunConfig, DockerCli, MonitorStatus, Notifier,
    SystemMountTool, SystemRunner, UptimeKumaNotifier, ZfsSnapshotStore,
};
use snapshot_manager::utils::logging::init_scoped_tracing_subscriber;
use snapshot_manager::utils::EXIT_INTERRUPTED;

/// Outcome of one invocation, mapped to the process exit status
enum Outcome {
    Completed,
    Interrupted,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_scoped_tracing_subscriber(cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED as u8),
        Err(e) => {
            tracing::error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = match BackupRunConfig::load(&cli.config, &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            report_early_failure(&cli).await;
            return Err(anyhow::Error::new(e).context("Failed to load configuration"));
        }
    };

    let notifier = config
        .monitor_url
        .clone()
        .map(UptimeKumaNotifier::new)
        .transpose()
        .context("Failed to create monitor client")?;

    let snapshots = ZfsSnapshotStore::new(SystemRunner);
    let mounts = SystemMountTool::new(SystemRunner);
    let containers = DockerCli::new(SystemRunner);
    let backends = Backends {
        snapshots: &snapshots,
        mounts: &mounts,
        containers: &containers,
        notifier: notifier.as_ref().map(|n| n as &dyn Notifier),
    };

    let mut backup = BackupRun::new(&config, backends);

    // Dropping the run future on interrupt stops it between two commands;
    // whatever was already applied stays as it is.
    let finished = tokio::select! {
        result = backup.run() => Some(result),
        _ = interrupted() => None,
    };

    match finished {
        Some(result) => {
            let summary = result?;
            tracing::info!(
                started_at = %summary.started_at.format("%Y-%m-%d %H:%M:%S"),
                apps = summary.apps,
                mounts = summary.mounts,
                "Finished backup snapshot in {}",
                summary.elapsed_display()
            );
            Ok(Outcome::Completed)
        }
        None => {
            backup.abort(AbortReason::Interrupted).await;
            Ok(Outcome::Interrupted)
        }
    }
}

/// Resolves on the first interrupt. If interrupts cannot be observed the run
/// simply proceeds without them.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Unable to listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Without a loaded configuration only a monitor given on the command line
/// can be told about the failure
async fn report_early_failure(cli: &Cli) {
    let Some(url) = cli
        .monitor_url
        .as_deref()
        .and_then(|url| reqwest::Url::parse(url).ok())
    else {
        return;
    };

    match UptimeKumaNotifier::new(url) {
        Ok(notifier) => {
            notifier
                .notify(MonitorStatus::Down, AbortReason::Failed.message())
                .await
        }
        Err(e) => tracing::error!("Failed to create monitor client: {:#}", e),
    }
}
