/// Logging setup for the snapshot-manager binary

use anyhow::{anyhow, Context, Result};
use std::env;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{
    filter::Filtered,
    layer::{Layered, SubscriberExt as _},
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
    Registry,
};

type PrepareResult = Result<
    Layered<Filtered<Box<dyn Layer<Registry> + Send + Sync>, EnvFilter, Registry>, Registry>,
>;

/// Map the number of `-v` flags to the default maximum level
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Verbosity sets the default level; `RUST_LOG` directives are appended so
/// they can refine it per module.
fn directive(verbosity: u8) -> String {
    let level = level_for_verbosity(verbosity);
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(extra) if !extra.trim().is_empty() => format!("{},{}", level, extra),
        _ => level.to_string(),
    }
}

fn prepare_subscriber(verbosity: u8) -> PrepareResult {
    let directive = directive(verbosity);
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log directive '{}'", directive))?;

    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Control output format based on `LOG_FORMAT` env variable.
    let format = env::var("LOG_FORMAT").ok();
    let layer = if let Some(format) = &format {
        match format.to_lowercase().as_str() {
            "default" => layer.boxed(),
            "compact" => layer.compact().boxed(),
            "pretty" => layer.pretty().boxed(),
            s => Err(anyhow!("LOG_FORMAT '{}' is not supported", s))?,
        }
    } else {
        layer.boxed()
    };

    Ok(tracing_subscriber::registry().with(layer.with_filter(filter)))
}

/// Install the subscriber for the current thread. Logging stays active for
/// as long as the returned guard is alive.
pub fn init_scoped_tracing_subscriber(verbosity: u8) -> Result<DefaultGuard> {
    let guard = prepare_subscriber(verbosity)?.set_default();
    tracing::debug!(directive = %directive(verbosity), "initialized scoped tracing subscriber");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::WARN);
        assert_eq!(level_for_verbosity(1), LevelFilter::INFO);
        assert_eq!(level_for_verbosity(2), LevelFilter::DEBUG);
        assert_eq!(level_for_verbosity(3), LevelFilter::TRACE);
        assert_eq!(level_for_verbosity(9), LevelFilter::TRACE);
    }
}
