//! Logging system configuration and initialization
//!
//! - Console output (plain) and/or daily-rolling file output (plain or JSON)
//! - Level from [`LoggingConfig`], overridden by `RUST_LOG` when set
//! - HTTP stack internals are capped unless the level is `trace`

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "stm-ledger.log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Targets that flood debug output with connection-level detail
const NOISY_TARGETS: [(&str, &str); 5] = [
    ("reqwest", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("governor", "warn"),
];

// Keeps the non-blocking file writer alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `<data dir>/stm-ledger/logs`, falling back to `./logs`
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.directory {
        return dir.clone();
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("stm-ledger").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Build the env filter: `RUST_LOG` wins, otherwise the configured level with
/// dependency caps
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level)?;
    if !level.to_lowercase().contains("trace") {
        for (target, cap) in NOISY_TARGETS {
            filter = filter.add_directive(format!("{target}={cap}").parse()?);
        }
        filter = filter.add_directive(format!("stm_ledger={level}").parse()?);
    }
    Ok(filter)
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let log_dir = get_log_directory(config);

    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {}: {e}", log_dir.display()))?;

        let (file_writer, file_guard) = non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(file_guard);
        }

        let file_layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
            .with_ansi(false);
        if config.json_format {
            layers.push(
                file_layer
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .boxed(),
            );
        } else {
            layers.push(file_layer.with_target(false).boxed());
        }
    }

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
                .with_target(false)
                .boxed(),
        );
    }

    Registry::default()
        .with(layers)
        .with(build_env_filter(&config.level)?)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!("📝 Logging initialized (level: {}, json: {})", config.level, config.json_format);
    if config.file_output {
        info!("📁 Log directory: {}", log_dir.display());
    }
    Ok(())
}
