//! Configuration management for the ledger engine
//!
//! 설정 로드 순서: 기본값 → TOML 파일(선택) → `STM_` 환경 변수.
//! Nested keys use a double underscore, e.g. `STM_SCAN__DETAIL_CONCURRENCY=4`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::backoff::BackoffPolicy;

/// Default values for configuration
pub mod defaults {
    /// Public Horizon (mainnet)
    pub const HORIZON_URL: &str = "https://horizon.stellar.org";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Client-side request budget
    pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

    pub const USER_AGENT: &str = concat!("stm-ledger/", env!("CARGO_PKG_VERSION"));

    /// Records per listing page (Horizon maximum)
    pub const PAGE_SIZE: u32 = 200;

    /// Detail resolver workers
    pub const DETAIL_CONCURRENCY: usize = 6;
    pub const MIN_DETAIL_CONCURRENCY: usize = 2;
    pub const MAX_DETAIL_CONCURRENCY: usize = 6;

    /// Emit a progress tick every N processed items / resolved details
    pub const PROGRESS_EVERY: u64 = 10;

    pub const PROGRESS_BUFFER: usize = 256;

    /// Trustline removals per chunk (ledger operation limit per transaction)
    pub const CHUNK_SIZE: usize = 100;

    /// Refresh the eligibility snapshot every N chunks (0 = first chunk only)
    pub const REVALIDATE_EVERY: usize = 1;
    /// History a coverage check keeps locally even when no older date is asked for
    pub const PREFETCH_DAYS: u32 = 30;

    pub const LOG_LEVEL: &str = "info";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub horizon: HorizonConfig,
    pub backoff: BackoffPolicy,
    pub scan: ScanConfig,
    pub mutation: MutationConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub user_agent: String,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::HORIZON_URL.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub page_size: u32,
    pub detail_concurrency: usize,
    pub progress_every: u64,
    pub progress_buffer: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            detail_concurrency: defaults::DETAIL_CONCURRENCY,
            progress_every: defaults::PROGRESS_EVERY,
            progress_buffer: defaults::PROGRESS_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub chunk_size: usize,
    pub revalidate_every: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            revalidate_every: defaults::REVALIDATE_EVERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: u32,
    pub prefetch_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            prefetch_days: defaults::PREFETCH_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to the platform data dir when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// 기본값 + 파일 + 환경 변수에서 설정 로드
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!("📋 Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        } else if let Some(default_path) = default_config_path() {
            debug!("📋 Looking for optional config at {}", default_path.display());
            builder = builder.add_source(config::File::from(default_path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("STM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정값 유효성 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.horizon.base_url).is_err() {
            return Err(invalid(format!(
                "horizon.base_url is not a valid URL: {}",
                self.horizon.base_url
            )));
        }
        if self.horizon.request_timeout_seconds == 0 {
            return Err(invalid("horizon.request_timeout_seconds must be greater than 0"));
        }
        if self.horizon.max_requests_per_second == 0 {
            return Err(invalid("horizon.max_requests_per_second must be greater than 0"));
        }
        if self.backoff.tries == 0 {
            return Err(invalid("backoff.tries must be greater than 0"));
        }
        if self.backoff.base_delay_ms == 0 {
            return Err(invalid("backoff.base_delay_ms must be greater than 0"));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(invalid("backoff.base_delay_ms cannot be greater than max_delay_ms"));
        }
        if self.scan.progress_every == 0 {
            return Err(invalid("scan.progress_every must be greater than 0"));
        }
        if self.mutation.chunk_size == 0 || self.mutation.chunk_size > defaults::CHUNK_SIZE {
            return Err(invalid(format!(
                "mutation.chunk_size must be within 1..={}",
                defaults::CHUNK_SIZE
            )));
        }
        if self.sync.page_size == 0 {
            return Err(invalid("sync.page_size must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// `<config dir>/stm-ledger/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stm-ledger").join("config.toml"))
}
