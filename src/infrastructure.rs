//! Infrastructure layer: retry/backoff, Horizon HTTP adapter, payment store,
//! configuration and logging

pub mod backoff; // Backoff controller + error classification entry point
pub mod config; // Configuration loading and defaults
pub mod horizon_client; // LedgerApi over Horizon REST
pub mod logging; // tracing subscriber setup
pub mod payment_store; // Process-local PaymentStore

// Re-export commonly used items
pub use backoff::{Backoff, BackoffPolicy, RetryNotice, run_with_backoff};
pub use config::{
    AppConfig, ConfigError, HorizonConfig, LoggingConfig, MutationConfig, ScanConfig, SyncConfig,
};
pub use horizon_client::HorizonClient;
pub use logging::{init_logging, init_logging_with_config};
pub use payment_store::InMemoryPaymentStore;
