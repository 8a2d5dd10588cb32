//! Stellar Trustline Manager - ledger engine
//!
//! Library core behind the trustline manager UI: it scans an account's payment
//! history on Horizon (memo / date filtering with ETA reporting), keeps a local
//! copy of that history in sync, and removes trustlines in revalidated chunks.
//! Signing, submission and every UI concern live outside this crate and are
//! reached through the traits in [`domain::ports`].

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the surface the UI layer talks to
pub use application::{
    ChunkedMutationEngine, MemoScanner, MutationOutcome, MutationStatus, PaymentSync, ScanRequest,
    ScanSummary,
};
pub use domain::errors::{ErrorClass, LedgerError, ValidationError};
pub use domain::events::{MutationProgress, ProgressSink, ScanProgress, SyncProgress};
pub use infrastructure::{AppConfig, HorizonClient};
