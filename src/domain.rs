//! Domain layer
//!
//! Ledger record model, trustline snapshots, error taxonomy, progress events
//! and the ports (traits) through which the engine reaches the ledger API and
//! the external signing/submission layer.

pub mod errors;
pub mod events;
pub mod ledger;
pub mod ports;
pub mod strkey;
pub mod trustline;

pub use errors::{classify, ErrorClass, LedgerError, ValidationError};
pub use events::{
    MutationPhase, MutationProgress, ProgressSink, ScanPhase, ScanProgress, SyncKind, SyncPhase,
    SyncProgress,
};
pub use ledger::{
    AssetKind, ListQuery, MemoState, OperationKind, OperationRecord, Order, Page, PageCursor,
    TransactionDetail,
};
pub use ports::{
    ChunkApplier, ChunkReceipt, Eligibility, LedgerApi, PaymentStore, SnapshotSource,
};
pub use trustline::{AccountSummary, Trustline, TrustlineKey, TrustlineSnapshot};
