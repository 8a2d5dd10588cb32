//! Application layer
//!
//! Scan and mutation use cases that drive the domain ports: page walking,
//! detail resolution, memo scanning with ETA, payment history sync and
//! chunked trustline removal.

pub mod chunked_mutation;
pub mod detail_resolver;
pub mod eta;
pub mod memo_scan;
pub mod page_walker;
pub mod payment_sync;

pub use chunked_mutation::{
    AppliedChunk, ChunkFailure, ChunkedMutationEngine, LiveTrustlines, MutationOutcome,
    MutationStatus,
};
pub use detail_resolver::{DetailCache, DetailResolver, ResolveStats, Resolved};
pub use eta::{EtaEstimate, estimate};
pub use memo_scan::{MemoScanner, ScanRequest, ScanSummary};
pub use page_walker::PageWalker;
pub use payment_sync::{CachedTotal, PaymentSync, SyncReport, coverage_target};
