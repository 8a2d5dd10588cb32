//! Progress events emitted by the scan, sync and mutation engines
//!
//! Events travel over a bounded `tokio::sync::mpsc` channel wrapped in
//! [`ProgressSink`]. The engine never waits on a slow consumer: when the buffer
//! is full the event is dropped, the next one carries the newer totals anyway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// 스캔 진행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    /// Periodic tick while records are evaluated
    Scan,
    /// Periodic tick while transaction details are resolved
    TxFetch,
    PageDone,
    Finalize,
    Aborted,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan => write!(f, "레코드 스캔"),
            Self::TxFetch => write!(f, "트랜잭션 조회"),
            Self::PageDone => write!(f, "페이지 완료"),
            Self::Finalize => write!(f, "완료"),
            Self::Aborted => write!(f, "중단"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub phase: ScanPhase,
    /// Pages fully processed so far
    pub page: u32,
    pub items_processed: u64,
    pub ops_total: u64,
    pub matches: u64,
    pub oldest_on_page: Option<DateTime<Utc>>,
    pub first_match_at: Option<DateTime<Utc>>,
    pub oldest_match_in_range_at: Option<DateTime<Utc>>,
    /// 0.0..=1.0, only reaches 1.0 on `Finalize`
    pub progress: f64,
    pub eta_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationPhase {
    ChunkDone,
    ChunkSkip,
    ChunkFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationProgress {
    pub phase: MutationPhase,
    /// Candidates covered so far, skipped and failed included
    pub processed: usize,
    pub total: usize,
}

impl MutationProgress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f64 / self.total as f64
    }
}

/// 동기화 종류: 과거 방향 backfill / 커서 이후 refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncKind {
    Backfill,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Start,
    Page,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub kind: SyncKind,
    pub phase: SyncPhase,
    pub page: u32,
    /// Records written to the store so far
    pub stored: usize,
    /// Newest record of the page (backfill) or oldest (refresh)
    pub edge_at: Option<DateTime<Utc>>,
    pub progress: f64,
}

/// Non-blocking progress emitter; a disabled sink swallows everything
#[derive(Debug)]
pub struct ProgressSink<E> {
    tx: Option<mpsc::Sender<E>>,
}

impl<E> ProgressSink<E> {
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: E) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("📭 Progress consumer lagging, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("📭 Progress receiver closed");
            }
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

impl<E> Clone for ProgressSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> Default for ProgressSink<E> {
    fn default() -> Self {
        Self::disabled()
    }
}
