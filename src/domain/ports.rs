//! 외부 연동 포트 정의
//!
//! 엔진이 ledger API와 서명/제출 레이어에 접근하는 인터페이스.
//! The Horizon adapter implements [`LedgerApi`]; tests use an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::LedgerError;
use super::ledger::{ListQuery, OperationRecord, Page, PageCursor, TransactionDetail};
use super::trustline::TrustlineSnapshot;

/// Ledger-indexing API (read side)
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// 계정의 결제 내역 첫 페이지 조회
    async fn list_operations(&self, account_id: &str, query: &ListQuery)
    -> Result<Page, LedgerError>;

    /// 커서로 다음 페이지 조회
    async fn next_page(&self, cursor: &PageCursor) -> Result<Page, LedgerError>;

    /// 트랜잭션 상세(메모 포함) 조회
    async fn get_detail(&self, detail_ref: &str) -> Result<TransactionDetail, LedgerError>;

    /// 계정의 현재 trustline 상태 조회
    async fn get_account_sub_state(&self, account_id: &str)
    -> Result<TrustlineSnapshot, LedgerError>;
}

/// 로컬 결제 내역 저장소 (backfill / refresh 대상)
///
/// Records are keyed by operation id per account; writing a record twice
/// keeps one copy. The cursor is the paging token the next refresh resumes
/// after.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Returns how many records were new
    async fn upsert_payments(
        &self,
        account_id: &str,
        records: &[OperationRecord],
    ) -> Result<usize, LedgerError>;

    async fn cursor(&self, account_id: &str) -> Result<Option<String>, LedgerError>;

    async fn set_cursor(&self, account_id: &str, paging_token: &str) -> Result<(), LedgerError>;

    async fn oldest_created_at(&self, account_id: &str)
    -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// Stored records inside the inclusive window, newest first
    async fn payments_between(
        &self,
        account_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<OperationRecord>, LedgerError>;
}

/// Where the mutation engine gets its eligibility snapshot from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    type Snapshot: Send + Sync;

    async fn fetch_snapshot(&self) -> Result<Self::Snapshot, LedgerError>;
}

/// Eligibility rule evaluated against a snapshot
pub trait Eligibility<C> {
    fn is_eligible(&self, candidate: &C) -> bool;
}

/// Signing/submission layer: applies one chunk as a single ledger mutation
#[async_trait]
pub trait ChunkApplier<C>: Send + Sync
where
    C: Send + Sync,
{
    async fn apply_chunk(&self, members: &[C]) -> Result<ChunkReceipt, LedgerError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    /// e.g. the submitted transaction hash
    pub reference: Option<String>,
}
