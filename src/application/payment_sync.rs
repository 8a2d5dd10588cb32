//! 결제 내역 동기화 - backfill / 증분 refresh
//!
//! Keeps a local [`PaymentStore`] copy of an account's payment history.
//! Backfill walks newest-first down to a `since` bound; refresh resumes in
//! ascending order after the stored cursor and moves the cursor forward.
//! Both reuse the page walker and the backoff controller. A cancelled sync
//! keeps the pages it already stored, and rerunning it is harmless because the
//! store deduplicates by operation id.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use super::memo_scan::ScanRequest;
use super::page_walker::PageWalker;
use crate::domain::errors::{LedgerError, ValidationError};
use crate::domain::events::{ProgressSink, SyncKind, SyncPhase, SyncProgress};
use crate::domain::ledger::{ListQuery, OperationRecord, Order, Page};
use crate::domain::ports::{LedgerApi, PaymentStore};
use crate::domain::strkey;
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};
use crate::infrastructure::config::{AppConfig, defaults};

const BACKFILL_BASE: f64 = 0.05;
const REFRESH_BASE: f64 = 0.1;
const PER_PAGE_STEP: f64 = 0.08;
const MAX_PAGE_SHARE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub kind: SyncKind,
    pub pages: u32,
    /// Records that were new to the store
    pub stored: usize,
    /// Refresh cursor after the run
    pub cursor: Option<String>,
}

/// Memo total computed from the local store only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTotal {
    pub total: Decimal,
    pub matches: u64,
    pub scanned: u64,
}

/// Lower bound a coverage check fills down to: the older of the requested
/// start and `now - prefetch_days`
pub fn coverage_target(
    required_from: Option<DateTime<Utc>>,
    prefetch_days: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let prefetch = now - Duration::days(i64::from(prefetch_days));
    required_from.map_or(prefetch, |from| from.min(prefetch))
}

fn page_progress(base: f64, pages: u32) -> f64 {
    base + (f64::from(pages) * PER_PAGE_STEP).min(MAX_PAGE_SHARE)
}

pub struct PaymentSync<'a, A: ?Sized, S: ?Sized> {
    api: &'a A,
    store: &'a S,
    backoff: BackoffPolicy,
    page_size: u32,
}

impl<'a, A, S> PaymentSync<'a, A, S>
where
    A: LedgerApi + ?Sized,
    S: PaymentStore + ?Sized,
{
    pub fn new(api: &'a A, store: &'a S) -> Self {
        Self {
            api,
            store,
            backoff: BackoffPolicy::default(),
            page_size: defaults::PAGE_SIZE,
        }
    }

    pub fn from_config(api: &'a A, store: &'a S, config: &AppConfig) -> Self {
        Self::new(api, store)
            .with_backoff(config.backoff)
            .with_page_size(config.sync.page_size)
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Points the refresh cursor at the newest payment when none is stored yet
    pub async fn init_cursor_if_missing(
        &self,
        account_id: &str,
    ) -> Result<Option<String>, LedgerError> {
        if let Some(cursor) = self.store.cursor(account_id).await? {
            if !cursor.trim().is_empty() {
                return Ok(Some(cursor));
            }
        }

        let newest = self.first_page(account_id, &ListQuery::payments_desc(1)).await?;
        let latest = newest
            .records
            .first()
            .map(|record| record.paging_token().to_string());
        if let Some(token) = &latest {
            self.store.set_cursor(account_id, token).await?;
            info!("📌 Refresh cursor initialised at {}", token);
        }
        Ok(latest)
    }

    /// Stores history newest-first until a page reaches past `since`; records
    /// older than `since` are not stored
    pub async fn backfill(
        &self,
        account_id: &str,
        since: Option<DateTime<Utc>>,
        progress: &ProgressSink<SyncProgress>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, LedgerError> {
        let sync_id = Uuid::new_v4();
        let span = info_span!("payment_backfill", %sync_id, account = %account_id);
        self.run_backfill(account_id, since, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run_backfill(
        &self,
        account_id: &str,
        since: Option<DateTime<Utc>>,
        progress: &ProgressSink<SyncProgress>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, LedgerError> {
        check_account(account_id)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Aborted);
        }
        let mut report = SyncReport {
            kind: SyncKind::Backfill,
            pages: 0,
            stored: 0,
            cursor: None,
        };
        progress.emit(sync_event(&report, SyncPhase::Start, None, 0.0));

        let first = self
            .first_page(account_id, &ListQuery::payments_desc(self.page_size))
            .await?;
        let mut walker = PageWalker::new(
            self.api,
            first,
            Order::Desc,
            cancel.clone(),
            self.backoff,
            move |page: &Page| match (since, page.oldest_created_at()) {
                (Some(since), Some(oldest)) => oldest >= since,
                _ => true,
            },
        );

        while let Some(page) = walker.next_page().await? {
            if page.is_empty() {
                continue;
            }
            let wanted: Vec<OperationRecord> = page
                .records
                .iter()
                .filter(|record| since.is_none_or(|since| record.created_at >= since))
                .cloned()
                .collect();
            if !wanted.is_empty() {
                report.stored += self.store.upsert_payments(account_id, &wanted).await?;
            }
            report.pages += 1;

            let newest = page.records.first().map(|record| record.created_at);
            let ratio = page_progress(BACKFILL_BASE, report.pages);
            progress.emit(sync_event(&report, SyncPhase::Page, newest, ratio));
        }

        report.cursor = self.store.cursor(account_id).await?;
        progress.emit(sync_event(&report, SyncPhase::Done, None, 1.0));
        info!("✅ Backfill done: {} pages, {} new payments", report.pages, report.stored);
        Ok(report)
    }

    /// Fetches everything after the stored cursor (ascending) and advances
    /// the cursor. Without a cursor it only initialises one.
    pub async fn refresh(
        &self,
        account_id: &str,
        progress: &ProgressSink<SyncProgress>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, LedgerError> {
        let sync_id = Uuid::new_v4();
        let span = info_span!("payment_refresh", %sync_id, account = %account_id);
        self.run_refresh(account_id, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run_refresh(
        &self,
        account_id: &str,
        progress: &ProgressSink<SyncProgress>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, LedgerError> {
        check_account(account_id)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Aborted);
        }
        let mut report = SyncReport {
            kind: SyncKind::Refresh,
            pages: 0,
            stored: 0,
            cursor: None,
        };
        progress.emit(sync_event(&report, SyncPhase::Start, None, 0.0));

        let stored_cursor = self
            .store
            .cursor(account_id)
            .await?
            .filter(|cursor| !cursor.trim().is_empty());
        let Some(cursor) = stored_cursor else {
            report.cursor = self.init_cursor_if_missing(account_id).await?;
            progress.emit(sync_event(&report, SyncPhase::Done, None, 1.0));
            return Ok(report);
        };

        let query = ListQuery::payments(Order::Asc, self.page_size).after(cursor.as_str());
        let first = self.first_page(account_id, &query).await?;
        let mut walker = PageWalker::new(
            self.api,
            first,
            Order::Asc,
            cancel.clone(),
            self.backoff,
            |_: &Page| true,
        );

        let mut last_token = None;
        while let Some(page) = walker.next_page().await? {
            let Some(last) = page.records.last() else {
                continue;
            };
            last_token = Some(last.paging_token().to_string());
            report.stored += self.store.upsert_payments(account_id, &page.records).await?;
            report.pages += 1;

            let oldest = page.records.first().map(|record| record.created_at);
            let ratio = page_progress(REFRESH_BASE, report.pages);
            progress.emit(sync_event(&report, SyncPhase::Page, oldest, ratio));
        }

        if let Some(token) = &last_token {
            self.store.set_cursor(account_id, token).await?;
        }
        report.cursor = last_token.or(Some(cursor));
        progress.emit(sync_event(&report, SyncPhase::Done, None, 1.0));
        info!("✅ Refresh done: {} pages, {} new payments", report.pages, report.stored);
        Ok(report)
    }

    /// Backfills only when the store does not reach back to `target_since`;
    /// returns whether it did
    pub async fn ensure_coverage(
        &self,
        account_id: &str,
        target_since: DateTime<Utc>,
        progress: &ProgressSink<SyncProgress>,
        cancel: &CancellationToken,
    ) -> Result<bool, LedgerError> {
        let oldest = self.store.oldest_created_at(account_id).await?;
        if oldest.is_some_and(|oldest| oldest <= target_since) {
            info!("📚 Local history already covers {}", target_since.to_rfc3339());
            return Ok(false);
        }
        self.backfill(account_id, Some(target_since), progress, cancel)
            .await?;
        Ok(true)
    }

    /// Memo total over stored payments only, no ledger calls
    pub async fn cached_total(&self, request: &ScanRequest) -> Result<CachedTotal, LedgerError> {
        request.validate()?;
        let records = self
            .store
            .payments_between(&request.account_id, request.from, request.to)
            .await?;

        let mut result = CachedTotal {
            total: Decimal::ZERO,
            matches: 0,
            scanned: 0,
        };
        for record in &records {
            result.scanned += 1;
            let amount = record.kind.incoming_native_amount(&request.account_id);
            if amount > Decimal::ZERO && record.memo.matches(&request.memo_query) == Some(true) {
                result.total += amount;
                result.matches += 1;
            }
        }
        Ok(result)
    }

    async fn first_page(&self, account_id: &str, query: &ListQuery) -> Result<Page, LedgerError> {
        let api = self.api;
        Backoff::new(self.backoff)
            .label("payments listing")
            .run(|| api.list_operations(account_id, query))
            .await
    }
}

fn check_account(account_id: &str) -> Result<(), ValidationError> {
    if strkey::is_valid_account_id(account_id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAccountId(account_id.to_string()))
    }
}

fn sync_event(
    report: &SyncReport,
    phase: SyncPhase,
    edge_at: Option<DateTime<Utc>>,
    progress: f64,
) -> SyncProgress {
    SyncProgress {
        kind: report.kind,
        phase,
        page: report.pages,
        stored: report.stored,
        edge_at,
        progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn coverage_target_takes_the_older_bound() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let prefetch = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
        assert_eq!(coverage_target(None, 30, now), prefetch);

        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(coverage_target(Some(older), 30, now), older);

        let newer = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        assert_eq!(coverage_target(Some(newer), 30, now), prefetch);
    }

    #[test]
    fn page_progress_is_capped() {
        assert!((page_progress(BACKFILL_BASE, 1) - 0.13).abs() < 1e-12);
        assert!((page_progress(REFRESH_BASE, 100) - 1.0).abs() < 1e-12);
    }
}
