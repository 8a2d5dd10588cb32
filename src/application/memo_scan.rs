//! 메모 기반 입금 합계 스캔
//!
//! Walks an account's payment history newest-first and sums the incoming
//! native amount of every operation whose transaction memo contains a query
//! string, optionally limited to a date window. Memos the listing did not
//! embed are resolved through [`DetailResolver`]. Progress and ETA are pushed
//! through a [`ProgressSink`] while the scan runs.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use super::detail_resolver::{DetailCache, DetailResolver, Resolved};
use super::eta::{EtaEstimate, estimate};
use super::page_walker::PageWalker;
use crate::domain::errors::{LedgerError, ValidationError};
use crate::domain::events::{ProgressSink, ScanPhase, ScanProgress};
use crate::domain::ledger::{ListQuery, Order, OperationRecord, Page, memo_contains};
use crate::domain::ports::LedgerApi;
use crate::domain::strkey;
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};
use crate::infrastructure::config::{AppConfig, defaults};

/// Which end of the window a date-only input describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    From,
    To,
}

/// Parses a user date: `YYYY-MM-DD` expands to the start (`From`) or last
/// second (`To`) of that UTC day, RFC 3339 is used as is, and a zone-less
/// `YYYY-MM-DDTHH:MM:SS` is read as UTC. Blank input means "no bound".
pub fn normalize_date_bound(
    value: &str,
    bound: DateBound,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = match bound {
            DateBound::From => NaiveTime::MIN,
            DateBound::To => NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
        };
        return Ok(Some(day.and_time(time).and_utc()));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Some(naive.and_utc()));
    }
    Err(ValidationError::InvalidDate(value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub account_id: String,
    pub memo_query: String,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    pub page_size: u32,
}

impl ScanRequest {
    pub fn new(account_id: impl Into<String>, memo_query: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            memo_query: memo_query.into(),
            from: None,
            to: None,
            page_size: defaults::PAGE_SIZE,
        }
    }

    #[must_use]
    pub const fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builds a request from raw form input, normalising both date bounds
    pub fn from_user_input(
        account_id: &str,
        memo_query: &str,
        from: &str,
        to: &str,
    ) -> Result<Self, ValidationError> {
        let request = Self::new(account_id.trim(), memo_query).with_range(
            normalize_date_bound(from, DateBound::From)?,
            normalize_date_bound(to, DateBound::To)?,
        );
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !strkey::is_valid_account_id(&self.account_id) {
            return Err(ValidationError::InvalidAccountId(self.account_id.clone()));
        }
        if self.memo_query.is_empty() {
            return Err(ValidationError::EmptyMemoQuery);
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ValidationError::DateRange { from, to });
            }
        }
        Ok(())
    }

    pub fn in_range(&self, ts: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub total: Decimal,
    pub matches: u64,
    pub pages: u32,
    pub ops_total: u64,
    /// Newest matching payment
    pub first_match_at: Option<DateTime<Utc>>,
    pub oldest_match_in_range_at: Option<DateTime<Utc>>,
    pub detail_fetches: usize,
    pub elapsed_ms: u64,
}

/// Running totals of one scan call
struct ScanState {
    started: Instant,
    total: Decimal,
    pages_done: u32,
    items_on_page: u64,
    ops_total: u64,
    matches: u64,
    first_match_at: Option<DateTime<Utc>>,
    oldest_match_at: Option<DateTime<Utc>>,
    detail_fetches: usize,
}

impl ScanState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            total: Decimal::ZERO,
            pages_done: 0,
            items_on_page: 0,
            ops_total: 0,
            matches: 0,
            first_match_at: None,
            oldest_match_at: None,
            detail_fetches: 0,
        }
    }

    fn record_match(&mut self, amount: Decimal, at: DateTime<Utc>) {
        self.total += amount;
        self.matches += 1;
        self.first_match_at = Some(self.first_match_at.map_or(at, |ts| ts.max(at)));
        self.oldest_match_at = Some(self.oldest_match_at.map_or(at, |ts| ts.min(at)));
    }

    fn eta(&self) -> EtaEstimate {
        estimate(self.pages_done, self.started.elapsed())
    }

    fn event(&self, phase: ScanPhase, oldest_on_page: Option<DateTime<Utc>>) -> ScanProgress {
        let EtaEstimate { progress, eta_ms } = match phase {
            ScanPhase::Finalize => EtaEstimate::DONE,
            ScanPhase::Aborted => EtaEstimate {
                eta_ms: 0,
                ..self.eta()
            },
            _ => self.eta(),
        };
        // page number being worked on; completed count once the page is done
        let page = match phase {
            ScanPhase::Scan | ScanPhase::TxFetch => self.pages_done + 1,
            _ => self.pages_done,
        };
        ScanProgress {
            phase,
            page,
            items_processed: self.items_on_page,
            ops_total: self.ops_total,
            matches: self.matches,
            oldest_on_page,
            first_match_at: self.first_match_at,
            oldest_match_in_range_at: self.oldest_match_at,
            progress,
            eta_ms,
        }
    }

    fn summary(&self, scan_id: Uuid) -> ScanSummary {
        ScanSummary {
            scan_id,
            total: self.total,
            matches: self.matches,
            pages: self.pages_done,
            ops_total: self.ops_total,
            first_match_at: self.first_match_at,
            oldest_match_in_range_at: self.oldest_match_at,
            detail_fetches: self.detail_fetches,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// A positive candidate whose memo has to be looked up
struct Deferred<'p> {
    record: &'p OperationRecord,
    amount: Decimal,
}

pub struct MemoScanner<'a, A: ?Sized> {
    api: &'a A,
    backoff: BackoffPolicy,
    detail_concurrency: usize,
    progress_every: u64,
}

impl<'a, A> MemoScanner<'a, A>
where
    A: LedgerApi + ?Sized,
{
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            backoff: BackoffPolicy::default(),
            detail_concurrency: defaults::DETAIL_CONCURRENCY,
            progress_every: defaults::PROGRESS_EVERY,
        }
    }

    pub fn from_config(api: &'a A, config: &AppConfig) -> Self {
        Self::new(api)
            .with_backoff(config.backoff)
            .with_detail_concurrency(config.scan.detail_concurrency)
            .with_progress_every(config.scan.progress_every)
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_detail_concurrency(mut self, workers: usize) -> Self {
        self.detail_concurrency = workers;
        self
    }

    #[must_use]
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    /// Runs one scan. Cancellation yields [`LedgerError::Aborted`] and the
    /// partial totals are discarded.
    pub async fn scan(
        &self,
        request: &ScanRequest,
        progress: &ProgressSink<ScanProgress>,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, LedgerError> {
        let scan_id = Uuid::new_v4();
        let span = info_span!("memo_scan", %scan_id, account = %request.account_id);

        async {
            let mut state = ScanState::new();
            match self.run(request, &mut state, progress, cancel).await {
                Ok(()) => {
                    progress.emit(state.event(ScanPhase::Finalize, None));
                    info!(
                        "✅ Scan finished: {} matches, total {} over {} pages ({} ops)",
                        state.matches, state.total, state.pages_done, state.ops_total
                    );
                    Ok(state.summary(scan_id))
                }
                Err(LedgerError::Aborted) => {
                    progress.emit(state.event(ScanPhase::Aborted, None));
                    info!("🛑 Scan aborted after {} pages", state.pages_done);
                    Err(LedgerError::Aborted)
                }
                Err(error) => {
                    debug!("❌ Scan failed: {}", error);
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &ScanRequest,
        state: &mut ScanState,
        progress: &ProgressSink<ScanProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Aborted);
        }

        let api = self.api;
        let query = ListQuery::payments_desc(request.page_size);
        let account_id = request.account_id.as_str();
        let first_page = Backoff::new(self.backoff)
            .with_cancel(cancel)
            .label("payments listing")
            .run(|| api.list_operations(account_id, &query))
            .await?;
        info!("🚀 Scan started (page size {}, memo {:?})", query.limit, request.memo_query);

        let lower_bound = request.from;
        let mut walker = PageWalker::new(
            api,
            first_page,
            Order::Desc,
            cancel.clone(),
            self.backoff,
            move |page: &Page| match (lower_bound, page.oldest_created_at()) {
                (Some(from), Some(oldest)) => oldest >= from,
                _ => true,
            },
        );
        let cache = DetailCache::new();
        let resolver = DetailResolver::new(api, self.backoff, self.detail_concurrency);

        while let Some(page) = walker.next_page().await? {
            self.process_page(&page, request, state, &cache, &resolver, progress, cancel)
                .await?;
        }
        Ok(())
    }

    async fn process_page(
        &self,
        page: &Page,
        request: &ScanRequest,
        state: &mut ScanState,
        cache: &DetailCache,
        resolver: &DetailResolver<'_, A>,
        progress: &ProgressSink<ScanProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        let oldest_on_page = page.oldest_created_at();
        let mut deferred = Vec::new();
        state.items_on_page = 0;

        for record in &page.records {
            if cancel.is_cancelled() {
                return Err(LedgerError::Aborted);
            }
            state.items_on_page += 1;
            state.ops_total += 1;

            if request.in_range(record.created_at) {
                let amount = record.kind.incoming_native_amount(&request.account_id);
                if amount > Decimal::ZERO {
                    match record.memo.matches(&request.memo_query) {
                        Some(true) => state.record_match(amount, record.created_at),
                        Some(false) => {}
                        None => deferred.push(Deferred { record, amount }),
                    }
                }
            }

            if state.items_on_page % self.progress_every == 0 {
                progress.emit(state.event(ScanPhase::Scan, oldest_on_page));
            }
        }

        if !deferred.is_empty() {
            let every = self.progress_every;
            let query = request.memo_query.as_str();
            // matches land as their details arrive so TxFetch ticks are current
            let live = Mutex::new((&mut *state, HashSet::new()));
            let stats = resolver
                .resolve_missing(
                    deferred.iter().map(|d| d.record.detail_ref.clone()),
                    cache,
                    cancel,
                    |resolved: Resolved<'_>| {
                        let mut guard = live.lock().unwrap_or_else(PoisonError::into_inner);
                        let (state, reported) = &mut *guard;
                        reported.insert(resolved.detail_ref.to_string());
                        let memo = resolved.detail.and_then(|detail| detail.memo.as_deref());
                        if memo_contains(memo, query) {
                            for candidate in deferred
                                .iter()
                                .filter(|d| d.record.detail_ref == resolved.detail_ref)
                            {
                                state.record_match(candidate.amount, candidate.record.created_at);
                            }
                        }
                        if resolved.done as u64 % every == 0 {
                            progress.emit(state.event(ScanPhase::TxFetch, oldest_on_page));
                        }
                    },
                )
                .await?;
            let (state, reported) = live.into_inner().unwrap_or_else(PoisonError::into_inner);
            state.detail_fetches += stats.fetched;

            // details an earlier page already cached
            for candidate in deferred
                .iter()
                .filter(|d| !reported.contains(&d.record.detail_ref))
            {
                let memo = cache.memo_of(&candidate.record.detail_ref).await;
                if memo_contains(memo.as_deref(), query) {
                    state.record_match(candidate.amount, candidate.record.created_at);
                }
            }
        }

        state.pages_done += 1;
        debug!(
            "📄 Page {} done: {} records, {} matches so far",
            state.pages_done,
            page.records.len(),
            state.matches
        );
        progress.emit(state.event(ScanPhase::PageDone, oldest_on_page));
        Ok(())
    }
}
