//! Shared fixtures: in-memory ledger, record builders, scripted snapshots and
//! a recording chunk applier
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use stm_ledger::domain::ledger::{
    AssetKind, ListQuery, MemoState, OperationKind, OperationRecord, Page, PageCursor,
    TransactionDetail,
};
use stm_ledger::domain::ports::{ChunkApplier, ChunkReceipt, LedgerApi, SnapshotSource};
use stm_ledger::domain::trustline::{AccountSummary, Trustline, TrustlineKey, TrustlineSnapshot};
use stm_ledger::LedgerError;

pub const ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";
pub const OTHER: &str = "GABAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEJXA";
pub const ISSUER: &str = "GAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQDZ7H";

// ---------------------------------------------------------------------------
// records

/// 2024-05-`day` `hour`:00:00 UTC
pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

pub fn embedded(memo: &str) -> MemoState {
    MemoState::Embedded(Some(memo.to_string()))
}

pub fn record(id: &str, at: DateTime<Utc>, detail_ref: &str, memo: MemoState, kind: OperationKind) -> OperationRecord {
    OperationRecord {
        id: id.to_string(),
        created_at: at,
        detail_ref: detail_ref.to_string(),
        memo,
        kind,
    }
}

/// Native payment of `amount` XLM to [`ACCOUNT`], transaction hash `tx-<id>`
pub fn native_payment(id: &str, at: DateTime<Utc>, amount: i64, memo: MemoState) -> OperationRecord {
    record(
        id,
        at,
        &format!("tx-{id}"),
        memo,
        OperationKind::Payment {
            to: ACCOUNT.to_string(),
            asset: AssetKind::Native,
            amount: Decimal::new(amount, 0),
        },
    )
}

pub fn credit_payment(id: &str, at: DateTime<Utc>, amount: i64, memo: MemoState) -> OperationRecord {
    record(
        id,
        at,
        &format!("tx-{id}"),
        memo,
        OperationKind::Payment {
            to: ACCOUNT.to_string(),
            asset: AssetKind::Credit {
                code: "USDC".to_string(),
                issuer: ISSUER.to_string(),
            },
            amount: Decimal::new(amount, 0),
        },
    )
}

// ---------------------------------------------------------------------------
// ledger

/// Pages are linked through cursors `page-1`, `page-2`, ...
pub struct InMemoryLedger {
    pages: Vec<Page>,
    details: HashMap<String, TransactionDetail>,
    snapshot: TrustlineSnapshot,
    list_failures: Mutex<VecDeque<LedgerError>>,
    page_failures: Mutex<VecDeque<LedgerError>>,
    cancel_on_page: Option<(usize, CancellationToken)>,
    last_query: Mutex<Option<ListQuery>>,
    pub list_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    detail_calls: Mutex<HashMap<String, usize>>,
}

impl InMemoryLedger {
    pub fn new(pages: Vec<Vec<OperationRecord>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, records)| {
                let next = (i + 1 < count).then(|| PageCursor(format!("page-{}", i + 1)));
                Page::new(records, next)
            })
            .collect();

        Self {
            pages,
            details: HashMap::new(),
            snapshot: TrustlineSnapshot::default(),
            list_failures: Mutex::new(VecDeque::new()),
            page_failures: Mutex::new(VecDeque::new()),
            cancel_on_page: None,
            last_query: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
            detail_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Last page keeps a cursor anyway (Horizon hands out `next` on the last page too)
    #[must_use]
    pub fn with_trailing_cursor(mut self) -> Self {
        let index = self.pages.len();
        if let Some(last) = self.pages.last_mut() {
            last.next = Some(PageCursor(format!("page-{index}")));
        }
        self
    }

    #[must_use]
    pub fn with_detail(mut self, hash: &str, memo: Option<&str>) -> Self {
        self.details.insert(
            hash.to_string(),
            TransactionDetail {
                hash: hash.to_string(),
                memo: memo.map(str::to_string),
                memo_type: memo.map(|_| "text".to_string()),
                created_at: None,
            },
        );
        self
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: TrustlineSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    #[must_use]
    pub fn fail_list_with(self, errors: Vec<LedgerError>) -> Self {
        self.list_failures.lock().unwrap().extend(errors);
        self
    }

    #[must_use]
    pub fn fail_pages_with(self, errors: Vec<LedgerError>) -> Self {
        self.page_failures.lock().unwrap().extend(errors);
        self
    }

    /// Fires `token` while serving the request for page `index`
    #[must_use]
    pub fn cancel_when_page_requested(mut self, index: usize, token: CancellationToken) -> Self {
        self.cancel_on_page = Some((index, token));
        self
    }

    pub fn last_query(&self) -> Option<ListQuery> {
        self.last_query.lock().unwrap().clone()
    }

    pub fn detail_calls_for(&self, hash: &str) -> usize {
        self.detail_calls.lock().unwrap().get(hash).copied().unwrap_or(0)
    }

    pub fn total_detail_calls(&self) -> usize {
        self.detail_calls.lock().unwrap().values().sum()
    }

    pub fn total_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.page_calls.load(Ordering::SeqCst)
            + self.snapshot_calls.load(Ordering::SeqCst)
            + self.total_detail_calls()
    }
}

#[async_trait]
impl LedgerApi for InMemoryLedger {
    async fn list_operations(&self, _account_id: &str, query: &ListQuery) -> Result<Page, LedgerError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        if let Some(error) = self.list_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.pages.first().cloned().unwrap_or_default())
    }

    async fn next_page(&self, cursor: &PageCursor) -> Result<Page, LedgerError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = cursor
            .as_str()
            .trim_start_matches("page-")
            .parse()
            .map_err(|_| LedgerError::Decode(format!("unknown cursor {}", cursor.as_str())))?;

        if let Some((cancel_at, token)) = &self.cancel_on_page {
            if *cancel_at == index {
                token.cancel();
            }
        }
        if let Some(error) = self.page_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn get_detail(&self, detail_ref: &str) -> Result<TransactionDetail, LedgerError> {
        *self
            .detail_calls
            .lock()
            .unwrap()
            .entry(detail_ref.to_string())
            .or_default() += 1;
        // let sibling workers interleave
        tokio::task::yield_now().await;
        self.details
            .get(detail_ref)
            .cloned()
            .ok_or_else(|| LedgerError::http(404, "Resource Missing"))
    }

    async fn get_account_sub_state(&self, _account_id: &str) -> Result<TrustlineSnapshot, LedgerError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }
}

// ---------------------------------------------------------------------------
// trustlines

pub fn key(code: &str) -> TrustlineKey {
    TrustlineKey::new(code, ISSUER)
}

/// `count` keys named `T000`, `T001`, ...
pub fn keys(count: usize) -> Vec<TrustlineKey> {
    (0..count).map(|i| key(&format!("T{i:03}"))).collect()
}

pub fn trustline(key: &TrustlineKey, balance: i64) -> Trustline {
    Trustline {
        asset_code: key.asset_code.clone(),
        asset_issuer: key.asset_issuer.clone(),
        asset_type: "credit_alphanum4".to_string(),
        balance: Decimal::new(balance, 7),
        limit: Decimal::new(1_000_000, 0),
        buying_liabilities: Decimal::ZERO,
        selling_liabilities: Decimal::ZERO,
        is_authorized: true,
    }
}

/// Snapshot holding every key with zero balance, except `funded` (balance 1)
pub fn snapshot_of(keys: &[TrustlineKey], funded: &[TrustlineKey]) -> TrustlineSnapshot {
    let trustlines: Vec<Trustline> = keys
        .iter()
        .map(|k| trustline(k, i64::from(funded.contains(k))))
        .collect();
    TrustlineSnapshot {
        account_id: ACCOUNT.to_string(),
        summary: AccountSummary {
            native_balance: Decimal::new(10, 0),
            trustline_count: trustlines.len(),
            sequence: "1".to_string(),
        },
        trustlines,
    }
}

/// Hands out snapshots in order, repeating the last one when the script runs
/// out; single calls can be made to fail
pub struct ScriptedSnapshots {
    script: Mutex<VecDeque<TrustlineSnapshot>>,
    last: Mutex<Option<TrustlineSnapshot>>,
    failures: Mutex<HashMap<usize, LedgerError>>,
    pub calls: AtomicUsize,
}

impl ScriptedSnapshots {
    pub fn new(script: Vec<TrustlineSnapshot>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Call number `call` (0-based) fails with `error` without consuming the script
    #[must_use]
    pub fn failing_on(self, call: usize, error: LedgerError) -> Self {
        self.failures.lock().unwrap().insert(call, error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshots {
    type Snapshot = TrustlineSnapshot;

    async fn fetch_snapshot(&self) -> Result<TrustlineSnapshot, LedgerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().get(&call).cloned() {
            return Err(error);
        }
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snapshot) = next {
            *last = Some(snapshot);
        }
        last.clone().ok_or_else(|| LedgerError::http(404, "no snapshot scripted"))
    }
}

/// Records every submitted chunk; can fail a given call or cancel a token
#[derive(Default)]
pub struct RecordingApplier {
    pub submitted: Mutex<Vec<Vec<TrustlineKey>>>,
    failures: Mutex<HashMap<usize, LedgerError>>,
    cancel_after_first: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call number `call` (0-based) fails with `error`
    #[must_use]
    pub fn failing_on(self, call: usize, error: LedgerError) -> Self {
        self.failures.lock().unwrap().insert(call, error);
        self
    }

    #[must_use]
    pub fn cancelling_after_first(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Vec<TrustlineKey>> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkApplier<TrustlineKey> for RecordingApplier {
    async fn apply_chunk(&self, members: &[TrustlineKey]) -> Result<ChunkReceipt, LedgerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().get(&call).cloned() {
            return Err(error);
        }
        self.submitted.lock().unwrap().push(members.to_vec());
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        Ok(ChunkReceipt {
            reference: Some(format!("submission-{call}")),
        })
    }
}

/// Drains everything currently buffered in a progress receiver
pub fn drain<E>(rx: &mut tokio::sync::mpsc::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
