//! 트랜잭션 상세 조회 워커 풀
//!
//! Resolves memos the listing did not embed. A fixed set of worker futures
//! drains one shared queue of transaction hashes; every key is fetched at most
//! once per scan and failures are cached as `None` so they are not retried by
//! a later page.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::LedgerError;
use crate::domain::ledger::TransactionDetail;
use crate::domain::ports::LedgerApi;
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};
use crate::infrastructure::config::defaults::{MAX_DETAIL_CONCURRENCY, MIN_DETAIL_CONCURRENCY};

/// Per-scan cache: `None` marks "lookup failed / not found"
#[derive(Debug, Default)]
pub struct DetailCache {
    entries: Mutex<HashMap<String, Option<TransactionDetail>>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, detail_ref: &str) -> bool {
        self.entries.lock().await.contains_key(detail_ref)
    }

    /// `None` = never looked up, `Some(None)` = looked up and failed
    pub async fn get(&self, detail_ref: &str) -> Option<Option<TransactionDetail>> {
        self.entries.lock().await.get(detail_ref).cloned()
    }

    /// Memo of a resolved detail, `None` when absent or unresolved
    pub async fn memo_of(&self, detail_ref: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(detail_ref)
            .and_then(|entry| entry.as_ref())
            .and_then(|detail| detail.memo.clone())
    }

    /// First write wins
    async fn insert(&self, detail_ref: String, value: Option<TransactionDetail>) {
        self.entries.lock().await.entry(detail_ref).or_insert(value);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// One finished lookup, as seen by the `on_fetched` observer
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'r> {
    pub detail_ref: &'r str,
    /// `None` when the lookup failed
    pub detail: Option<&'r TransactionDetail>,
    /// Lookups completed so far in this call, this one included
    pub done: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
}

pub struct DetailResolver<'a, A: ?Sized> {
    api: &'a A,
    policy: BackoffPolicy,
    concurrency: usize,
}

impl<'a, A> DetailResolver<'a, A>
where
    A: LedgerApi + ?Sized,
{
    /// `concurrency` is clamped to 2..=6
    pub fn new(api: &'a A, policy: BackoffPolicy, concurrency: usize) -> Self {
        Self {
            api,
            policy,
            concurrency: concurrency.clamp(MIN_DETAIL_CONCURRENCY, MAX_DETAIL_CONCURRENCY),
        }
    }

    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every ref not yet in `cache`. `on_fetched` sees every completed
    /// lookup (success or failure) before it lands in the cache; refs that
    /// were already cached are not reported.
    pub async fn resolve_missing<F>(
        &self,
        refs: impl IntoIterator<Item = String>,
        cache: &DetailCache,
        cancel: &CancellationToken,
        on_fetched: F,
    ) -> Result<ResolveStats, LedgerError>
    where
        F: Fn(Resolved<'_>) + Sync,
    {
        let mut seen = HashSet::new();
        let mut pending = VecDeque::new();
        for detail_ref in refs {
            if seen.insert(detail_ref.clone()) && !cache.contains(&detail_ref).await {
                pending.push_back(detail_ref);
            }
        }

        let requested = pending.len();
        if requested == 0 {
            return Ok(ResolveStats::default());
        }

        let workers = self.concurrency.min(requested);
        debug!("🔍 Resolving {} transaction details with {} workers", requested, workers);

        let queue = Mutex::new(pending);
        let done = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let worker_futures = (0..workers).map(|worker_id| {
            let queue = &queue;
            let done = &done;
            let failed = &failed;
            let on_fetched = &on_fetched;
            async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!("🛑 Detail worker {} stopping on cancellation", worker_id);
                        break;
                    }
                    let Some(detail_ref) = queue.lock().await.pop_front() else {
                        break;
                    };

                    let detail = match self.fetch(&detail_ref, cancel).await {
                        Ok(detail) => Some(detail),
                        Err(LedgerError::Aborted) => break,
                        Err(error) => {
                            warn!("⚠️ Transaction {} unavailable: {}", detail_ref, error);
                            failed.fetch_add(1, Ordering::Relaxed);
                            None
                        }
                    };
                    let count = done.fetch_add(1, Ordering::Relaxed) + 1;
                    on_fetched(Resolved {
                        detail_ref: &detail_ref,
                        detail: detail.as_ref(),
                        done: count,
                    });
                    cache.insert(detail_ref, detail).await;
                }
            }
        });
        join_all(worker_futures).await;

        if cancel.is_cancelled() {
            return Err(LedgerError::Aborted);
        }

        let fetched = done.load(Ordering::Relaxed);
        Ok(ResolveStats {
            requested,
            fetched,
            failed: failed.load(Ordering::Relaxed),
        })
    }

    async fn fetch(
        &self,
        detail_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<TransactionDetail, LedgerError> {
        let api = self.api;
        Backoff::new(self.policy)
            .with_cancel(cancel)
            .label("transaction detail")
            .run(|| api.get_detail(detail_ref))
            .await
    }
}
