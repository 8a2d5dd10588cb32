//! 청크 단위 trustline 제거 엔진
//!
//! Splits a candidate list into chunks of at most 100, re-checks eligibility
//! against a periodically refreshed account snapshot and hands every
//! non-empty eligible set to the signing/submission layer. A failed chunk
//! (snapshot refresh or submission) is recorded and the run moves on; chunks
//! already applied stay applied and are reported even when the run is
//! cancelled.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::domain::errors::{ErrorClass, LedgerError, classify};
use crate::domain::events::{MutationPhase, MutationProgress, ProgressSink};
use crate::domain::ports::{ChunkApplier, ChunkReceipt, Eligibility, LedgerApi, SnapshotSource};
use crate::domain::trustline::{TrustlineKey, TrustlineSnapshot};
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};
use crate::infrastructure::config::{AppConfig, MutationConfig, defaults};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChunk<C> {
    pub index: usize,
    pub members: Vec<C>,
    pub receipt: ChunkReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure<C> {
    pub index: usize,
    pub members: Vec<C>,
    pub class: ErrorClass,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    Succeeded,
    /// Some candidates were skipped as ineligible or sat in a failed chunk
    PartiallySucceeded,
    /// Cancelled; candidates after the last reported chunk were not touched
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome<C> {
    pub applied_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub applied: Vec<AppliedChunk<C>>,
    pub failures: Vec<ChunkFailure<C>>,
    pub aborted: bool,
}

impl<C> Default for MutationOutcome<C> {
    fn default() -> Self {
        Self {
            applied_count: 0,
            skipped_count: 0,
            failed_count: 0,
            applied: Vec::new(),
            failures: Vec::new(),
            aborted: false,
        }
    }
}

impl<C> MutationOutcome<C> {
    pub const fn status(&self) -> MutationStatus {
        if self.aborted {
            MutationStatus::Aborted
        } else if self.skipped_count == 0 && self.failed_count == 0 {
            MutationStatus::Succeeded
        } else {
            MutationStatus::PartiallySucceeded
        }
    }

    /// Every applied member in submission order
    pub fn applied_members(&self) -> impl Iterator<Item = &C> {
        self.applied.iter().flat_map(|chunk| chunk.members.iter())
    }

    fn record_failure(&mut self, index: usize, members: Vec<C>, error: &LedgerError) {
        self.failed_count += members.len();
        self.failures.push(ChunkFailure {
            index,
            members,
            class: classify(error),
            message: error.to_string(),
        });
    }
}

/// Live trustline set of one account, read through the ledger API
pub struct LiveTrustlines<'a, L: ?Sized> {
    api: &'a L,
    account_id: String,
}

impl<'a, L: LedgerApi + ?Sized> LiveTrustlines<'a, L> {
    pub fn new(api: &'a L, account_id: impl Into<String>) -> Self {
        Self {
            api,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl<L: LedgerApi + ?Sized> SnapshotSource for LiveTrustlines<'_, L> {
    type Snapshot = TrustlineSnapshot;

    async fn fetch_snapshot(&self) -> Result<TrustlineSnapshot, LedgerError> {
        self.api.get_account_sub_state(&self.account_id).await
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedMutationEngine {
    config: MutationConfig,
    backoff: BackoffPolicy,
}

impl Default for ChunkedMutationEngine {
    fn default() -> Self {
        Self::new(MutationConfig::default(), BackoffPolicy::default())
    }
}

impl ChunkedMutationEngine {
    pub const fn new(config: MutationConfig, backoff: BackoffPolicy) -> Self {
        Self { config, backoff }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.mutation.clone(), config.backoff)
    }

    /// 1..=100
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size.clamp(1, defaults::CHUNK_SIZE)
    }

    /// Snapshot refresh cadence; `revalidate_every = 0` only fetches for chunk 0
    pub const fn should_revalidate(&self, index: usize) -> bool {
        let every = self.config.revalidate_every;
        index == 0 || (every > 0 && index % every == 0)
    }

    /// Cancellation still returns `Ok` with `aborted` set, so the caller
    /// learns which chunks reached the ledger. `NothingEligible` when the list
    /// is empty or every chunk was skipped.
    pub async fn mutate_in_chunks<C, S, X>(
        &self,
        candidates: &[C],
        source: &S,
        applier: &X,
        progress: &ProgressSink<MutationProgress>,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome<C>, LedgerError>
    where
        C: Clone + Debug + Send + Sync,
        S: SnapshotSource + ?Sized,
        S::Snapshot: Eligibility<C>,
        X: ChunkApplier<C> + ?Sized,
    {
        if candidates.is_empty() {
            return Err(LedgerError::NothingEligible);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("chunked_mutation", %run_id, candidates = candidates.len());
        self.run(candidates, source, applier, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run<C, S, X>(
        &self,
        candidates: &[C],
        source: &S,
        applier: &X,
        progress: &ProgressSink<MutationProgress>,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome<C>, LedgerError>
    where
        C: Clone + Debug + Send + Sync,
        S: SnapshotSource + ?Sized,
        S::Snapshot: Eligibility<C>,
        X: ChunkApplier<C> + ?Sized,
    {
        let total = candidates.len();
        let chunk_size = self.chunk_size();
        info!(
            "🚀 Mutating {} candidates in chunks of {} (revalidate every {})",
            total, chunk_size, self.config.revalidate_every
        );

        let mut outcome = MutationOutcome::default();
        let mut snapshot: Option<S::Snapshot> = None;
        let mut processed = 0usize;

        for (index, chunk) in candidates.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                info!("🛑 Mutation aborted before chunk {}", index);
                outcome.aborted = true;
                break;
            }

            if self.should_revalidate(index) {
                snapshot = None;
            }
            let current = match snapshot {
                Some(ref existing) => existing,
                None => {
                    debug!("🔄 Refreshing eligibility snapshot for chunk {}", index);
                    let fetched = Backoff::new(self.backoff)
                        .with_cancel(cancel)
                        .label("account snapshot")
                        .run(|| source.fetch_snapshot())
                        .await;
                    match fetched {
                        Ok(fresh) => &*snapshot.insert(fresh),
                        Err(LedgerError::Aborted) => {
                            info!("🛑 Mutation aborted while refreshing snapshot for chunk {}", index);
                            outcome.aborted = true;
                            break;
                        }
                        Err(error) => {
                            // next chunk retries the refresh
                            warn!("❌ Chunk {} failed, snapshot unavailable: {}", index, error);
                            outcome.record_failure(index, chunk.to_vec(), &error);
                            processed += chunk.len();
                            progress.emit(MutationProgress {
                                phase: MutationPhase::ChunkFailed,
                                processed,
                                total,
                            });
                            continue;
                        }
                    }
                }
            };

            let (eligible, stale): (Vec<C>, Vec<C>) =
                chunk.iter().cloned().partition(|candidate| current.is_eligible(candidate));
            outcome.skipped_count += stale.len();
            if !stale.is_empty() {
                debug!("⏭️ Chunk {}: {} candidates no longer eligible", index, stale.len());
            }

            let phase = if eligible.is_empty() {
                MutationPhase::ChunkSkip
            } else {
                let members = eligible.as_slice();
                let result = Backoff::new(self.backoff)
                    .with_cancel(cancel)
                    .label("chunk submission")
                    .run(|| applier.apply_chunk(members))
                    .await;

                match result {
                    Ok(receipt) => {
                        info!("✅ Chunk {} applied ({} members)", index, eligible.len());
                        outcome.applied_count += eligible.len();
                        outcome.applied.push(AppliedChunk {
                            index,
                            members: eligible,
                            receipt,
                        });
                        MutationPhase::ChunkDone
                    }
                    Err(LedgerError::Aborted) => {
                        info!("🛑 Mutation aborted while submitting chunk {}", index);
                        outcome.aborted = true;
                        break;
                    }
                    Err(error) => {
                        warn!("❌ Chunk {} failed: {}", index, error);
                        outcome.record_failure(index, eligible, &error);
                        MutationPhase::ChunkFailed
                    }
                }
            };

            processed += chunk.len();
            progress.emit(MutationProgress {
                phase,
                processed,
                total,
            });
        }

        if outcome.aborted {
            info!(
                "🛑 Mutation aborted: applied {}, skipped {}, failed {} of {}",
                outcome.applied_count, outcome.skipped_count, outcome.failed_count, total
            );
            return Ok(outcome);
        }
        if outcome.applied.is_empty() && outcome.failures.is_empty() {
            info!("⏭️ No candidate was eligible, nothing submitted");
            return Err(LedgerError::NothingEligible);
        }

        info!(
            "🏁 Mutation finished: applied {}, skipped {}, failed {}",
            outcome.applied_count, outcome.skipped_count, outcome.failed_count
        );
        Ok(outcome)
    }

    /// Removes trustlines from `account_id`, revalidating against the live
    /// account state
    pub async fn remove_trustlines<L, X>(
        &self,
        api: &L,
        account_id: &str,
        keys: &[TrustlineKey],
        applier: &X,
        progress: &ProgressSink<MutationProgress>,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome<TrustlineKey>, LedgerError>
    where
        L: LedgerApi + ?Sized,
        X: ChunkApplier<TrustlineKey> + ?Sized,
    {
        let source = LiveTrustlines::new(api, account_id);
        self.mutate_in_chunks(keys, &source, applier, progress, cancel)
            .await
    }
}
