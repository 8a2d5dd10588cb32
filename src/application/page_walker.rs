//! 페이지 워커 - cursor 기반 페이지 순회
//!
//! Lazy, forward-only walk over a paginated listing. The caller fetches the
//! first page (it needs the query); the walker follows `next` cursors from
//! there, one page per [`PageWalker::next_page`] call.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::errors::LedgerError;
use crate::domain::ledger::{Order, Page, PageCursor};
use crate::domain::ports::LedgerApi;
use crate::infrastructure::backoff::{Backoff, BackoffPolicy};

enum WalkState {
    Initial(Page),
    Follow(PageCursor),
    Done,
}

pub struct PageWalker<'a, A: ?Sized, P> {
    api: &'a A,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    order: Order,
    should_continue: P,
    state: WalkState,
    last_seen: Option<DateTime<Utc>>,
    pages_yielded: u32,
}

impl<'a, A, P> PageWalker<'a, A, P>
where
    A: LedgerApi + ?Sized,
    P: FnMut(&Page) -> bool,
{
    /// `should_continue` sees every page before the page after it is requested
    pub fn new(
        api: &'a A,
        first_page: Page,
        order: Order,
        cancel: CancellationToken,
        policy: BackoffPolicy,
        should_continue: P,
    ) -> Self {
        Self {
            api,
            policy,
            cancel,
            order,
            should_continue,
            state: WalkState::Initial(first_page),
            last_seen: None,
            pages_yielded: 0,
        }
    }

    pub const fn pages_yielded(&self) -> u32 {
        self.pages_yielded
    }

    /// `Ok(None)` once the listing is exhausted or the predicate said stop
    pub async fn next_page(&mut self) -> Result<Option<Page>, LedgerError> {
        let page = match std::mem::replace(&mut self.state, WalkState::Done) {
            WalkState::Initial(page) => page,
            WalkState::Follow(cursor) => {
                if self.cancel.is_cancelled() {
                    return Err(LedgerError::Aborted);
                }
                let page = self.fetch(&cursor).await?;
                if self.cancel.is_cancelled() {
                    return Err(LedgerError::Aborted);
                }
                page
            }
            WalkState::Done => {
                if self.cancel.is_cancelled() {
                    return Err(LedgerError::Aborted);
                }
                return Ok(None);
            }
        };

        self.check_order(&page)?;
        self.pages_yielded += 1;

        let keep_going = (self.should_continue)(&page);
        self.state = match (&page.next, keep_going, page.is_empty()) {
            (Some(cursor), true, false) => WalkState::Follow(cursor.clone()),
            _ => {
                debug!(
                    "📄 Walk ends after page {} (continue: {}, empty: {})",
                    self.pages_yielded,
                    keep_going,
                    page.is_empty()
                );
                WalkState::Done
            }
        };
        Ok(Some(page))
    }

    async fn fetch(&self, cursor: &PageCursor) -> Result<Page, LedgerError> {
        let api = self.api;
        let label = format!("page {}", self.pages_yielded + 1);
        Backoff::new(self.policy)
            .with_cancel(&self.cancel)
            .label(&label)
            .run(|| api.next_page(cursor))
            .await
    }

    fn check_order(&mut self, page: &Page) -> Result<(), LedgerError> {
        for record in &page.records {
            if let Some(previous) = self.last_seen {
                let in_order = match self.order {
                    Order::Desc => record.created_at <= previous,
                    Order::Asc => record.created_at >= previous,
                };
                if !in_order {
                    return Err(LedgerError::PageOrder {
                        detail: format!(
                            "record {} at {} follows {} in {} order",
                            record.id,
                            record.created_at.to_rfc3339(),
                            previous.to_rfc3339(),
                            self.order.as_str()
                        ),
                    });
                }
            }
            self.last_seen = Some(record.created_at);
        }
        Ok(())
    }
}
