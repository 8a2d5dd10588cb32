//! Page walker: laziness, early exit, cancellation and order checks
mod common;

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use common::{InMemoryLedger, embedded, native_payment, ts};
use stm_ledger::application::PageWalker;
use stm_ledger::domain::ledger::{ListQuery, Order, Page};
use stm_ledger::domain::ports::LedgerApi;
use stm_ledger::infrastructure::BackoffPolicy;
use stm_ledger::LedgerError;

fn three_pages() -> InMemoryLedger {
    InMemoryLedger::new(vec![
        vec![native_payment("1", ts(10, 12), 1, embedded("a"))],
        vec![native_payment("2", ts(9, 12), 1, embedded("b"))],
        vec![native_payment("3", ts(8, 12), 1, embedded("c"))],
    ])
}

async fn first_page(ledger: &InMemoryLedger) -> Page {
    ledger
        .list_operations(common::ACCOUNT, &ListQuery::payments_desc(200))
        .await
        .unwrap()
}

#[tokio::test]
async fn walks_every_page_lazily() {
    let ledger = three_pages();
    let first = first_page(&ledger).await;
    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Desc,
        CancellationToken::new(),
        BackoffPolicy::default(),
        |_: &Page| true,
    );

    let mut ids = Vec::new();
    while let Some(page) = walker.next_page().await.unwrap() {
        // nothing is fetched ahead of the consumer
        assert_eq!(ledger.page_calls.load(Ordering::SeqCst), ids.len());
        ids.extend(page.records.iter().map(|r| r.id.clone()));
    }

    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(walker.pages_yielded(), 3);
    assert!(walker.next_page().await.unwrap().is_none());
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn predicate_stops_before_the_next_fetch() {
    let ledger = three_pages();
    let first = first_page(&ledger).await;
    let mut seen = 0;
    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Desc,
        CancellationToken::new(),
        BackoffPolicy::default(),
        |_: &Page| {
            seen += 1;
            seen < 2
        },
    );

    assert!(walker.next_page().await.unwrap().is_some());
    assert!(walker.next_page().await.unwrap().is_some());
    assert!(walker.next_page().await.unwrap().is_none());
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_page_ends_the_walk_even_with_a_cursor() {
    let ledger = InMemoryLedger::new(vec![vec![], vec![native_payment("1", ts(1, 1), 1, embedded("x"))]]);
    let first = first_page(&ledger).await;
    assert!(first.has_next());

    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Desc,
        CancellationToken::new(),
        BackoffPolicy::default(),
        |_: &Page| true,
    );
    assert!(walker.next_page().await.unwrap().unwrap().is_empty());
    assert!(walker.next_page().await.unwrap().is_none());
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_is_checked_before_fetching() {
    let ledger = three_pages();
    let first = first_page(&ledger).await;
    let cancel = CancellationToken::new();
    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Desc,
        cancel.clone(),
        BackoffPolicy::default(),
        |_: &Page| true,
    );

    assert!(walker.next_page().await.unwrap().is_some());
    cancel.cancel();
    assert!(matches!(walker.next_page().await, Err(LedgerError::Aborted)));
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ascending_walk_rejects_a_step_back_in_time() {
    let ledger = InMemoryLedger::new(vec![
        vec![
            native_payment("1", ts(1, 1), 1, embedded("a")),
            native_payment("2", ts(2, 1), 1, embedded("b")),
        ],
        vec![native_payment("3", ts(1, 12), 1, embedded("c"))],
    ]);
    let first = first_page(&ledger).await;
    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Asc,
        CancellationToken::new(),
        BackoffPolicy::default(),
        |_: &Page| true,
    );

    assert!(walker.next_page().await.unwrap().is_some());
    let error = walker.next_page().await.unwrap_err();
    match error {
        LedgerError::PageOrder { detail } => assert!(detail.contains("record 3")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_page_failures_are_retried() {
    let ledger = three_pages().fail_pages_with(vec![LedgerError::http(429, "Too Many Requests")]);
    let first = first_page(&ledger).await;
    let mut walker = PageWalker::new(
        &ledger,
        first,
        Order::Desc,
        CancellationToken::new(),
        BackoffPolicy::default(),
        |_: &Page| true,
    );

    let mut pages = 0;
    while walker.next_page().await.unwrap().is_some() {
        pages += 1;
    }
    assert_eq!(pages, 3);
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 3);
}
