//! End-to-end memo scans over the in-memory ledger
mod common;

use std::sync::atomic::Ordering;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use common::{
    ACCOUNT, InMemoryLedger, OTHER, credit_payment, drain, embedded, native_payment, record, ts,
};
use stm_ledger::domain::events::{ProgressSink, ScanPhase, ScanProgress};
use stm_ledger::domain::ledger::{MemoState, OperationKind};
use stm_ledger::{ErrorClass, LedgerError, MemoScanner, ScanRequest, ValidationError};

/// Three pages of two records; matches are 5 (embedded memo) and 7 (memo
/// only in the transaction detail)
fn scenario_a() -> InMemoryLedger {
    InMemoryLedger::new(vec![
        vec![
            native_payment("1", ts(10, 12), 5, embedded("order-X-1")),
            native_payment("2", ts(10, 8), 3, embedded("unrelated")),
        ],
        vec![
            native_payment("3", ts(9, 12), 7, MemoState::Missing),
            credit_payment("4", ts(8, 12), 11, embedded("X")),
        ],
        vec![
            record(
                "5",
                ts(7, 12),
                "tx-5",
                embedded("X"),
                OperationKind::CreateAccount {
                    account: OTHER.to_string(),
                    starting_balance: Decimal::new(100, 0),
                },
            ),
            native_payment("6", ts(6, 12), 2, MemoState::Embedded(None)),
        ],
    ])
    .with_detail("tx-3", Some("invoice X/7"))
}

fn request() -> ScanRequest {
    ScanRequest::new(ACCOUNT, "X")
}

#[tokio::test]
async fn scenario_a_sums_matching_native_payments() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);

    let summary = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total, Decimal::new(12, 0));
    assert_eq!(summary.matches, 2);
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.ops_total, 6);
    assert_eq!(summary.first_match_at, Some(ts(10, 12)));
    assert_eq!(summary.oldest_match_in_range_at, Some(ts(9, 12)));
    assert_eq!(summary.detail_fetches, 1);
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_scans_are_identical() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let cancel = CancellationToken::new();

    let first = scanner.scan(&request(), &ProgressSink::disabled(), &cancel).await.unwrap();
    let second = scanner.scan(&request(), &ProgressSink::disabled(), &cancel).await.unwrap();

    assert_eq!(first.total, second.total);
    assert_eq!(first.matches, second.matches);
    assert_eq!(first.first_match_at, second.first_match_at);
    assert_eq!(first.oldest_match_in_range_at, second.oldest_match_in_range_at);
    assert_ne!(first.scan_id, second.scan_id);
    // the detail cache belongs to one scan, so the second scan fetches again
    assert_eq!(ledger.detail_calls_for("tx-3"), 2);
}

#[tokio::test]
async fn inverted_range_fails_without_network_calls() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let request = request().with_range(Some(ts(9, 0)), Some(ts(8, 0)));

    let error = scanner
        .scan(&request, &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        LedgerError::Validation(ValidationError::DateRange { .. })
    ));
    assert_eq!(error.class(), ErrorClass::Validation);
    assert_eq!(ledger.total_calls(), 0);
}

#[tokio::test]
async fn invalid_account_and_empty_memo_are_rejected_up_front() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let cancel = CancellationToken::new();

    let bad_account = ScanRequest::new("GNOTAKEY", "X");
    assert!(matches!(
        scanner.scan(&bad_account, &ProgressSink::disabled(), &cancel).await,
        Err(LedgerError::Validation(ValidationError::InvalidAccountId(_)))
    ));

    let empty_memo = ScanRequest::new(ACCOUNT, "");
    assert!(matches!(
        scanner.scan(&empty_memo, &ProgressSink::disabled(), &cancel).await,
        Err(LedgerError::Validation(ValidationError::EmptyMemoQuery))
    ));
    assert_eq!(ledger.total_calls(), 0);
}

#[tokio::test]
async fn stops_after_page_older_than_lower_bound() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    // page 1 holds day 9 and day 8; day 8 predates the bound
    let request = request().with_range(Some(ts(8, 18)), None);

    let summary = scanner
        .scan(&request, &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages, 2);
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.total, Decimal::new(12, 0));
}

#[tokio::test]
async fn first_page_older_than_bound_fetches_nothing_more() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let request = request().with_range(Some(ts(10, 10)), None);

    let summary = scanner
        .scan(&request, &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages, 1);
    assert_eq!(summary.total, Decimal::new(5, 0));
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upper_bound_excludes_newer_records() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let request = request().with_range(None, Some(ts(10, 0)));

    let summary = scanner
        .scan(&request, &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total, Decimal::new(7, 0));
    assert_eq!(summary.first_match_at, Some(ts(9, 12)));
    // out-of-range records still count as processed
    assert_eq!(summary.ops_total, 6);
}

#[tokio::test]
async fn each_transaction_is_fetched_once_per_scan() {
    let shared = |id: &str, day: u32| {
        record(
            id,
            ts(day, 12),
            "tx-shared",
            MemoState::Missing,
            OperationKind::Payment {
                to: ACCOUNT.to_string(),
                asset: stm_ledger::domain::ledger::AssetKind::Native,
                amount: Decimal::new(1, 0),
            },
        )
    };
    let ledger = InMemoryLedger::new(vec![
        vec![shared("1", 20), shared("2", 19), shared("3", 18)],
        vec![shared("4", 17), native_payment("5", ts(16, 12), 4, MemoState::Missing)],
    ])
    .with_detail("tx-shared", Some("batch X"));
    let scanner = MemoScanner::new(&ledger).with_detail_concurrency(6);

    let summary = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ledger.detail_calls_for("tx-shared"), 1);
    // tx-5 has no detail: looked up once, cached as a miss
    assert_eq!(ledger.detail_calls_for("tx-5"), 1);
    assert_eq!(summary.total, Decimal::new(4, 0));
    assert_eq!(summary.matches, 4);
}

#[tokio::test]
async fn cancellation_mid_walk_aborts_without_completion_event() {
    let cancel = CancellationToken::new();
    let ledger = scenario_a().cancel_when_page_requested(1, cancel.clone());
    let scanner = MemoScanner::new(&ledger);
    let (progress, mut rx) = ProgressSink::channel(256);

    let error = scanner.scan(&request(), &progress, &cancel).await.unwrap_err();
    assert!(matches!(error, LedgerError::Aborted));
    assert_eq!(error.class(), ErrorClass::Aborted);

    let events: Vec<ScanProgress> = drain(&mut rx);
    let last = events.last().unwrap();
    assert_eq!(last.phase, ScanPhase::Aborted);
    assert!(last.progress < 1.0);
    assert!(
        !events
            .iter()
            .any(|e| e.phase != ScanPhase::Aborted && (e.progress - 1.0).abs() < f64::EPSILON)
    );
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn already_cancelled_scan_makes_no_calls() {
    let ledger = scenario_a();
    let scanner = MemoScanner::new(&ledger);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = scanner.scan(&request(), &ProgressSink::disabled(), &cancel).await;
    assert!(matches!(result, Err(LedgerError::Aborted)));
    assert_eq!(ledger.total_calls(), 0);
}

#[tokio::test]
async fn progress_events_follow_the_scan() {
    let records: Vec<_> = (0..25u32)
        .map(|i| native_payment(&format!("r{i}"), ts(28, 0) - chrono::Duration::minutes(i64::from(i)), 1, embedded("X")))
        .collect();
    let ledger = InMemoryLedger::new(vec![records]);
    let scanner = MemoScanner::new(&ledger);
    let (progress, mut rx) = ProgressSink::channel(256);

    let summary = scanner
        .scan(&request(), &progress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total, Decimal::new(25, 0));

    let events = drain(&mut rx);
    let phases: Vec<ScanPhase> = events.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![ScanPhase::Scan, ScanPhase::Scan, ScanPhase::PageDone, ScanPhase::Finalize]
    );
    assert_eq!(events[0].items_processed, 10);
    assert_eq!(events[1].items_processed, 20);
    assert_eq!(events[2].page, 1);
    assert!(events[2].progress < 1.0);

    let last = events.last().unwrap();
    assert!((last.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(last.eta_ms, 0);
    assert_eq!(last.matches, 25);
}

#[tokio::test]
async fn tx_fetch_ticks_carry_matches_as_details_arrive() {
    let ledger = InMemoryLedger::new(vec![vec![
        native_payment("1", ts(20, 12), 1, MemoState::Missing),
        native_payment("2", ts(20, 11), 2, MemoState::Missing),
        native_payment("3", ts(20, 10), 3, MemoState::Missing),
        native_payment("4", ts(20, 9), 4, MemoState::Missing),
    ]])
    .with_detail("tx-1", Some("X-1"))
    .with_detail("tx-2", Some("nope"))
    .with_detail("tx-3", Some("X-3"))
    .with_detail("tx-4", Some("X-4"));
    let scanner = MemoScanner::new(&ledger).with_progress_every(1);
    let (progress, mut rx) = ProgressSink::channel(256);

    let summary = scanner
        .scan(&request(), &progress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.matches, 3);
    assert_eq!(summary.total, Decimal::new(8, 0));

    let fetch_ticks: Vec<ScanProgress> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.phase == ScanPhase::TxFetch)
        .collect();
    assert_eq!(fetch_ticks.len(), 4);
    let counts: Vec<u64> = fetch_ticks.iter().map(|e| e.matches).collect();
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(counts.last(), Some(&3));
    assert!(fetch_ticks.last().unwrap().first_match_at.is_some());
}

#[tokio::test]
async fn out_of_order_pages_are_reported() {
    let ledger = InMemoryLedger::new(vec![
        vec![native_payment("1", ts(10, 12), 5, embedded("X"))],
        vec![native_payment("2", ts(11, 12), 7, embedded("X"))],
    ]);
    let scanner = MemoScanner::new(&ledger);

    let error = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, LedgerError::PageOrder { .. }));
    assert!(matches!(error.class(), ErrorClass::Protocol { .. }));
}

#[tokio::test(start_paused = true)]
async fn transient_listing_failures_are_retried() {
    let ledger = scenario_a().fail_list_with(vec![
        LedgerError::http(504, "Gateway Timeout"),
        LedgerError::network("connection reset"),
    ]);
    let scanner = MemoScanner::new(&ledger);

    let summary = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total, Decimal::new(12, 0));
    assert_eq!(ledger.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn unknown_account_surfaces_not_found() {
    let ledger = scenario_a().fail_list_with(vec![LedgerError::http(404, "Resource Missing")]);
    let scanner = MemoScanner::new(&ledger);

    let error = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::NotFound);
    assert_eq!(ledger.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn trailing_empty_page_ends_the_walk() {
    let ledger = scenario_a().with_trailing_cursor();
    let scanner = MemoScanner::new(&ledger);

    let summary = scanner
        .scan(&request(), &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total, Decimal::new(12, 0));
    // the empty fourth page is fetched and counted, nothing after it
    assert_eq!(summary.pages, 4);
    assert_eq!(ledger.page_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn user_input_dates_are_normalised() {
    let request = ScanRequest::from_user_input(&format!(" {ACCOUNT} "), "X", "2024-05-09", "2024-05-09").unwrap();
    assert_eq!(request.from, Some(ts(9, 0)));
    assert_eq!(request.to, Some(ts(9, 23) + chrono::Duration::seconds(59 * 60 + 59)));

    let ledger = scenario_a();
    let summary = MemoScanner::new(&ledger)
        .scan(&request, &ProgressSink::disabled(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total, Decimal::new(7, 0));
}
