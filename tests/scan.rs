mod common;

use std::time::Duration;

use common::{filter, range, MockChain};
use futures::StreamExt;
use neda_scanner::config::ScannerConfig;
use neda_scanner::{
    FailedRange, FetchError, LogScanner, ScanError, ScanOptions,
};
use tokio::time::Instant;

fn scanner(chain: MockChain) -> LogScanner<MockChain> {
    LogScanner::new(chain, ScannerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn chunks_cover_the_range_once() {
    let scanner = scanner(MockChain::with_logs_at((0..2_000).step_by(7)));

    let report = scanner.scan(&filter(), 3, 1_234).await.unwrap();

    let calls = scanner.fetcher().calls();
    assert_eq!(
        calls,
        vec![range(3, 502), range(503, 1_002), range(1_003, 1_234)]
    );
    for pair in calls.windows(2) {
        assert_eq!(pair[0].end() + 1, pair[1].start());
    }

    assert!(report.is_complete());
    assert_eq!(report.logs, scanner.fetcher().logs_in(3, 1_234));
}

#[tokio::test(start_paused = true)]
async fn rescanning_is_idempotent() {
    let scanner = scanner(MockChain::with_logs_at((0..3_000).step_by(13)));
    let options = ScanOptions {
        chunk_width: Some(333),
        ..Default::default()
    };

    let first = scanner
        .scan_with(&filter(), 0, 2_999, &options)
        .await
        .unwrap();
    let second = scanner
        .scan_with(&filter(), 0, 2_999, &options)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(!first.logs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off() {
    let chain = MockChain::with_logs_at(100..=200).failing_when(|r, attempt| {
        (r == range(100, 200) && attempt <= 2)
            .then(|| FetchError::transient("Request timeout"))
    });
    let scanner = scanner(chain);
    let options = ScanOptions {
        base_delay: Some(Duration::from_millis(250)),
        ..Default::default()
    };

    let start = Instant::now();
    let report = scanner
        .scan_with(&filter(), 100, 200, &options)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.logs, scanner.fetcher().logs_in(100, 200));
    assert_eq!(scanner.fetcher().calls(), vec![range(100, 200); 3]);
    assert_eq!(start.elapsed(), Duration::from_millis(250 + 2 * 250));
}

#[tokio::test(start_paused = true)]
async fn wide_failures_are_bisected() {
    let chain = MockChain::with_logs_at(0..1_000).failing_when(|r, _| {
        (r.block_count() >= 100)
            .then(|| FetchError::persistent("block range is too wide"))
    });
    let scanner = scanner(chain);
    let options = ScanOptions {
        chunk_width: Some(500),
        max_retries: Some(3),
        ..Default::default()
    };

    let report = scanner
        .scan_with(&filter(), 100, 600, &options)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.logs, scanner.fetcher().logs_in(100, 600));

    // The queries that succeeded tile the range left to right
    let succeeded: Vec<_> = scanner
        .fetcher()
        .calls()
        .into_iter()
        .filter(|r| r.block_count() < 100)
        .collect();
    assert_eq!(succeeded.first().unwrap().start(), 100);
    assert_eq!(succeeded.last().unwrap().end(), 600);
    for pair in succeeded.windows(2) {
        assert_eq!(pair[0].end() + 1, pair[1].start());
    }
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_is_skipped_and_recorded() {
    let chain = MockChain::with_logs_at(0..300).failing_when(|r, _| {
        r.overlaps(&range(100, 150))
            .then(|| FetchError::transient("timeout"))
    });
    let scanner = scanner(chain);
    let options = ScanOptions {
        chunk_width: Some(51),
        ..Default::default()
    };

    let report = scanner
        .scan_with(&filter(), 49, 252, &options)
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(
        report.failed,
        vec![FailedRange {
            range: range(100, 150),
            error: "timeout".to_string(),
        }]
    );
    assert_eq!(report.missing_blocks(), 51);

    let mut expected = scanner.fetcher().logs_in(49, 99);
    expected.extend(scanner.fetcher().logs_in(151, 252));
    assert_eq!(report.logs, expected);

    // One attempt plus three retries, the range is too narrow to split
    let attempts = scanner
        .fetcher()
        .calls()
        .into_iter()
        .filter(|r| *r == range(100, 150))
        .count();
    assert_eq!(attempts, 4);
}

#[tokio::test(start_paused = true)]
async fn reversed_range_is_rejected_without_queries() {
    let scanner = scanner(MockChain::with_logs_at(0..1_000));

    let result = scanner.scan(&filter(), 500, 100).await;

    assert_eq!(result, Err(ScanError::InvalidRange { from: 500, to: 100 }));
    assert!(scanner.fetcher().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_chunk_width_is_rejected_without_queries() {
    let scanner = scanner(MockChain::with_logs_at(0..1_000));
    let options = ScanOptions {
        chunk_width: Some(0),
        ..Default::default()
    };

    let result = scanner.scan_with(&filter(), 0, 100, &options).await;

    assert_eq!(result, Err(ScanError::ZeroChunkWidth));
    assert!(scanner.fetcher().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn boundary_duplicates_are_removed() {
    let chain = MockChain::with_logs_at((10..=100).step_by(10)).overlapping();
    let scanner = scanner(chain);
    let options = ScanOptions {
        chunk_width: Some(10),
        ..Default::default()
    };

    let report = scanner
        .scan_with(&filter(), 1, 100, &options)
        .await
        .unwrap();

    assert_eq!(report.logs, scanner.fetcher().logs_in(1, 100));
}

#[tokio::test(start_paused = true)]
async fn chunk_stream_pauses_between_chunks() {
    let scanner = scanner(MockChain::with_logs_at(0..1_000));

    let start = Instant::now();
    let outcomes: Vec<_> = scanner
        .chunk_stream(&filter(), range(0, 1_999))
        .unwrap()
        .collect()
        .await;

    let ranges: Vec<_> = outcomes.iter().map(|o| o.range).collect();
    assert_eq!(
        ranges,
        vec![
            range(0, 499),
            range(500, 999),
            range(1_000, 1_499),
            range(1_500, 1_999)
        ]
    );
    assert!(outcomes.iter().all(|o| o.is_complete()));
    assert!(outcomes[2].logs.is_empty());

    // Three pauses of the default 100ms between four chunks
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}
