//! Single-shot runs over an explicit date range

use crate::support::{at, date, FakePortal, TokioClock, Workspace};
use segment_data_downloader::downloader::{DownloadError, FailureKind};
use segment_data_downloader::shutdown::ShutdownCoordinator;
use segment_data_downloader::DateRange;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_single_shot_stores_under_sanitized_label() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new().ready_after(2));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());
    let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();

    let stored = scheduler.single_shot(range, "January study").await.unwrap();

    assert_eq!(stored.rows, 3);
    assert_eq!(stored.path, ws.output_dir().join("January_study.csv"));
    assert_eq!(ws.stored_files(), vec!["January_study.csv"]);

    let jobs = portal.submissions();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "January_study");
    assert_eq!(jobs[0].date_range, range);
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_leaves_checkpoint_alone() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-02-01\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal, clock, ShutdownCoordinator::shared());
    let range = DateRange::new(date(2024, 2, 10), date(2024, 2, 12)).unwrap();

    scheduler.single_shot(range, "feb-window").await.unwrap();

    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-02-01\n"));
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_without_checkpoint_creates_none() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal, clock, ShutdownCoordinator::shared());

    scheduler
        .single_shot(DateRange::single(date(2024, 3, 1)), "one-day")
        .await
        .unwrap();

    assert!(ws.read_checkpoint().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_rejects_unusable_label() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let err = scheduler
        .single_shot(DateRange::single(date(2024, 3, 1)), "///")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Configuration);
    assert_eq!(portal.auth_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_failure_is_reported() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new().fail_job("bad-range"));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal, clock, ShutdownCoordinator::shared());

    let err = scheduler
        .single_shot(DateRange::single(date(2024, 3, 1)), "bad-range")
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::JobFailed { .. }));
    assert!(ws.stored_files().is_empty());
}
