//! Daily catch-up: checkpoint advancement and resume after failure

use crate::support::{at, date, FakePortal, TokioClock, Workspace};
use segment_data_downloader::downloader::{
    CatchUpOutcome, DownloadError, FailureKind, RetrievalCause,
};
use segment_data_downloader::output::OutputError;
use segment_data_downloader::portal::PortalError;
use segment_data_downloader::shutdown::ShutdownCoordinator;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_catch_up_stores_each_day_and_advances_checkpoint() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-06\n");
    let portal = Arc::new(FakePortal::new().ready_after(2));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(
        report.processed,
        vec![date(2024, 3, 7), date(2024, 3, 8), date(2024, 3, 9)]
    );
    assert_eq!(report.checkpoint, date(2024, 3, 9));
    assert_eq!(report.outcome, CatchUpOutcome::Completed);
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-09\n"));
    assert_eq!(
        ws.stored_files(),
        vec!["2024-03-07.csv", "2024-03-08.csv", "2024-03-09.csv"]
    );
    assert_eq!(
        portal.submitted_names(),
        vec!["2024-03-07", "2024-03-08", "2024-03-09"]
    );
    // One login for the whole pass
    assert_eq!(portal.auth_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_job_covers_one_day_with_configured_window() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-08\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    scheduler.daily_catch_up().await.unwrap();

    let jobs = portal.submissions();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.date_range.start(), date(2024, 3, 9));
    assert_eq!(job.date_range.end(), date(2024, 3, 9));
    assert_eq!(job.window, scheduler.config().window());
    assert_eq!(job.segments, vec!["1236893704", "1236893705"]);
}

#[tokio::test(start_paused = true)]
async fn test_stored_rows_are_sorted_by_segment_then_timestamp() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-08\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal, clock, ShutdownCoordinator::shared());

    scheduler.daily_catch_up().await.unwrap();

    let contents = ws.read_output("2024-03-09.csv");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec![
            "xd_id,measurement_tstamp,speed",
            "1236893704,2024-03-09 00:00:00,47",
            "1236893704,2024-03-09 00:15:00,48",
            "1236893705,2024-03-09 00:15:00,51",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_up_to_date_checkpoint_is_a_no_op() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-09\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(report.outcome, CatchUpOutcome::UpToDate);
    assert!(report.processed.is_empty());
    assert_eq!(portal.auth_calls(), 0);
    assert!(portal.submissions().is_empty());
    assert!(ws.stored_files().is_empty());
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-09\n"));
}

#[tokio::test(start_paused = true)]
async fn test_second_run_same_day_does_nothing() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-07\n");
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));

    let first = Arc::new(FakePortal::new());
    ws.scheduler(ws.config(), first.clone(), clock.clone(), ShutdownCoordinator::shared())
        .daily_catch_up()
        .await
        .unwrap();
    assert_eq!(first.submissions().len(), 2);

    let second = Arc::new(FakePortal::new());
    let report = ws
        .scheduler(ws.config(), second.clone(), clock, ShutdownCoordinator::shared())
        .daily_catch_up()
        .await
        .unwrap();
    assert_eq!(report.outcome, CatchUpOutcome::UpToDate);
    assert_eq!(second.auth_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_checkpoint_starts_at_history_start() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let config = ws
        .config_builder()
        .history_start(date(2024, 3, 8))
        .build()
        .unwrap();
    let scheduler = ws.scheduler(config, portal.clone(), clock, ShutdownCoordinator::shared());

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(report.processed, vec![date(2024, 3, 8), date(2024, 3, 9)]);
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-09\n"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_checkpoint_without_history_fetches_yesterday() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(report.processed, vec![date(2024, 3, 9)]);
    assert_eq!(ws.stored_files(), vec!["2024-03-09.csv"]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_leaves_checkpoint_at_previous_day() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-05\n");
    let portal = Arc::new(FakePortal::new().fail_job("2024-03-08"));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock.clone(), ShutdownCoordinator::shared());

    let err = scheduler.daily_catch_up().await.unwrap_err();

    assert!(matches!(err, DownloadError::JobFailed { ref job, .. } if job == "2024-03-08"));
    assert_eq!(err.kind(), FailureKind::JobFailed);
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-07\n"));
    assert_eq!(ws.stored_files(), vec!["2024-03-06.csv", "2024-03-07.csv"]);
    // Nothing after the failed date was attempted
    assert_eq!(
        portal.submitted_names(),
        vec!["2024-03-06", "2024-03-07", "2024-03-08"]
    );

    // The next run starts again at the failed date
    let retry = Arc::new(FakePortal::new());
    let report = ws
        .scheduler(ws.config(), retry.clone(), clock, ShutdownCoordinator::shared())
        .daily_catch_up()
        .await
        .unwrap();
    assert_eq!(report.processed, vec![date(2024, 3, 8), date(2024, 3, 9)]);
    assert_eq!(retry.submitted_names()[0], "2024-03-08");
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-09\n"));
}

#[tokio::test(start_paused = true)]
async fn test_download_failure_leaves_checkpoint_at_previous_day() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-06\n");
    let portal = Arc::new(FakePortal::new().fail_fetch("2024-03-08"));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock.clone(), ShutdownCoordinator::shared());

    let err = scheduler.daily_catch_up().await.unwrap_err();

    assert!(matches!(
        err,
        DownloadError::Retrieval {
            ref job,
            cause: RetrievalCause::Portal(PortalError::Transport(_)),
        } if job == "2024-03-08"
    ));
    assert_eq!(err.kind(), FailureKind::Retrieval);
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-07\n"));
    assert_eq!(ws.stored_files(), vec!["2024-03-07.csv"]);
    assert_eq!(portal.submitted_names(), vec!["2024-03-07", "2024-03-08"]);

    let retry = Arc::new(FakePortal::new());
    let report = ws
        .scheduler(ws.config(), retry.clone(), clock, ShutdownCoordinator::shared())
        .daily_catch_up()
        .await
        .unwrap();
    assert_eq!(report.processed, vec![date(2024, 3, 8), date(2024, 3, 9)]);
    assert_eq!(retry.submitted_names()[0], "2024-03-08");
    assert_eq!(
        ws.stored_files(),
        vec!["2024-03-07.csv", "2024-03-08.csv", "2024-03-09.csv"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unstorable_result_leaves_checkpoint_at_previous_day() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-07\n");
    let portal = Arc::new(FakePortal::new().unusable_payload("2024-03-08"));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let err = scheduler.daily_catch_up().await.unwrap_err();

    assert!(matches!(
        err,
        DownloadError::Retrieval {
            cause: RetrievalCause::Output(OutputError::MissingCsv(_)),
            ..
        }
    ));
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-07\n"));
    assert!(ws.stored_files().is_empty());
    assert_eq!(portal.submitted_names(), vec!["2024-03-08"]);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_checkpoint_resumes_at_its_date() {
    let ws = Workspace::new();
    // Older installs stored the next date to fetch, with a time part
    ws.write_checkpoint("2024-03-08 00:00:00\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(report.processed, vec![date(2024, 3, 8), date(2024, 3, 9)]);
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-09\n"));
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_submits_nothing() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-07\n");
    let portal = Arc::new(FakePortal::new().reject_login());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let err = scheduler.daily_catch_up().await.unwrap_err();

    assert!(err.is_auth_failure());
    assert!(portal.submissions().is_empty());
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-07\n"));
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_checkpoint_is_configuration_error() {
    let ws = Workspace::new();
    ws.write_checkpoint("not a date\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, ShutdownCoordinator::shared());

    let err = scheduler.daily_catch_up().await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Configuration);
    assert!(!err.is_retryable());
    assert_eq!(portal.auth_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_before_next_date() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-06\n");
    let portal = Arc::new(FakePortal::new());
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, shutdown);

    let report = scheduler.daily_catch_up().await.unwrap();

    assert_eq!(
        report.outcome,
        CatchUpOutcome::Interrupted {
            next: date(2024, 3, 7)
        }
    );
    assert!(report.processed.is_empty());
    assert!(portal.submissions().is_empty());
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-06\n"));
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_finishes_current_date() {
    let ws = Workspace::new();
    ws.write_checkpoint("2024-03-06\n");
    let portal = Arc::new(FakePortal::new().ready_after(3));
    let clock = TokioClock::starting_at(at(date(2024, 3, 10), 8, 0));
    let shutdown = ShutdownCoordinator::shared();
    let scheduler = ws.scheduler(ws.config(), portal.clone(), clock, shutdown.clone());

    // Request shutdown while the first job is still being polled
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
            shutdown.request_shutdown();
        })
    };
    let report = scheduler.daily_catch_up().await.unwrap();
    trigger.await.unwrap();

    assert_eq!(report.processed, vec![date(2024, 3, 7)]);
    assert_eq!(
        report.outcome,
        CatchUpOutcome::Interrupted {
            next: date(2024, 3, 8)
        }
    );
    assert_eq!(ws.read_checkpoint().as_deref(), Some("2024-03-07\n"));
}
