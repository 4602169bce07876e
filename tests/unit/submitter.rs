//! Submission policies

use crate::support::{at, date, segments, time, FakePortal, Workspace};
use segment_data_downloader::downloader::{
    DownloadError, JobRequest, JobStatus, JobSubmitter, ManualClock, SubmissionCause,
};
use segment_data_downloader::portal::Session;
use segment_data_downloader::{DateRange, TimeWindow};
use std::sync::Arc;

fn submitter(portal: Arc<FakePortal>) -> JobSubmitter {
    let clock = ManualClock::new(at(date(2024, 3, 10), 14, 20));
    JobSubmitter::new(portal, Arc::new(clock))
}

fn session() -> Session {
    Session::new("analyst@example.com")
}

fn is_malformed(err: &DownloadError) -> bool {
    matches!(
        err,
        DownloadError::Submission {
            cause: SubmissionCause::Malformed(_),
            ..
        }
    )
}

#[tokio::test]
async fn test_catch_up_through_yesterday_is_submitted() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let request = JobRequest::for_date(&ws.config(), &segments(), date(2024, 3, 9));

    let job = submitter(portal.clone())
        .submit(&session(), request)
        .await
        .unwrap();

    assert_eq!(job.name(), "2024-03-09");
    assert_eq!(job.status(), JobStatus::Submitted);
    assert_eq!(job.handle().as_str(), "2024-03-09");
    assert_eq!(portal.submissions().len(), 1);
}

#[tokio::test]
async fn test_catch_up_for_today_is_refused() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let request = JobRequest::for_date(&ws.config(), &segments(), date(2024, 3, 10));

    let err = submitter(portal.clone())
        .submit(&session(), request)
        .await
        .unwrap_err();

    assert!(is_malformed(&err));
    assert!(portal.submissions().is_empty());
}

#[tokio::test]
async fn test_refresh_must_cover_only_today() {
    let ws = Workspace::new();
    let config = ws.config();
    let window = TimeWindow::new(time(0, 0), time(14, 15)).unwrap();
    let portal = Arc::new(FakePortal::new());
    let submitter = submitter(portal.clone());

    let today = JobRequest::refresh(&config, &segments(), date(2024, 3, 10), window);
    let job = submitter.submit(&session(), today).await.unwrap();
    assert_eq!(job.name(), "2024-03-10-1415");

    let stale = JobRequest::refresh(&config, &segments(), date(2024, 3, 9), window);
    let err = submitter.submit(&session(), stale).await.unwrap_err();
    assert!(is_malformed(&err));
    assert_eq!(portal.submissions().len(), 1);
}

#[tokio::test]
async fn test_single_shot_accepts_any_range() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let range = DateRange::new(date(2024, 3, 1), date(2024, 3, 12)).unwrap();
    let request = JobRequest::single_shot(&ws.config(), &segments(), range, "march");

    let job = submitter(portal).submit(&session(), request).await.unwrap();

    assert_eq!(job.date_range(), range);
}

#[tokio::test]
async fn test_blank_name_is_refused() {
    let ws = Workspace::new();
    let portal = Arc::new(FakePortal::new());
    let mut request = JobRequest::for_date(&ws.config(), &segments(), date(2024, 3, 9));
    request.description.name = "  ".to_string();

    let err = submitter(portal.clone())
        .submit(&session(), request)
        .await
        .unwrap_err();

    assert!(is_malformed(&err));
    assert_eq!(err.kind().as_str(), "submission");
    assert!(portal.submissions().is_empty());
}

#[tokio::test]
async fn test_request_carries_configuration() {
    let ws = Workspace::new();
    let config = ws
        .config_builder()
        .bin_size(5)
        .confidence_scores([10, 30])
        .build()
        .unwrap();
    let request = JobRequest::for_date(&config, &segments(), date(2024, 3, 9));

    let description = &request.description;
    assert_eq!(description.bin_size.minutes(), 5);
    let scores: Vec<u32> = description
        .confidence_scores
        .iter()
        .map(|c| c.value())
        .collect();
    assert_eq!(scores, vec![30, 10]);
    assert_eq!(description.segments.len(), 2);
}
