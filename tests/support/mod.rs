//! Shared fakes for scheduler tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use segment_data_downloader::downloader::{
    Clock, DownloadConfig, PollPolicy, Scheduler,
};
use segment_data_downloader::output::csv::CsvResultWriter;
use segment_data_downloader::portal::{
    JobDescription, JobHandle, PortalClient, PortalError, PortalResult, RawPayload, RemoteStatus,
    Session,
};
use segment_data_downloader::shutdown::SharedShutdown;
use segment_data_downloader::SegmentSet;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn at(day: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    day.and_time(time(h, m))
}

/// Wall clock driven by tokio's (pausable) clock
///
/// Starts at `origin` and moves forward as tokio time advances, so
/// `start_paused` tests see the refresh sleeps move the time of day.
pub struct TokioClock {
    origin: NaiveDateTime,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(origin: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self {
            origin,
            started: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.origin + elapsed
    }
}

#[derive(Default)]
struct FakeState {
    auth_calls: usize,
    poll_calls: usize,
    fetch_calls: usize,
    submissions: Vec<JobDescription>,
    polls_by_job: HashMap<String, u32>,
    poll_script: VecDeque<PortalResult<RemoteStatus>>,
}

/// Scripted in-memory portal
///
/// Jobs become ready after `ready_after` polls. Job names listed in
/// `failing_jobs` end in a portal-side failure instead. Ready jobs in
/// `failing_fetches` cannot be downloaded, and those in `unusable_payloads`
/// download as an archive without a CSV.
#[derive(Default)]
pub struct FakePortal {
    state: Mutex<FakeState>,
    ready_after: u32,
    never_ready: bool,
    reject_login: bool,
    reject_polls: bool,
    failing_jobs: HashSet<String>,
    failing_fetches: HashSet<String>,
    unusable_payloads: HashSet<String>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            ready_after: 1,
            ..Default::default()
        }
    }

    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn reject_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    /// Every status query answers with an authentication error
    pub fn reject_polls(mut self) -> Self {
        self.reject_polls = true;
        self
    }

    pub fn fail_job(mut self, name: &str) -> Self {
        self.failing_jobs.insert(name.to_string());
        self
    }

    /// The job finishes but its download breaks off
    pub fn fail_fetch(mut self, name: &str) -> Self {
        self.failing_fetches.insert(name.to_string());
        self
    }

    /// The job finishes but its archive holds no CSV
    pub fn unusable_payload(mut self, name: &str) -> Self {
        self.unusable_payloads.insert(name.to_string());
        self
    }

    /// Answers returned by the next status queries, before normal behavior
    pub fn script(self, answers: Vec<PortalResult<RemoteStatus>>) -> Self {
        self.state.lock().unwrap().poll_script = answers.into();
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.state.lock().unwrap().auth_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.state.lock().unwrap().poll_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    pub fn submissions(&self) -> Vec<JobDescription> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submissions().into_iter().map(|j| j.name).collect()
    }
}

/// CSV the fake portal returns for a job, deliberately out of order
pub fn payload_for(job: &JobDescription) -> String {
    let day = job.date_range.start();
    format!(
        "xd_id,measurement_tstamp,speed\n\
         1236893705,{day} 00:15:00,51\n\
         1236893704,{day} 00:15:00,48\n\
         1236893704,{day} 00:00:00,47\n"
    )
}

/// Zip archive with a readme and nothing else
pub fn archive_without_csv() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("README.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"export contents").unwrap();
    writer.finish().unwrap().into_inner()
}

#[async_trait]
impl PortalClient for FakePortal {
    async fn authenticate(&self) -> PortalResult<Session> {
        self.state.lock().unwrap().auth_calls += 1;
        if self.reject_login {
            return Err(PortalError::Auth("bad credentials".to_string()));
        }
        Ok(Session::new("analyst@example.com"))
    }

    async fn submit_job(&self, _session: &Session, job: &JobDescription) -> PortalResult<JobHandle> {
        self.state.lock().unwrap().submissions.push(job.clone());
        Ok(JobHandle::new(job.name.clone()))
    }

    async fn poll_status(&self, _session: &Session, handle: &JobHandle) -> PortalResult<RemoteStatus> {
        let mut state = self.state.lock().unwrap();
        state.poll_calls += 1;
        if let Some(answer) = state.poll_script.pop_front() {
            return answer;
        }
        if self.reject_polls {
            return Err(PortalError::Auth("session expired".to_string()));
        }
        if self.never_ready {
            return Ok(RemoteStatus::Processing);
        }

        let polls = state
            .polls_by_job
            .entry(handle.as_str().to_string())
            .or_insert(0);
        *polls += 1;
        if *polls < self.ready_after {
            Ok(RemoteStatus::Processing)
        } else if self.failing_jobs.contains(handle.as_str()) {
            Ok(RemoteStatus::Failed("query error".to_string()))
        } else {
            Ok(RemoteStatus::Ready)
        }
    }

    async fn fetch_result(&self, _session: &Session, handle: &JobHandle) -> PortalResult<RawPayload> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if self.failing_fetches.contains(handle.as_str()) {
            return Err(PortalError::Transport("connection reset during download".to_string()));
        }
        if self.unusable_payloads.contains(handle.as_str()) {
            return Ok(Bytes::from(archive_without_csv()));
        }
        let job = state
            .submissions
            .iter()
            .rev()
            .find(|j| j.name == handle.as_str())
            .ok_or_else(|| PortalError::JobNotFound(handle.to_string()))?;
        Ok(Bytes::from(payload_for(job)))
    }
}

pub fn fast_polling() -> PollPolicy {
    PollPolicy::new(
        Duration::from_secs(1),
        Duration::from_secs(4),
        Duration::from_secs(60),
    )
    .unwrap()
}

pub fn segments() -> SegmentSet {
    SegmentSet::parse("1236893704\n1236893705\n").unwrap()
}

/// Temp workspace holding the output directory and checkpoint file
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("Data")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("last_run.txt")
    }

    pub fn write_checkpoint(&self, contents: &str) {
        std::fs::write(self.checkpoint_path(), contents).unwrap();
    }

    pub fn read_checkpoint(&self) -> Option<String> {
        std::fs::read_to_string(self.checkpoint_path()).ok()
    }

    /// Stored result files, sorted by name
    pub fn stored_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.output_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".csv"))
            .collect();
        names.sort();
        names
    }

    pub fn read_output(&self, file: &str) -> String {
        std::fs::read_to_string(self.output_dir().join(file)).unwrap()
    }

    pub fn config(&self) -> DownloadConfig {
        self.config_builder().build().unwrap()
    }

    pub fn config_builder(&self) -> segment_data_downloader::downloader::DownloadConfigBuilder {
        DownloadConfig::builder()
            .output_dir(self.output_dir())
            .checkpoint_path(self.checkpoint_path())
            .poll_policy(fast_polling())
    }

    pub fn scheduler(
        &self,
        config: DownloadConfig,
        portal: Arc<FakePortal>,
        clock: Arc<dyn Clock>,
        shutdown: SharedShutdown,
    ) -> Scheduler {
        let writer = CsvResultWriter::new(config.output_dir());
        Scheduler::new(config, segments(), portal, Arc::new(writer))
            .with_clock(clock)
            .with_shutdown(shutdown)
    }
}
