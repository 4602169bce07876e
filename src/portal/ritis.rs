//! RITIS Massive Data Downloader client
//!
//! The portal is driven the way its web UI drives it: a form login that sets
//! session cookies, a JSON POST to the export endpoint, the user's job history
//! to watch progress, and a download link per finished job.

use super::{
    JobDescription, JobHandle, PortalClient, PortalError, PortalResult, RawPayload, RemoteStatus,
    Session,
};
use crate::downloader::config::ConfigError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default portal origin
pub const DEFAULT_BASE_URL: &str = "https://pda.ritis.org";

/// Environment variable holding the account e-mail
pub const EMAIL_ENV: &str = "RITIS_EMAIL";

/// Environment variable holding the account password
pub const PASSWORD_ENV: &str = "RITIS_PASSWORD";

const LOGIN_PATH: &str = "/suite/download/";
const SUBMIT_PATH: &str = "/export/submit/";
const HISTORY_PATH: &str = "/api/user_history/";

/// Data source identifier for INRIX XD segments
const DATASOURCE_ID: &str = "inrix_xd";

/// Road network version the segment ids refer to
const ATLAS_VERSION_ID: u32 = 49;

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Exports can be tens of megabytes
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 300;

/// History status codes
const STATUS_PENDING: i64 = 1;
const STATUS_PROCESSING: i64 = 2;
const STATUS_READY: i64 = 3;

/// Account credentials
#[derive(Clone)]
pub struct RitisCredentials {
    email: String,
    password: String,
}

impl RitisCredentials {
    /// Create credentials
    pub fn new<E: Into<String>, P: Into<String>>(email: E, password: P) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Read credentials from `RITIS_EMAIL` / `RITIS_PASSWORD`
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredentials(format!("{name} is not set")))
        };
        Ok(Self::new(read(EMAIL_ENV)?, read(PASSWORD_ENV)?))
    }

    /// Account e-mail
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for RitisCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RitisCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One row of the user's job history
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Job label; the history reports the submitted name here
    pub description: String,
    /// Download identifier
    pub uuid: String,
    /// Numeric processing status
    pub status: i64,
    /// Whether the result has been downloaded before
    #[serde(default)]
    pub downloaded: bool,
}

impl HistoryEntry {
    /// Map the numeric status onto [`RemoteStatus`]
    ///
    /// The portal has no failure code. Codes other than the known ones are
    /// treated as still pending, leaving the poll budget to give up on them.
    pub fn remote_status(&self) -> RemoteStatus {
        match self.status {
            STATUS_READY => RemoteStatus::Ready,
            STATUS_PROCESSING => RemoteStatus::Processing,
            STATUS_PENDING => RemoteStatus::Pending,
            other => {
                warn!(
                    job = %self.description,
                    uuid = %self.uuid,
                    status = other,
                    "Unrecognized export status, treating as pending"
                );
                RemoteStatus::Pending
            }
        }
    }
}

/// Parse the history endpoint response
pub fn parse_history(body: &str) -> PortalResult<Vec<HistoryEntry>> {
    serde_json::from_str(body)
        .map_err(|e| PortalError::InvalidResponse(format!("job history is not valid JSON: {e}")))
}

/// Most recent history entry for a job name.
///
/// The history lists newest first, so resubmitting the same name (as an
/// intraday refresh or a retried date does) resolves to the latest job.
pub fn find_job<'a>(history: &'a [HistoryEntry], name: &str) -> Option<&'a HistoryEntry> {
    history.iter().find(|entry| entry.description == name)
}

/// Request body for the export endpoint
pub fn submission_body(job: &JobDescription, email: &str) -> Value {
    let start = job.window.start().format("%H:%M:%S").to_string();
    let end = job.window.end().format("%H:%M:%S").to_string();
    let date_ranges: Vec<Value> = job
        .date_range
        .days()
        .map(|day| {
            let day = day.format("%Y-%m-%d");
            json!({
                "start_date": format!("{day} {start}"),
                "end_date": format!("{day} {end}"),
            })
        })
        .collect();
    let columns: Vec<&str> = job.metrics.iter().map(|m| m.as_str()).collect();
    let thresholds: Vec<u32> = job.confidence_scores.iter().map(|c| c.value()).collect();

    json!({
        "DATASOURCES": [{
            "id": DATASOURCE_ID,
            "columns": columns,
            "quality_filter": { "thresholds": thresholds },
        }],
        "ROADPROVIDER": DATASOURCE_ID,
        "TMCS": job.segments,
        "ROAD_DETAILS": [{
            "SEGMENT_IDS": job.segments,
            "DATASOURCE_ID": DATASOURCE_ID,
            "ATLAS_VERSION_ID": ATLAS_VERSION_ID,
        }],
        "DATERANGES": date_ranges,
        "ENTIREROAD": false,
        "NAME": job.name,
        "DESCRIPTION": job.name,
        "AVERAGINGWINDOWSIZE": job.bin_size.minutes(),
        "EMAILADDRESS": email,
        "SENDNOTIFICATIONEMAIL": false,
        "ADDNULLRECORDS": false,
        "TRAVELTIMEUNITS": job.travel_time_units.to_string(),
        "COUNTRYCODE": "USA",
    })
}

/// HTTP client for the RITIS portal
pub struct RitisClient {
    client: Client,
    base_url: String,
    credentials: RitisCredentials,
}

impl RitisClient {
    /// Create a client for the public portal
    pub fn new(credentials: RitisCredentials) -> PortalResult<Self> {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    /// Create a client against another origin
    pub fn with_base_url(
        credentials: RitisCredentials,
        base_url: impl Into<String>,
    ) -> PortalResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PortalError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn download_url(&self, uuid: &str) -> String {
        format!("{}/export/download/{uuid}?dl=1", self.base_url)
    }

    async fn history(&self) -> PortalResult<Vec<HistoryEntry>> {
        let response = self
            .client
            .post(self.url(HISTORY_PATH))
            .send()
            .await
            .map_err(transport)?;
        let body = check_status(response).await?.text().await.map_err(transport)?;
        parse_history(&body)
    }
}

fn transport(e: reqwest::Error) -> PortalError {
    PortalError::Transport(e.to_string())
}

/// Classify a non-success HTTP status
async fn check_status(response: reqwest::Response) -> PortalResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PortalError::Auth(format!("{status}: {snippet}"))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            PortalError::Transport(format!("{status}: {snippet}"))
        }
        _ => PortalError::InvalidResponse(format!("{status}: {snippet}")),
    })
}

#[async_trait]
impl PortalClient for RitisClient {
    async fn authenticate(&self) -> PortalResult<Session> {
        info!(account = %self.credentials.email, "Logging in to RITIS");

        // The login page sets the CSRF/session cookies and may redirect to the
        // identity provider; the form posts back to wherever we landed.
        let page = self
            .client
            .get(self.url(LOGIN_PATH))
            .send()
            .await
            .map_err(transport)?;
        let page = check_status(page).await?;
        let form_url = page.url().clone();

        let response = self
            .client
            .post(form_url)
            .form(&[
                ("username", self.credentials.email.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let body = response.text().await.map_err(transport)?;

        if body.contains("name=\"password\"") {
            warn!(account = %self.credentials.email, "Login form returned again, credentials rejected");
            return Err(PortalError::Auth("credentials rejected".to_string()));
        }

        info!(account = %self.credentials.email, "Logged in");
        Ok(Session::new(self.credentials.email.clone()))
    }

    async fn submit_job(&self, session: &Session, job: &JobDescription) -> PortalResult<JobHandle> {
        let body = submission_body(job, session.account());
        debug!(job = %job.name, days = job.date_range.num_days(), "Submitting export");

        let response = self
            .client
            .post(self.url(SUBMIT_PATH))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await.map_err(|e| match e {
            PortalError::InvalidResponse(msg) => PortalError::Rejected(msg),
            other => other,
        })?;

        // The export endpoint returns no identifier; the job is tracked by
        // name through the history.
        Ok(JobHandle::new(job.name.clone()))
    }

    async fn poll_status(&self, _session: &Session, handle: &JobHandle) -> PortalResult<RemoteStatus> {
        let history = self.history().await?;
        // A fresh job can take a moment to show up in the history
        Ok(find_job(&history, handle.as_str())
            .map(HistoryEntry::remote_status)
            .unwrap_or(RemoteStatus::Pending))
    }

    async fn fetch_result(&self, _session: &Session, handle: &JobHandle) -> PortalResult<RawPayload> {
        let history = self.history().await?;
        let entry = find_job(&history, handle.as_str())
            .ok_or_else(|| PortalError::JobNotFound(handle.to_string()))?;

        debug!(job = %handle, uuid = %entry.uuid, "Downloading export");
        let response = self
            .client
            .get(self.download_url(&entry.uuid))
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?.bytes().await.map_err(transport)
    }
}
