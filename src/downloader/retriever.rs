//! Result retrieval

use super::job::{Job, JobStatus};
use super::{DownloadError, RetrievalCause, RunResult};
use crate::output::{ResultKey, ResultWriter};
use crate::portal::{PortalClient, Session};
use std::sync::Arc;
use tracing::{debug, error};

/// Fetches a finished job's payload and hands it to the result writer
pub struct Retriever {
    portal: Arc<dyn PortalClient>,
    writer: Arc<dyn ResultWriter>,
}

impl Retriever {
    /// Create a retriever
    pub fn new(portal: Arc<dyn PortalClient>, writer: Arc<dyn ResultWriter>) -> Self {
        Self { portal, writer }
    }

    /// Download and store the result of a succeeded job under `key`
    ///
    /// Returns only after the writer has made the result durable.
    pub async fn retrieve(&self, session: &Session, job: &Job, key: &ResultKey) -> RunResult {
        let fail = |cause: RetrievalCause| {
            error!(job = %job.name(), key = %key, error = %cause, "Retrieval failed");
            DownloadError::Retrieval {
                job: job.name().to_string(),
                cause,
            }
        };

        if job.status() != JobStatus::Succeeded {
            return Err(fail(RetrievalCause::NotReady(job.status())));
        }

        let payload = self
            .portal
            .fetch_result(session, job.handle())
            .await
            .map_err(|e| fail(RetrievalCause::Portal(e)))?;
        debug!(job = %job.name(), bytes = payload.len(), "Result downloaded");

        self.writer
            .store(key, &payload)
            .map_err(|e| fail(RetrievalCause::Output(e)))
    }
}
