//! Rebuilds started through the admin API.
//!
//! A rebuild outlives the request that started it, so its outcome is kept
//! here, one latest job per index, for `GET .../rebuild` to report.

use crate::error::{ErrorDetail, ServerError};
use chrono::{DateTime, Utc};
use hybrid_search::RebuildReport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildJob {
    pub job_id: String,
    pub index: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub report: Option<RebuildReport>,
    /// HTTP status the failure maps to.
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Default)]
pub struct RebuildJobs {
    jobs: Mutex<HashMap<String, RebuildJob>>,
}

impl RebuildJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RebuildJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a running job for `index`. `None` while one is still running.
    pub fn start(&self, index: &str, now: DateTime<Utc>) -> Option<RebuildJob> {
        let mut jobs = self.lock();
        if jobs
            .get(index)
            .is_some_and(|job| job.state == JobState::Running)
        {
            return None;
        }
        let job = RebuildJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            index: index.to_string(),
            state: JobState::Running,
            started_at: now,
            finished_at: None,
            report: None,
            status: None,
            error: None,
        };
        jobs.insert(index.to_string(), job.clone());
        Some(job)
    }

    pub fn succeed(&self, index: &str, report: RebuildReport, now: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(index) {
            job.state = JobState::Succeeded;
            job.finished_at = Some(now);
            job.report = Some(report);
        }
    }

    pub fn fail(&self, index: &str, err: &ServerError, now: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(index) {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            job.status = Some(err.status_code().as_u16());
            job.error = Some(ErrorDetail {
                code: err.error_code().to_string(),
                message: err.to_string(),
            });
        }
    }

    pub fn latest(&self, index: &str) -> Option<RebuildJob> {
        self.lock().get(index).cloned()
    }
}
