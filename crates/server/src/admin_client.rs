//! HTTP client for the admin routes, used by `search-indexctl`.

use crate::error::ErrorResponse;
use crate::jobs::{JobState, RebuildJob};
use crate::routes::admin::{RebuildBody, VersionBody};
use hybrid_search::{IndexStatus, RebuildReport};
use index::{CleanupReport, SwapOutcome};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ClientError {
    /// 2 for conflicts, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Api { status, .. } if *status == StatusCode::CONFLICT.as_u16() => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminClient {
    base: String,
    http: Client,
    poll_interval: Duration,
}

impl AdminClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often a started rebuild is polled until it ends.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/admin{path}", self.base)
    }

    pub async fn status(&self, index: &str) -> Result<IndexStatus, ClientError> {
        self.get(&format!("/indexes/{index}")).await
    }

    pub async fn status_all(&self) -> Result<Vec<IndexStatus>, ClientError> {
        self.get("/indexes").await
    }

    /// Run a rebuild and wait for its report.
    ///
    /// The server runs real builds in the background; this polls the job
    /// until it ends and turns a failed job back into the error it carries.
    pub async fn rebuild(&self, index: &str, body: &RebuildBody) -> Result<RebuildReport, ClientError> {
        let path = format!("/indexes/{index}/rebuild");
        if body.dry_run {
            return self.post(&path, body).await;
        }
        let started: RebuildJob = self.post(&path, body).await?;
        let mut job = started.clone();
        loop {
            if let Some(outcome) = job_outcome(job, &started.job_id) {
                return outcome;
            }
            tokio::time::sleep(self.poll_interval).await;
            job = self.get(&path).await?;
        }
    }

    pub async fn swap(&self, index: &str, version: Option<u32>) -> Result<SwapOutcome, ClientError> {
        self.post(&format!("/indexes/{index}/swap"), &VersionBody { version })
            .await
    }

    pub async fn rollback(&self, index: &str, version: Option<u32>) -> Result<SwapOutcome, ClientError> {
        self.post(&format!("/indexes/{index}/rollback"), &VersionBody { version })
            .await
    }

    pub async fn cleanup(&self, index: &str) -> Result<CleanupReport, ClientError> {
        self.post(&format!("/indexes/{index}/cleanup"), &serde_json::json!({}))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.get(self.url(path)).send().await?;
        decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        decode(resp).await
    }
}

/// `None` while `job` is still running.
fn job_outcome(job: RebuildJob, expected_id: &str) -> Option<Result<RebuildReport, ClientError>> {
    if job.job_id != expected_id {
        return Some(Err(ClientError::Api {
            status: StatusCode::CONFLICT.as_u16(),
            code: "CONFLICT".to_string(),
            message: format!("rebuild {expected_id} was superseded by {}", job.job_id),
        }));
    }
    match job.state {
        JobState::Running => None,
        JobState::Succeeded => Some(job.report.ok_or_else(|| ClientError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            code: "INTERNAL_ERROR".to_string(),
            message: format!("rebuild {expected_id} succeeded without a report"),
        })),
        JobState::Failed => {
            let (code, message) = job
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| ("INTERNAL_ERROR".to_string(), "rebuild failed".to_string()));
            Some(Err(ClientError::Api {
                status: job.status.unwrap_or(500),
                code,
                message,
            }))
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let text = resp.text().await?;
    let (code, message) = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => (err.error.code, err.error.message),
        Err(_) => ("HTTP_ERROR".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
