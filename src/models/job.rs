//! Crawl jobs

use super::string_enum;
use crate::util::rand::backoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retries allowed before a job fails for good
pub const DEFAULT_MAX_RETRIES: i32 = 3;

const RETRY_BASE_SECS: u64 = 30;
const RETRY_MAX_SECS: u64 = 3600;

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retry,
}

string_enum!(JobStatus, "job status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Retry => "retry",
});

/// A unit of crawl work against one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: Uuid,
    pub site_id: Uuid,
    pub url: String,
    /// Higher runs first
    pub priority: i32,
    pub max_depth: i32,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub discovered_links: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl CrawlJob {
    /// A pending job scheduled for now
    pub fn new(site_id: Uuid, url: impl Into<String>, priority: i32, max_depth: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            site_id,
            url: url.into(),
            priority,
            max_depth,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            discovered_links: 0,
            created_at: now,
            scheduled_for: now,
            started_at: None,
            completed_at: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Ready to be picked up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Retry) && self.scheduled_for <= now
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, discovered_links: usize) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.discovered_links = i32::try_from(discovered_links).unwrap_or(i32::MAX);
        self.error_message = None;
    }

    /// Record a failure: reschedule with backoff, or fail once retries run out
    pub fn fail(&mut self, error: impl ToString) {
        self.error_message = Some(error.to_string());
        if self.retry_count < self.max_retries {
            let delay = backoff(self.retry_count as u32, RETRY_BASE_SECS, RETRY_MAX_SECS);
            self.retry_count += 1;
            self.status = JobStatus::Retry;
            self.scheduled_for = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut job = CrawlJob::new(Uuid::new_v4(), "http://x.onion/", 5, 1);
        assert!(job.is_due(Utc::now()));
        job.start();
        assert_eq!(job.status, JobStatus::Running);
        assert!(!job.is_due(Utc::now()));
        job.complete(12);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.discovered_links, 12);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_retry_then_fail() {
        let mut job = CrawlJob::new(Uuid::new_v4(), "http://x.onion/", 0, 1);
        for attempt in 1..=DEFAULT_MAX_RETRIES {
            job.start();
            job.fail("timeout");
            assert_eq!(job.status, JobStatus::Retry);
            assert_eq!(job.retry_count, attempt);
            assert!(job.scheduled_for > Utc::now());
            assert!(!job.is_due(Utc::now()));
        }
        job.start();
        job.fail("timeout");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("timeout"));
        assert!(job.completed_at.is_some());
    }
}
