//! Pull-based reconciliation of the authoritative record set.
//!
//! The duplex channel tells the client *that* a job finished; the record
//! fetch tells it what the server now believes (remaining quota, stored
//! chats). [`ConsistencyReconciler`] caches the latest fetch and publishes
//! it through a [`tokio::sync::watch`] channel.

use std::sync::Arc;

use agentdesk_core::project::{find_project, Project};
use agentdesk_core::types::Timestamp;
use tokio::sync::watch;

use crate::api::{ApiError, JobApi};

/// Latest authoritative records and when they were fetched.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub projects: Vec<Project>,
    /// `None` until the first successful fetch.
    pub fetched_at: Option<Timestamp>,
}

impl RecordSet {
    pub fn project(&self, id: &str) -> Option<&Project> {
        find_project(&self.projects, id)
    }

    /// Remaining quota of a project, if its record is known.
    pub fn requests_available(&self, project_id: &str) -> Option<i64> {
        self.project(project_id).map(|p| p.requests_available)
    }
}

pub struct ConsistencyReconciler {
    api: Arc<dyn JobApi>,
    records_tx: watch::Sender<RecordSet>,
}

impl ConsistencyReconciler {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        let (records_tx, _) = watch::channel(RecordSet::default());
        Self { api, records_tx }
    }

    /// Receive every published record set.
    pub fn subscribe(&self) -> watch::Receiver<RecordSet> {
        self.records_tx.subscribe()
    }

    /// Snapshot of one project's record.
    pub fn project(&self, id: &str) -> Option<Project> {
        self.records_tx.borrow().project(id).cloned()
    }

    /// Fetch the record set and publish it.
    ///
    /// On failure the previous records stay in place.
    pub async fn refresh(&self, reason: &'static str) -> Result<usize, ApiError> {
        let projects = self.api.fetch_projects().await?;
        let count = projects.len();
        self.records_tx.send_replace(RecordSet {
            projects,
            fetched_at: Some(chrono::Utc::now()),
        });
        tracing::debug!(reason, count, "Records refreshed");
        Ok(count)
    }

    /// Converge with the server after a job succeeded.
    ///
    /// Failures are logged, not surfaced: the push channel already told the
    /// user the outcome, and the next refresh will catch up.
    pub async fn reconcile(&self) -> Option<usize> {
        match self.refresh("job_succeeded").await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Reconciliation fetch failed; keeping previous records");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::api::JobSubmission;

    struct SequenceApi {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl JobApi for SequenceApi {
        async fn submit_job(&self, _submission: &JobSubmission) -> Result<(), ApiError> {
            Ok(())
        }

        /// First fetch returns a quota of 2, later fetches 1, third fails.
        async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                return Err(ApiError::Status {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(vec![Project {
                id: "p1".into(),
                email: "owner@example.com".into(),
                repo: None,
                users: vec![],
                chats: vec![],
                requests_available: if n == 0 { 2 } else { 1 },
                selected_model: None,
            }])
        }
    }

    fn reconciler() -> ConsistencyReconciler {
        ConsistencyReconciler::new(Arc::new(SequenceApi {
            fetches: AtomicUsize::new(0),
        }))
    }

    #[tokio::test]
    async fn records_are_unknown_until_first_fetch() {
        let reconciler = reconciler();
        let records = reconciler.subscribe();
        assert!(records.borrow().fetched_at.is_none());
        assert!(reconciler.project("p1").is_none());
        assert_eq!(records.borrow().requests_available("p1"), None);
    }

    #[tokio::test]
    async fn reconcile_publishes_updated_quota() {
        let reconciler = reconciler();
        let mut records = reconciler.subscribe();

        assert_eq!(reconciler.refresh("initial").await.unwrap(), 1);
        assert_eq!(records.borrow_and_update().requests_available("p1"), Some(2));

        assert_eq!(reconciler.reconcile().await, Some(1));
        assert!(records.has_changed().unwrap());
        assert_eq!(records.borrow_and_update().requests_available("p1"), Some(1));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_records() {
        let reconciler = reconciler();
        reconciler.refresh("initial").await.unwrap();
        reconciler.refresh("again").await.unwrap();

        assert_eq!(reconciler.reconcile().await, None);
        assert_eq!(reconciler.project("p1").unwrap().requests_available, 1);
    }
}
