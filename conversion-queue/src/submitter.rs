use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    observability::LiveMetrics, policy::policy_for, store::QueueStore, ConversionPayload, JobId,
    JobRecord, JobState, QueueError, QueueResult, UserTier,
};

/// What `submit` hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub state: JobState,
    pub priority: u8,
    /// `false` when the conversion was already queued and the existing job was returned
    pub created: bool,
}

/// Turns conversion requests into queued jobs with a tier-derived policy
#[derive(Clone)]
pub struct JobSubmitter {
    store: Arc<dyn QueueStore>,
    metrics: Arc<LiveMetrics>,
}

impl JobSubmitter {
    pub fn new(store: Arc<dyn QueueStore>, metrics: Arc<LiveMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Enqueue a conversion.
    ///
    /// The job ID is derived from the conversion ID, so submitting the same
    /// conversion again while its job is still waiting or active returns that
    /// job instead of creating a second one. Store failures are returned as is;
    /// the conversion must not be considered started in that case.
    #[instrument(skip(self, payload), fields(conversion_id = %payload.conversion_id, tier = %tier))]
    pub async fn submit(&self, payload: ConversionPayload, tier: UserTier) -> QueueResult<JobHandle> {
        if payload.conversion_id.trim().is_empty() {
            return Err(QueueError::InvalidSubmission(
                "conversion_id must not be empty".to_string(),
            ));
        }

        let policy = policy_for(&tier);
        let outcome = self.store.enqueue(JobRecord::new(payload, tier, policy)).await?;
        let record = outcome.record;

        if outcome.created {
            self.metrics.increment_jobs_submitted();
            info!(job_id = %record.job_id, priority = record.priority, "Conversion job queued");
        } else {
            self.metrics.increment_jobs_deduplicated();
            debug!(job_id = %record.job_id, state = %record.state, "Conversion already queued");
        }

        Ok(JobHandle {
            job_id: record.job_id,
            state: record.state,
            priority: record.priority,
            created: outcome.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversionType, MemoryStore};
    use tracing_test::traced_test;

    fn submitter() -> (Arc<MemoryStore>, Arc<LiveMetrics>, JobSubmitter) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(LiveMetrics::new());
        let submitter = JobSubmitter::new(store.clone(), metrics.clone());
        (store, metrics, submitter)
    }

    fn payload(conversion_id: &str) -> ConversionPayload {
        ConversionPayload::new(conversion_id, "user-1", ConversionType::PdfToDocx)
            .with_files("/uploads/in.pdf", "/converted/out.docx", "in.pdf")
    }

    #[tokio::test]
    async fn test_submit_applies_tier_policy() {
        let (store, _metrics, submitter) = submitter();

        let handle = submitter.submit(payload("c-1"), UserTier::Enterprise).await.unwrap();
        assert_eq!(handle.job_id, JobId::for_conversion("c-1"));
        assert_eq!(handle.state, JobState::Waiting);
        assert_eq!(handle.priority, 1);
        assert!(handle.created);

        let record = store.get_job(&handle.job_id).await.unwrap().unwrap();
        assert_eq!(record.max_attempts, 5);
        assert_eq!(record.attempts_made, 0);
        assert_eq!(record.payload.source_file_path, "/uploads/in.pdf");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_submission_returns_existing_job() {
        let (store, metrics, submitter) = submitter();

        let first = submitter.submit(payload("c-1"), UserTier::Free).await.unwrap();
        let second = submitter.submit(payload("c-1"), UserTier::Premium).await.unwrap();

        assert_eq!(first.job_id, second.job_id);
        assert!(!second.created);
        assert_eq!(second.priority, 4);
        assert_eq!(store.stats().await.unwrap().waiting, 1);
        assert_eq!(metrics.jobs_submitted(), 1);
        assert_eq!(metrics.jobs_deduplicated(), 1);
        assert!(logs_contain("Conversion already queued"));
    }

    #[tokio::test]
    async fn test_blank_conversion_id_is_rejected() {
        let (store, _metrics, submitter) = submitter();

        let result = submitter.submit(payload("  "), UserTier::Basic).await;
        assert!(matches!(result, Err(QueueError::InvalidSubmission(_))));
        assert_eq!(store.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_surfaced() {
        let (store, metrics, submitter) = submitter();
        store.close().await;

        let result = submitter.submit(payload("c-1"), UserTier::Basic).await;
        assert!(matches!(result, Err(QueueError::QueueUnavailable(_))));
        assert_eq!(metrics.jobs_submitted(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_tier_gets_defaults() {
        let (store, _metrics, submitter) = submitter();

        let handle = submitter
            .submit(payload("c-1"), UserTier::parse("platinum"))
            .await
            .unwrap();
        let record = store.get_job(&handle.job_id).await.unwrap().unwrap();
        assert_eq!(record.priority, 4);
        assert_eq!(record.max_attempts, 3);
    }
}
