//! # Batch Job Progress Tracking
//!
//! One [`BatchJob`] tracks a multi-recipient creation request from
//! acceptance through chunked fan-out to a terminal state.
//!
//! ## States
//!
//! ```text
//! queued ─▶ processing ─▶ completed   (all recipients resolved,
//!    │           │                     failures included)
//!    └───────────┴─▶ failed           (aborted before finishing)
//! ```
//!
//! "Completed" describes orchestration completion, not unanimous success:
//! a batch where some recipients failed still completes, with the failures
//! enumerated in [`BatchJob::errors`]. Only an abort — cancellation,
//! deadline, or stop-on-error — produces `failed`.
//!
//! The counter invariant `processed = successful + failed ≤ total` is
//! enforced inside the recording methods, so a miscounting driver gets a
//! typed error instead of silently corrupt progress numbers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use certon_core::{BatchJobId, ProductId, Recipient, TenantId, Timestamp};

/// Cap on recorded per-recipient errors. Counters keep counting past the
/// cap; only the detail list stops growing.
pub const MAX_RECORDED_ERRORS: usize = 100;

// ─── Batch Status ────────────────────────────────────────────────────

/// The processing status of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Accepted and quota-reserved, not yet started.
    Queued,
    /// Fan-out in progress.
    Processing,
    /// All recipients resolved. Terminal.
    Completed,
    /// Aborted before all recipients resolved. Terminal.
    Failed,
}

impl BatchStatus {
    /// Stable lowercase name used in serialized records and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from batch job state updates.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Attempted transition is not valid from the current status.
    #[error("invalid batch transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: BatchStatus,
        /// Attempted target status.
        to: BatchStatus,
    },

    /// An outcome was recorded while the job was not processing.
    #[error("batch is not processing (status: {status})")]
    NotProcessing {
        /// The status the job was in.
        status: BatchStatus,
    },

    /// More outcomes were recorded than the job has recipients.
    #[error("batch counter overflow: {attempted} outcomes for {total} recipients")]
    CounterOverflow {
        /// The outcome count the recording would have reached.
        attempted: u32,
        /// The recipient count.
        total: u32,
    },

    /// Completion was requested with recipients still unresolved.
    #[error("batch incomplete: {processed} of {total} recipients resolved")]
    Incomplete {
        /// Outcomes recorded so far.
        processed: u32,
        /// The recipient count.
        total: u32,
    },
}

// ─── Batch Records ───────────────────────────────────────────────────

/// One entry in a batch request: the recipient plus per-recipient custom
/// data carried onto the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecipient {
    /// The recipient to issue to.
    pub recipient: Recipient,
    /// Custom data for this recipient's certificate.
    #[serde(default)]
    pub metadata: Value,
}

impl BatchRecipient {
    /// A batch entry with no custom data.
    pub fn plain(recipient: Recipient) -> Self {
        Self {
            recipient,
            metadata: Value::Null,
        }
    }
}

/// A recorded per-recipient failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientError {
    /// The recipient whose creation failed.
    pub recipient: Recipient,
    /// Rendered error message.
    pub message: String,
}

/// Tracks one multi-recipient creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique batch job identifier.
    pub id: BatchJobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The product every certificate in this batch certifies.
    pub product_id: ProductId,
    /// The ordered recipient list, fixed at acceptance.
    pub recipients: Vec<BatchRecipient>,
    /// Current processing status.
    pub status: BatchStatus,
    /// Outcomes recorded so far. Always `successful + failed`.
    pub processed: u32,
    /// Recipients whose certificate was created.
    pub successful: u32,
    /// Recipients whose creation failed.
    pub failed: u32,
    /// Per-recipient failure details, capped at [`MAX_RECORDED_ERRORS`].
    pub errors: Vec<RecipientError>,
    /// Set by a cancellation request; honored between chunks.
    pub cancel_requested: bool,
    /// Record recipient failures and keep going (the default), or abort
    /// the remaining chunks on the first failure.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
    /// When the job was accepted.
    pub created_at: Timestamp,
    /// When fan-out started.
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal status.
    pub completed_at: Option<Timestamp>,
}

fn default_continue_on_error() -> bool {
    true
}

impl BatchJob {
    /// Create a queued job issuing `product_id` to the given recipients.
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        recipients: Vec<BatchRecipient>,
    ) -> Self {
        Self {
            id: BatchJobId::new(),
            tenant_id,
            product_id,
            recipients,
            status: BatchStatus::Queued,
            processed: 0,
            successful: 0,
            failed: 0,
            errors: Vec::new(),
            cancel_requested: false,
            continue_on_error: true,
            created_at: Timestamp::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Abort the remaining chunks on the first recipient failure instead
    /// of recording it and continuing.
    pub fn stop_on_error(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    /// The recipient count.
    pub fn total(&self) -> u32 {
        self.recipients.len() as u32
    }

    /// Recipients not yet resolved.
    pub fn remaining(&self) -> u32 {
        self.total() - self.processed
    }

    /// Begin fan-out (QUEUED → PROCESSING).
    pub fn start(&mut self) -> Result<(), BatchError> {
        if self.status != BatchStatus::Queued {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::Processing,
            });
        }
        self.status = BatchStatus::Processing;
        self.started_at = Some(Timestamp::now());
        Ok(())
    }

    /// Record one successful recipient.
    pub fn record_success(&mut self) -> Result<(), BatchError> {
        self.check_recordable()?;
        self.processed += 1;
        self.successful += 1;
        Ok(())
    }

    /// Record one failed recipient, keeping the detail while the error
    /// list is under its cap.
    pub fn record_failure(
        &mut self,
        recipient: Recipient,
        message: impl Into<String>,
    ) -> Result<(), BatchError> {
        self.check_recordable()?;
        self.processed += 1;
        self.failed += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(RecipientError {
                recipient,
                message: message.into(),
            });
        }
        Ok(())
    }

    /// Finish the job (PROCESSING → COMPLETED). Requires every recipient
    /// resolved; partial failure still completes.
    pub fn complete(&mut self) -> Result<(), BatchError> {
        if self.status != BatchStatus::Processing {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::Completed,
            });
        }
        if self.processed != self.total() {
            return Err(BatchError::Incomplete {
                processed: self.processed,
                total: self.total(),
            });
        }
        self.status = BatchStatus::Completed;
        self.completed_at = Some(Timestamp::now());
        Ok(())
    }

    /// Abort the job ({QUEUED, PROCESSING} → FAILED), keeping whatever
    /// counters have accumulated.
    pub fn abort(&mut self) -> Result<(), BatchError> {
        if self.status.is_terminal() {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::Failed,
            });
        }
        self.status = BatchStatus::Failed;
        self.completed_at = Some(Timestamp::now());
        Ok(())
    }

    /// Ask the orchestrator to stop at the next chunk boundary. Sticky;
    /// has no effect on a job that already reached a terminal status.
    pub fn request_cancel(&mut self) {
        if !self.status.is_terminal() {
            self.cancel_requested = true;
        }
    }

    fn check_recordable(&self) -> Result<(), BatchError> {
        if self.status != BatchStatus::Processing {
            return Err(BatchError::NotProcessing {
                status: self.status,
            });
        }
        if self.processed >= self.total() {
            return Err(BatchError::CounterOverflow {
                attempted: self.processed + 1,
                total: self.total(),
            });
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<BatchRecipient> {
        (0..n)
            .map(|i| {
                BatchRecipient::plain(Recipient::email(format!("r{i}@example.com")).unwrap())
            })
            .collect()
    }

    fn product() -> ProductId {
        ProductId::new("prod-1").unwrap()
    }

    fn processing_job(n: usize) -> BatchJob {
        let mut job = BatchJob::new(TenantId::new(), product(), entries(n));
        job.start().unwrap();
        job
    }

    #[test]
    fn new_job_is_queued() {
        let job = BatchJob::new(TenantId::new(), product(), entries(3));
        assert_eq!(job.status, BatchStatus::Queued);
        assert_eq!(job.total(), 3);
        assert_eq!(job.remaining(), 3);
        assert!(job.continue_on_error);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn stop_on_error_flips_the_default() {
        let job = BatchJob::new(TenantId::new(), product(), entries(3)).stop_on_error();
        assert!(!job.continue_on_error);
    }

    #[test]
    fn start_moves_to_processing() {
        let job = processing_job(2);
        assert_eq!(job.status, BatchStatus::Processing);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn start_twice_rejected() {
        let mut job = processing_job(2);
        assert!(job.start().is_err());
    }

    #[test]
    fn record_before_start_rejected() {
        let mut job = BatchJob::new(TenantId::new(), product(), entries(2));
        let err = job.record_success().unwrap_err();
        assert!(matches!(err, BatchError::NotProcessing { .. }));
    }

    #[test]
    fn counters_track_outcomes() {
        let mut job = processing_job(3);
        job.record_success().unwrap();
        job.record_failure(
            Recipient::email("r1@example.com").unwrap(),
            "quota exceeded",
        )
        .unwrap();
        job.record_success().unwrap();

        assert_eq!(job.processed, 3);
        assert_eq!(job.successful, 2);
        assert_eq!(job.failed, 1);
        assert_eq!(job.processed, job.successful + job.failed);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].message, "quota exceeded");
    }

    #[test]
    fn recording_past_total_rejected() {
        let mut job = processing_job(1);
        job.record_success().unwrap();
        let err = job.record_success().unwrap_err();
        assert!(matches!(err, BatchError::CounterOverflow { .. }));
        assert_eq!(job.processed, 1);
    }

    #[test]
    fn complete_requires_all_resolved() {
        let mut job = processing_job(2);
        job.record_success().unwrap();
        let err = job.complete().unwrap_err();
        assert!(matches!(
            err,
            BatchError::Incomplete {
                processed: 1,
                total: 2
            }
        ));
    }

    #[test]
    fn complete_with_partial_failure() {
        let mut job = processing_job(2);
        job.record_success().unwrap();
        job.record_failure(Recipient::email("r1@example.com").unwrap(), "mint failed")
            .unwrap();
        job.complete().unwrap();
        assert_eq!(job.status, BatchStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn complete_empty_batch() {
        let mut job = processing_job(0);
        job.complete().unwrap();
        assert_eq!(job.status, BatchStatus::Completed);
    }

    #[test]
    fn abort_keeps_counters() {
        let mut job = processing_job(5);
        job.record_success().unwrap();
        job.record_success().unwrap();
        job.abort().unwrap();
        assert_eq!(job.status, BatchStatus::Failed);
        assert_eq!(job.processed, 2);
        assert_eq!(job.successful, 2);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn abort_queued_job() {
        let mut job = BatchJob::new(TenantId::new(), product(), entries(2));
        job.abort().unwrap();
        assert_eq!(job.status, BatchStatus::Failed);
        assert_eq!(job.processed, 0);
    }

    #[test]
    fn abort_terminal_rejected() {
        let mut job = processing_job(0);
        job.complete().unwrap();
        assert!(job.abort().is_err());
    }

    #[test]
    fn cancel_flag_is_sticky_until_terminal() {
        let mut job = processing_job(2);
        job.request_cancel();
        assert!(job.cancel_requested);
        job.request_cancel();
        assert!(job.cancel_requested);
    }

    #[test]
    fn cancel_after_terminal_is_ignored() {
        let mut job = processing_job(0);
        job.complete().unwrap();
        job.request_cancel();
        assert!(!job.cancel_requested);
    }

    #[test]
    fn error_list_caps_but_counters_continue() {
        let n = MAX_RECORDED_ERRORS + 5;
        let mut job = processing_job(n);
        for i in 0..n {
            job.record_failure(
                Recipient::email(format!("r{i}@example.com")).unwrap(),
                "transfer failed",
            )
            .unwrap();
        }
        assert_eq!(job.errors.len(), MAX_RECORDED_ERRORS);
        assert_eq!(job.failed, n as u32);
        assert_eq!(job.processed, n as u32);
        job.complete().unwrap();
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BatchStatus::Processing).unwrap(),
            "\"processing\""
        );
        let back: BatchStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, BatchStatus::Failed);
    }

    #[test]
    fn job_serde_roundtrip() {
        let mut job = processing_job(2);
        job.record_success().unwrap();
        let json = serde_json::to_string(&job).unwrap();
        let parsed: BatchJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.status, job.status);
        assert_eq!(parsed.processed, 1);
    }
}
