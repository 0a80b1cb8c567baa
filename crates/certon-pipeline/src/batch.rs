//! # Batch Issuance Orchestrator
//!
//! Fans one multi-recipient request into bounded single-certificate
//! creations: whole-batch admission (size check plus an all-or-nothing
//! quota reservation), chunked concurrent fan-out, per-recipient outcome
//! bookkeeping, and cancellation at chunk boundaries.
//!
//! ## Design Decision
//!
//! Quota for the whole batch is reserved at acceptance, not per recipient:
//! a batch that cannot fully fit inside the tenant's remaining allowance
//! is rejected before any ledger work starts. The reservation is parked
//! with the queued job and settled unit by unit as recipients resolve, so
//! an aborted run gives back whatever it never used without dedicated
//! cleanup paths.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use certon_core::{
    BatchJobId, MonthWindow, PlanLimits, ProductId, QuotaKind, TenantId, TenantTransferSettings,
    Timestamp,
};
use certon_state::batch::{BatchError, BatchJob, BatchRecipient, BatchStatus};
use certon_state::certificate::Certificate;

use crate::db::Mirror;
use crate::error::PipelineError;
use crate::issuance::{CreateCertificateRequest, Issuer};
use crate::ports::{CertificateEvent, NotificationSink, PlanService, SettingsProvider};
use crate::quota::{QuotaLedger, ReservationToken};
use crate::store::BatchStore;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A request to issue certificates for one product to many recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    /// The issuing tenant.
    pub tenant_id: TenantId,
    /// The product every certificate in the batch certifies.
    pub product_id: ProductId,
    /// The recipients, one certificate each, in submission order.
    pub recipients: Vec<BatchRecipient>,
    /// Record recipient failures and keep going (the default), or abort
    /// the remaining chunks on the first failure.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_continue_on_error() -> bool {
    true
}

/// Quota held for an accepted batch, parked until its run settles it.
struct ParkedReservation {
    issuance: ReservationToken,
    transfer: Option<ReservationToken>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The batch issuance orchestrator.
#[derive(Clone)]
pub struct BatchOrchestrator {
    batches: BatchStore,
    issuer: Issuer,
    quotas: QuotaLedger,
    plans: Arc<dyn PlanService>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    mirror: Mirror,
    parked: Arc<Mutex<HashMap<BatchJobId, ParkedReservation>>>,
    run_deadline: Option<Duration>,
}

impl BatchOrchestrator {
    pub(crate) fn new(
        batches: BatchStore,
        issuer: Issuer,
        quotas: QuotaLedger,
        plans: Arc<dyn PlanService>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
        mirror: Mirror,
    ) -> Self {
        Self {
            batches,
            issuer,
            quotas,
            plans,
            settings,
            notifier,
            mirror,
            parked: Arc::new(Mutex::new(HashMap::new())),
            run_deadline: None,
        }
    }

    /// Cap each run's wall-clock time. A run stops at the first chunk
    /// boundary past the deadline and the job aborts with its recorded
    /// outcomes intact.
    pub(crate) fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    /// Accept a batch: validate its size against the tenant's plan,
    /// reserve quota for every recipient as one block, and queue the job.
    ///
    /// Rejection is whole-batch; a rejected request leaves no job record
    /// and no reservation behind.
    pub async fn create_batch(
        &self,
        request: CreateBatchRequest,
    ) -> Result<BatchJob, PipelineError> {
        let limits = self.plans.limits(request.tenant_id).await?;
        let settings = self.settings.transfer_settings(request.tenant_id).await?;
        if request.recipients.len() > limits.max_batch_size as usize {
            return Err(PipelineError::BatchTooLarge {
                size: request.recipients.len(),
                max: limits.max_batch_size,
            });
        }

        let mut job = BatchJob::new(request.tenant_id, request.product_id, request.recipients);
        if !request.continue_on_error {
            job = job.stop_on_error();
        }
        let reservation = self.reserve_block(&job, &settings, &limits)?;

        self.batches.insert(job.clone());
        self.mirror.save_batch(&job).await;
        self.parked.lock().insert(job.id, reservation);
        tracing::info!(
            batch_id = %job.id,
            tenant = %job.tenant_id,
            recipients = job.total(),
            "batch accepted",
        );
        Ok(job)
    }

    /// Drive a queued job to a terminal status.
    ///
    /// Chunks run sequentially with bounded concurrency inside each one.
    /// Cancellation requests and the configured deadline are honored at
    /// chunk boundaries only; an in-flight chunk always completes and its
    /// outcomes stay recorded.
    pub async fn run_batch(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        let job = self
            .batches
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(format!("batch {id}")))?;
        let limits = self.plans.limits(job.tenant_id).await?;
        let settings = self.settings.transfer_settings(job.tenant_id).await?;

        let parked = self.parked.lock().remove(&id);
        let reservation = match parked {
            Some(reservation) => reservation,
            // The parked reservation died with the process that accepted
            // the job. Re-reserve the block before any work starts; a job
            // that no longer fits the remaining quota aborts here.
            None => {
                if job.status != BatchStatus::Queued {
                    return Err(PipelineError::InvalidTransition(format!(
                        "batch {id} is {}, only queued jobs can run",
                        job.status
                    )));
                }
                match self.reserve_block(&job, &settings, &limits) {
                    Ok(reservation) => reservation,
                    Err(err) => {
                        tracing::warn!(batch_id = %id, %err, "batch re-reservation failed");
                        self.abort_job(id).await;
                        return Err(err);
                    }
                }
            }
        };

        let started = self
            .batches
            .try_update(id, |j| {
                j.start()?;
                Ok(j.clone())
            })
            .ok_or_else(|| PipelineError::NotFound(format!("batch {id}")))??;
        self.mirror.save_batch(&started).await;

        let ParkedReservation {
            mut issuance,
            transfer,
        } = reservation;
        // Scheduling needs both the reserved transfer block and a wallet
        // from the run-time settings snapshot. A tenant that switched auto
        // transfer off after acceptance gets the block back here.
        let mut auto_transfer = match (transfer, settings.auto_transfer_ready()) {
            (Some(token), true) => settings.brand_wallet.clone().map(|wallet| (token, wallet)),
            _ => None,
        };

        let width = limits.effective_concurrency();
        let deadline = self
            .run_deadline
            .map(|d| Timestamp::now().saturating_add(d));
        let failure_stops = !started.continue_on_error;
        let recipients = started.recipients.clone();
        let mut stop_requested = false;

        for chunk in recipients.chunks(width) {
            let Some(snapshot) = self.batches.get(id) else {
                return Err(PipelineError::Internal(format!("batch {id} vanished mid-run")));
            };
            if snapshot.cancel_requested {
                tracing::info!(batch_id = %id, "batch cancelled between chunks");
                break;
            }
            if deadline.as_ref().is_some_and(|d| Timestamp::now() >= *d) {
                tracing::warn!(batch_id = %id, "batch run deadline passed");
                break;
            }

            let outcomes = self.run_chunk(&started, &settings, chunk).await;
            for (entry, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(cert)) => {
                        issuance.commit_one();
                        if let Some((token, wallet)) = auto_transfer.as_mut() {
                            if self
                                .issuer
                                .apply_scheduled_transfer(cert.id, wallet.clone())
                                .await
                                .is_some()
                            {
                                token.commit_one();
                            }
                        }
                        self.record_outcome(id, |j| j.record_success());
                    }
                    Some(Err(err)) => {
                        // An unreachable ledger leaves a provisional record
                        // behind; its unit stays consumed until the
                        // reconciliation sweep rules on the mint. Every
                        // other failure's unit flows back at settlement.
                        if matches!(err, PipelineError::LedgerUnavailable(_)) {
                            issuance.commit_one();
                        }
                        self.record_outcome(id, |j| {
                            j.record_failure(entry.recipient.clone(), err.to_string())
                        });
                        stop_requested |= failure_stops;
                    }
                    None => {
                        self.record_outcome(id, |j| {
                            j.record_failure(entry.recipient.clone(), "issuance task aborted")
                        });
                        stop_requested |= failure_stops;
                    }
                }
            }

            if let Some(snapshot) = self.batches.get(id) {
                self.mirror.save_batch(&snapshot).await;
            }
            if stop_requested {
                tracing::info!(batch_id = %id, "batch stopping on first failure");
                break;
            }
        }

        // A fully processed job completed its orchestration even when some
        // recipients failed; anything short of that was aborted. Unsettled
        // reservation units flow back when the tokens drop below.
        let terminal = self
            .batches
            .try_update(id, |j| {
                if j.processed == j.total() {
                    j.complete()?;
                } else {
                    j.abort()?;
                }
                Ok(j.clone())
            })
            .ok_or_else(|| PipelineError::Internal(format!("batch {id} vanished mid-run")))??;
        self.mirror.save_batch(&terminal).await;
        drop(issuance);
        drop(auto_transfer);

        tracing::info!(
            batch_id = %id,
            tenant = %terminal.tenant_id,
            status = %terminal.status,
            successful = terminal.successful,
            failed = terminal.failed,
            "batch finished",
        );
        if terminal.status == BatchStatus::Completed {
            self.notifier
                .publish(CertificateEvent::BatchCompleted {
                    batch_id: id,
                    tenant_id: terminal.tenant_id,
                    successful: terminal.successful,
                    failed: terminal.failed,
                })
                .await;
        }
        Ok(terminal)
    }

    /// Ask a job to stop at its next chunk boundary. A queued job stops
    /// before its first chunk when the run starts. Already-terminal jobs
    /// are unaffected.
    pub async fn cancel_batch(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        let job = self
            .batches
            .try_update(id, |j| {
                j.request_cancel();
                Ok(j.clone())
            })
            .ok_or_else(|| PipelineError::NotFound(format!("batch {id}")))??;
        self.mirror.save_batch(&job).await;
        tracing::info!(batch_id = %id, tenant = %job.tenant_id, "batch cancellation requested");
        Ok(job)
    }

    /// Look up one batch job.
    pub fn get_batch(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        self.batches
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(format!("batch {id}")))
    }

    /// A tenant's batch jobs, newest first.
    pub fn list_batches(&self, tenant_id: TenantId) -> Vec<BatchJob> {
        self.batches.list_for_tenant(tenant_id)
    }

    /// Reserve issuance units for every recipient, plus transfer units
    /// when the tenant's settings make auto transfer applicable. Either
    /// both blocks are taken or neither is.
    fn reserve_block(
        &self,
        job: &BatchJob,
        settings: &TenantTransferSettings,
        limits: &PlanLimits,
    ) -> Result<ParkedReservation, PipelineError> {
        let units = job.total();
        let window = MonthWindow::current();
        let issuance = self.quotas.reserve(
            job.tenant_id,
            QuotaKind::Issuance,
            window,
            units,
            limits.limit_for(QuotaKind::Issuance),
        )?;
        let transfer = if settings.auto_transfer_ready() {
            // Erroring out here drops `issuance`, releasing its block.
            Some(self.quotas.reserve(
                job.tenant_id,
                QuotaKind::Transfer,
                window,
                units,
                limits.limit_for(QuotaKind::Transfer),
            )?)
        } else {
            None
        };
        Ok(ParkedReservation { issuance, transfer })
    }

    /// Fan one chunk out concurrently. Returns one slot per entry in
    /// entry order; a slot is `None` only if its task died.
    async fn run_chunk(
        &self,
        job: &BatchJob,
        settings: &TenantTransferSettings,
        chunk: &[BatchRecipient],
    ) -> Vec<Option<Result<Certificate, PipelineError>>> {
        let mut tasks = tokio::task::JoinSet::new();
        for (idx, entry) in chunk.iter().enumerate() {
            let issuer = self.issuer.clone();
            let settings = settings.clone();
            let request = CreateCertificateRequest {
                tenant_id: job.tenant_id,
                product_id: job.product_id.clone(),
                recipient: entry.recipient.clone(),
                metadata: entry.metadata.clone(),
            };
            tasks.spawn(async move { (idx, issuer.mint_certificate(&request, &settings).await) });
        }

        let mut outcomes: Vec<Option<Result<Certificate, PipelineError>>> =
            (0..chunk.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(err) => tracing::error!(%err, "batch mint task panicked"),
            }
        }
        outcomes
    }

    fn record_outcome(
        &self,
        id: BatchJobId,
        f: impl FnOnce(&mut BatchJob) -> Result<(), BatchError>,
    ) {
        match self.batches.try_update(id, f) {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                tracing::error!(batch_id = %id, %err, "batch outcome not recorded");
            }
            None => {
                tracing::error!(batch_id = %id, "batch vanished while recording an outcome");
            }
        }
    }

    async fn abort_job(&self, id: BatchJobId) {
        match self.batches.try_update(id, |j| {
            j.abort()?;
            Ok(j.clone())
        }) {
            Some(Ok(aborted)) => self.mirror.save_batch(&aborted).await,
            Some(Err(err)) => {
                tracing::warn!(batch_id = %id, %err, "could not abort batch");
            }
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
