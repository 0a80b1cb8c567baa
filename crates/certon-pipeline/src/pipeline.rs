//! # Pipeline Facade
//!
//! [`CertificatePipeline`] composes the stores, quota ledger, transfer gate
//! and the three engines behind one handle. Callers construct it once with
//! their port implementations, optionally hydrate it from the Postgres
//! mirror, and drive every operation through it.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;

use certon_core::{BatchJobId, CertificateId, MonthWindow, QuotaKind, TenantId};
use certon_state::{BatchJob, Certificate, CertificateStatus};

use crate::batch::{BatchOrchestrator, CreateBatchRequest};
use crate::config::PipelineConfig;
use crate::cooldown::TransferGate;
use crate::db::Mirror;
use crate::error::PipelineError;
use crate::issuance::{CreateCertificateRequest, Issuer, ReconcileReport};
use crate::ports::{CustodyLedger, NotificationSink, PlanService, SettingsProvider};
use crate::quota::{QuotaLedger, QuotaUsage};
use crate::store::{BatchStore, CertificateCounts, CertificateStore};
use crate::transfer::{SweepReport, TransferEngine, TransferRunReport};

/// One handle over the whole issuance and custody-transfer pipeline.
///
/// Cheap to clone; clones share the underlying stores and ledgers.
#[derive(Clone)]
pub struct CertificatePipeline {
    config: PipelineConfig,
    certificates: CertificateStore,
    batches: BatchStore,
    quotas: QuotaLedger,
    issuer: Issuer,
    transfers: TransferEngine,
    orchestrator: BatchOrchestrator,
    mirror: Mirror,
}

impl CertificatePipeline {
    /// An in-memory pipeline over the given ports. Nothing survives a
    /// restart; pair with [`CertificatePipeline::with_pool`] for custody
    /// records that must.
    pub fn new(
        config: PipelineConfig,
        ledger: Arc<dyn CustodyLedger>,
        plans: Arc<dyn PlanService>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_pool(config, ledger, plans, settings, notifier, None)
    }

    /// A pipeline that mirrors every record write to Postgres when a pool
    /// is supplied. Call [`CertificatePipeline::hydrate`] afterwards to
    /// restore state from the mirror.
    pub fn with_pool(
        config: PipelineConfig,
        ledger: Arc<dyn CustodyLedger>,
        plans: Arc<dyn PlanService>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
        pool: Option<PgPool>,
    ) -> Self {
        let certificates = CertificateStore::new();
        let batches = BatchStore::new();
        let quotas = QuotaLedger::new();
        let mirror = Mirror::new(pool);

        let issuer = Issuer::new(
            certificates.clone(),
            quotas.clone(),
            Arc::clone(&ledger),
            Arc::clone(&plans),
            Arc::clone(&settings),
            Arc::clone(&notifier),
            mirror.clone(),
        );
        let transfers = TransferEngine::new(
            certificates.clone(),
            TransferGate::new(),
            Arc::clone(&ledger),
            Arc::clone(&plans),
            Arc::clone(&settings),
            Arc::clone(&notifier),
            mirror.clone(),
        )
        .with_backoff(config.backoff());
        let mut orchestrator = BatchOrchestrator::new(
            batches.clone(),
            issuer.clone(),
            quotas.clone(),
            plans,
            settings,
            notifier,
            mirror.clone(),
        );
        if let Some(deadline) = config.batch_run_deadline() {
            orchestrator = orchestrator.with_run_deadline(deadline);
        }

        Self {
            config,
            certificates,
            batches,
            quotas,
            issuer,
            transfers,
            orchestrator,
            mirror,
        }
    }

    /// The configuration this pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── persistence ─────────────────────────────────────────────────

    /// Create the mirror schema if missing, then load every mirrored
    /// certificate and batch job back into the in-memory stores and
    /// rebuild committed quota usage from them. No-op without a pool.
    pub async fn hydrate(&self) -> Result<(), PipelineError> {
        if !self.mirror.is_enabled() {
            return Ok(());
        }
        self.mirror
            .ensure_schema()
            .await
            .map_err(|e| PipelineError::Internal(format!("mirror schema setup failed: {e}")))?;
        let certs = self
            .mirror
            .load_certificates()
            .await
            .map_err(|e| PipelineError::Internal(format!("certificate hydration failed: {e}")))?;
        let jobs = self
            .mirror
            .load_batches()
            .await
            .map_err(|e| PipelineError::Internal(format!("batch hydration failed: {e}")))?;

        let (cert_count, batch_count) = (certs.len(), jobs.len());
        self.absorb(certs, jobs);
        tracing::info!(
            certificates = cert_count,
            batches = batch_count,
            "hydrated pipeline state from database"
        );
        Ok(())
    }

    /// Load records into the stores and rebuild committed quota usage.
    ///
    /// Every record consumed one issuance unit in the window it was
    /// created in; unresolved provisionals keep theirs until the
    /// reconciliation sweep rules on them. A transfer unit is rebuilt for
    /// every certificate that reached `pending_transfer`, in the window
    /// of that transition.
    fn absorb(&self, certs: Vec<Certificate>, jobs: Vec<BatchJob>) {
        let mut issuance: HashMap<(TenantId, MonthWindow), u32> = HashMap::new();
        let mut transfer: HashMap<(TenantId, MonthWindow), u32> = HashMap::new();

        for cert in certs {
            *issuance
                .entry((cert.tenant_id, MonthWindow::of(&cert.created_at)))
                .or_default() += 1;
            if matches!(
                cert.status,
                CertificateStatus::PendingTransfer
                    | CertificateStatus::TransferFailed
                    | CertificateStatus::TransferredToBrand
            ) {
                let scheduled_at = cert
                    .history
                    .iter()
                    .find(|change| change.to == CertificateStatus::PendingTransfer)
                    .map(|change| change.at)
                    .unwrap_or(cert.created_at);
                *transfer
                    .entry((cert.tenant_id, MonthWindow::of(&scheduled_at)))
                    .or_default() += 1;
            }
            self.certificates.insert_hydrated(cert);
        }
        for ((tenant, window), used) in issuance {
            self.quotas
                .preload_committed(tenant, QuotaKind::Issuance, window, used);
        }
        for ((tenant, window), used) in transfer {
            self.quotas
                .preload_committed(tenant, QuotaKind::Transfer, window, used);
        }
        for job in jobs {
            self.batches.insert(job);
        }
    }

    // ── issuance ────────────────────────────────────────────────────

    /// Issue one certificate. See [`Issuer::create_certificate`].
    pub async fn create_certificate(
        &self,
        request: CreateCertificateRequest,
    ) -> Result<Certificate, PipelineError> {
        self.issuer.create_certificate(request).await
    }

    /// Revoke a certificate, idempotently. Requires a non-empty reason.
    pub async fn revoke_certificate(
        &self,
        id: CertificateId,
        reason: &str,
    ) -> Result<Certificate, PipelineError> {
        self.issuer.revoke_certificate(id, reason).await
    }

    /// Fetch a certificate by ID.
    pub fn get_certificate(&self, id: CertificateId) -> Result<Certificate, PipelineError> {
        self.issuer.get_certificate(id)
    }

    /// A tenant's certificates, newest first, optionally filtered by status.
    pub fn list_certificates(
        &self,
        tenant_id: TenantId,
        status: Option<CertificateStatus>,
    ) -> Vec<Certificate> {
        self.issuer.list_certificates(tenant_id, status)
    }

    /// Per-status counts for a tenant's certificates.
    pub fn certificate_counts(&self, tenant_id: TenantId) -> CertificateCounts {
        self.issuer.certificate_counts(tenant_id)
    }

    /// Sweep provisional records older than the configured grace window
    /// and rule on each one against the ledger.
    pub async fn reconcile_provisional(&self) -> ReconcileReport {
        self.issuer
            .reconcile_provisional(self.config.reconcile_grace())
            .await
    }

    // ── batches ─────────────────────────────────────────────────────

    /// Accept and quota-reserve a batch job. See
    /// [`BatchOrchestrator::create_batch`].
    pub async fn create_batch(&self, request: CreateBatchRequest) -> Result<BatchJob, PipelineError> {
        self.orchestrator.create_batch(request).await
    }

    /// Drive a queued batch to a terminal state.
    pub async fn run_batch(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        self.orchestrator.run_batch(id).await
    }

    /// Flag a running batch to stop at the next chunk boundary.
    pub async fn cancel_batch(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        self.orchestrator.cancel_batch(id).await
    }

    /// A batch job's current counters and status.
    pub fn get_batch_progress(&self, id: BatchJobId) -> Result<BatchJob, PipelineError> {
        self.orchestrator.get_batch(id)
    }

    /// A tenant's batch jobs, newest first.
    pub fn list_batches(&self, tenant_id: TenantId) -> Vec<BatchJob> {
        self.orchestrator.list_batches(tenant_id)
    }

    // ── transfers ───────────────────────────────────────────────────

    /// Run every due transfer for one tenant, subject to its cooldown.
    pub async fn run_transfers(&self, tenant_id: TenantId) -> Result<TransferRunReport, PipelineError> {
        self.transfers.run_tenant(tenant_id).await
    }

    /// One sweep across every tenant with due transfers.
    pub async fn run_once(&self) -> SweepReport {
        self.transfers.run_once().await
    }

    /// Immediately retry one failed certificate, bypassing its backoff
    /// schedule but not its attempt cap.
    pub async fn retry_certificate(&self, id: CertificateId) -> Result<Certificate, PipelineError> {
        self.transfers.retry_certificate(id).await
    }

    /// Re-enter a tenant's retryable failed certificates into the
    /// transfer queue and run them, oldest first unless capped by `limit`.
    pub async fn retry_failed_transfers(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<TransferRunReport, PipelineError> {
        self.transfers.retry_failed(tenant_id, limit).await
    }

    // ── quota visibility ────────────────────────────────────────────

    /// Committed and held usage for the current calendar month.
    pub fn usage(&self, tenant_id: TenantId, kind: QuotaKind) -> QuotaUsage {
        self.quotas.usage(tenant_id, kind, MonthWindow::current())
    }

    /// Per-window usage for a tenant, newest window first.
    pub fn usage_history(
        &self,
        tenant_id: TenantId,
        kind: QuotaKind,
    ) -> Vec<(MonthWindow, QuotaUsage)> {
        self.quotas.usage_history(tenant_id, kind)
    }
}
