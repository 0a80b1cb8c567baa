//! # Custody Transfer Engine
//!
//! Moves minted credentials from custodial holding to each tenant's brand
//! wallet: draws due certificates, fans ledger calls out across a bounded
//! chunk, and books every outcome back through the certificate state
//! machine with exponential-backoff retry scheduling.
//!
//! ## Design Decision
//!
//! The engine is deliberately stateless between runs. Everything it needs —
//! what is due, how often a tenant may run, how many attempts a certificate
//! has left — lives on the certificate records and the tenant's settings
//! snapshot, so a crashed run loses nothing and a restarted process resumes
//! from the records alone. The per-tenant cooldown gate is the only
//! in-process state, and losing it merely permits one early run.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use certon_core::{CertificateId, TenantId, Timestamp, TxHash};
use certon_state::certificate::{Certificate, CertificateStatus};

use crate::cooldown::TransferGate;
use crate::db::Mirror;
use crate::error::PipelineError;
use crate::ports::{
    CertificateEvent, CustodyLedger, NotificationSink, PlanService, ReceiptStatus,
    SettingsProvider, TransferRequest,
};
use crate::store::CertificateStore;

// ---------------------------------------------------------------------------
// Backoff policy
// ---------------------------------------------------------------------------

/// Exponential backoff for transfer retries: attempt `n` waits
/// `base * 2^(n-1)` seconds, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt, in seconds.
    pub base_secs: u64,
    /// Upper bound on any delay, in seconds.
    pub cap_secs: u64,
}

impl BackoffPolicy {
    /// The delay scheduled after `attempts_used` consumed attempts.
    pub fn delay_secs(&self, attempts_used: u32) -> u64 {
        let shift = attempts_used.saturating_sub(1);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.base_secs.saturating_mul(factor).min(self.cap_secs)
    }

    /// When the next attempt becomes due, measured from `now`.
    pub fn next_attempt_at(&self, now: &Timestamp, attempts_used: u32) -> Timestamp {
        let secs = self.delay_secs(attempts_used).min(i64::MAX as u64) as i64;
        now.saturating_add(Duration::seconds(secs))
    }
}

impl Default for BackoffPolicy {
    /// One hour doubling up to one day.
    fn default() -> Self {
        Self {
            base_secs: 3_600,
            cap_secs: 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Run reports
// ---------------------------------------------------------------------------

/// Outcome of one transfer pass for one tenant.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TransferRunReport {
    /// Certificates drawn for this pass.
    pub attempted: usize,
    /// Transfers the ledger confirmed.
    pub succeeded: usize,
    /// Attempts that failed (including the exhausted ones).
    pub failed: usize,
    /// Failed attempts that used up the certificate's allowance.
    pub exhausted: usize,
    /// Candidates that could not be executed at all (lost a state race or
    /// carried no ledger linkage).
    pub skipped: usize,
}

impl TransferRunReport {
    fn merge(&mut self, other: TransferRunReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.exhausted += other.exhausted;
        self.skipped += other.skipped;
    }
}

/// Outcome of one sweep across every tenant with due work.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    /// Tenants that had due transfers when the sweep started.
    pub tenants_due: usize,
    /// Tenants whose pass ran.
    pub tenants_run: usize,
    /// Tenants skipped because their cooldown window had not passed.
    pub tenants_cooling: usize,
    /// Tenants whose pass failed outright (settings or plan lookup).
    pub tenants_failed: usize,
    /// Per-certificate outcome totals across all passes that ran.
    pub totals: TransferRunReport,
}

/// Per-certificate outcome of one executed attempt.
enum AttemptOutcome {
    Succeeded,
    Retrying,
    Exhausted,
    Skipped,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The custody transfer engine.
#[derive(Clone)]
pub struct TransferEngine {
    certificates: CertificateStore,
    gate: TransferGate,
    ledger: Arc<dyn CustodyLedger>,
    plans: Arc<dyn PlanService>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    backoff: BackoffPolicy,
    mirror: Mirror,
}

impl TransferEngine {
    pub(crate) fn new(
        certificates: CertificateStore,
        gate: TransferGate,
        ledger: Arc<dyn CustodyLedger>,
        plans: Arc<dyn PlanService>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
        mirror: Mirror,
    ) -> Self {
        Self {
            certificates,
            gate,
            ledger,
            plans,
            settings,
            notifier,
            backoff: BackoffPolicy::default(),
            mirror,
        }
    }

    pub(crate) fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The policy in force, for surfacing in status output.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// One transfer pass for one tenant: re-enter failed certificates whose
    /// backoff has elapsed, draw the due queue, and execute it.
    ///
    /// Rejected with [`PipelineError::RateLimited`] while the tenant's
    /// cooldown window from the previous pass is still open.
    pub async fn run_tenant(&self, tenant_id: TenantId) -> Result<TransferRunReport, PipelineError> {
        let settings = self.settings.transfer_settings(tenant_id).await?;
        let limits = self.plans.limits(tenant_id).await?;
        let now = Timestamp::now();
        self.gate.check_and_stamp(tenant_id, now, settings.cooldown())?;

        for cert in self.certificates.failed_due(tenant_id, &now) {
            match self.certificates.try_update(cert.id, |c| {
                c.reenter_transfer(now)?;
                Ok(c.clone())
            }) {
                Some(Ok(reentered)) => self.mirror.save_certificate(&reentered).await,
                Some(Err(err)) => {
                    tracing::warn!(
                        certificate_id = %cert.id,
                        %err,
                        "could not re-enter transfer queue",
                    );
                }
                None => {}
            }
        }

        let mut queue = self.certificates.transfer_queue(tenant_id, &now);
        let cap = if settings.batch_transfer_enabled {
            limits.max_batch_size as usize
        } else {
            1
        };
        queue.truncate(cap);

        let report = self
            .execute_batch(queue, limits.effective_concurrency())
            .await;
        tracing::info!(
            tenant = %tenant_id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "transfer pass finished",
        );
        Ok(report)
    }

    /// One sweep over every tenant holding due transfers. Tenants still
    /// inside their cooldown window are skipped, not failed.
    pub async fn run_once(&self) -> SweepReport {
        let now = Timestamp::now();
        let tenants = self.certificates.tenants_with_due_transfers(&now);
        let mut report = SweepReport {
            tenants_due: tenants.len(),
            ..SweepReport::default()
        };
        for tenant_id in tenants {
            match self.run_tenant(tenant_id).await {
                Ok(run) => {
                    report.tenants_run += 1;
                    report.totals.merge(run);
                }
                Err(PipelineError::RateLimited { retry_after_secs }) => {
                    tracing::debug!(tenant = %tenant_id, retry_after_secs, "tenant cooling down");
                    report.tenants_cooling += 1;
                }
                Err(err) => {
                    tracing::warn!(tenant = %tenant_id, %err, "transfer pass failed");
                    report.tenants_failed += 1;
                }
            }
        }
        report
    }

    /// Manually retry one failed certificate, ignoring its backoff
    /// schedule. An exhausted certificate gets its allowance extended by
    /// one attempt first; the attempt counter itself never resets. The
    /// tenant's cooldown gate applies to manual retries the same as to
    /// scheduled passes.
    pub async fn retry_certificate(&self, id: CertificateId) -> Result<Certificate, PipelineError> {
        let cert = self
            .certificates
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(format!("certificate {id}")))?;
        if cert.status != CertificateStatus::TransferFailed {
            return Err(PipelineError::InvalidTransition(format!(
                "certificate {id} is {}, only failed transfers can be retried",
                cert.status.as_str()
            )));
        }
        let settings = self.settings.transfer_settings(cert.tenant_id).await?;
        let now = Timestamp::now();
        self.gate
            .check_and_stamp(cert.tenant_id, now, settings.cooldown())?;

        let reentered = self
            .certificates
            .try_update(id, |c| {
                if c.retries_exhausted() {
                    c.extend_retry_allowance(1)?;
                }
                c.reenter_transfer(now)?;
                Ok(c.clone())
            })
            .ok_or_else(|| PipelineError::NotFound(format!("certificate {id}")))??;
        self.mirror.save_certificate(&reentered).await;
        tracing::info!(
            certificate_id = %id,
            tenant = %reentered.tenant_id,
            attempts = reentered.transfer_attempts,
            "manual transfer retry",
        );

        self.execute_transfer(reentered).await;
        self.certificates
            .get(id)
            .ok_or_else(|| PipelineError::Internal(format!("certificate {id} vanished during retry")))
    }

    /// Manually retry failed certificates with attempts remaining for one
    /// tenant, ignoring each certificate's backoff schedule. `limit` caps
    /// how many are drawn, oldest schedule first; `None` retries them all.
    /// The cooldown gate still applies.
    pub async fn retry_failed(
        &self,
        tenant_id: TenantId,
        limit: Option<usize>,
    ) -> Result<TransferRunReport, PipelineError> {
        let settings = self.settings.transfer_settings(tenant_id).await?;
        let limits = self.plans.limits(tenant_id).await?;
        let now = Timestamp::now();
        self.gate.check_and_stamp(tenant_id, now, settings.cooldown())?;

        let mut failed = self.certificates.failed_retryable(tenant_id);
        if let Some(limit) = limit {
            failed.truncate(limit);
        }

        let mut queue = Vec::with_capacity(failed.len());
        for cert in failed {
            match self.certificates.try_update(cert.id, |c| {
                c.reenter_transfer(now)?;
                Ok(c.clone())
            }) {
                Some(Ok(reentered)) => {
                    self.mirror.save_certificate(&reentered).await;
                    queue.push(reentered);
                }
                Some(Err(err)) => {
                    tracing::warn!(certificate_id = %cert.id, %err, "bulk retry skipped one");
                }
                None => {}
            }
        }
        Ok(self
            .execute_batch(queue, limits.effective_concurrency())
            .await)
    }

    /// Execute a drawn queue in chunks of `width` concurrent ledger calls.
    async fn execute_batch(&self, queue: Vec<Certificate>, width: usize) -> TransferRunReport {
        let mut report = TransferRunReport {
            attempted: queue.len(),
            ..TransferRunReport::default()
        };
        for chunk in queue.chunks(width.max(1)) {
            let mut tasks = tokio::task::JoinSet::new();
            for cert in chunk {
                let engine = self.clone();
                let cert = cert.clone();
                tasks.spawn(async move { engine.execute_transfer(cert).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(AttemptOutcome::Succeeded) => report.succeeded += 1,
                    Ok(AttemptOutcome::Retrying) => report.failed += 1,
                    Ok(AttemptOutcome::Exhausted) => {
                        report.failed += 1;
                        report.exhausted += 1;
                    }
                    Ok(AttemptOutcome::Skipped) => report.skipped += 1,
                    Err(err) => {
                        tracing::error!(%err, "transfer task panicked");
                        report.skipped += 1;
                    }
                }
            }
        }
        report
    }

    /// Submit a transfer and wait for its receipt to confirm. Acceptance
    /// alone is not success: custody has only moved once the ledger
    /// reports the receipt settled. A pending or failed receipt, or an
    /// error on either call, comes back as the failure reason.
    async fn submit_and_confirm(&self, request: &TransferRequest) -> Result<TxHash, String> {
        let receipt = self
            .ledger
            .transfer(request)
            .await
            .map_err(|err| err.to_string())?;
        match self.ledger.query_receipt(&receipt.tx_hash).await {
            Ok(ReceiptStatus::Confirmed) => Ok(receipt.tx_hash),
            Ok(ReceiptStatus::Pending) => {
                Err(format!("receipt {} unsettled at deadline", receipt.tx_hash))
            }
            Ok(ReceiptStatus::Failed) => {
                Err(format!("receipt {} failed on the ledger", receipt.tx_hash))
            }
            Err(err) => Err(err.to_string()),
        }
    }

    /// Execute one transfer attempt and book its outcome.
    async fn execute_transfer(&self, cert: Certificate) -> AttemptOutcome {
        let (Some(token_id), Some(contract_address), Some(to_wallet)) = (
            cert.token_id.clone(),
            cert.contract_address.clone(),
            cert.brand_wallet.clone(),
        ) else {
            // Unreachable through the normal lifecycle; a mirrored row was
            // edited out from under us. Park it out of the queue.
            tracing::error!(
                certificate_id = %cert.id,
                "transfer candidate missing ledger linkage",
            );
            if let Some(Ok(parked)) = self
                .certificates
                .try_update(cert.id, |c| {
                    c.record_transfer_failure(None)?;
                    Ok(c.clone())
                })
            {
                self.mirror.save_certificate(&parked).await;
            }
            return AttemptOutcome::Skipped;
        };

        let request = TransferRequest {
            certificate_id: cert.id,
            token_id,
            contract_address,
            to_wallet,
        };
        match self.submit_and_confirm(&request).await {
            Ok(tx_hash) => {
                let recorded = tx_hash.clone();
                let updated = self.certificates.try_update(cert.id, move |c| {
                    c.record_transfer_success(recorded)?;
                    Ok(c.clone())
                });
                match updated {
                    Some(Ok(done)) => {
                        self.mirror.save_certificate(&done).await;
                        tracing::info!(
                            certificate_id = %cert.id,
                            tenant = %cert.tenant_id,
                            tx = %tx_hash,
                            "custody transfer confirmed",
                        );
                        self.notifier
                            .publish(CertificateEvent::TransferSucceeded {
                                certificate_id: cert.id,
                                tenant_id: cert.tenant_id,
                                tx_hash,
                            })
                            .await;
                        AttemptOutcome::Succeeded
                    }
                    Some(Err(err)) => {
                        tracing::warn!(certificate_id = %cert.id, %err, "lost transfer state race");
                        AttemptOutcome::Skipped
                    }
                    None => AttemptOutcome::Skipped,
                }
            }
            Err(reason) => {
                // Timeouts and unsettled receipts count as failed attempts:
                // the conservative reading keeps a possibly-landed transfer
                // from being resubmitted before its next scheduled attempt.
                let now = Timestamp::now();
                let attempts_after = cert.transfer_attempts.saturating_add(1);
                let will_retry = attempts_after < cert.max_transfer_attempts;
                let next_at = will_retry.then(|| self.backoff.next_attempt_at(&now, attempts_after));
                let updated = self.certificates.try_update(cert.id, |c| {
                    c.record_transfer_failure(next_at)?;
                    Ok(c.clone())
                });
                match updated {
                    Some(Ok(failed)) => {
                        self.mirror.save_certificate(&failed).await;
                        tracing::warn!(
                            certificate_id = %cert.id,
                            tenant = %cert.tenant_id,
                            attempts = failed.transfer_attempts,
                            max_attempts = failed.max_transfer_attempts,
                            error = %reason,
                            will_retry,
                            "custody transfer failed",
                        );
                        if will_retry {
                            self.notifier
                                .publish(CertificateEvent::TransferFailed {
                                    certificate_id: cert.id,
                                    tenant_id: cert.tenant_id,
                                    attempts: failed.transfer_attempts,
                                    will_retry: true,
                                })
                                .await;
                            AttemptOutcome::Retrying
                        } else {
                            self.notifier
                                .publish(CertificateEvent::TransferExhausted {
                                    certificate_id: cert.id,
                                    tenant_id: cert.tenant_id,
                                    attempts: failed.transfer_attempts,
                                })
                                .await;
                            AttemptOutcome::Exhausted
                        }
                    }
                    Some(Err(race)) => {
                        tracing::warn!(certificate_id = %cert.id, %race, "lost transfer state race");
                        AttemptOutcome::Skipped
                    }
                    None => AttemptOutcome::Skipped,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
