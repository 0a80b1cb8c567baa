//! # Certificate Issuance
//!
//! Drives the mint phase of the certificate lifecycle: quota reservation,
//! duplicate-slot claiming, the two-phase provisional/confirm mint against
//! the custody ledger, optional automatic transfer scheduling, revocation,
//! and the reconciliation sweep that rules on provisional records left
//! behind by ledger outages.
//!
//! ## Design Decision
//!
//! The provisional record is written and mirrored *before* the ledger call.
//! A crash or timeout between ledger success and local persistence then
//! leaves a reconcilable record instead of an orphaned on-ledger token: the
//! sweep asks the ledger what happened (the certificate ID is the mint
//! idempotency key) and either promotes the record or clears it and
//! restores the quota unit. Every other failure is definitive and rolls the
//! record back immediately.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use certon_core::{
    CertificateId, MonthWindow, PlanLimits, ProductId, QuotaKind, Recipient, TenantId,
    TenantTransferSettings, Timestamp, WalletAddress,
};
use certon_state::certificate::{Certificate, CertificateStatus, RevokeOutcome};

use crate::db::Mirror;
use crate::error::PipelineError;
use crate::ports::{
    CertificateEvent, CustodyLedger, LedgerError, MintRequest, MintStatus, NotificationSink,
    PlanService, SettingsProvider,
};
use crate::quota::QuotaLedger;
use crate::store::{CertificateCounts, CertificateStore};

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// A request to issue one certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCertificateRequest {
    /// The issuing tenant.
    pub tenant_id: TenantId,
    /// The product the certificate certifies.
    pub product_id: ProductId,
    /// Who the certificate is issued to.
    pub recipient: Recipient,
    /// Custom data to embed in the credential.
    #[serde(default)]
    pub metadata: Value,
}

/// Outcome of one reconciliation sweep over stale provisional records.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileReport {
    /// Stale provisional records examined.
    pub examined: usize,
    /// Records whose mint had landed; promoted to minted.
    pub promoted: usize,
    /// Records the ledger never saw; removed, quota restored.
    pub cleared: usize,
    /// Records still undecided (mint pending, or the ledger unreachable).
    pub unresolved: usize,
}

// ---------------------------------------------------------------------------
// Issuer
// ---------------------------------------------------------------------------

/// The issuance service.
#[derive(Clone)]
pub struct Issuer {
    certificates: CertificateStore,
    quotas: QuotaLedger,
    ledger: Arc<dyn CustodyLedger>,
    plans: Arc<dyn PlanService>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    mirror: Mirror,
}

impl Issuer {
    pub(crate) fn new(
        certificates: CertificateStore,
        quotas: QuotaLedger,
        ledger: Arc<dyn CustodyLedger>,
        plans: Arc<dyn PlanService>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
        mirror: Mirror,
    ) -> Self {
        Self {
            certificates,
            quotas,
            ledger,
            plans,
            settings,
            notifier,
            mirror,
        }
    }

    /// Issue one certificate: reserve a quota unit, claim the recipient
    /// slot, mint, and (when the tenant has auto transfer configured)
    /// schedule the custody transfer.
    pub async fn create_certificate(
        &self,
        request: CreateCertificateRequest,
    ) -> Result<Certificate, PipelineError> {
        let limits = self.plans.limits(request.tenant_id).await?;
        let settings = self.settings.transfer_settings(request.tenant_id).await?;

        let token = self.quotas.reserve(
            request.tenant_id,
            QuotaKind::Issuance,
            MonthWindow::current(),
            1,
            limits.limit_for(QuotaKind::Issuance),
        )?;

        match self.mint_certificate(&request, &settings).await {
            Ok(cert) => {
                token.commit_all();
                if settings.auto_transfer_ready() {
                    if let Some(scheduled) =
                        self.schedule_auto_transfer(&cert, &settings, &limits).await
                    {
                        return Ok(scheduled);
                    }
                }
                Ok(cert)
            }
            Err(err) => {
                // An unreachable ledger leaves the provisional record in
                // place, so its quota unit stays consumed until the
                // reconciliation sweep rules on the mint. Every other
                // failure rolled the record back; dropping the token
                // releases the unit.
                if matches!(err, PipelineError::LedgerUnavailable(_)) {
                    token.commit_all();
                }
                Err(err)
            }
        }
    }

    /// Mint one certificate against quota the caller has already reserved.
    /// Transfer scheduling is not this method's concern.
    ///
    /// Shared by [`Issuer::create_certificate`] and the batch driver, which
    /// holds a multi-unit reservation and settles it per recipient.
    pub(crate) async fn mint_certificate(
        &self,
        request: &CreateCertificateRequest,
        settings: &TenantTransferSettings,
    ) -> Result<Certificate, PipelineError> {
        let cert = Certificate::provisional(
            request.tenant_id,
            request.product_id.clone(),
            request.recipient.clone(),
            settings.attempt_cap(),
            request.metadata.clone(),
        );
        let id = cert.id;
        self.certificates.insert_new(cert.clone())?;
        self.mirror.save_certificate(&cert).await;

        let mint_request = MintRequest {
            certificate_id: id,
            tenant_id: request.tenant_id,
            product_id: request.product_id.clone(),
            recipient: request.recipient.clone(),
            metadata: request.metadata.clone(),
        };

        match self.ledger.mint(&mint_request).await {
            Ok(receipt) => {
                let token_id = receipt.token_id.clone();
                let minted = self
                    .certificates
                    .try_update(id, move |c| {
                        c.attach_mint_receipt(
                            receipt.token_id,
                            receipt.tx_hash,
                            receipt.contract_address,
                        )?;
                        c.confirm_minted()?;
                        Ok(c.clone())
                    })
                    .ok_or_else(|| {
                        PipelineError::Internal(format!("certificate {id} vanished during mint"))
                    })??;
                self.mirror.save_certificate(&minted).await;
                tracing::info!(
                    certificate_id = %id,
                    tenant = %request.tenant_id,
                    token = %token_id,
                    "certificate minted",
                );
                self.notifier
                    .publish(CertificateEvent::CertificateMinted {
                        certificate_id: id,
                        tenant_id: request.tenant_id,
                        token_id,
                    })
                    .await;
                Ok(minted)
            }
            Err(LedgerError::Unavailable(msg)) => {
                tracing::warn!(
                    certificate_id = %id,
                    tenant = %request.tenant_id,
                    error = %msg,
                    "ledger unreachable during mint, keeping provisional record",
                );
                Err(PipelineError::LedgerUnavailable(msg))
            }
            Err(err) => {
                // Definitive rejection: the token was never created, so the
                // record and its slot roll back.
                self.certificates.remove(id);
                self.mirror.delete_certificate(id).await;
                Err(err.into())
            }
        }
    }

    /// Schedule the custody transfer for a freshly minted certificate.
    ///
    /// Failure here never fails the creation: on transfer-quota exhaustion
    /// or a lost record the certificate simply stays minted.
    async fn schedule_auto_transfer(
        &self,
        cert: &Certificate,
        settings: &TenantTransferSettings,
        limits: &PlanLimits,
    ) -> Option<Certificate> {
        let wallet = settings.brand_wallet.clone()?;
        let token = match self.quotas.reserve(
            cert.tenant_id,
            QuotaKind::Transfer,
            MonthWindow::current(),
            1,
            limits.limit_for(QuotaKind::Transfer),
        ) {
            Ok(token) => token,
            Err(err) => {
                tracing::info!(
                    certificate_id = %cert.id,
                    tenant = %cert.tenant_id,
                    %err,
                    "auto transfer not scheduled",
                );
                return None;
            }
        };

        let scheduled = self.apply_scheduled_transfer(cert.id, wallet).await?;
        // Transfer quota is consumed at scheduling time; retries of this
        // transfer never charge again.
        token.commit_all();
        Some(scheduled)
    }

    /// Move a minted certificate into the transfer queue, due immediately.
    ///
    /// Quota is the caller's concern: the single-certificate path reserves
    /// one unit around this call, the batch driver settles one unit of its
    /// block reservation per scheduled transfer.
    pub(crate) async fn apply_scheduled_transfer(
        &self,
        id: CertificateId,
        wallet: WalletAddress,
    ) -> Option<Certificate> {
        let updated = self.certificates.try_update(id, move |c| {
            c.schedule_transfer(wallet, Timestamp::now())?;
            Ok(c.clone())
        })?;
        let scheduled = match updated {
            Ok(scheduled) => scheduled,
            Err(err) => {
                tracing::warn!(
                    certificate_id = %id,
                    %err,
                    "transfer scheduling rejected",
                );
                return None;
            }
        };
        self.mirror.save_certificate(&scheduled).await;
        tracing::info!(
            certificate_id = %id,
            tenant = %scheduled.tenant_id,
            "custody transfer scheduled",
        );
        Some(scheduled)
    }

    /// Revoke a certificate, freeing its recipient slot. Idempotent; the
    /// revocation event fires only on the first call.
    pub async fn revoke_certificate(
        &self,
        id: CertificateId,
        reason: &str,
    ) -> Result<Certificate, PipelineError> {
        let (outcome, cert) = self
            .certificates
            .try_update(id, |c| c.revoke(reason).map(|outcome| (outcome, c.clone())))
            .ok_or_else(|| PipelineError::NotFound(format!("certificate {id}")))??;

        if outcome == RevokeOutcome::Revoked {
            self.mirror.save_certificate(&cert).await;
            tracing::info!(
                certificate_id = %id,
                tenant = %cert.tenant_id,
                reason,
                "certificate revoked",
            );
            self.notifier
                .publish(CertificateEvent::CertificateRevoked {
                    certificate_id: id,
                    tenant_id: cert.tenant_id,
                })
                .await;
        }
        Ok(cert)
    }

    /// Look up one certificate.
    pub fn get_certificate(&self, id: CertificateId) -> Result<Certificate, PipelineError> {
        self.certificates
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(format!("certificate {id}")))
    }

    /// A tenant's certificates, newest first, optionally filtered by status.
    pub fn list_certificates(
        &self,
        tenant_id: TenantId,
        status: Option<CertificateStatus>,
    ) -> Vec<Certificate> {
        self.certificates.list_for_tenant(tenant_id, status)
    }

    /// Per-status certificate counts for a tenant.
    pub fn certificate_counts(&self, tenant_id: TenantId) -> CertificateCounts {
        self.certificates.counts_for_tenant(tenant_id)
    }

    /// Sweep provisional records older than `grace` and rule on each one by
    /// asking the ledger whether its mint landed.
    pub async fn reconcile_provisional(&self, grace: Duration) -> ReconcileReport {
        let cutoff = Timestamp::now().saturating_sub(grace);
        let stale = self.certificates.provisional_before(&cutoff);
        let mut report = ReconcileReport {
            examined: stale.len(),
            ..ReconcileReport::default()
        };

        for cert in stale {
            match self.ledger.mint_status(cert.id).await {
                Ok(MintStatus::Confirmed(receipt)) => {
                    let token_id = receipt.token_id.clone();
                    let promoted = self.certificates.try_update(cert.id, move |c| {
                        c.attach_mint_receipt(
                            receipt.token_id,
                            receipt.tx_hash,
                            receipt.contract_address,
                        )?;
                        c.confirm_minted()?;
                        Ok(c.clone())
                    });
                    match promoted {
                        Some(Ok(minted)) => {
                            self.mirror.save_certificate(&minted).await;
                            tracing::info!(
                                certificate_id = %cert.id,
                                tenant = %cert.tenant_id,
                                "promoted provisional record, mint had landed",
                            );
                            self.notifier
                                .publish(CertificateEvent::CertificateMinted {
                                    certificate_id: cert.id,
                                    tenant_id: cert.tenant_id,
                                    token_id,
                                })
                                .await;
                            report.promoted += 1;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(
                                certificate_id = %cert.id,
                                %err,
                                "could not promote provisional record",
                            );
                            report.unresolved += 1;
                        }
                        None => report.unresolved += 1,
                    }
                }
                Ok(MintStatus::Unknown) => {
                    self.certificates.remove(cert.id);
                    self.mirror.delete_certificate(cert.id).await;
                    self.quotas.restore_committed(
                        cert.tenant_id,
                        QuotaKind::Issuance,
                        MonthWindow::of(&cert.created_at),
                        1,
                    );
                    tracing::info!(
                        certificate_id = %cert.id,
                        tenant = %cert.tenant_id,
                        "cleared provisional record, mint never landed",
                    );
                    report.cleared += 1;
                }
                Ok(MintStatus::Pending) => {
                    report.unresolved += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        certificate_id = %cert.id,
                        %err,
                        "mint status lookup failed",
                    );
                    report.unresolved += 1;
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testkit::{mint_receipt, FixedPlans, FixedSettings, RecordingSink, ScriptedLedger};

    struct Fixture {
        issuer: Issuer,
        ledger: Arc<ScriptedLedger>,
        sink: Arc<RecordingSink>,
        quotas: QuotaLedger,
        certificates: CertificateStore,
    }

    fn fixture(limits: PlanLimits, settings: Arc<FixedSettings>) -> Fixture {
        let ledger = ScriptedLedger::new();
        let sink = RecordingSink::new();
        let certificates = CertificateStore::new();
        let quotas = QuotaLedger::new();
        let issuer = Issuer::new(
            certificates.clone(),
            quotas.clone(),
            ledger.clone(),
            Arc::new(FixedPlans(limits)),
            settings,
            sink.clone(),
            Mirror::disabled(),
        );
        Fixture {
            issuer,
            ledger,
            sink,
            quotas,
            certificates,
        }
    }

    fn request(tenant: TenantId, addr: &str) -> CreateCertificateRequest {
        CreateCertificateRequest {
            tenant_id: tenant,
            product_id: ProductId::new("prod-1").unwrap(),
            recipient: Recipient::email(addr).unwrap(),
            metadata: json!({"edition": 1}),
        }
    }

    fn issuance_used(fx: &Fixture, tenant: TenantId) -> u32 {
        fx.quotas
            .usage(tenant, QuotaKind::Issuance, MonthWindow::current())
            .total()
    }

    #[tokio::test]
    async fn create_mints_and_commits_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        let cert = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();

        assert_eq!(cert.status, CertificateStatus::Minted);
        assert!(cert.has_mint_receipt());
        assert_eq!(issuance_used(&fx, tenant), 1);
        assert!(matches!(
            fx.sink.events().as_slice(),
            [CertificateEvent::CertificateMinted { .. }]
        ));
    }

    #[tokio::test]
    async fn auto_transfer_schedules_after_mint() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::auto());

        let cert = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();

        assert_eq!(cert.status, CertificateStatus::PendingTransfer);
        assert!(cert.brand_wallet.is_some());
        assert!(cert.is_transfer_due(&Timestamp::now()));
        let transfers = fx
            .quotas
            .usage(tenant, QuotaKind::Transfer, MonthWindow::current());
        assert_eq!(transfers.committed, 1);
        assert_eq!(transfers.held, 0);
    }

    #[tokio::test]
    async fn auto_transfer_skipped_when_transfer_quota_exhausted() {
        let tenant = TenantId::new();
        let limits = PlanLimits {
            transfers_per_month: 0,
            ..PlanLimits::default()
        };
        let fx = fixture(limits, FixedSettings::auto());

        let cert = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();

        // Creation still succeeds; the certificate just stays minted.
        assert_eq!(cert.status, CertificateStatus::Minted);
        assert_eq!(
            fx.quotas
                .usage(tenant, QuotaKind::Transfer, MonthWindow::current())
                .total(),
            0
        );
    }

    #[tokio::test]
    async fn duplicate_recipient_rejected_without_consuming_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        fx.issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
        // Same slot under a different spelling.
        let err = fx
            .issuer
            .create_certificate(request(tenant, "  HOLDER@example.com "))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::CertificateAlreadyExists { .. }));
        assert_eq!(issuance_used(&fx, tenant), 1);
        assert_eq!(fx.certificates.len(), 1);
    }

    #[tokio::test]
    async fn quota_exhaustion_rejects_before_any_write() {
        let tenant = TenantId::new();
        let limits = PlanLimits {
            issuance_per_month: 1,
            ..PlanLimits::default()
        };
        let fx = fixture(limits, FixedSettings::manual());

        fx.issuer
            .create_certificate(request(tenant, "a@example.com"))
            .await
            .unwrap();
        let err = fx
            .issuer
            .create_certificate(request(tenant, "b@example.com"))
            .await
            .unwrap_err();

        match err {
            PipelineError::QuotaExceeded { used, limit, .. } => {
                assert_eq!(used, 1);
                assert_eq!(limit, 1);
            }
            other => panic!("expected QuotaExceeded, got: {other:?}"),
        }
        assert_eq!(fx.certificates.len(), 1);
        assert_eq!(fx.ledger.mint_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mint_rejection_rolls_back_record_and_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());
        fx.ledger
            .script_mint(Err(LedgerError::MintRejected("bad metadata".into())));

        let err = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MintFailed(_)));
        assert!(fx.certificates.is_empty());
        assert_eq!(issuance_used(&fx, tenant), 0);

        // The slot is free again.
        fx.issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ledger_outage_keeps_provisional_record_and_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());
        fx.ledger
            .script_mint(Err(LedgerError::Unavailable("timeout".into())));

        let err = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::LedgerUnavailable(_)));
        let pending = fx
            .issuer
            .list_certificates(tenant, Some(CertificateStatus::PendingConfirmation));
        assert_eq!(pending.len(), 1);
        let used = fx
            .quotas
            .usage(tenant, QuotaKind::Issuance, MonthWindow::current());
        assert_eq!(used.committed, 1);
        assert_eq!(used.held, 0);
    }

    #[tokio::test]
    async fn revoke_publishes_once() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        let cert = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
        let first = fx
            .issuer
            .revoke_certificate(cert.id, "counterfeit claim")
            .await
            .unwrap();
        assert_eq!(first.status, CertificateStatus::Revoked);

        let second = fx.issuer.revoke_certificate(cert.id, "again").await.unwrap();
        assert_eq!(second.revoked_reason.as_deref(), Some("counterfeit claim"));

        let revocations = fx
            .sink
            .events()
            .iter()
            .filter(|e| matches!(e, CertificateEvent::CertificateRevoked { .. }))
            .count();
        assert_eq!(revocations, 1);
    }

    #[tokio::test]
    async fn revoke_frees_slot_but_not_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        let cert = fx
            .issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
        fx.issuer.revoke_certificate(cert.id, "recall").await.unwrap();

        // Re-issuing to the same recipient succeeds, and both issuances
        // count against the month's quota.
        fx.issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
        assert_eq!(issuance_used(&fx, tenant), 2);
    }

    #[tokio::test]
    async fn revoke_missing_is_not_found() {
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());
        let err = fx
            .issuer
            .revoke_certificate(CertificateId::new(), "gone")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn reconcile_promotes_record_whose_mint_landed() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        let mut cert = Certificate::provisional(
            tenant,
            ProductId::new("prod-1").unwrap(),
            Recipient::email("holder@example.com").unwrap(),
            3,
            Value::Null,
        );
        cert.created_at = Timestamp::now().saturating_sub(Duration::hours(1));
        let id = cert.id;
        fx.certificates.insert_new(cert).unwrap();
        fx.ledger
            .script_status(Ok(MintStatus::Confirmed(mint_receipt(77))));

        let report = fx.issuer.reconcile_provisional(Duration::minutes(15)).await;

        assert_eq!(report.examined, 1);
        assert_eq!(report.promoted, 1);
        let promoted = fx.issuer.get_certificate(id).unwrap();
        assert_eq!(promoted.status, CertificateStatus::Minted);
        assert_eq!(promoted.token_id.as_ref().map(|t| t.as_str()), Some("tok-77"));
        assert!(matches!(
            fx.sink.events().as_slice(),
            [CertificateEvent::CertificateMinted { .. }]
        ));
    }

    #[tokio::test]
    async fn reconcile_clears_unknown_mint_and_restores_quota() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());
        fx.ledger
            .script_mint(Err(LedgerError::Unavailable("timeout".into())));

        fx.issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap_err();
        let id = fx
            .issuer
            .list_certificates(tenant, None)
            .first()
            .map(|c| c.id)
            .unwrap();
        fx.certificates
            .try_update(id, |c| {
                c.created_at = Timestamp::now().saturating_sub(Duration::hours(1));
                Ok(())
            })
            .unwrap()
            .unwrap();

        // Status script empty: the ledger reports Unknown.
        let report = fx.issuer.reconcile_provisional(Duration::minutes(15)).await;

        assert_eq!(report.cleared, 1);
        assert!(fx.certificates.is_empty());
        assert_eq!(issuance_used(&fx, tenant), 0);

        // Slot and quota are both free again.
        fx.issuer
            .create_certificate(request(tenant, "holder@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconcile_leaves_pending_and_young_records_alone() {
        let tenant = TenantId::new();
        let fx = fixture(PlanLimits::default(), FixedSettings::manual());

        // One stale record the ledger still reports as pending.
        let mut stale = Certificate::provisional(
            tenant,
            ProductId::new("prod-1").unwrap(),
            Recipient::email("stale@example.com").unwrap(),
            3,
            Value::Null,
        );
        stale.created_at = Timestamp::now().saturating_sub(Duration::hours(1));
        fx.certificates.insert_new(stale).unwrap();

        // One record still inside the grace window.
        let young = Certificate::provisional(
            tenant,
            ProductId::new("prod-1").unwrap(),
            Recipient::email("young@example.com").unwrap(),
            3,
            Value::Null,
        );
        fx.certificates.insert_new(young).unwrap();

        fx.ledger.script_status(Ok(MintStatus::Pending));
        let report = fx.issuer.reconcile_provisional(Duration::minutes(15)).await;

        assert_eq!(report.examined, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.cleared, 0);
        assert_eq!(fx.certificates.len(), 2);
    }
}
