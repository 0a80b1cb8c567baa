//! # Postgres Mirror
//!
//! Optional write-through persistence for certificates and batch jobs.
//! The in-memory stores stay authoritative during operation; the mirror
//! exists so a restart can rebuild them via [`Mirror::load_certificates`]
//! and [`Mirror::load_batches`].
//!
//! Mirror writes are best-effort: a failed write is logged and the
//! operation that triggered it proceeds. Reads happen only at startup.

pub mod batches;
pub mod certificates;

use sqlx::PgPool;

use certon_core::CertificateId;
use certon_state::{BatchJob, Certificate};

/// Schema bootstrap statements, executed in order and all idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS certificates (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        product_id TEXT NOT NULL,
        recipient_method TEXT NOT NULL,
        recipient_address TEXT NOT NULL,
        token_id TEXT,
        tx_hash TEXT,
        contract_address TEXT,
        status TEXT NOT NULL,
        transfer_attempts BIGINT NOT NULL,
        max_transfer_attempts BIGINT NOT NULL,
        next_transfer_attempt_at TIMESTAMPTZ,
        brand_wallet TEXT,
        transfer_tx_hash TEXT,
        metadata JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ,
        revoked_reason TEXT,
        history JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS certificates_tenant_idx
        ON certificates (tenant_id)",
    // One non-revoked certificate per issuance slot, enforced at the
    // storage layer as well as in CertificateStore.
    "CREATE UNIQUE INDEX IF NOT EXISTS certificates_active_slot_idx
        ON certificates (tenant_id, product_id, recipient_method, recipient_address)
        WHERE status <> 'revoked'",
    "CREATE TABLE IF NOT EXISTS batch_jobs (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        product_id TEXT NOT NULL,
        recipients JSONB NOT NULL,
        status TEXT NOT NULL,
        processed BIGINT NOT NULL,
        successful BIGINT NOT NULL,
        failed BIGINT NOT NULL,
        errors JSONB NOT NULL,
        cancel_requested BOOLEAN NOT NULL,
        continue_on_error BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS batch_jobs_tenant_idx
        ON batch_jobs (tenant_id)",
];

/// Handle over an optional Postgres pool. With no pool every write is a
/// no-op and every load returns empty.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    pool: Option<PgPool>,
}

impl Mirror {
    /// A mirror over the given pool, or a disabled mirror for `None`.
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool }
    }

    /// A mirror that persists nothing.
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Whether a pool is attached.
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        tracing::debug!("mirror schema ensured");
        Ok(())
    }

    /// Write a certificate, replacing any previous version.
    pub async fn save_certificate(&self, cert: &Certificate) {
        let Some(pool) = &self.pool else {
            return;
        };
        if let Err(err) = certificates::upsert(pool, cert).await {
            tracing::warn!(
                certificate_id = %cert.id,
                error = %err,
                "certificate mirror write failed"
            );
        }
    }

    /// Delete a certificate row. Used when a provisional record is
    /// cleared during reconciliation or after a definitive mint rejection.
    pub async fn delete_certificate(&self, id: CertificateId) {
        let Some(pool) = &self.pool else {
            return;
        };
        if let Err(err) = certificates::delete(pool, id).await {
            tracing::warn!(
                certificate_id = %id,
                error = %err,
                "certificate mirror delete failed"
            );
        }
    }

    /// Write a batch job, replacing any previous version.
    pub async fn save_batch(&self, job: &BatchJob) {
        let Some(pool) = &self.pool else {
            return;
        };
        if let Err(err) = batches::upsert(pool, job).await {
            tracing::warn!(
                batch_id = %job.id,
                error = %err,
                "batch mirror write failed"
            );
        }
    }

    /// All mirrored certificates. Rows that fail to map back into domain
    /// records are skipped with an error log.
    pub async fn load_certificates(&self) -> Result<Vec<Certificate>, sqlx::Error> {
        match &self.pool {
            Some(pool) => certificates::load_all(pool).await,
            None => Ok(Vec::new()),
        }
    }

    /// All mirrored batch jobs.
    pub async fn load_batches(&self) -> Result<Vec<BatchJob>, sqlx::Error> {
        match &self.pool {
            Some(pool) => batches::load_all(pool).await,
            None => Ok(Vec::new()),
        }
    }
}
