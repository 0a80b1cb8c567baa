//! Batch job persistence: row mapping between [`BatchJob`] records and the
//! `batch_jobs` table.

use certon_core::{BatchJobId, ProductId, TenantId, Timestamp};
use certon_state::batch::{BatchJob, BatchRecipient, BatchStatus, RecipientError};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

pub(crate) async fn upsert(pool: &PgPool, job: &BatchJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO batch_jobs (
            id, tenant_id, product_id, recipients, status,
            processed, successful, failed, errors,
            cancel_requested, continue_on_error,
            created_at, started_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            processed = EXCLUDED.processed,
            successful = EXCLUDED.successful,
            failed = EXCLUDED.failed,
            errors = EXCLUDED.errors,
            cancel_requested = EXCLUDED.cancel_requested,
            started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(*job.id.as_uuid())
    .bind(*job.tenant_id.as_uuid())
    .bind(job.product_id.as_str())
    .bind(Json(&job.recipients))
    .bind(job.status.as_str())
    .bind(i64::from(job.processed))
    .bind(i64::from(job.successful))
    .bind(i64::from(job.failed))
    .bind(Json(&job.errors))
    .bind(job.cancel_requested)
    .bind(job.continue_on_error)
    .bind(*job.created_at.as_datetime())
    .bind(job.started_at.as_ref().map(|t| *t.as_datetime()))
    .bind(job.completed_at.as_ref().map(|t| *t.as_datetime()))
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn load_all(pool: &PgPool) -> Result<Vec<BatchJob>, sqlx::Error> {
    let rows: Vec<BatchRow> = sqlx::query_as("SELECT * FROM batch_jobs ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().filter_map(BatchRow::into_record).collect())
}

pub(crate) fn parse_status(raw: &str) -> Option<BatchStatus> {
    match raw {
        "queued" => Some(BatchStatus::Queued),
        "processing" => Some(BatchStatus::Processing),
        "completed" => Some(BatchStatus::Completed),
        "failed" => Some(BatchStatus::Failed),
        _ => None,
    }
}

/// Counters are stored as `BIGINT`; anything outside `u32` means the row was
/// tampered with, so fall back to zero rather than refusing to hydrate.
fn counter_from_db(raw: i64, what: &str, id: Uuid) -> u32 {
    match u32::try_from(raw) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(%id, raw, "batch {what} out of range, treating as 0");
            0
        }
    }
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: String,
    recipients: Json<Vec<BatchRecipient>>,
    status: String,
    processed: i64,
    successful: i64,
    failed: i64,
    errors: Json<Vec<RecipientError>>,
    cancel_requested: bool,
    continue_on_error: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl BatchRow {
    fn into_record(self) -> Option<BatchJob> {
        let Some(status) = parse_status(&self.status) else {
            tracing::error!(id = %self.id, status = %self.status, "unknown batch status, skipping row");
            return None;
        };
        let Ok(product_id) = ProductId::new(&self.product_id) else {
            tracing::error!(id = %self.id, product = %self.product_id, "invalid batch product id, skipping row");
            return None;
        };
        Some(BatchJob {
            id: BatchJobId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            product_id,
            recipients: self.recipients.0,
            status,
            processed: counter_from_db(self.processed, "processed", self.id),
            successful: counter_from_db(self.successful, "successful", self.id),
            failed: counter_from_db(self.failed, "failed", self.id),
            errors: self.errors.0,
            cancel_requested: self.cancel_requested,
            continue_on_error: self.continue_on_error,
            created_at: Timestamp::from_datetime(self.created_at),
            started_at: self.started_at.map(Timestamp::from_datetime),
            completed_at: self.completed_at.map(Timestamp::from_datetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_roundtrip() {
        for status in [
            BatchStatus::Queued,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(parse_status(status.as_str()), Some(status));
        }
        assert_eq!(parse_status("paused"), None);
    }

    #[test]
    fn out_of_range_counter_falls_back_to_zero() {
        let id = Uuid::new_v4();
        assert_eq!(counter_from_db(-1, "processed", id), 0);
        assert_eq!(counter_from_db(i64::MAX, "processed", id), 0);
        assert_eq!(counter_from_db(42, "processed", id), 42);
    }
}
