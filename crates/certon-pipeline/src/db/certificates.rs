//! Certificate persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `certificates`
//! table. Records are written whole on every change; the row is a flat
//! projection of [`Certificate`] with the transition history as JSONB.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use certon_core::{
    CertificateId, ContactMethod, ContractAddress, ProductId, Recipient, TenantId, Timestamp,
    TokenId, TxHash, WalletAddress,
};
use certon_state::{Certificate, CertificateStatus, StatusChange};

/// Insert or replace a certificate row.
pub async fn upsert(pool: &PgPool, cert: &Certificate) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO certificates (id, tenant_id, product_id, recipient_method,
         recipient_address, token_id, tx_hash, contract_address, status,
         transfer_attempts, max_transfer_attempts, next_transfer_attempt_at,
         brand_wallet, transfer_tx_hash, metadata, created_at, revoked_at,
         revoked_reason, history)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                 $15, $16, $17, $18, $19)
         ON CONFLICT (id) DO UPDATE SET
             token_id = EXCLUDED.token_id,
             tx_hash = EXCLUDED.tx_hash,
             contract_address = EXCLUDED.contract_address,
             status = EXCLUDED.status,
             transfer_attempts = EXCLUDED.transfer_attempts,
             max_transfer_attempts = EXCLUDED.max_transfer_attempts,
             next_transfer_attempt_at = EXCLUDED.next_transfer_attempt_at,
             brand_wallet = EXCLUDED.brand_wallet,
             transfer_tx_hash = EXCLUDED.transfer_tx_hash,
             metadata = EXCLUDED.metadata,
             revoked_at = EXCLUDED.revoked_at,
             revoked_reason = EXCLUDED.revoked_reason,
             history = EXCLUDED.history",
    )
    .bind(*cert.id.as_uuid())
    .bind(*cert.tenant_id.as_uuid())
    .bind(cert.product_id.as_str())
    .bind(cert.recipient.method.as_str())
    .bind(&cert.recipient.address)
    .bind(cert.token_id.as_ref().map(TokenId::as_str))
    .bind(cert.tx_hash.as_ref().map(TxHash::as_str))
    .bind(cert.contract_address.as_ref().map(ContractAddress::as_str))
    .bind(cert.status.as_str())
    .bind(i64::from(cert.transfer_attempts))
    .bind(i64::from(cert.max_transfer_attempts))
    .bind(cert.next_transfer_attempt_at.as_ref().map(|t| *t.as_datetime()))
    .bind(cert.brand_wallet.as_ref().map(WalletAddress::as_str))
    .bind(cert.transfer_tx_hash.as_ref().map(TxHash::as_str))
    .bind(&cert.metadata)
    .bind(*cert.created_at.as_datetime())
    .bind(cert.revoked_at.as_ref().map(|t| *t.as_datetime()))
    .bind(cert.revoked_reason.as_deref())
    .bind(Json(&cert.history))
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a certificate row.
pub async fn delete(pool: &PgPool, id: CertificateId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM certificates WHERE id = $1")
        .bind(*id.as_uuid())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Load every certificate for store hydration at startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Certificate>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CertificateRow>(
        "SELECT id, tenant_id, product_id, recipient_method, recipient_address,
         token_id, tx_hash, contract_address, status, transfer_attempts,
         max_transfer_attempts, next_transfer_attempt_at, brand_wallet,
         transfer_tx_hash, metadata, created_at, revoked_at, revoked_reason,
         history
         FROM certificates ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(CertificateRow::into_record).collect())
}

/// Parse a stored status name. Inverse of [`CertificateStatus::as_str`].
pub(crate) fn parse_status(s: &str) -> Option<CertificateStatus> {
    match s {
        "pending_confirmation" => Some(CertificateStatus::PendingConfirmation),
        "minted" => Some(CertificateStatus::Minted),
        "pending_transfer" => Some(CertificateStatus::PendingTransfer),
        "transferred_to_brand" => Some(CertificateStatus::TransferredToBrand),
        "transfer_failed" => Some(CertificateStatus::TransferFailed),
        "revoked" => Some(CertificateStatus::Revoked),
        _ => None,
    }
}

/// Parse a stored contact method name. Inverse of [`ContactMethod::as_str`].
pub(crate) fn parse_method(s: &str) -> Option<ContactMethod> {
    match s {
        "email" => Some(ContactMethod::Email),
        "phone" => Some(ContactMethod::Phone),
        "wallet" => Some(ContactMethod::Wallet),
        _ => None,
    }
}

fn attempts_from_db(raw: i64, what: &str, id: Uuid) -> u32 {
    u32::try_from(raw).unwrap_or_else(|_| {
        tracing::error!(
            certificate_id = %id,
            value = raw,
            "{what} out of range in database, defaulting to 0"
        );
        0
    })
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct CertificateRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: String,
    recipient_method: String,
    recipient_address: String,
    token_id: Option<String>,
    tx_hash: Option<String>,
    contract_address: Option<String>,
    status: String,
    transfer_attempts: i64,
    max_transfer_attempts: i64,
    next_transfer_attempt_at: Option<DateTime<Utc>>,
    brand_wallet: Option<String>,
    transfer_tx_hash: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
    history: Json<Vec<StatusChange>>,
}

impl CertificateRow {
    /// Map a row back into a domain record. Returns `None` (with an error
    /// log) for rows that no longer validate; hydration skips them rather
    /// than refusing to start.
    fn into_record(self) -> Option<Certificate> {
        let id = self.id;
        let status = match parse_status(&self.status) {
            Some(status) => status,
            None => {
                tracing::error!(certificate_id = %id, status = %self.status, "unknown certificate status in database, skipping row");
                return None;
            }
        };
        let method = match parse_method(&self.recipient_method) {
            Some(method) => method,
            None => {
                tracing::error!(certificate_id = %id, method = %self.recipient_method, "unknown contact method in database, skipping row");
                return None;
            }
        };
        let recipient = match Recipient::new(method, self.recipient_address) {
            Ok(recipient) => recipient,
            Err(err) => {
                tracing::error!(certificate_id = %id, error = %err, "stored recipient no longer validates, skipping row");
                return None;
            }
        };
        let product_id = match ProductId::new(self.product_id) {
            Ok(product_id) => product_id,
            Err(err) => {
                tracing::error!(certificate_id = %id, error = %err, "stored product id no longer validates, skipping row");
                return None;
            }
        };

        Some(Certificate {
            id: CertificateId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            product_id,
            recipient,
            token_id: self.token_id.and_then(|s| TokenId::new(s).ok()),
            tx_hash: self.tx_hash.and_then(|s| TxHash::new(s).ok()),
            contract_address: self
                .contract_address
                .and_then(|s| ContractAddress::new(s).ok()),
            status,
            transfer_attempts: attempts_from_db(self.transfer_attempts, "transfer_attempts", id),
            max_transfer_attempts: attempts_from_db(
                self.max_transfer_attempts,
                "max_transfer_attempts",
                id,
            ),
            next_transfer_attempt_at: self.next_transfer_attempt_at.map(Timestamp::from_datetime),
            brand_wallet: self.brand_wallet.and_then(|s| WalletAddress::new(s).ok()),
            transfer_tx_hash: self.transfer_tx_hash.and_then(|s| TxHash::new(s).ok()),
            metadata: self.metadata,
            created_at: Timestamp::from_datetime(self.created_at),
            revoked_at: self.revoked_at.map(Timestamp::from_datetime),
            revoked_reason: self.revoked_reason,
            history: self.history.0,
        })
    }
}
