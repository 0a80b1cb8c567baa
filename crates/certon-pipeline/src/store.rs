//! # In-Memory Stores
//!
//! Authoritative in-process storage for certificates and batch jobs.
//! The optional Postgres mirror (`db`) is write-through and read-at-boot;
//! every operational read and write goes through these stores.
//!
//! ## Single-Writer Slot Claims
//!
//! [`CertificateStore`] keeps the issuance-slot index (one non-revoked
//! certificate per tenant, product, and canonical recipient) inside the
//! same lock as the records. A slot claim is check-and-insert under one
//! write guard, so two concurrent creations for the same slot produce
//! exactly one winner with no window between the lookup and the insert.
//!
//! Locks are `parking_lot` and never held across `.await` points; all
//! store methods are synchronous.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use certon_core::{BatchJobId, CertificateId, ProductId, Recipient, TenantId, Timestamp};
use certon_state::{BatchError, BatchJob, Certificate, CertificateError, CertificateStatus};

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Certificate store
// ---------------------------------------------------------------------------

/// Issuance-slot key: tenant, product, canonical recipient.
type SlotKey = (TenantId, ProductId, String);

fn slot_key(tenant_id: TenantId, product_id: &ProductId, recipient: &Recipient) -> SlotKey {
    (tenant_id, product_id.clone(), recipient.dedup_key())
}

#[derive(Debug, Default)]
struct CertificateShelves {
    records: HashMap<CertificateId, Certificate>,
    slots: HashMap<SlotKey, CertificateId>,
}

impl CertificateShelves {
    /// Drop the slot entry for a record that no longer occupies its slot.
    /// The entry is removed only if it still points at this record, so a
    /// slot reclaimed by a newer certificate stays intact.
    fn release_slot_if_vacated(&mut self, id: CertificateId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        if record.status.occupies_slot() {
            return;
        }
        let key = slot_key(record.tenant_id, &record.product_id, &record.recipient);
        if self.slots.get(&key) == Some(&id) {
            self.slots.remove(&key);
        }
    }
}

/// Thread-safe store of certificate records plus the issuance-slot index.
#[derive(Debug, Default)]
pub struct CertificateStore {
    inner: Arc<RwLock<CertificateShelves>>,
}

impl Clone for CertificateStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CertificateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record, claiming its issuance slot.
    ///
    /// Fails with [`PipelineError::CertificateAlreadyExists`] when a
    /// non-revoked certificate already holds the slot. Check and insert run
    /// under one write guard.
    pub fn insert_new(&self, cert: Certificate) -> Result<(), PipelineError> {
        let key = slot_key(cert.tenant_id, &cert.product_id, &cert.recipient);
        let mut shelves = self.inner.write();

        if let Some(existing_id) = shelves.slots.get(&key) {
            if let Some(existing) = shelves.records.get(existing_id) {
                if existing.status.occupies_slot() {
                    return Err(PipelineError::CertificateAlreadyExists {
                        existing_id: existing.id,
                        status: existing.status,
                        product_id: cert.product_id.to_string(),
                        recipient: cert.recipient.dedup_key(),
                    });
                }
            }
        }

        shelves.slots.insert(key, cert.id);
        shelves.records.insert(cert.id, cert);
        Ok(())
    }

    /// Re-seat a record loaded from the mirror, rebuilding its slot entry
    /// when the record occupies one. Used during hydration only; performs
    /// no conflict check.
    pub fn insert_hydrated(&self, cert: Certificate) {
        let mut shelves = self.inner.write();
        if cert.status.occupies_slot() {
            let key = slot_key(cert.tenant_id, &cert.product_id, &cert.recipient);
            shelves.slots.insert(key, cert.id);
        }
        shelves.records.insert(cert.id, cert);
    }

    /// Fetch a certificate by ID.
    pub fn get(&self, id: CertificateId) -> Option<Certificate> {
        self.inner.read().records.get(&id).cloned()
    }

    /// The certificate currently holding the given issuance slot, if any.
    pub fn find_by_slot(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        recipient: &Recipient,
    ) -> Option<Certificate> {
        let shelves = self.inner.read();
        let id = shelves
            .slots
            .get(&slot_key(tenant_id, product_id, recipient))?;
        shelves.records.get(id).cloned()
    }

    /// Atomically read-validate-mutate a record.
    ///
    /// The closure runs under the write guard; if the record vacated its
    /// slot (revocation), the slot index is updated in the same guard.
    /// Returns `None` when the record does not exist.
    pub fn try_update<R>(
        &self,
        id: CertificateId,
        f: impl FnOnce(&mut Certificate) -> Result<R, CertificateError>,
    ) -> Option<Result<R, CertificateError>> {
        let mut shelves = self.inner.write();
        let result = f(shelves.records.get_mut(&id)?);
        shelves.release_slot_if_vacated(id);
        Some(result)
    }

    /// Remove a record and free its slot. Used when clearing provisional
    /// records whose mint never landed.
    pub fn remove(&self, id: CertificateId) -> Option<Certificate> {
        let mut shelves = self.inner.write();
        let record = shelves.records.remove(&id)?;
        let key = slot_key(record.tenant_id, &record.product_id, &record.recipient);
        if shelves.slots.get(&key) == Some(&id) {
            shelves.slots.remove(&key);
        }
        Some(record)
    }

    /// All certificates for a tenant, newest first, optionally filtered by
    /// status.
    pub fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CertificateStatus>,
    ) -> Vec<Certificate> {
        let shelves = self.inner.read();
        let mut certs: Vec<Certificate> = shelves
            .records
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        certs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        certs
    }

    /// Per-status counts for a tenant.
    pub fn counts_for_tenant(&self, tenant_id: TenantId) -> CertificateCounts {
        let shelves = self.inner.read();
        let mut counts = CertificateCounts::default();
        for cert in shelves.records.values() {
            if cert.tenant_id != tenant_id {
                continue;
            }
            counts.total += 1;
            match cert.status {
                CertificateStatus::PendingConfirmation => counts.pending_confirmation += 1,
                CertificateStatus::Minted => counts.minted += 1,
                CertificateStatus::PendingTransfer => counts.pending_transfer += 1,
                CertificateStatus::TransferredToBrand => counts.transferred_to_brand += 1,
                CertificateStatus::TransferFailed => counts.transfer_failed += 1,
                CertificateStatus::Revoked => counts.revoked += 1,
            }
        }
        counts
    }

    /// Pending transfers that are due at `now` for one tenant.
    pub fn transfer_queue(&self, tenant_id: TenantId, now: &Timestamp) -> Vec<Certificate> {
        let shelves = self.inner.read();
        let mut due: Vec<Certificate> = shelves
            .records
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.is_transfer_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_transfer_attempt_at.cmp(&b.next_transfer_attempt_at));
        due
    }

    /// Failed transfers whose backoff has elapsed at `now` for one tenant.
    pub fn failed_due(&self, tenant_id: TenantId, now: &Timestamp) -> Vec<Certificate> {
        let shelves = self.inner.read();
        let mut due: Vec<Certificate> = shelves
            .records
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.is_retryable()
                    && c.next_transfer_attempt_at.as_ref().is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_transfer_attempt_at.cmp(&b.next_transfer_attempt_at));
        due
    }

    /// Failed transfers with attempts remaining, regardless of schedule,
    /// earliest scheduled attempt first.
    pub fn failed_retryable(&self, tenant_id: TenantId) -> Vec<Certificate> {
        let shelves = self.inner.read();
        let mut failed: Vec<Certificate> = shelves
            .records
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.is_retryable())
            .cloned()
            .collect();
        failed.sort_by(|a, b| a.next_transfer_attempt_at.cmp(&b.next_transfer_attempt_at));
        failed
    }

    /// Provisional records created at or before `cutoff`, across all
    /// tenants. Input to the reconciliation sweep.
    pub fn provisional_before(&self, cutoff: &Timestamp) -> Vec<Certificate> {
        let shelves = self.inner.read();
        shelves
            .records
            .values()
            .filter(|c| {
                c.status == CertificateStatus::PendingConfirmation && c.created_at <= *cutoff
            })
            .cloned()
            .collect()
    }

    /// Tenants with at least one due pending or due retryable transfer.
    pub fn tenants_with_due_transfers(&self, now: &Timestamp) -> Vec<TenantId> {
        let shelves = self.inner.read();
        let mut tenants: Vec<TenantId> = shelves
            .records
            .values()
            .filter(|c| {
                c.is_transfer_due(now)
                    || (c.is_retryable()
                        && c.next_transfer_attempt_at.as_ref().is_some_and(|at| at <= now))
            })
            .map(|c| c.tenant_id)
            .collect();
        tenants.sort();
        tenants.dedup();
        tenants
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-status certificate counts for one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CertificateCounts {
    /// All records for the tenant.
    pub total: u32,
    /// Provisional records awaiting mint confirmation.
    pub pending_confirmation: u32,
    /// Minted, custody still custodial, no transfer scheduled.
    pub minted: u32,
    /// Transfer scheduled or retrying.
    pub pending_transfer: u32,
    /// Custody settled at the brand wallet.
    pub transferred_to_brand: u32,
    /// Transfer failed, awaiting retry or abandonment.
    pub transfer_failed: u32,
    /// Revoked.
    pub revoked: u32,
}

// ---------------------------------------------------------------------------
// Batch store
// ---------------------------------------------------------------------------

/// Thread-safe store of batch jobs.
#[derive(Debug, Default)]
pub struct BatchStore {
    records: Arc<RwLock<HashMap<BatchJobId, BatchJob>>>,
}

impl Clone for BatchStore {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl BatchStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job, returning the previous job if the ID existed.
    pub fn insert(&self, job: BatchJob) -> Option<BatchJob> {
        self.records.write().insert(job.id, job)
    }

    /// Fetch a job by ID.
    pub fn get(&self, id: BatchJobId) -> Option<BatchJob> {
        self.records.read().get(&id).cloned()
    }

    /// All jobs for a tenant, newest first.
    pub fn list_for_tenant(&self, tenant_id: TenantId) -> Vec<BatchJob> {
        let mut jobs: Vec<BatchJob> = self
            .records
            .read()
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Atomically read-validate-mutate a job. Returns `None` when the job
    /// does not exist.
    pub fn try_update<R>(
        &self,
        id: BatchJobId,
        f: impl FnOnce(&mut BatchJob) -> Result<R, BatchError>,
    ) -> Option<Result<R, BatchError>> {
        self.records.write().get_mut(&id).map(f)
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certon_core::{ContractAddress, TokenId, TxHash};
    use certon_state::BatchRecipient;
    use serde_json::Value;

    fn recipient(addr: &str) -> Recipient {
        Recipient::email(addr).unwrap()
    }

    fn provisional(tenant: TenantId, product: &str, addr: &str) -> Certificate {
        Certificate::provisional(
            tenant,
            ProductId::new(product).unwrap(),
            recipient(addr),
            3,
            Value::Null,
        )
    }

    fn minted(tenant: TenantId, product: &str, addr: &str) -> Certificate {
        let mut cert = provisional(tenant, product, addr);
        cert.attach_mint_receipt(
            TokenId::new("tok-1").unwrap(),
            TxHash::new("0xmint").unwrap(),
            ContractAddress::new("0xcontract").unwrap(),
        )
        .unwrap();
        cert.confirm_minted().unwrap();
        cert
    }

    #[test]
    fn claim_then_duplicate_rejected() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();

        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();

        let err = store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap_err();
        assert_eq!(err.code(), "CERTIFICATE_ALREADY_EXISTS");
    }

    #[test]
    fn equivalent_recipient_spellings_share_a_slot() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();

        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        // Same mailbox, different case and padding.
        assert!(store
            .insert_new(provisional(tenant, "sku-1", "  A@EXAMPLE.COM "))
            .is_err());
    }

    #[test]
    fn distinct_slots_are_independent() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();

        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        store
            .insert_new(provisional(tenant, "sku-2", "a@example.com"))
            .unwrap();
        store
            .insert_new(provisional(tenant, "sku-1", "b@example.com"))
            .unwrap();
        store
            .insert_new(provisional(TenantId::new(), "sku-1", "a@example.com"))
            .unwrap();
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn concurrent_claims_produce_one_winner() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .insert_new(provisional(tenant, "sku-1", "a@example.com"))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn revocation_frees_the_slot() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        let cert = minted(tenant, "sku-1", "a@example.com");
        let id = cert.id;
        store.insert_new(cert).unwrap();

        store
            .try_update(id, |c| c.revoke("defective"))
            .unwrap()
            .unwrap();

        // Slot is free again; the revoked record remains readable.
        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        assert_eq!(store.get(id).unwrap().status, CertificateStatus::Revoked);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reclaimed_slot_survives_late_release() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        let old = minted(tenant, "sku-1", "a@example.com");
        let old_id = old.id;
        store.insert_new(old).unwrap();
        store
            .try_update(old_id, |c| c.revoke("defective"))
            .unwrap()
            .unwrap();

        let replacement = provisional(tenant, "sku-1", "a@example.com");
        let new_id = replacement.id;
        store.insert_new(replacement).unwrap();

        // A redundant update of the old record must not evict the new claim.
        store
            .try_update(old_id, |c| c.revoke("defective"))
            .unwrap()
            .unwrap();
        assert_eq!(
            store
                .find_by_slot(tenant, &ProductId::new("sku-1").unwrap(), &recipient("a@example.com"))
                .unwrap()
                .id,
            new_id
        );
    }

    #[test]
    fn remove_frees_slot_and_returns_record() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        let cert = provisional(tenant, "sku-1", "a@example.com");
        let id = cert.id;
        store.insert_new(cert).unwrap();

        let removed = store.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(store.is_empty());

        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
    }

    #[test]
    fn try_update_missing_returns_none() {
        let store = CertificateStore::new();
        assert!(store
            .try_update(CertificateId::new(), |c| c.confirm_minted())
            .is_none());
    }

    #[test]
    fn list_filters_by_status_newest_first() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        store
            .insert_new(minted(tenant, "sku-2", "b@example.com"))
            .unwrap();
        store
            .insert_new(minted(TenantId::new(), "sku-1", "c@example.com"))
            .unwrap();

        assert_eq!(store.list_for_tenant(tenant, None).len(), 2);
        let minted_only = store.list_for_tenant(tenant, Some(CertificateStatus::Minted));
        assert_eq!(minted_only.len(), 1);
        assert_eq!(minted_only[0].product_id.to_string(), "sku-2");
    }

    #[test]
    fn counts_by_status() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        store
            .insert_new(minted(tenant, "sku-2", "b@example.com"))
            .unwrap();
        let revoked = minted(tenant, "sku-3", "c@example.com");
        let revoked_id = revoked.id;
        store.insert_new(revoked).unwrap();
        store
            .try_update(revoked_id, |c| c.revoke("test"))
            .unwrap()
            .unwrap();

        let counts = store.counts_for_tenant(tenant);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending_confirmation, 1);
        assert_eq!(counts.minted, 1);
        assert_eq!(counts.revoked, 1);
        assert_eq!(counts.pending_transfer, 0);
    }

    #[test]
    fn transfer_queue_returns_due_only() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        let now = Timestamp::now();

        let mut due = minted(tenant, "sku-1", "a@example.com");
        due.schedule_transfer(
            certon_core::WalletAddress::new("0xbrandwallet01").unwrap(),
            now,
        )
        .unwrap();
        let due_id = due.id;
        store.insert_new(due).unwrap();

        let mut later = minted(tenant, "sku-2", "b@example.com");
        later
            .schedule_transfer(
                certon_core::WalletAddress::new("0xbrandwallet01").unwrap(),
                now.saturating_add(chrono::Duration::hours(2)),
            )
            .unwrap();
        store.insert_new(later).unwrap();

        let queue = store.transfer_queue(tenant, &now);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, due_id);
    }

    #[test]
    fn tenants_with_due_transfers_dedupes() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        let now = Timestamp::now();
        for (product, addr) in [("sku-1", "a@example.com"), ("sku-2", "b@example.com")] {
            let mut cert = minted(tenant, product, addr);
            cert.schedule_transfer(
                certon_core::WalletAddress::new("0xbrandwallet01").unwrap(),
                now,
            )
            .unwrap();
            store.insert_new(cert).unwrap();
        }

        assert_eq!(store.tenants_with_due_transfers(&now), vec![tenant]);
    }

    #[test]
    fn tenants_with_due_transfers_orders_by_id() {
        let store = CertificateStore::new();
        let now = Timestamp::now();
        let mut tenants: Vec<TenantId> = (0..4).map(|_| TenantId::new()).collect();
        for tenant in &tenants {
            let mut cert = minted(*tenant, "sku-1", "a@example.com");
            cert.schedule_transfer(
                certon_core::WalletAddress::new("0xbrandwallet01").unwrap(),
                now,
            )
            .unwrap();
            store.insert_new(cert).unwrap();
        }
        tenants.sort();

        assert_eq!(store.tenants_with_due_transfers(&now), tenants);
    }

    #[test]
    fn provisional_before_cutoff() {
        let store = CertificateStore::new();
        let tenant = TenantId::new();
        store
            .insert_new(provisional(tenant, "sku-1", "a@example.com"))
            .unwrap();
        store
            .insert_new(minted(tenant, "sku-2", "b@example.com"))
            .unwrap();

        let future = Timestamp::now().saturating_add(chrono::Duration::hours(1));
        let stale = store.provisional_before(&future);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].status, CertificateStatus::PendingConfirmation);

        let past = Timestamp::now().saturating_add(chrono::Duration::hours(-1));
        assert!(store.provisional_before(&past).is_empty());
    }

    // ── BatchStore ───────────────────────────────────────────────

    #[test]
    fn batch_store_roundtrip_and_update() {
        let store = BatchStore::new();
        let tenant = TenantId::new();
        let job = BatchJob::new(
            tenant,
            ProductId::new("sku-1").unwrap(),
            vec![BatchRecipient::plain(recipient("a@example.com"))],
        );
        let id = job.id;
        assert!(store.insert(job).is_none());

        store.try_update(id, |j| j.start()).unwrap().unwrap();
        assert_eq!(
            store.get(id).unwrap().status,
            certon_state::BatchStatus::Processing
        );
        assert_eq!(store.list_for_tenant(tenant).len(), 1);
        assert!(store.list_for_tenant(TenantId::new()).is_empty());
    }

    #[test]
    fn batch_store_update_missing_returns_none() {
        let store = BatchStore::new();
        assert!(store.try_update(BatchJobId::new(), |j| j.start()).is_none());
    }
}
