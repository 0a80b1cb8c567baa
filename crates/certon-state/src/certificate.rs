//! # Certificate Lifecycle State Machine
//!
//! Models the life of one issued credential, from the provisional record
//! written before the mint call through custody transfer to the brand
//! wallet, retry bookkeeping, and revocation.
//!
//! ## States
//!
//! ```text
//! ∅ ─▶ pending_confirmation ─▶ minted ─▶ pending_transfer ─▶ transferred_to_brand
//!          │                     │            │    ▲                  │
//!          ▼                     ▼            ▼    │                  ▼
//!      (removed)              revoked   transfer_failed            revoked
//!                                             │
//!                                             └─▶ pending_transfer
//!                                                 (attempts < cap, or manual
//!                                                  retry after an allowance
//!                                                  extension)
//! ```
//!
//! `pending_confirmation` is the provisional half of the two-phase mint:
//! the record is written before the ledger call so a crash between ledger
//! success and local persistence leaves a reconcilable record rather than
//! an orphaned on-ledger action. An unconfirmed record is the only one that
//! may ever be removed; everything else is terminal-by-status, never
//! deleted.
//!
//! ## Design Decision
//!
//! Transitions are methods that check the current status as a precondition
//! and return a structured error on mismatch — compare-and-swap semantics,
//! never a blind overwrite. The store serializes calls per certificate, so
//! "current status matches" is sufficient to make concurrent drivers safe.
//! `transfer_attempts` only moves up: manual retry past the cap extends the
//! allowance instead of resetting the counter, keeping the audit history
//! truthful.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use certon_core::{
    CertificateId, ContractAddress, ProductId, Recipient, TenantId, Timestamp, TokenId, TxHash,
    WalletAddress,
};

// ─── Certificate Status ──────────────────────────────────────────────

/// The lifecycle status of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// Provisional record written before the mint call returns.
    PendingConfirmation,
    /// Mint confirmed; the credential is held by the custodial relayer.
    Minted,
    /// A custody transfer to the brand wallet is scheduled or in flight.
    PendingTransfer,
    /// Custody transfer confirmed by the ledger. Terminal success.
    TransferredToBrand,
    /// The last transfer attempt failed; retried automatically while
    /// attempts remain, otherwise held for manual retry.
    TransferFailed,
    /// Administratively revoked. Terminal, frees the recipient slot.
    Revoked,
}

impl CertificateStatus {
    /// Stable lowercase name — the wire vocabulary used in serialized
    /// records, log fields, and error messages alike.
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::PendingConfirmation => "pending_confirmation",
            CertificateStatus::Minted => "minted",
            CertificateStatus::PendingTransfer => "pending_transfer",
            CertificateStatus::TransferredToBrand => "transferred_to_brand",
            CertificateStatus::TransferFailed => "transfer_failed",
            CertificateStatus::Revoked => "revoked",
        }
    }

    /// Whether a certificate in this status occupies its recipient's dedup
    /// slot. Only revocation frees the slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, CertificateStatus::Revoked)
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from certificate lifecycle transitions.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// Attempted transition is not valid from the current status.
    #[error("invalid certificate transition: {from} -> {to} ({reason})")]
    InvalidTransition {
        /// Current status.
        from: CertificateStatus,
        /// Attempted target status.
        to: CertificateStatus,
        /// Which precondition failed.
        reason: &'static str,
    },

    /// The transfer attempt allowance is used up; the certificate stays in
    /// `transfer_failed` until a manual retry extends the allowance.
    #[error("transfer retries exhausted: {attempts} of {max} attempts used")]
    RetryExhausted {
        /// Attempts consumed so far.
        attempts: u32,
        /// The current allowance.
        max: u32,
    },

    /// Revocation was requested without a reason.
    #[error("revocation requires a non-empty reason")]
    ReasonRequired,
}

// ─── Status Change Log ───────────────────────────────────────────────

/// One entry in a certificate's transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the transition.
    pub from: CertificateStatus,
    /// Status after the transition.
    pub to: CertificateStatus,
    /// When the transition occurred.
    pub at: Timestamp,
    /// Short operator-readable note.
    pub note: String,
}

/// Outcome of a revocation request, distinguishing a fresh revocation from
/// an idempotent repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// The certificate was revoked by this call.
    Revoked,
    /// The certificate was already revoked; nothing changed.
    AlreadyRevoked,
}

// ─── Certificate ─────────────────────────────────────────────────────

/// The authoritative record of one issued credential.
///
/// Mutated only through its transition methods; every method validates the
/// current status and appends to [`Certificate::history`] on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Unique certificate identifier.
    pub id: CertificateId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The product this certificate certifies.
    pub product_id: ProductId,
    /// The party the certificate was issued to (canonical address).
    pub recipient: Recipient,

    /// Ledger token identifier, set when the mint receipt is attached.
    pub token_id: Option<TokenId>,
    /// Mint transaction hash.
    pub tx_hash: Option<TxHash>,
    /// Credential contract address.
    pub contract_address: Option<ContractAddress>,

    /// Current lifecycle status.
    pub status: CertificateStatus,
    /// Custody transfer attempts consumed. Only ever increases.
    pub transfer_attempts: u32,
    /// Attempt allowance, snapshotted from tenant settings at creation and
    /// raised only by explicit manual-retry extensions.
    pub max_transfer_attempts: u32,
    /// When the next transfer attempt becomes due, if one is scheduled.
    pub next_transfer_attempt_at: Option<Timestamp>,

    /// Destination wallet, fixed at transfer-scheduling time. Later tenant
    /// wallet changes never retarget an in-flight certificate.
    pub brand_wallet: Option<WalletAddress>,
    /// Confirmed custody-transfer transaction hash.
    pub transfer_tx_hash: Option<TxHash>,

    /// Per-recipient custom data carried through from the creation request.
    #[serde(default)]
    pub metadata: Value,

    /// When the record was created.
    pub created_at: Timestamp,
    /// When the certificate was revoked, if it was.
    pub revoked_at: Option<Timestamp>,
    /// Why the certificate was revoked, if it was.
    pub revoked_reason: Option<String>,
    /// Ordered log of all status transitions.
    pub history: Vec<StatusChange>,
}

impl Certificate {
    /// Create the provisional record for a mint about to be attempted.
    pub fn provisional(
        tenant_id: TenantId,
        product_id: ProductId,
        recipient: Recipient,
        max_transfer_attempts: u32,
        metadata: Value,
    ) -> Self {
        Self {
            id: CertificateId::new(),
            tenant_id,
            product_id,
            recipient,
            token_id: None,
            tx_hash: None,
            contract_address: None,
            status: CertificateStatus::PendingConfirmation,
            transfer_attempts: 0,
            max_transfer_attempts,
            next_transfer_attempt_at: None,
            brand_wallet: None,
            transfer_tx_hash: None,
            metadata,
            created_at: Timestamp::now(),
            revoked_at: None,
            revoked_reason: None,
            history: Vec::new(),
        }
    }

    /// Attach the ledger's mint receipt to the provisional record.
    ///
    /// Does not change status: confirmation is a separate step so the
    /// receipt survives even if the process dies before the confirm write.
    pub fn attach_mint_receipt(
        &mut self,
        token_id: TokenId,
        tx_hash: TxHash,
        contract_address: ContractAddress,
    ) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::PendingConfirmation,
            CertificateStatus::PendingConfirmation,
            "mint receipts attach to provisional records only",
        )?;
        if self.token_id.is_some() {
            return Err(CertificateError::InvalidTransition {
                from: self.status,
                to: CertificateStatus::PendingConfirmation,
                reason: "mint receipt already attached",
            });
        }
        self.token_id = Some(token_id);
        self.tx_hash = Some(tx_hash);
        self.contract_address = Some(contract_address);
        Ok(())
    }

    /// Confirm the mint (PENDING_CONFIRMATION → MINTED).
    ///
    /// Requires an attached mint receipt.
    pub fn confirm_minted(&mut self) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::PendingConfirmation,
            CertificateStatus::Minted,
            "only provisional records confirm",
        )?;
        if self.token_id.is_none() {
            return Err(CertificateError::InvalidTransition {
                from: self.status,
                to: CertificateStatus::Minted,
                reason: "no mint receipt attached",
            });
        }
        self.do_transition(CertificateStatus::Minted, "mint confirmed");
        Ok(())
    }

    /// Schedule a custody transfer (MINTED → PENDING_TRANSFER), fixing the
    /// destination wallet for the rest of this certificate's life.
    pub fn schedule_transfer(
        &mut self,
        wallet: WalletAddress,
        at: Timestamp,
    ) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::Minted,
            CertificateStatus::PendingTransfer,
            "only minted certificates schedule transfers",
        )?;
        self.brand_wallet = Some(wallet);
        self.next_transfer_attempt_at = Some(at);
        self.do_transition(CertificateStatus::PendingTransfer, "transfer scheduled");
        Ok(())
    }

    /// Record a ledger-confirmed transfer (PENDING_TRANSFER →
    /// TRANSFERRED_TO_BRAND). Consumes one attempt.
    pub fn record_transfer_success(&mut self, tx_hash: TxHash) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::PendingTransfer,
            CertificateStatus::TransferredToBrand,
            "no transfer in flight",
        )?;
        self.transfer_attempts += 1;
        self.transfer_tx_hash = Some(tx_hash);
        self.next_transfer_attempt_at = None;
        self.do_transition(
            CertificateStatus::TransferredToBrand,
            "custody transfer confirmed",
        );
        Ok(())
    }

    /// Record a failed or timed-out transfer attempt (PENDING_TRANSFER →
    /// TRANSFER_FAILED). Consumes one attempt; `next_at` carries the retry
    /// schedule, or `None` when the allowance is exhausted.
    pub fn record_transfer_failure(
        &mut self,
        next_at: Option<Timestamp>,
    ) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::PendingTransfer,
            CertificateStatus::TransferFailed,
            "no transfer in flight",
        )?;
        self.transfer_attempts += 1;
        self.next_transfer_attempt_at = next_at;
        let note = format!("transfer attempt {} failed", self.transfer_attempts);
        self.do_transition(CertificateStatus::TransferFailed, &note);
        Ok(())
    }

    /// Re-enter the transfer queue (TRANSFER_FAILED → PENDING_TRANSFER).
    ///
    /// Permitted only while attempts remain under the allowance; callers
    /// retrying past the cap must extend the allowance first.
    pub fn reenter_transfer(&mut self, at: Timestamp) -> Result<(), CertificateError> {
        self.require_status(
            CertificateStatus::TransferFailed,
            CertificateStatus::PendingTransfer,
            "only failed transfers re-enter the queue",
        )?;
        if self.transfer_attempts >= self.max_transfer_attempts {
            return Err(CertificateError::RetryExhausted {
                attempts: self.transfer_attempts,
                max: self.max_transfer_attempts,
            });
        }
        self.next_transfer_attempt_at = Some(at);
        self.do_transition(CertificateStatus::PendingTransfer, "transfer retry scheduled");
        Ok(())
    }

    /// Raise the attempt allowance for an explicit manual retry of an
    /// exhausted certificate. Returns the new allowance.
    ///
    /// The attempt counter itself never resets.
    pub fn extend_retry_allowance(&mut self, additional: u32) -> Result<u32, CertificateError> {
        self.require_status(
            CertificateStatus::TransferFailed,
            CertificateStatus::TransferFailed,
            "allowance extensions apply to failed transfers only",
        )?;
        self.max_transfer_attempts = self.max_transfer_attempts.saturating_add(additional.max(1));
        Ok(self.max_transfer_attempts)
    }

    /// Revoke the certificate. Idempotent: revoking an already-revoked
    /// certificate reports [`RevokeOutcome::AlreadyRevoked`] and changes
    /// nothing.
    ///
    /// `transfer_failed` certificates must be retried or abandoned, never
    /// revoked, and an unconfirmed provisional record is removed rather
    /// than revoked.
    pub fn revoke(&mut self, reason: &str) -> Result<RevokeOutcome, CertificateError> {
        if self.status == CertificateStatus::Revoked {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }
        if reason.trim().is_empty() {
            return Err(CertificateError::ReasonRequired);
        }
        match self.status {
            CertificateStatus::Minted
            | CertificateStatus::PendingTransfer
            | CertificateStatus::TransferredToBrand => {}
            CertificateStatus::PendingConfirmation => {
                return Err(CertificateError::InvalidTransition {
                    from: self.status,
                    to: CertificateStatus::Revoked,
                    reason: "unconfirmed provisional records are removed, not revoked",
                });
            }
            CertificateStatus::TransferFailed => {
                return Err(CertificateError::InvalidTransition {
                    from: self.status,
                    to: CertificateStatus::Revoked,
                    reason: "failed transfers are retried or abandoned, not revoked",
                });
            }
            CertificateStatus::Revoked => return Ok(RevokeOutcome::AlreadyRevoked),
        }
        self.revoked_at = Some(Timestamp::now());
        self.revoked_reason = Some(reason.trim().to_string());
        self.next_transfer_attempt_at = None;
        let note = format!("revoked: {}", reason.trim());
        self.do_transition(CertificateStatus::Revoked, &note);
        Ok(RevokeOutcome::Revoked)
    }

    /// Whether a scheduled transfer attempt is due at `now`.
    pub fn is_transfer_due(&self, now: &Timestamp) -> bool {
        self.status == CertificateStatus::PendingTransfer
            && self
                .next_transfer_attempt_at
                .as_ref()
                .is_some_and(|at| at <= now)
    }

    /// Whether the certificate failed but still has attempts left.
    pub fn is_retryable(&self) -> bool {
        self.status == CertificateStatus::TransferFailed
            && self.transfer_attempts < self.max_transfer_attempts
    }

    /// Whether the certificate failed and used up its allowance.
    pub fn retries_exhausted(&self) -> bool {
        self.status == CertificateStatus::TransferFailed
            && self.transfer_attempts >= self.max_transfer_attempts
    }

    /// Whether a mint receipt has been attached.
    pub fn has_mint_receipt(&self) -> bool {
        self.token_id.is_some()
    }

    /// Validate the current status before a transition.
    fn require_status(
        &self,
        expected: CertificateStatus,
        to: CertificateStatus,
        reason: &'static str,
    ) -> Result<(), CertificateError> {
        if self.status != expected {
            return Err(CertificateError::InvalidTransition {
                from: self.status,
                to,
                reason,
            });
        }
        Ok(())
    }

    /// Record a status transition.
    fn do_transition(&mut self, to: CertificateStatus, note: &str) {
        self.history.push(StatusChange {
            from: self.status,
            to,
            at: Timestamp::now(),
            note: note.to_string(),
        });
        self.status = to;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
