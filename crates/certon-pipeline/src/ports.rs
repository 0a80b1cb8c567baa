//! # Collaborator Ports
//!
//! Traits for everything the pipeline talks to but does not own: the
//! custodial ledger that mints and moves credential tokens, the plan
//! service that resolves tenant limits, the settings provider for
//! per-tenant transfer configuration, and the notification sink for
//! lifecycle events.
//!
//! All ports are object-safe async traits held as `Arc<dyn …>`, so tests
//! and alternative backends swap in without touching orchestration code.
//! Ledger calls are network calls measured in seconds; keeping them async
//! keeps the worker pool unblocked while a mint or transfer is in flight.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use certon_core::{
    BatchJobId, CertificateId, ContractAddress, PlanLimits, ProductId, Recipient, TenantId,
    TenantTransferSettings, TokenId, TxHash, WalletAddress,
};

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Ledger error
// ---------------------------------------------------------------------------

/// Errors from the custodial ledger.
///
/// The split between rejection and unavailability matters: a rejection is
/// definitive (the operation did not happen), while unavailability leaves
/// the outcome unknown and forces the caller down a reconciliation path.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger refused the mint. The token was not created.
    #[error("mint rejected: {0}")]
    MintRejected(String),

    /// The ledger refused the transfer. Custody did not move.
    #[error("transfer rejected: {0}")]
    TransferRejected(String),

    /// The ledger could not be reached or timed out. The outcome of the
    /// submitted operation is unknown.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::MintRejected(msg) => Self::MintFailed(msg),
            LedgerError::TransferRejected(msg) => Self::TransferFailed(msg),
            LedgerError::Unavailable(msg) => Self::LedgerUnavailable(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A mint instruction submitted to the ledger.
///
/// `certificate_id` doubles as the idempotency key: the ledger deduplicates
/// resubmissions of the same certificate, which is what makes the
/// provisional-record reconciliation path safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    /// The certificate being minted, also the ledger idempotency key.
    pub certificate_id: CertificateId,
    /// The issuing tenant.
    pub tenant_id: TenantId,
    /// The product the credential certifies.
    pub product_id: ProductId,
    /// The party the credential names.
    pub recipient: Recipient,
    /// Custom data to embed in the credential.
    pub metadata: Value,
}

/// The ledger's proof that a mint landed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerMintReceipt {
    /// Token identifier on the ledger.
    pub token_id: TokenId,
    /// Mint transaction hash.
    pub tx_hash: TxHash,
    /// Address of the credential contract holding the token.
    pub contract_address: ContractAddress,
}

/// A custody-transfer instruction submitted to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// The certificate whose token is moving.
    pub certificate_id: CertificateId,
    /// The token to move.
    pub token_id: TokenId,
    /// The contract holding the token.
    pub contract_address: ContractAddress,
    /// Destination wallet.
    pub to_wallet: WalletAddress,
}

/// The ledger's proof that custody moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Transfer transaction hash.
    pub tx_hash: TxHash,
}

/// Settlement state of a previously accepted transaction.
///
/// Acceptance is not settlement: the ledger hands back a receipt as soon
/// as it takes the submission, and the transaction can still fail to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// The transaction settled on the ledger.
    Confirmed,
    /// The transaction is submitted but has not settled yet.
    Pending,
    /// The transaction was dropped or reverted.
    Failed,
}

/// Answer to a mint-status query during reconciliation.
#[derive(Debug, Clone)]
pub enum MintStatus {
    /// The mint landed; here is its receipt.
    Confirmed(LedgerMintReceipt),
    /// The ledger has the submission but it has not settled yet.
    Pending,
    /// The ledger has no record of this certificate.
    Unknown,
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// The custodial ledger holding minted credential tokens.
#[async_trait]
pub trait CustodyLedger: Send + Sync {
    /// Mint a credential token into custodial holding.
    async fn mint(&self, request: &MintRequest) -> Result<LedgerMintReceipt, LedgerError>;

    /// Move a token from custodial holding to the given wallet.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError>;

    /// Settlement state of an accepted transaction, by its receipt hash.
    async fn query_receipt(&self, tx_hash: &TxHash) -> Result<ReceiptStatus, LedgerError>;

    /// Look up whether a previously submitted mint landed. Keyed by the
    /// certificate identifier used as the mint idempotency key.
    async fn mint_status(&self, certificate_id: CertificateId) -> Result<MintStatus, LedgerError>;

    /// Number of credential tokens custodied at the given wallet.
    async fn balance(&self, address: &WalletAddress) -> Result<u64, LedgerError>;
}

/// Resolves a tenant's plan limits.
#[async_trait]
pub trait PlanService: Send + Sync {
    /// The limits currently in force for the tenant.
    async fn limits(&self, tenant_id: TenantId) -> Result<PlanLimits, PipelineError>;
}

/// Resolves a tenant's transfer settings.
///
/// Settings are read once per operation and treated as a snapshot; changes
/// made mid-run take effect on the next run.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// The tenant's current transfer settings.
    async fn transfer_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<TenantTransferSettings, PipelineError>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Lifecycle events published to interested listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CertificateEvent {
    /// A mint was confirmed.
    CertificateMinted {
        /// The minted certificate.
        certificate_id: CertificateId,
        /// The issuing tenant.
        tenant_id: TenantId,
        /// The minted token.
        token_id: TokenId,
    },
    /// Custody reached the brand wallet.
    TransferSucceeded {
        /// The transferred certificate.
        certificate_id: CertificateId,
        /// The owning tenant.
        tenant_id: TenantId,
        /// The transfer transaction.
        tx_hash: TxHash,
    },
    /// A transfer attempt failed.
    TransferFailed {
        /// The certificate whose transfer failed.
        certificate_id: CertificateId,
        /// The owning tenant.
        tenant_id: TenantId,
        /// Attempts consumed so far.
        attempts: u32,
        /// Whether another attempt is scheduled.
        will_retry: bool,
    },
    /// The transfer attempt allowance is used up.
    TransferExhausted {
        /// The stalled certificate.
        certificate_id: CertificateId,
        /// The owning tenant.
        tenant_id: TenantId,
        /// Attempts consumed.
        attempts: u32,
    },
    /// A certificate was revoked.
    CertificateRevoked {
        /// The revoked certificate.
        certificate_id: CertificateId,
        /// The owning tenant.
        tenant_id: TenantId,
    },
    /// A batch job finished processing every recipient.
    BatchCompleted {
        /// The finished batch.
        batch_id: BatchJobId,
        /// The owning tenant.
        tenant_id: TenantId,
        /// Recipients whose certificate was created.
        successful: u32,
        /// Recipients whose creation failed.
        failed: u32,
    },
}

/// Receives lifecycle events. Publishing is fire-and-forget; a sink that
/// fails must handle the failure internally.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: CertificateEvent);
}

/// A sink that discards every event. The default when no sink is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn publish(&self, _event: CertificateEvent) {}
}
