//! # Pipeline Error Types
//!
//! One error enum for every pipeline operation. Each variant carries the
//! context a caller needs to act on the failure without parsing message
//! strings, and [`PipelineError::code`] exposes a stable machine-readable
//! code for API layers and log fields.

use thiserror::Error;

use certon_core::{CertificateId, QuotaKind, TenantId, ValidationError};
use certon_state::{BatchError, CertificateError, CertificateStatus};

/// Errors surfaced by pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The tenant's monthly quota cannot cover the request.
    #[error("{kind} quota exceeded for tenant {tenant_id}: {used} of {limit} used, {requested} requested")]
    QuotaExceeded {
        /// The tenant whose quota was checked.
        tenant_id: TenantId,
        /// Which quota was exhausted.
        kind: QuotaKind,
        /// Units consumed or reserved in the current window.
        used: u32,
        /// The plan limit for the window.
        limit: u32,
        /// Units the rejected request asked for.
        requested: u32,
    },

    /// A non-revoked certificate already occupies this issuance slot.
    /// Carries the occupant so the caller can offer reissue.
    #[error("certificate {existing_id} ({status}) already exists for product {product_id} and recipient {recipient}")]
    CertificateAlreadyExists {
        /// The certificate holding the slot.
        existing_id: CertificateId,
        /// The occupant's current status.
        status: CertificateStatus,
        /// The product identifier of the occupied slot.
        product_id: String,
        /// The canonical recipient key of the occupied slot.
        recipient: String,
    },

    /// A batch request exceeds the tenant's per-batch size limit.
    #[error("batch of {size} recipients exceeds the limit of {max}")]
    BatchTooLarge {
        /// Recipients in the rejected request.
        size: usize,
        /// The plan's per-batch maximum.
        max: u32,
    },

    /// The ledger definitively rejected a mint.
    #[error("mint failed: {0}")]
    MintFailed(String),

    /// A custody transfer attempt failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The certificate's transfer attempt allowance is used up.
    #[error("transfer retries exhausted: {attempts} of {max} attempts used")]
    RetryExhausted {
        /// Attempts consumed.
        attempts: u32,
        /// The attempt allowance.
        max: u32,
    },

    /// A transfer pass was requested inside the tenant's cooldown window.
    #[error("transfer processing rate limited; retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the cooldown window opens.
        retry_after_secs: u64,
    },

    /// A lifecycle transition was requested that the record's current
    /// status does not permit.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The ledger could not be reached or did not answer in time. The
    /// outcome of the attempted call is unknown.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request input failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An internal invariant was violated or an infrastructure call failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::CertificateAlreadyExists { .. } => "CERTIFICATE_ALREADY_EXISTS",
            Self::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            Self::MintFailed(_) => "MINT_FAILED",
            Self::TransferFailed(_) => "TRANSFER_FAILED",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later can plausibly succeed
    /// without any state change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransferFailed(_) | Self::LedgerUnavailable(_) | Self::RateLimited { .. }
        )
    }
}

impl From<CertificateError> for PipelineError {
    fn from(err: CertificateError) -> Self {
        match err {
            CertificateError::RetryExhausted { attempts, max } => {
                Self::RetryExhausted { attempts, max }
            }
            other => Self::InvalidTransition(other.to_string()),
        }
    }
}

impl From<BatchError> for PipelineError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::InvalidTransition { .. } | BatchError::NotProcessing { .. } => {
                Self::InvalidTransition(err.to_string())
            }
            // Counter violations are driver bugs, not caller mistakes.
            other => Self::Internal(other.to_string()),
        }
    }
}
