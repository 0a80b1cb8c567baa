//! # certon-state — Certificate and Batch Lifecycles
//!
//! Implements the stateful records of the issuance pipeline. Each record
//! carries an explicit status enum, and transitions are methods that
//! check the current status and return a typed error on a bad move.
//! Nothing outside this crate mutates a status field directly.
//!
//! ## State Machines
//!
//! - **Certificate** (`certificate.rs`): issuance and custody lifecycle
//!   (`pending_confirmation → minted → pending_transfer →
//!   transferred_to_brand`), with a bounded retry loop through
//!   `transfer_failed` and an idempotent `revoked` branch. Every hop is
//!   appended to an in-record history log.
//!
//! - **BatchJob** (`batch.rs`): progress tracking for multi-recipient
//!   creation (`queued → processing → completed/failed`), enforcing
//!   `processed = successful + failed ≤ total` inside the recording
//!   methods.
//!
//! ## Design
//!
//! Transitions run compare-and-set style: the caller names the move, the
//! record verifies its own status and either applies the transition or
//! returns [`CertificateError::InvalidTransition`] /
//! [`BatchError::InvalidTransition`] naming both ends. Drivers hold these
//! records behind a store lock, so a lost race surfaces as a typed error
//! rather than a silently overwritten status.

pub mod batch;
pub mod certificate;

// ─── Certificate re-exports ─────────────────────────────────────────

pub use certificate::{
    Certificate, CertificateError, CertificateStatus, RevokeOutcome, StatusChange,
};

// ─── Batch re-exports ───────────────────────────────────────────────

pub use batch::{
    BatchError, BatchJob, BatchRecipient, BatchStatus, RecipientError, MAX_RECORDED_ERRORS,
};
