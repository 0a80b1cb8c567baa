#![deny(missing_docs)]

//! # certon-core — Foundational Types for the Certificate Pipeline
//!
//! This crate defines the types every other crate in the workspace depends
//! on. It has no internal crate dependencies — only `serde`, `thiserror`,
//! `chrono`, and `uuid` from the external ecosystem, and no async or I/O.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** Every identifier is a
//!    distinct type. You cannot pass a [`TenantId`] where a
//!    [`CertificateId`] is expected, and ledger-owned strings
//!    ([`TokenId`], [`TxHash`], [`ContractAddress`], [`WalletAddress`])
//!    never travel as bare `String`s.
//!
//! 2. **Canonical recipient addresses.** [`Recipient`] normalizes at
//!    construction, so the uniqueness invariant over
//!    (tenant, product, recipient) compares canonical forms, never raw
//!    input.
//!
//! 3. **Explicit policy objects.** [`PlanLimits`] and
//!    [`TenantTransferSettings`] are resolved by external collaborators and
//!    passed into calls; no component reaches into a plan table.
//!
//! 4. **Structured errors.** [`ValidationError`] with `thiserror` — no
//!    `Box<dyn Error>`, no `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod plan;
pub mod recipient;
pub mod temporal;

// Re-export primary types at crate root for ergonomic imports.
pub use error::ValidationError;
pub use identity::{
    BatchJobId, CertificateId, ContractAddress, ProductId, TenantId, TokenId, TxHash,
    WalletAddress,
};
pub use plan::{
    PlanLimits, QuotaKind, TenantTransferSettings, DEFAULT_COOLDOWN_SECS,
    DEFAULT_MAX_TRANSFER_ATTEMPTS, MAX_CHUNK_CONCURRENCY, MAX_TRANSFER_ATTEMPT_CAP,
};
pub use recipient::{ContactMethod, Recipient};
pub use temporal::{MonthWindow, Timestamp};
