//! # certon-pipeline — Issuance and Custody-Transfer Orchestration
//!
//! The pipeline drives a certificate from creation to settled custody:
//! reserve quota, claim the recipient slot, mint on the custody ledger,
//! and (for tenants with auto transfer configured) move the credential to
//! the brand wallet with retries on a backoff schedule.
//!
//! ## Layout
//!
//! | Module         | Concern                                             |
//! |----------------|-----------------------------------------------------|
//! | [`pipeline`]   | The [`CertificatePipeline`] facade                  |
//! | [`issuance`]   | Single-certificate mint flow and reconciliation     |
//! | [`batch`]      | Multi-recipient fan-out with bounded concurrency    |
//! | [`transfer`]   | Custody transfer engine, backoff, retry surfaces    |
//! | [`quota`]      | Month-windowed reservation ledger                   |
//! | [`cooldown`]   | Per-tenant transfer run gate                        |
//! | [`store`]      | In-memory certificate and batch stores              |
//! | [`ports`]      | Collaborator traits: ledger, plans, settings, sink  |
//! | [`db`]         | Optional Postgres write-through mirror              |
//!
//! External services enter through the [`ports`] traits; everything else
//! is owned in-process and shared behind cheap-clone handles.

pub mod batch;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod error;
pub mod issuance;
pub mod pipeline;
pub mod ports;
pub mod quota;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod testkit;

pub use crate::batch::{BatchOrchestrator, CreateBatchRequest};
pub use crate::config::PipelineConfig;
pub use crate::cooldown::TransferGate;
pub use crate::db::Mirror;
pub use crate::error::PipelineError;
pub use crate::issuance::{CreateCertificateRequest, Issuer, ReconcileReport};
pub use crate::pipeline::CertificatePipeline;
pub use crate::ports::{
    CertificateEvent, CustodyLedger, LedgerError, LedgerMintReceipt, MintRequest, MintStatus,
    NotificationSink, NullSink, PlanService, ReceiptStatus, SettingsProvider, TransferReceipt,
    TransferRequest,
};
pub use crate::quota::{QuotaLedger, QuotaUsage, ReservationToken};
pub use crate::store::{BatchStore, CertificateCounts, CertificateStore};
pub use crate::transfer::{BackoffPolicy, SweepReport, TransferEngine, TransferRunReport};
