//! # Plan Limits and Tenant Transfer Settings
//!
//! Value objects resolved from external collaborators and passed explicitly
//! into pipeline calls. [`PlanLimits`] replaces per-tier lookup tables: the
//! plan service resolves a tenant's tier to one bundle of numbers, and the
//! pipeline only ever enforces the bundle it is handed.
//! [`TenantTransferSettings`] is the tenant's transfer configuration
//! snapshot, owned by the settings collaborator and read-only here.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::identity::WalletAddress;

/// Default per-certificate transfer attempt cap when a tenant has not
/// configured one.
pub const DEFAULT_MAX_TRANSFER_ATTEMPTS: u32 = 3;

/// Hard ceiling on the configurable per-certificate attempt cap.
pub const MAX_TRANSFER_ATTEMPT_CAP: u32 = 10;

/// Hard ceiling on intra-chunk concurrency, whatever the plan says.
pub const MAX_CHUNK_CONCURRENCY: u32 = 20;

/// Default tenant-level transfer cooldown window.
pub const DEFAULT_COOLDOWN_SECS: u64 = 3_600;

/// The two dimensions of monthly quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Certificate creation (mint) allowance.
    Issuance,
    /// Custody transfer allowance.
    Transfer,
}

impl QuotaKind {
    /// Stable lowercase name, as used in serialized records and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Issuance => "issuance",
            QuotaKind::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plan-derived limits for one tenant, resolved once per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Certificates the tenant may mint per calendar month.
    pub issuance_per_month: u32,
    /// Custody transfers the tenant may schedule per calendar month.
    pub transfers_per_month: u32,
    /// Largest accepted recipient list for one batch request.
    pub max_batch_size: u32,
    /// Requested intra-chunk fan-out width (clamped at use, see
    /// [`PlanLimits::effective_concurrency`]).
    pub max_concurrency: u32,
}

impl PlanLimits {
    /// The monthly allowance for the given quota dimension.
    pub fn limit_for(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Issuance => self.issuance_per_month,
            QuotaKind::Transfer => self.transfers_per_month,
        }
    }

    /// The concurrency actually used for fan-out: at least 1, at most
    /// [`MAX_CHUNK_CONCURRENCY`] regardless of plan configuration.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CHUNK_CONCURRENCY) as usize
    }
}

impl Default for PlanLimits {
    /// Entry-tier numbers, used when the plan service has no record for a
    /// tenant and as a test baseline.
    fn default() -> Self {
        Self {
            issuance_per_month: 100,
            transfers_per_month: 100,
            max_batch_size: 50,
            max_concurrency: 5,
        }
    }
}

/// A tenant's transfer configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTransferSettings {
    /// Schedule a custody transfer automatically after each successful mint.
    pub auto_transfer_enabled: bool,
    /// The tenant's brand wallet — the custody transfer destination.
    pub brand_wallet: Option<WalletAddress>,
    /// Whether ownership of `brand_wallet` has been verified. Transfers are
    /// never scheduled to an unverified wallet.
    pub wallet_verified: bool,
    /// Per-certificate transfer attempt cap, snapshotted onto each
    /// certificate at creation.
    pub max_transfer_attempts: u32,
    /// Permit multi-certificate transfer passes; when false the engine
    /// moves one certificate per pass.
    pub batch_transfer_enabled: bool,
    /// Minimum seconds between two transfer passes for this tenant.
    pub cooldown_secs: u64,
}

impl TenantTransferSettings {
    /// True when every precondition for automatic transfer scheduling holds:
    /// enabled, wallet present, wallet verified.
    pub fn auto_transfer_ready(&self) -> bool {
        self.auto_transfer_enabled && self.wallet_verified && self.brand_wallet.is_some()
    }

    /// The configured attempt cap clamped to `1..=`[`MAX_TRANSFER_ATTEMPT_CAP`].
    pub fn attempt_cap(&self) -> u32 {
        self.max_transfer_attempts.clamp(1, MAX_TRANSFER_ATTEMPT_CAP)
    }

    /// The cooldown window as a duration.
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for TenantTransferSettings {
    /// Conservative defaults: transfers stay manual until the tenant opts in
    /// and verifies a wallet.
    fn default() -> Self {
        Self {
            auto_transfer_enabled: false,
            brand_wallet: None,
            wallet_verified: false,
            max_transfer_attempts: DEFAULT_MAX_TRANSFER_ATTEMPTS,
            batch_transfer_enabled: false,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}
