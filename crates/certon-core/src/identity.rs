//! # Identity Newtypes
//!
//! Domain-primitive newtypes for identifiers throughout the certificate
//! pipeline. Each identifier is a distinct type — you cannot pass a
//! [`TenantId`] where a [`CertificateId`] is expected.
//!
//! ## Validation
//!
//! UUID-based identifiers ([`TenantId`], [`CertificateId`], [`BatchJobId`])
//! are always valid by construction. String-based identifiers are owned by
//! external systems (the product catalog, the custody ledger) and validate
//! only shape at construction time: the ledger's wire format is explicitly
//! out of scope, so [`TokenId`], [`TxHash`] and [`ContractAddress`] accept
//! any opaque printable token, while [`WalletAddress`] additionally requires
//! an address-like alphanumeric form.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Upper bound on the stored length of every string-backed identifier.
const MAX_OPAQUE_LEN: usize = 128;

/// Shared shape check for opaque external identifiers: non-empty, bounded,
/// printable ASCII with no embedded whitespace.
fn validate_opaque(what: &'static str, s: &str) -> Result<(), ValidationError> {
    if s.is_empty() || s.len() > MAX_OPAQUE_LEN || !s.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidIdentifier {
            what,
            value: s.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// UUID-based identifiers (always valid by construction)
// ---------------------------------------------------------------------------

/// A unique identifier for a tenant (brand account). The unit of quota and
/// dedup scoping across the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Create a new random tenant identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a tenant identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique identifier for one issued certificate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(Uuid);

impl CertificateId {
    /// Create a new random certificate identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a certificate identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CertificateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique identifier for a multi-recipient batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchJobId(Uuid);

impl BatchJobId {
    /// Create a new random batch job identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a batch job identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// String-based identifiers (owned by external systems, shape-validated)
// ---------------------------------------------------------------------------

/// Identifier of a product in the surrounding catalog service.
///
/// The catalog owns the format; this core only requires a non-empty opaque
/// token so a certificate can reference the product it certifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(String);

impl ProductId {
    /// Create a product identifier from a catalog-supplied value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdentifier`] if the trimmed value is
    /// empty, longer than 128 characters, or contains non-printable ASCII.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into().trim().to_string();
        validate_opaque("product ID", &s)?;
        Ok(Self(s))
    }

    /// Access the product identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger-assigned token identifier for a minted credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(String);

impl TokenId {
    /// Create a token identifier from a ledger-supplied value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdentifier`] on an empty, oversized,
    /// or non-printable value.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into().trim().to_string();
        validate_opaque("token ID", &s)?;
        Ok(Self(s))
    }

    /// Access the token identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash on the custody ledger.
///
/// Opaque to this core: it is only ever echoed back into
/// `query_receipt` calls and audit fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(String);

impl TxHash {
    /// Create a transaction hash from a ledger-supplied value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdentifier`] on an empty, oversized,
    /// or non-printable value.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into().trim().to_string();
        validate_opaque("transaction hash", &s)?;
        Ok(Self(s))
    }

    /// Access the transaction hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of the credential contract on the custody ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractAddress(String);

impl ContractAddress {
    /// Create a contract address from a ledger-supplied value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdentifier`] on an empty, oversized,
    /// or non-printable value.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into().trim().to_string();
        validate_opaque("contract address", &s)?;
        Ok(Self(s))
    }

    /// Access the contract address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wallet address on the custody ledger — the destination identity for
/// custody transfers (a tenant's brand wallet, or a wallet-type recipient).
///
/// # Validation
///
/// - 10-128 characters, ASCII alphanumeric only (covers hex with `0x`
///   prefix and base58 forms without committing to either)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Create a wallet address, validating the address-like shape.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidWalletAddress`] if the trimmed value
    /// is not 10-128 alphanumeric characters.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into().trim().to_string();
        if s.len() < 10 || s.len() > MAX_OPAQUE_LEN || !s.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ValidationError::InvalidWalletAddress(s));
        }
        Ok(Self(s))
    }

    /// Access the wallet address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address lowercased, for case-insensitive identity comparison.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- UUID identifiers --

    #[test]
    fn tenant_id_unique() {
        let a = TenantId::new();
        let b = TenantId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn certificate_id_from_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        let id = CertificateId::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
    }

    #[test]
    fn batch_job_id_display_matches_uuid() {
        let uuid = Uuid::new_v4();
        let id = BatchJobId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    // -- ProductId --

    #[test]
    fn product_id_trims_and_stores() {
        let id = ProductId::new("  prod-6617a9  ").unwrap();
        assert_eq!(id.as_str(), "prod-6617a9");
    }

    #[test]
    fn product_id_rejects_invalid() {
        assert!(ProductId::new("").is_err());
        assert!(ProductId::new("   ").is_err());
        assert!(ProductId::new("has space").is_err());
        assert!(ProductId::new("a".repeat(129)).is_err());
    }

    // -- TokenId / TxHash / ContractAddress --

    #[test]
    fn token_id_accepts_numeric_and_opaque() {
        assert!(TokenId::new("42").is_ok());
        assert!(TokenId::new("tok_8f3k2j").is_ok());
        assert!(TokenId::new("").is_err());
    }

    #[test]
    fn tx_hash_accepts_hex() {
        let tx = TxHash::new("0xabc123def456").unwrap();
        assert_eq!(tx.as_str(), "0xabc123def456");
    }

    #[test]
    fn contract_address_rejects_embedded_whitespace() {
        assert!(ContractAddress::new("0xdead beef").is_err());
    }

    // -- WalletAddress --

    #[test]
    fn wallet_address_valid_forms() {
        assert!(WalletAddress::new("0xb9c5714089478a327f09197987f16f9e5d936e8a").is_ok());
        assert!(WalletAddress::new("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy").is_ok());
    }

    #[test]
    fn wallet_address_rejects_invalid() {
        assert!(WalletAddress::new("").is_err());
        assert!(WalletAddress::new("short").is_err()); // under 10 chars
        assert!(WalletAddress::new("0xdead-beef-0000").is_err()); // punctuation
        assert!(WalletAddress::new("a".repeat(129)).is_err());
    }

    #[test]
    fn wallet_address_normalized_lowercases() {
        let w = WalletAddress::new("0xB9C5714089478a327F09197987f16f9E5d936E8a").unwrap();
        assert_eq!(
            w.normalized(),
            "0xb9c5714089478a327f09197987f16f9e5d936e8a"
        );
        assert!(w.as_str().contains('B')); // original casing preserved
    }
}
