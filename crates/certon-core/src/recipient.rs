//! # Recipient Contact Model
//!
//! A recipient is the party a certificate is issued to, addressed through
//! one of three contact methods: email, phone, or a ledger wallet.
//!
//! ## Canonical Storage
//!
//! The dedup invariant (at most one active certificate per tenant, product
//! and recipient) only holds if `"A@x.com"` and `"a@x.com "` count as the
//! same recipient. Addresses are therefore normalized at construction and
//! stored in canonical form: emails lowercased and trimmed, phone numbers
//! stripped of separators, wallet addresses lowercased. The raw input is
//! not retained.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::WalletAddress;

/// How a recipient is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    /// Delivery to an email address.
    Email,
    /// Delivery to a phone number.
    Phone,
    /// Direct issuance to a recipient-owned ledger wallet.
    Wallet,
}

impl ContactMethod {
    /// Stable lowercase name, as used in serialized records and dedup keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Email => "email",
            ContactMethod::Phone => "phone",
            ContactMethod::Wallet => "wallet",
        }
    }
}

impl std::fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A certificate recipient: a contact method plus the canonicalized address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    /// How the recipient is addressed.
    pub method: ContactMethod,
    /// The address in canonical form (see module docs).
    pub address: String,
}

impl Recipient {
    /// Create a recipient, validating and canonicalizing the address for
    /// the given contact method.
    ///
    /// # Errors
    ///
    /// Returns the method-specific [`ValidationError`] variant when the
    /// address fails its structural check.
    pub fn new(method: ContactMethod, address: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = address.into();
        let canonical = match method {
            ContactMethod::Email => canonicalize_email(&raw)?,
            ContactMethod::Phone => canonicalize_phone(&raw)?,
            ContactMethod::Wallet => WalletAddress::new(raw)?.normalized(),
        };
        Ok(Self {
            method,
            address: canonical,
        })
    }

    /// Shorthand for an email recipient.
    pub fn email(address: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(ContactMethod::Email, address)
    }

    /// Shorthand for a phone recipient.
    pub fn phone(address: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(ContactMethod::Phone, address)
    }

    /// Shorthand for a wallet recipient.
    pub fn wallet(address: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(ContactMethod::Wallet, address)
    }

    /// The method-qualified canonical form used as the recipient component
    /// of dedup keys: `"email:a@x.com"`, `"phone:+4477..."`. Two recipients
    /// with the same key are the same party for uniqueness purposes.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.method.as_str(), self.address)
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.method, self.address)
    }
}

/// Lowercase and trim; require a single `@` with a non-empty local part and
/// a dotted domain. Full RFC 5321 parsing is the HTTP layer's problem.
fn canonicalize_email(raw: &str) -> Result<String, ValidationError> {
    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() || s.len() > 254 || s.chars().any(|c| c.is_whitespace()) {
        return Err(ValidationError::InvalidEmail(raw.to_string()));
    }
    let Some((local, domain)) = s.split_once('@') else {
        return Err(ValidationError::InvalidEmail(raw.to_string()));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ValidationError::InvalidEmail(raw.to_string()));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::InvalidEmail(raw.to_string()));
    }
    Ok(s)
}

/// Strip visual separators, keep an optional leading `+`, require 7-15
/// digits. Canonical form is `+` (if present) followed by the digits.
fn canonicalize_phone(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidPhone(raw.to_string()));
    }
    Ok(format!("{plus}{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- email --

    #[test]
    fn email_canonicalizes_case_and_whitespace() {
        let a = Recipient::email("  Alice@Example.COM ").unwrap();
        assert_eq!(a.address, "alice@example.com");
    }

    #[test]
    fn email_rejects_invalid() {
        assert!(Recipient::email("").is_err());
        assert!(Recipient::email("no-at-sign").is_err());
        assert!(Recipient::email("@example.com").is_err());
        assert!(Recipient::email("a@").is_err());
        assert!(Recipient::email("a@nodot").is_err());
        assert!(Recipient::email("a@.com").is_err());
        assert!(Recipient::email("a@b@c.com").is_err());
    }

    // -- phone --

    #[test]
    fn phone_strips_separators() {
        let p = Recipient::phone("+44 (20) 7946-0958").unwrap();
        assert_eq!(p.address, "+442079460958");
    }

    #[test]
    fn phone_without_plus() {
        let p = Recipient::phone("02079460958").unwrap();
        assert_eq!(p.address, "02079460958");
    }

    #[test]
    fn phone_rejects_invalid() {
        assert!(Recipient::phone("").is_err());
        assert!(Recipient::phone("123456").is_err()); // 6 digits
        assert!(Recipient::phone("1234567890123456").is_err()); // 16 digits
        assert!(Recipient::phone("+44abc12345").is_err());
    }

    // -- wallet --

    #[test]
    fn wallet_lowercased_for_identity() {
        let w = Recipient::wallet("0xB9C5714089478a327F09197987f16f9E5d936E8a").unwrap();
        assert_eq!(w.address, "0xb9c5714089478a327f09197987f16f9e5d936e8a");
    }

    // -- dedup keys --

    #[test]
    fn dedup_key_is_method_qualified() {
        let r = Recipient::email("a@x.com").unwrap();
        assert_eq!(r.dedup_key(), "email:a@x.com");
    }

    #[test]
    fn dedup_key_equal_across_input_variants() {
        let a = Recipient::email("A@X.com").unwrap();
        let b = Recipient::email(" a@x.com").unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_distinguishes_methods() {
        // The same literal string addressed by different methods is a
        // different recipient.
        let w1 = Recipient::wallet("1234567890abc").unwrap();
        let p1 = Recipient::phone("1234567890").unwrap();
        assert_ne!(w1.dedup_key(), p1.dedup_key());
    }

    #[test]
    fn contact_method_serde_snake_case() {
        let json = serde_json::to_string(&ContactMethod::Email).unwrap();
        assert_eq!(json, "\"email\"");
        let back: ContactMethod = serde_json::from_str("\"wallet\"").unwrap();
        assert_eq!(back, ContactMethod::Wallet);
    }
}
