//! # Validation Errors
//!
//! Structured validation errors for the domain primitives, built with
//! `thiserror`. Each variant carries the rejected input and the expected
//! format so callers can diagnose bad requests without guesswork.

use thiserror::Error;

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// An opaque external identifier failed the shared shape check.
    #[error("invalid {what}: \"{value}\" (expected 1-128 printable ASCII characters, no whitespace)")]
    InvalidIdentifier {
        /// Which identifier kind was being constructed.
        what: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A wallet address is not address-shaped.
    #[error("invalid wallet address: \"{0}\" (expected 10-128 alphanumeric characters)")]
    InvalidWalletAddress(String),

    /// An email recipient address fails basic structural checks.
    #[error("invalid email address: \"{0}\"")]
    InvalidEmail(String),

    /// A phone recipient address is not a plausible subscriber number.
    #[error("invalid phone number: \"{0}\" (expected 7-15 digits, optional leading +)")]
    InvalidPhone(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_display_names_the_kind() {
        let err = ValidationError::InvalidIdentifier {
            what: "product ID",
            value: "".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("product ID"));
        assert!(msg.contains("printable ASCII"));
    }

    #[test]
    fn invalid_wallet_display_carries_input() {
        let err = ValidationError::InvalidWalletAddress("nope".to_string());
        assert!(format!("{err}").contains("nope"));
    }

    #[test]
    fn invalid_email_display_carries_input() {
        let err = ValidationError::InvalidEmail("not-an-email".to_string());
        assert!(format!("{err}").contains("not-an-email"));
    }

    #[test]
    fn invalid_phone_display_states_expectation() {
        let err = ValidationError::InvalidPhone("12".to_string());
        let msg = format!("{err}");
        assert!(msg.contains("12"));
        assert!(msg.contains("7-15 digits"));
    }

    #[test]
    fn all_variants_are_debug() {
        let e = ValidationError::InvalidPhone("x".to_string());
        assert!(!format!("{e:?}").is_empty());
    }
}
