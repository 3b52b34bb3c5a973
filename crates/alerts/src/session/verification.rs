//! Verification transport boundary and the code/phone helpers around it.

use std::sync::LazyLock;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::{AlertError, AlertResult};

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").unwrap());

/// Sends a verification code to a phone number (SMS gateway, etc.).
///
/// The core only looks at success or failure of the call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationSender: Send + Sync {
    async fn send_code(&self, phone_number: &str, code: &str) -> anyhow::Result<()>;
}

/// Writes codes to the log instead of sending them. Development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogVerificationSender;

#[async_trait]
impl VerificationSender for LogVerificationSender {
    async fn send_code(&self, phone_number: &str, code: &str) -> anyhow::Result<()> {
        info!(phone = %mask(phone_number), code, "Verification code issued");
        Ok(())
    }
}

/// Strip formatting and check the basic shape of a phone number.
///
/// Spaces, dashes, dots and parentheses are ignored; what remains must be
/// 7 to 15 digits with an optional leading `+`.
pub fn normalize_phone(raw: &str) -> AlertResult<String> {
    let normalized: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if normalized.is_empty() {
        return Err(AlertError::InvalidPhoneFormat {
            reason: "phone number is empty".to_string(),
        });
    }
    if !PHONE_PATTERN.is_match(&normalized) {
        return Err(AlertError::InvalidPhoneFormat {
            reason: "expected 7 to 15 digits with an optional leading '+'".to_string(),
        });
    }
    Ok(normalized)
}

/// Random 6-digit code
pub(crate) fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000))
}

/// Hex SHA-256 of `salt:value`.
pub(crate) fn digest(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn mask(phone_number: &str) -> String {
    let visible = phone_number.len().saturating_sub(4);
    format!("{}{}", "*".repeat(visible), &phone_number[visible..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 123-4567").unwrap(), "+15551234567");
        assert_eq!(normalize_phone("612.345.678").unwrap(), "612345678");
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("+1 555 CALL NOW").is_err());
        assert!(normalize_phone("++15551234567").is_err());
    }

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_digest_is_salted() {
        assert_eq!(digest("a", "123456"), digest("a", "123456"));
        assert_ne!(digest("a", "123456"), digest("b", "123456"));
        assert_eq!(digest("a", "x").len(), 64);
    }

    #[test]
    fn test_mask_keeps_last_digits() {
        assert_eq!(mask("+15551234567"), "********4567");
        assert_eq!(mask("12"), "12");
    }
}
