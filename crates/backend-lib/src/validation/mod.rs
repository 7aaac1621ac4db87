// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Request field validation.

use crate::error::AppError;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_CALL_ID_LENGTH: usize = 128;

// E.164 allows at most 15 digits; anything under 10 is not a subscriber number
static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("static regex"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid call ID: {0}")]
    InvalidCallId(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

/// Validate a phone number and return it with spaces, dashes and
/// parentheses removed.
pub fn validate_phone_number(phone: &str) -> ValidationResult<String> {
    let normalized: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if normalized.is_empty() {
        return Err(ValidationError::InvalidPhoneNumber(
            "Phone number must not be empty".to_string(),
        ));
    }

    if !PHONE_REGEX.is_match(&normalized) {
        return Err(ValidationError::InvalidPhoneNumber(
            "Phone number must be 10 to 15 digits with an optional leading +".to_string(),
        ));
    }

    Ok(normalized)
}

/// Validate a provider call id.
///
/// The id is opaque and assigned by the provider, so only its size is
/// checked. Ids from the provider pass through the same check before a
/// session is stored, keeping every stored session reachable.
pub fn validate_call_id(call_id: &str) -> ValidationResult<&str> {
    if call_id.is_empty() {
        return Err(ValidationError::InvalidCallId(
            "Call ID must not be empty".to_string(),
        ));
    }

    if call_id.len() > MAX_CALL_ID_LENGTH {
        return Err(ValidationError::InvalidCallId(format!(
            "Call ID cannot exceed {MAX_CALL_ID_LENGTH} characters"
        )));
    }

    Ok(call_id)
}

/// Mask a phone number for logs, keeping the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let visible: String = phone.chars().skip(count - 4).collect();
    format!("{}{visible}", "*".repeat(count - 4))
}
