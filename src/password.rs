//! Password hashing and the registration password policy.
//!
//! Hashing never judges password quality; that is the policy validator's
//! job, and it reports every violated rule at once so the frontend can
//! render a full checklist.

use anyhow::{Context, Result};
use serde::Serialize;

/// bcrypt work-factor floor. Configured costs below this are raised to it.
pub const MIN_BCRYPT_COST: u32 = 12;

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_PASSWORD_CHARS: usize = 128;

/// Symbols accepted by the `Special` rule.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>?/`~\\";

/// Hash a plaintext password with bcrypt.
///
/// # Errors
///
/// Fails only on internal bcrypt failure, never on weak input.
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String> {
    bcrypt::hash(plaintext, cost.max(MIN_BCRYPT_COST)).context("failed to hash password")
}

/// Verify a plaintext password against a stored bcrypt hash.
///
/// A malformed stored hash reads as a failed match rather than an error;
/// the row is unusable either way and the caller's response is identical.
#[must_use]
pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    bcrypt::verify(plaintext, stored_hash).unwrap_or(false)
}

/// One policy rule a candidate password failed to meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordRule {
    Required,
    TooShort,
    TooLong,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
}

impl PasswordRule {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Required => "Password is required",
            Self::TooShort => "Password must be at least 8 characters",
            Self::TooLong => "Password must be at most 128 characters",
            Self::MissingUppercase => "Password must contain an uppercase letter",
            Self::MissingLowercase => "Password must contain a lowercase letter",
            Self::MissingDigit => "Password must contain a digit",
            Self::MissingSpecial => "Password must contain a special character",
        }
    }
}

/// Result of evaluating the password policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    pub is_valid: bool,
    pub errors: Vec<PasswordRule>,
}

/// Evaluate the registration password policy.
///
/// Pure and total: a missing password yields a `Required` violation instead
/// of an error, and all violated rules are reported, not just the first.
#[must_use]
pub fn validate_password(password: Option<&str>) -> PasswordCheck {
    let Some(password) = password else {
        return PasswordCheck {
            is_valid: false,
            errors: vec![PasswordRule::Required],
        };
    };

    let mut errors = Vec::new();
    let length = password.chars().count();
    if length < MIN_PASSWORD_CHARS {
        errors.push(PasswordRule::TooShort);
    }
    if length > MAX_PASSWORD_CHARS {
        errors.push(PasswordRule::TooLong);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push(PasswordRule::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push(PasswordRule::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(PasswordRule::MissingDigit);
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        errors.push(PasswordRule::MissingSpecial);
    }

    PasswordCheck {
        is_valid: errors.is_empty(),
        errors,
    }
}
