//! Client-facing failure contract.
//!
//! Infrastructure faults (store unreachable, hashing failure) travel as
//! `anyhow::Error` and surface as 500s; everything here is the deliberate,
//! machine-readable shape of *expected* authentication failures. Wrong
//! password, unknown account, and revoked tokens all collapse into one
//! generic message; only expired-vs-invalid access tokens and the locked
//! state are distinguishable, because clients act differently on each.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::password::PasswordRule;
use crate::token::AccessTokenError;

/// An expected authentication failure, as the routes report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    /// Wrong password or unknown account; deliberately indistinguishable.
    InvalidCredentials,
    /// Account temporarily suspended by the lockout guard.
    AccountLocked,
    /// Access token past its expiry; the client should refresh silently.
    TokenExpired,
    /// Malformed or forged token; the client must re-authenticate.
    TokenInvalid,
    /// Registration against an email that already has an account.
    AccountExists,
    /// Password policy violations, itemized for the signup checklist.
    ValidationFailed(Vec<PasswordRule>),
}

/// JSON body sent with every rejection.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub code: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<&'static str>,
}

impl AuthRejection {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountLocked => StatusCode::LOCKED,
            Self::AccountExists => StatusCode::CONFLICT,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::AccountExists => "ACCOUNT_EXISTS",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
        }
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::AccountLocked => "Account temporarily locked; try again later",
            Self::TokenExpired => "Access token expired",
            Self::TokenInvalid => "Invalid access token",
            Self::AccountExists => "An account with this email already exists",
            Self::ValidationFailed(_) => "Password does not meet requirements",
        }
    }

    #[must_use]
    pub fn body(&self) -> RejectionBody {
        let errors = match self {
            Self::ValidationFailed(rules) => rules.iter().map(|rule| rule.message()).collect(),
            _ => Vec::new(),
        };
        RejectionBody {
            code: self.code(),
            message: self.message(),
            errors,
        }
    }
}

impl From<AccessTokenError> for AuthRejection {
    fn from(err: AccessTokenError) -> Self {
        match err {
            AccessTokenError::Expired => Self::TokenExpired,
            AccessTokenError::Invalid => Self::TokenInvalid,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
