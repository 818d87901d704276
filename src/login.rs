//! Login and registration orchestration.
//!
//! The login order is fixed and must not be reordered: lock check, then
//! password verification, then failure accounting or success reset, then
//! token issuance. A locked account short-circuits before the password is
//! ever examined, so the response cannot leak whether it would have matched.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::lockout::{self, lock_state};
use crate::password::{hash_password, validate_password, verify_password, PasswordRule};
use crate::session::{self, DeviceInfo};
use crate::storage;
use crate::token::TokenIssuer;
use crate::utils::{normalize_email, now_unix_seconds, valid_email};

/// Login request payload.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Everything a successful login hands back to the routes.
#[derive(Debug)]
pub struct IssuedCredentials {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
    pub email_verified: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub session_token: String,
}

/// Outcome of a login attempt. Wrong password and unknown account collapse
/// into one generic variant; `Locked` stays distinct because the routes
/// answer it with 423 rather than 401.
#[derive(Debug)]
pub enum LoginOutcome {
    Success(Box<IssuedCredentials>),
    InvalidCredentials,
    Locked,
}

/// Outcome of a registration attempt.
#[derive(Debug)]
pub enum RegisterOutcome {
    Created(Uuid),
    /// Email already registered.
    Conflict,
    InvalidEmail,
    WeakPassword(Vec<PasswordRule>),
}

/// Authenticate an account and, on success, issue the full credential set:
/// access token, refresh token, and a device session.
///
/// # Errors
///
/// Fails only on store, hashing, or signing failure; every user-caused
/// failure is a [`LoginOutcome`] variant.
#[instrument(skip_all, fields(email = %normalize_email(&credentials.email)))]
pub async fn authenticate(
    pool: &PgPool,
    issuer: &TokenIssuer,
    config: &AuthConfig,
    credentials: &Credentials,
    device: &DeviceInfo,
) -> Result<LoginOutcome> {
    let email = normalize_email(&credentials.email);

    let Some(account) = storage::lookup_account_by_email(pool, &email).await? else {
        // Burn a hash so unknown accounts cost the same as a wrong password.
        let _ = hash_password(&credentials.password, config.bcrypt_cost());
        debug!("login attempt for unknown account");
        return Ok(LoginOutcome::InvalidCredentials);
    };

    // Lock check comes first; a locked account never reaches bcrypt.
    if lock_state(account.locked_until_unix, now_unix_seconds()).is_locked() {
        debug!("login attempt against locked account");
        return Ok(LoginOutcome::Locked);
    }

    if !verify_password(&credentials.password, &account.password_hash) {
        let attempt = lockout::record_failed_attempt(pool, account.id, config).await?;
        if attempt.locked {
            warn!(
                failed_attempts = attempt.failed_attempts,
                "account locked after repeated failed logins"
            );
        } else {
            debug!(failed_attempts = attempt.failed_attempts, "wrong password");
        }
        return Ok(LoginOutcome::InvalidCredentials);
    }

    lockout::reset_failed_attempts(pool, account.id).await?;

    let access_token = issuer.issue_access_token(account.id, account.tenant_id, &account.role)?;
    let refresh_token = issuer.issue_refresh_token(pool, account.id).await?;
    let session_token = session::create_session(pool, account.id, device, config).await?;

    Ok(LoginOutcome::Success(Box::new(IssuedCredentials {
        account_id: account.id,
        tenant_id: account.tenant_id,
        role: account.role,
        email_verified: account.email_verified,
        access_token,
        refresh_token,
        session_token,
    })))
}

/// Registration request payload.
#[derive(Debug, Clone)]
pub struct Registration {
    pub tenant_id: Uuid,
    pub email: String,
    pub password: String,
    pub role: String,
}

/// Create an account: policy check, bcrypt hash, insert. Duplicate emails
/// surface as `Conflict` for the routes' 409 response.
///
/// # Errors
///
/// Fails only on store or hashing failure.
#[instrument(skip_all, fields(email = %normalize_email(&registration.email)))]
pub async fn register(
    pool: &PgPool,
    config: &AuthConfig,
    registration: &Registration,
) -> Result<RegisterOutcome> {
    let email = normalize_email(&registration.email);
    if !valid_email(&email) {
        return Ok(RegisterOutcome::InvalidEmail);
    }

    let check = validate_password(Some(&registration.password));
    if !check.is_valid {
        return Ok(RegisterOutcome::WeakPassword(check.errors));
    }

    let password_hash = hash_password(&registration.password, config.bcrypt_cost())?;
    match storage::insert_account(
        pool,
        registration.tenant_id,
        &email,
        &password_hash,
        &registration.role,
    )
    .await?
    {
        Some(account_id) => Ok(RegisterOutcome::Created(account_id)),
        None => {
            debug!("registration for existing email");
            Ok(RegisterOutcome::Conflict)
        }
    }
}
