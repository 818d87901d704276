//! Email verification and password reset flows.
//!
//! Both flows use single-use, time-bounded opaque tokens with one active
//! token per account; consumption happens in the same transaction as the
//! state change it authorizes, so a token can never be replayed. A completed
//! password reset also revokes every outstanding refresh token and session
//! for the account.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::password::{hash_password, validate_password, PasswordRule};
use crate::storage;
use crate::utils::{generate_token, hash_token};

/// Outcome of a password reset attempt.
#[derive(Debug)]
pub enum ResetOutcome {
    /// Password replaced; all other live credentials invalidated.
    Completed,
    /// Unknown, expired, or already-used token.
    InvalidToken,
    /// Replacement password failed the policy; nothing was changed.
    WeakPassword(Vec<PasswordRule>),
}

/// Issue an email-verification token (24 h default). Replaces any prior
/// token for the account; only the latest is honored.
///
/// # Errors
///
/// Fails on store or RNG failure.
pub async fn generate_email_verification_token(
    pool: &PgPool,
    account_id: Uuid,
    config: &AuthConfig,
) -> Result<String> {
    let token = generate_token()?;
    storage::upsert_verification_token(
        pool,
        account_id,
        &hash_token(&token),
        config.verification_token_ttl_seconds(),
    )
    .await?;
    Ok(token)
}

/// Consume a verification token and mark the account's email verified.
///
/// Returns `false` for unknown/expired/already-used tokens. Consumption and
/// the flag flip share one transaction, so a second call with the same token
/// finds nothing.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn verify_email(pool: &PgPool, token: &str) -> Result<bool> {
    let token_hash = hash_token(token);
    let mut tx = pool.begin().await.context("begin verify-email transaction")?;

    let Some(account_id) = storage::consume_verification_token(&mut tx, &token_hash).await? else {
        let _ = tx.rollback().await;
        debug!("verification token not found or expired");
        return Ok(false);
    };

    storage::mark_email_verified(&mut tx, account_id).await?;
    tx.commit().await.context("commit verify-email transaction")?;
    Ok(true)
}

/// Issue a password-reset token (1 h default), replacing any prior one.
///
/// # Errors
///
/// Fails on store or RNG failure.
pub async fn generate_password_reset_token(
    pool: &PgPool,
    account_id: Uuid,
    config: &AuthConfig,
) -> Result<String> {
    let token = generate_token()?;
    storage::upsert_reset_token(
        pool,
        account_id,
        &hash_token(&token),
        config.reset_token_ttl_seconds(),
    )
    .await?;
    Ok(token)
}

/// Complete a password reset.
///
/// On success, in one transaction: the token is consumed, the new password
/// hash stored, lockout state cleared, and every refresh token and session
/// for the account invalidated. A reset must leave no other live credential.
///
/// # Errors
///
/// Fails on store or hashing failure; a bad token or weak password is a
/// normal outcome, not an error.
pub async fn reset_password(
    pool: &PgPool,
    token: &str,
    new_password: &str,
    config: &AuthConfig,
) -> Result<ResetOutcome> {
    let check = validate_password(Some(new_password));
    if !check.is_valid {
        return Ok(ResetOutcome::WeakPassword(check.errors));
    }

    // Hash before opening the transaction; bcrypt is deliberately slow and
    // must not hold a connection's row locks while it runs.
    let password_hash = hash_password(new_password, config.bcrypt_cost())?;

    let token_hash = hash_token(token);
    let mut tx = pool.begin().await.context("begin reset transaction")?;

    let Some(account_id) = storage::consume_reset_token(&mut tx, &token_hash).await? else {
        let _ = tx.rollback().await;
        debug!("reset token not found or expired");
        return Ok(ResetOutcome::InvalidToken);
    };

    storage::update_password(&mut tx, account_id, &password_hash).await?;
    storage::revoke_all_refresh_tokens(&mut *tx, account_id).await?;
    storage::delete_sessions_for_account(&mut *tx, account_id).await?;

    tx.commit().await.context("commit reset transaction")?;
    warn!(%account_id, "password reset completed; all sessions and refresh tokens invalidated");
    Ok(ResetOutcome::Completed)
}
