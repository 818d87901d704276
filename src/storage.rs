//! Database helpers for accounts, refresh tokens, sessions, and the
//! verification/reset token tables.
//!
//! Every query is parameterized, and every atomicity requirement of the core
//! (failed-attempt accounting, refresh rotation, token consumption) is
//! expressed as a single conditional `UPDATE`/`DELETE` or a transaction here
//! rather than an in-process lock. Timestamps are computed by the database;
//! Rust-side reads use unix seconds.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use crate::session::{DeviceInfo, SessionRecord};
use crate::utils::{generate_token, hash_token, is_unique_violation};

/// Full account row as the login path needs it. The plaintext password never
/// appears anywhere; only the bcrypt hash is stored.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub failed_attempts: i32,
    pub locked_until_unix: Option<i64>,
}

/// Claim fields needed to mint an access token during refresh.
#[derive(Debug, Clone)]
pub(crate) struct ClaimsSource {
    pub(crate) id: Uuid,
    pub(crate) tenant_id: Uuid,
    pub(crate) role: String,
}

/// An active (not revoked, not expired) refresh token row.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub account_id: Uuid,
    pub expires_at_unix: i64,
}

/// Post-increment view of the failed-attempt counter.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttempt {
    pub failed_attempts: i32,
    pub locked: bool,
}

pub(crate) async fn lookup_account_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AccountRecord>> {
    let query = r"
        SELECT id, tenant_id, email, role, password_hash, email_verified,
               failed_attempts,
               EXTRACT(EPOCH FROM locked_until)::BIGINT AS locked_until_unix
        FROM accounts
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;

    Ok(row.map(|row| AccountRecord {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        email: row.get("email"),
        role: row.get("role"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        failed_attempts: row.get("failed_attempts"),
        locked_until_unix: row.get("locked_until_unix"),
    }))
}

pub(crate) async fn lookup_claims_source(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<Option<ClaimsSource>> {
    let query = r"
        SELECT id, tenant_id, role
        FROM accounts
        WHERE id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup account for refresh")?;

    Ok(row.map(|row| ClaimsSource {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        role: row.get("role"),
    }))
}

/// Insert a new account. Returns `None` when the email is already taken.
pub(crate) async fn insert_account(
    pool: &PgPool,
    tenant_id: Uuid,
    email: &str,
    password_hash: &str,
    role: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        INSERT INTO accounts (tenant_id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(tenant_id)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(Some(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("failed to insert account"),
    }
}

pub(crate) async fn lookup_locked_until(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Option<Option<i64>>> {
    let query = r"
        SELECT EXTRACT(EPOCH FROM locked_until)::BIGINT AS locked_until_unix
        FROM accounts
        WHERE id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup lock expiry")?;
    Ok(row.map(|row| row.get("locked_until_unix")))
}

/// Atomic failed-attempt accounting. The `CASE` arms all read the pre-update
/// row, so the increment, the threshold check, and the lock write happen as
/// one statement:
/// - lapsed lock: counter restarts at 1 and the lock clears;
/// - counter reaching the threshold: lock expiry set in the same write.
pub(crate) async fn record_failed_attempt(
    pool: &PgPool,
    account_id: Uuid,
    threshold: i32,
    lock_seconds: i64,
) -> Result<FailedAttempt> {
    let query = r"
        UPDATE accounts
        SET failed_attempts = CASE
                WHEN locked_until IS NOT NULL AND locked_until <= NOW() THEN 1
                ELSE failed_attempts + 1
            END,
            locked_until = CASE
                WHEN locked_until IS NOT NULL AND locked_until <= NOW() THEN NULL
                WHEN failed_attempts + 1 >= $2 THEN NOW() + ($3 * INTERVAL '1 second')
                ELSE locked_until
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING failed_attempts,
                  (locked_until IS NOT NULL AND locked_until > NOW()) AS locked
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(threshold)
        .bind(lock_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to record failed attempt")?
        .ok_or_else(|| anyhow!("failed attempt recorded for unknown account"))?;

    Ok(FailedAttempt {
        failed_attempts: row.get("failed_attempts"),
        locked: row.get("locked"),
    })
}

pub(crate) async fn reset_failed_attempts(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET failed_attempts = 0,
            locked_until = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to reset failed attempts")?;
    Ok(())
}

pub(crate) async fn insert_refresh_token<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    account_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_tokens (account_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// A refresh token is usable iff not revoked and not past expiry; unknown,
/// expired, and revoked rows all come back as `None`.
pub(crate) async fn lookup_active_refresh_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<RefreshTokenRecord>> {
    let query = r"
        SELECT account_id, EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix
        FROM refresh_tokens
        WHERE token_hash = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup refresh token")?;

    Ok(row.map(|row| RefreshTokenRecord {
        account_id: row.get("account_id"),
        expires_at_unix: row.get("expires_at_unix"),
    }))
}

/// Revoke a refresh token only if it is still active, returning its owner.
/// The conditional `UPDATE` makes rotation single-winner under concurrency.
pub(crate) async fn revoke_refresh_token_if_active(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
        RETURNING account_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke presented refresh token")?;
    Ok(row.map(|row| row.get("account_id")))
}

pub(crate) async fn revoke_refresh_token(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Idempotent: revoking an unknown or already-revoked token changes nothing.
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1
          AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke refresh token")?;
    Ok(())
}

pub(crate) async fn revoke_all_refresh_tokens<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    account_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE account_id = $1
          AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to revoke account refresh tokens")?;
    Ok(())
}

/// Create a session row, retrying on the (astronomically unlikely) token-hash
/// collision so concurrent logins for one account always get distinct tokens.
pub(crate) async fn insert_session(
    pool: &PgPool,
    account_id: Uuid,
    device: &DeviceInfo,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO sessions (account_id, token_hash, user_agent, ip_address, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(token_hash)
            .bind(device.user_agent.as_deref())
            .bind(device.ip_address.as_deref())
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(crate) async fn touch_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Activity bumps are advisory; no rows matched is not a failure.
    let query = r"
        UPDATE sessions
        SET last_seen_at = NOW()
        WHERE token_hash = $1
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session activity")?;
    Ok(())
}

pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is destructive and idempotent; sessions are a live-device
    // registry, not an audit log.
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(crate) async fn list_sessions(pool: &PgPool, account_id: Uuid) -> Result<Vec<SessionRecord>> {
    let query = r"
        SELECT id, account_id, user_agent, ip_address,
               EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
               EXTRACT(EPOCH FROM last_seen_at)::BIGINT AS last_seen_at_unix,
               EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix
        FROM sessions
        WHERE account_id = $1
          AND expires_at > NOW()
        ORDER BY last_seen_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(account_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list sessions")?;

    Ok(rows
        .into_iter()
        .map(|row| SessionRecord {
            id: row.get("id"),
            account_id: row.get("account_id"),
            user_agent: row.get("user_agent"),
            ip_address: row.get("ip_address"),
            created_at_unix: row.get("created_at_unix"),
            last_seen_at_unix: row.get("last_seen_at_unix"),
            expires_at_unix: row.get("expires_at_unix"),
        })
        .collect())
}

pub(crate) async fn delete_sessions_for_account<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    account_id: Uuid,
) -> Result<()> {
    let query = "DELETE FROM sessions WHERE account_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to delete account sessions")?;
    Ok(())
}

/// Store the latest email-verification token for an account, replacing any
/// prior one. One active token per account; issuing invalidates the old.
pub(crate) async fn upsert_verification_token(
    pool: &PgPool,
    account_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO email_verification_tokens (account_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (account_id) DO UPDATE
        SET token_hash = EXCLUDED.token_hash,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert verification token")?;
    Ok(())
}

/// Consume a verification token if still valid. The `DELETE` both checks and
/// clears the token, so a replay finds nothing.
pub(crate) async fn consume_verification_token(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        DELETE FROM email_verification_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING account_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;
    Ok(row.map(|row| row.get("account_id")))
}

pub(crate) async fn mark_email_verified(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

pub(crate) async fn upsert_reset_token(
    pool: &PgPool,
    account_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO password_reset_tokens (account_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (account_id) DO UPDATE
        SET token_hash = EXCLUDED.token_hash,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert reset token")?;
    Ok(())
}

pub(crate) async fn consume_reset_token(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        DELETE FROM password_reset_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING account_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume reset token")?;
    Ok(row.map(|row| row.get("account_id")))
}

/// Replace the stored password hash and clear lockout state in one write.
pub(crate) async fn update_password(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET password_hash = $2,
            failed_attempts = 0,
            locked_until = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AccountRecord, FailedAttempt, RefreshTokenRecord};
    use uuid::Uuid;

    #[test]
    fn account_record_holds_values() {
        let record = AccountRecord {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            email: "owner@greenlawn.example".to_string(),
            role: "owner".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            email_verified: false,
            failed_attempts: 4,
            locked_until_unix: None,
        };
        assert_eq!(record.failed_attempts, 4);
        assert!(!record.email_verified);
        assert!(record.locked_until_unix.is_none());
    }

    #[test]
    fn failed_attempt_debug_includes_state() {
        let attempt = FailedAttempt {
            failed_attempts: 5,
            locked: true,
        };
        let debug = format!("{attempt:?}");
        assert!(debug.contains("failed_attempts: 5"));
        assert!(debug.contains("locked: true"));
    }

    #[test]
    fn refresh_record_holds_values() {
        let record = RefreshTokenRecord {
            account_id: Uuid::nil(),
            expires_at_unix: 1_900_000_000,
        };
        assert_eq!(record.account_id, Uuid::nil());
        assert_eq!(record.expires_at_unix, 1_900_000_000);
    }
}
