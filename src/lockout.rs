//! Brute-force account lockout.
//!
//! Failed-attempt accounting lives in a single conditional `UPDATE` so that
//! the threshold check is atomic with the increment: two concurrent wrong
//! passwords can never both read "4 failures" and neither lock. Lock expiry
//! is lazy; a past-dated lock reads as unlocked without a clearing write.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::storage;
use crate::utils::now_unix_seconds;

/// Computed lock state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { until_unix: i64 },
}

impl LockState {
    #[must_use]
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Derive the lock state from the stored lock-expiry column.
#[must_use]
pub fn lock_state(locked_until_unix: Option<i64>, now_unix: i64) -> LockState {
    match locked_until_unix {
        Some(until_unix) if until_unix > now_unix => LockState::Locked { until_unix },
        _ => LockState::Unlocked,
    }
}

/// Whether authentication attempts for the account are currently suspended.
///
/// Unknown accounts read as unlocked; the login path rejects them for other
/// reasons without revealing which.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn is_locked(pool: &PgPool, account_id: Uuid) -> Result<bool> {
    let locked_until_unix = storage::lookup_locked_until(pool, account_id)
        .await?
        .flatten();
    Ok(lock_state(locked_until_unix, now_unix_seconds()).is_locked())
}

pub use crate::storage::FailedAttempt;

/// Record one failed authentication attempt.
///
/// Increments the counter and, when the configured threshold is reached,
/// sets the lock expiry in the same statement. An expired lock encountered
/// here is cleared and the counter restarts at one, so stale counters from a
/// previous lockout window never feed the next one.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn record_failed_attempt(
    pool: &PgPool,
    account_id: Uuid,
    config: &AuthConfig,
) -> Result<FailedAttempt> {
    storage::record_failed_attempt(
        pool,
        account_id,
        config.lockout_threshold(),
        config.lockout_duration_seconds(),
    )
    .await
}

/// Clear the failed-attempt counter and any lock. Called only after a
/// verified successful login (or a completed password reset).
///
/// # Errors
///
/// Fails only on store failure.
pub async fn reset_failed_attempts(pool: &PgPool, account_id: Uuid) -> Result<()> {
    storage::reset_failed_attempts(pool, account_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expiry_means_unlocked() {
        assert_eq!(lock_state(None, 1_000), LockState::Unlocked);
    }

    #[test]
    fn future_expiry_means_locked() {
        assert_eq!(
            lock_state(Some(2_000), 1_000),
            LockState::Locked { until_unix: 2_000 }
        );
        assert!(lock_state(Some(2_000), 1_000).is_locked());
    }

    #[test]
    fn past_or_present_expiry_reads_as_unlocked() {
        // Lazy expiry: no write is needed for a lock to lapse.
        assert_eq!(lock_state(Some(999), 1_000), LockState::Unlocked);
        assert_eq!(lock_state(Some(1_000), 1_000), LockState::Unlocked);
    }
}
