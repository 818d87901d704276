//! Device session registry.
//!
//! Sessions are visibility/audit records for "active devices" views and
//! remote logout, independent of the refresh-token chain: a session is
//! bookkeeping, a refresh token is a credential. Tokens are opaque, stored
//! only as hashes, and expiry depends on "remember me".

use anyhow::Result;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::storage;
use crate::utils::hash_token;

/// Device metadata captured at login.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub remember_me: bool,
}

/// One active device session, as shown in the user-facing device list.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at_unix: i64,
    pub last_seen_at_unix: i64,
    pub expires_at_unix: i64,
}

/// Open a session for a logged-in device and return its opaque token.
///
/// Concurrent logins for one account each get a distinct token; the insert
/// retries on hash collision rather than ever reusing a value.
///
/// # Errors
///
/// Fails on store or RNG failure.
pub async fn create_session(
    pool: &PgPool,
    account_id: Uuid,
    device: &DeviceInfo,
    config: &AuthConfig,
) -> Result<String> {
    storage::insert_session(
        pool,
        account_id,
        device,
        config.session_ttl_seconds(device.remember_me),
    )
    .await
}

/// Bump a session's last-activity timestamp.
///
/// Idempotent and advisory: safe to fire-and-forget on every authenticated
/// request, and a miss (expired or deleted session) is not an error.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn update_session_activity(pool: &PgPool, session_token: &str) -> Result<()> {
    storage::touch_session(pool, &hash_token(session_token)).await
}

/// Destroy a session (logout). Idempotent hard delete.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn end_session(pool: &PgPool, session_token: &str) -> Result<()> {
    storage::delete_session(pool, &hash_token(session_token)).await
}

/// Active sessions for an account, most recently seen first.
///
/// # Errors
///
/// Fails only on store failure.
pub async fn list_sessions(pool: &PgPool, account_id: Uuid) -> Result<Vec<SessionRecord>> {
    storage::list_sessions(pool, account_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_defaults_to_short_session() {
        let device = DeviceInfo::default();
        assert!(!device.remember_me);
        assert!(device.user_agent.is_none());
        assert!(device.ip_address.is_none());
    }

    #[test]
    fn session_record_serializes_for_device_list() {
        let record = SessionRecord {
            id: Uuid::nil(),
            account_id: Uuid::nil(),
            user_agent: Some("FieldApp/2.1 (iPad)".to_string()),
            ip_address: Some("203.0.113.7".to_string()),
            created_at_unix: 1_756_000_000,
            last_seen_at_unix: 1_756_000_600,
            expires_at_unix: 1_756_086_400,
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["user_agent"], "FieldApp/2.1 (iPad)");
        assert_eq!(value["last_seen_at_unix"], 1_756_000_600);
    }
}
