//! Access and refresh token issuance, verification, and rotation.
//!
//! Access tokens are short-lived HS256 JWTs whose existence is entirely
//! cryptographic. Refresh tokens are opaque 256-bit values persisted by
//! hash only, and strictly single-use: every refresh revokes the presented
//! token and issues a replacement inside one transaction.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::storage;
use crate::utils::{generate_token, hash_token, now_unix_seconds};

pub use crate::storage::RefreshTokenRecord;

/// Claims carried by every Rainmaker access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// Account id.
    pub sub: Uuid,
    /// Tenant (contractor company) the account belongs to.
    pub tenant_id: Uuid,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// The two caller-visible access-token failures. Clients attempt a silent
/// refresh on `Expired` and force a full re-login on `Invalid`; nothing
/// finer-grained is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessTokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// A freshly rotated access/refresh pair. The refresh token raw value
/// appears here exactly once; only its hash is stored.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies access tokens and manages the refresh-token chain.
///
/// Holds its signing key as explicit constructor state; nothing in this
/// module reads ambient environment variables.
pub struct TokenIssuer {
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret().expose_secret().as_bytes();
        let mut validation = Validation::default();
        validation.set_issuer(&[config.issuer()]);
        Self {
            issuer: config.issuer().to_string(),
            access_ttl_seconds: config.access_token_ttl_seconds(),
            refresh_ttl_seconds: config.refresh_token_ttl_seconds(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a short-lived access token for an authenticated account.
    ///
    /// # Errors
    ///
    /// Fails only on internal signing failure.
    pub fn issue_access_token(
        &self,
        account_id: Uuid,
        tenant_id: Uuid,
        role: &str,
    ) -> Result<String> {
        let now = now_unix_seconds();
        let claims = AccessClaims {
            sub: account_id,
            tenant_id,
            role: role.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.access_ttl_seconds,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .context("failed to sign access token")
    }

    /// Validate signature, issuer, and expiry of a presented access token.
    ///
    /// # Errors
    ///
    /// `Expired` when the token is past its `exp`; `Invalid` for every other
    /// failure (bad signature, malformed token, wrong issuer).
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AccessTokenError> {
        match decode::<AccessClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AccessTokenError::Expired),
                _ => Err(AccessTokenError::Invalid),
            },
        }
    }

    /// Issue a new opaque refresh token for an account and persist its hash.
    ///
    /// # Errors
    ///
    /// Fails on store or RNG failure.
    pub async fn issue_refresh_token(&self, pool: &PgPool, account_id: Uuid) -> Result<String> {
        let token = generate_token()?;
        storage::insert_refresh_token(
            pool,
            account_id,
            &hash_token(&token),
            self.refresh_ttl_seconds,
        )
        .await?;
        Ok(token)
    }

    /// Look up a presented refresh token.
    ///
    /// `None` is the normal outcome for unknown, expired, and revoked tokens
    /// alike; the three are deliberately indistinguishable to callers.
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn verify_refresh_token(
        &self,
        pool: &PgPool,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>> {
        storage::lookup_active_refresh_token(pool, &hash_token(token)).await
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// Rotation is mandatory: the presented token is revoked and the
    /// replacement persisted in the same transaction, so no interleaving of
    /// concurrent refreshes can leave two live tokens, and replaying an
    /// already-rotated token yields `None`.
    ///
    /// # Errors
    ///
    /// Fails only on store or signing failure; a bad token is `Ok(None)`.
    pub async fn refresh_access_token(
        &self,
        pool: &PgPool,
        token: &str,
    ) -> Result<Option<TokenPair>> {
        let token_hash = hash_token(token);
        let mut tx = pool.begin().await.context("begin refresh transaction")?;

        // The conditional revoke is the single-use guarantee: exactly one of
        // any number of concurrent presenters sees the row still active.
        let Some(account_id) = storage::revoke_refresh_token_if_active(&mut tx, &token_hash).await?
        else {
            let _ = tx.rollback().await;
            return Ok(None);
        };

        let Some(account) = storage::lookup_claims_source(&mut tx, account_id).await? else {
            // Account vanished between issuance and refresh.
            let _ = tx.rollback().await;
            return Ok(None);
        };

        let access_token =
            self.issue_access_token(account.id, account.tenant_id, &account.role)?;
        let refresh_token = generate_token()?;
        storage::insert_refresh_token(
            &mut *tx,
            account_id,
            &hash_token(&refresh_token),
            self.refresh_ttl_seconds,
        )
        .await?;

        tx.commit().await.context("commit refresh transaction")?;
        Ok(Some(TokenPair {
            access_token,
            refresh_token,
        }))
    }

    /// Revoke a single refresh token (logout).
    ///
    /// Idempotent: revoking an unknown or already-revoked token is a no-op.
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn revoke_refresh_token(&self, pool: &PgPool, token: &str) -> Result<()> {
        storage::revoke_refresh_token(pool, &hash_token(token)).await
    }

    /// Revoke every outstanding refresh token for an account
    /// (password reset / compromise response).
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn revoke_all_for_account(&self, pool: &PgPool, account_id: Uuid) -> Result<()> {
        storage::revoke_all_refresh_tokens(pool, account_id).await
    }
}
