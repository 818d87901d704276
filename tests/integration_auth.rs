//! End-to-end exercises of the auth core against a live PostgreSQL.
//!
//! Set `RAINMAKER_TEST_DATABASE_URL` to a database you can scribble on and
//! run `cargo test --test integration_auth`. Without the variable the test
//! skips cleanly, mirroring how CI environments without a database behave.

use anyhow::{Context, Result};
use rainmaker_auth::{
    authenticate, lockout, register, session, token::TokenIssuer, verification,
    verification::ResetOutcome, AuthConfig, Credentials, DeviceInfo, LoginOutcome, PasswordRule,
    RegisterOutcome, Registration,
};
use secrecy::SecretString;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const GOOD_PASSWORD: &str = "Dr1p-Irrigation!";
const NEW_PASSWORD: &str = "NewPassw0rd!";

fn config() -> AuthConfig {
    AuthConfig::new(
        SecretString::from("integration-test-secret".to_string()),
        "rainmaker".to_string(),
    )
}

async fn connect() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("RAINMAKER_TEST_DATABASE_URL") else {
        eprintln!("Skipping integration test: RAINMAKER_TEST_DATABASE_URL is not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;

    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }

    Ok(Some(pool))
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn fresh_email(label: &str) -> String {
    format!("{label}-{}@greenlawn.example", Uuid::new_v4())
}

async fn create_account(pool: &PgPool, config: &AuthConfig, label: &str) -> Result<(Uuid, String)> {
    let email = fresh_email(label);
    let registration = Registration {
        tenant_id: Uuid::new_v4(),
        email: email.clone(),
        password: GOOD_PASSWORD.to_string(),
        role: "technician".to_string(),
    };
    match register(pool, config, &registration).await? {
        RegisterOutcome::Created(account_id) => Ok((account_id, email)),
        other => anyhow::bail!("expected Created, got {other:?}"),
    }
}

async fn failed_attempts(pool: &PgPool, account_id: Uuid) -> Result<i32> {
    let row = sqlx::query("SELECT failed_attempts FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("failed_attempts"))
}

#[tokio::test]
async fn auth_core_end_to_end() -> Result<()> {
    let Some(pool) = connect().await? else {
        return Ok(());
    };
    let config = config();
    let issuer = TokenIssuer::new(&config);

    registration_and_login(&pool, &issuer, &config).await?;
    lockout_after_repeated_failures(&pool, &issuer, &config).await?;
    refresh_rotation_is_strict(&pool, &issuer, &config).await?;
    password_reset_invalidates_everything(&pool, &issuer, &config).await?;
    email_verification_is_single_use(&pool, &config).await?;
    concurrent_sessions_get_distinct_tokens(&pool, &config).await?;

    Ok(())
}

async fn registration_and_login(
    pool: &PgPool,
    issuer: &TokenIssuer,
    config: &AuthConfig,
) -> Result<()> {
    let (account_id, email) = create_account(pool, config, "reg").await?;

    // Duplicate email registers as a conflict, not an error.
    let duplicate = Registration {
        tenant_id: Uuid::new_v4(),
        email: email.clone(),
        password: GOOD_PASSWORD.to_string(),
        role: "owner".to_string(),
    };
    assert!(matches!(
        register(pool, config, &duplicate).await?,
        RegisterOutcome::Conflict
    ));

    // Policy failures are itemized.
    let weak = Registration {
        tenant_id: Uuid::new_v4(),
        email: fresh_email("weak"),
        password: "short".to_string(),
        role: "technician".to_string(),
    };
    match register(pool, config, &weak).await? {
        RegisterOutcome::WeakPassword(errors) => {
            assert!(errors.contains(&PasswordRule::TooShort));
        }
        other => anyhow::bail!("expected WeakPassword, got {other:?}"),
    }

    // Wrong password is a generic rejection.
    let wrong = Credentials {
        email: email.clone(),
        password: "Wrong-Passw0rd!".to_string(),
    };
    assert!(matches!(
        authenticate(pool, issuer, config, &wrong, &DeviceInfo::default()).await?,
        LoginOutcome::InvalidCredentials
    ));

    // Correct password issues the full credential set.
    let good = Credentials {
        email: email.clone(),
        password: GOOD_PASSWORD.to_string(),
    };
    let device = DeviceInfo {
        user_agent: Some("FieldApp/2.1 (iPad)".to_string()),
        ip_address: Some("203.0.113.7".to_string()),
        remember_me: false,
    };
    let LoginOutcome::Success(issued) =
        authenticate(pool, issuer, config, &good, &device).await?
    else {
        anyhow::bail!("expected successful login");
    };
    assert_eq!(issued.account_id, account_id);
    assert!(!issued.email_verified);

    let claims = issuer
        .verify_access_token(&issued.access_token)
        .expect("fresh access token should verify");
    assert_eq!(claims.sub, account_id);
    assert_eq!(claims.role, "technician");

    // The wrong-password attempt above was wiped by the successful login.
    assert_eq!(failed_attempts(pool, account_id).await?, 0);

    // The session shows up in the device list until logout deletes it.
    session::update_session_activity(pool, &issued.session_token).await?;
    let sessions = session::list_sessions(pool, account_id).await?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_agent.as_deref(), Some("FieldApp/2.1 (iPad)"));

    session::end_session(pool, &issued.session_token).await?;
    assert!(session::list_sessions(pool, account_id).await?.is_empty());
    // Ending an already-gone session is a no-op.
    session::end_session(pool, &issued.session_token).await?;

    // Logout revokes the refresh token.
    issuer
        .revoke_refresh_token(pool, &issued.refresh_token)
        .await?;
    assert!(issuer
        .verify_refresh_token(pool, &issued.refresh_token)
        .await?
        .is_none());

    Ok(())
}

async fn lockout_after_repeated_failures(
    pool: &PgPool,
    issuer: &TokenIssuer,
    config: &AuthConfig,
) -> Result<()> {
    let (account_id, email) = create_account(pool, config, "lock").await?;
    let wrong = Credentials {
        email: email.clone(),
        password: "Wrong-Passw0rd!".to_string(),
    };
    let good = Credentials {
        email,
        password: GOOD_PASSWORD.to_string(),
    };
    let device = DeviceInfo::default();

    for _ in 0..4 {
        assert!(matches!(
            authenticate(pool, issuer, config, &wrong, &device).await?,
            LoginOutcome::InvalidCredentials
        ));
    }
    assert!(!lockout::is_locked(pool, account_id).await?);
    assert_eq!(failed_attempts(pool, account_id).await?, 4);

    // Fifth failure crosses the threshold and locks for ~2 hours.
    assert!(matches!(
        authenticate(pool, issuer, config, &wrong, &device).await?,
        LoginOutcome::InvalidCredentials
    ));
    assert!(lockout::is_locked(pool, account_id).await?);

    let row = sqlx::query(
        "SELECT EXTRACT(EPOCH FROM locked_until - NOW())::BIGINT AS remaining FROM accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await?;
    let remaining: i64 = row.get("remaining");
    assert!(
        (7_000..=7_200).contains(&remaining),
        "lock should last ~2h, got {remaining}s"
    );

    // The correct password is rejected with the lock-specific outcome, and
    // the rejection happens before password verification (counter untouched).
    assert!(matches!(
        authenticate(pool, issuer, config, &good, &device).await?,
        LoginOutcome::Locked
    ));
    assert_eq!(failed_attempts(pool, account_id).await?, 5);

    // Clearing the lock restores login.
    lockout::reset_failed_attempts(pool, account_id).await?;
    assert!(!lockout::is_locked(pool, account_id).await?);
    assert_eq!(failed_attempts(pool, account_id).await?, 0);
    assert!(matches!(
        authenticate(pool, issuer, config, &good, &device).await?,
        LoginOutcome::Success(_)
    ));

    Ok(())
}

async fn refresh_rotation_is_strict(
    pool: &PgPool,
    issuer: &TokenIssuer,
    config: &AuthConfig,
) -> Result<()> {
    let (account_id, _email) = create_account(pool, config, "rot").await?;

    let original = issuer.issue_refresh_token(pool, account_id).await?;
    assert!(issuer
        .verify_refresh_token(pool, &original)
        .await?
        .is_some());

    let pair = issuer
        .refresh_access_token(pool, &original)
        .await?
        .expect("active token should rotate");
    assert_ne!(pair.refresh_token, original, "rotation must replace the token");
    assert!(issuer.verify_access_token(&pair.access_token).is_ok());

    // The presented token died the moment it was used.
    assert!(issuer
        .verify_refresh_token(pool, &original)
        .await?
        .is_none());
    assert!(issuer.refresh_access_token(pool, &original).await?.is_none());

    // The replacement is live and rotates in turn.
    assert!(issuer
        .refresh_access_token(pool, &pair.refresh_token)
        .await?
        .is_some());

    // Expired tokens verify to None even if never revoked.
    let expired = issuer.issue_refresh_token(pool, account_id).await?;
    sqlx::query(
        "UPDATE refresh_tokens SET expires_at = NOW() - INTERVAL '1 minute' WHERE account_id = $1 AND revoked_at IS NULL",
    )
    .bind(account_id)
    .execute(pool)
    .await?;
    assert!(issuer.verify_refresh_token(pool, &expired).await?.is_none());
    assert!(issuer.refresh_access_token(pool, &expired).await?.is_none());

    Ok(())
}

async fn password_reset_invalidates_everything(
    pool: &PgPool,
    issuer: &TokenIssuer,
    config: &AuthConfig,
) -> Result<()> {
    let (account_id, email) = create_account(pool, config, "reset").await?;

    let good = Credentials {
        email: email.clone(),
        password: GOOD_PASSWORD.to_string(),
    };
    let LoginOutcome::Success(issued) =
        authenticate(pool, issuer, config, &good, &DeviceInfo::default()).await?
    else {
        anyhow::bail!("expected successful login");
    };

    let reset_token =
        verification::generate_password_reset_token(pool, account_id, config).await?;

    // A weak replacement changes nothing, including the token.
    match verification::reset_password(pool, &reset_token, "weak", config).await? {
        ResetOutcome::WeakPassword(errors) => assert!(!errors.is_empty()),
        other => anyhow::bail!("expected WeakPassword, got {other:?}"),
    }

    match verification::reset_password(pool, &reset_token, NEW_PASSWORD, config).await? {
        ResetOutcome::Completed => {}
        other => anyhow::bail!("expected Completed, got {other:?}"),
    }

    // Every previously issued credential is dead.
    assert!(issuer
        .verify_refresh_token(pool, &issued.refresh_token)
        .await?
        .is_none());
    assert!(session::list_sessions(pool, account_id).await?.is_empty());

    // The token was consumed with the reset.
    assert!(matches!(
        verification::reset_password(pool, &reset_token, NEW_PASSWORD, config).await?,
        ResetOutcome::InvalidToken
    ));

    // Old password is gone, new one works.
    assert!(matches!(
        authenticate(pool, issuer, config, &good, &DeviceInfo::default()).await?,
        LoginOutcome::InvalidCredentials
    ));
    let new_credentials = Credentials {
        email,
        password: NEW_PASSWORD.to_string(),
    };
    assert!(matches!(
        authenticate(pool, issuer, config, &new_credentials, &DeviceInfo::default()).await?,
        LoginOutcome::Success(_)
    ));

    Ok(())
}

async fn email_verification_is_single_use(pool: &PgPool, config: &AuthConfig) -> Result<()> {
    let (account_id, _email) = create_account(pool, config, "verify").await?;

    // Issuing a new token invalidates the prior one.
    let stale = verification::generate_email_verification_token(pool, account_id, config).await?;
    let current = verification::generate_email_verification_token(pool, account_id, config).await?;
    assert!(!verification::verify_email(pool, &stale).await?);

    assert!(verification::verify_email(pool, &current).await?);
    let row = sqlx::query("SELECT email_verified FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    assert!(row.get::<bool, _>("email_verified"));

    // The token was cleared with the flag flip; a replay finds nothing.
    assert!(!verification::verify_email(pool, &current).await?);

    // Expired tokens read as invalid.
    let expired = verification::generate_email_verification_token(pool, account_id, config).await?;
    sqlx::query(
        "UPDATE email_verification_tokens SET expires_at = NOW() - INTERVAL '1 minute' WHERE account_id = $1",
    )
    .bind(account_id)
    .execute(pool)
    .await?;
    assert!(!verification::verify_email(pool, &expired).await?);

    Ok(())
}

async fn concurrent_sessions_get_distinct_tokens(
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<()> {
    let (account_id, _email) = create_account(pool, config, "devices").await?;

    let mut handles = Vec::new();
    for index in 0..10 {
        let pool = pool.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let device = DeviceInfo {
                user_agent: Some(format!("FieldApp/2.1 (device {index})")),
                ip_address: None,
                remember_me: index % 2 == 0,
            };
            session::create_session(&pool, account_id, &device, &config).await
        }));
    }

    let mut tokens = std::collections::HashSet::new();
    for handle in handles {
        let token = handle.await.context("session task panicked")??;
        assert!(tokens.insert(token), "session tokens must be distinct");
    }
    assert_eq!(tokens.len(), 10);
    assert_eq!(session::list_sessions(pool, account_id).await?.len(), 10);

    Ok(())
}
