//! # Rainmaker Auth (Authentication & Session-Security Core)
//!
//! `rainmaker-auth` is the authentication core of the Rainmaker CRM for
//! irrigation and sprinkler-repair contractors. The HTTP routes, business
//! entities (clients, sites, inspections, estimates, work orders, billing),
//! and the frontend live elsewhere; this crate owns the security-sensitive
//! state machines they all lean on:
//!
//! - **Password lifecycle**: bcrypt hashing with a fixed minimum work factor
//!   and a checklist-style policy validator that reports every violated rule.
//! - **Access tokens**: short-lived HS256 JWTs carrying
//!   `{account, tenant, role}` claims. Verification distinguishes exactly two
//!   failure kinds, expired vs invalid, because clients react differently
//!   (silent refresh vs forced re-login).
//! - **Refresh tokens**: opaque 256-bit values, stored only as SHA-256
//!   hashes, strictly single-use. Every refresh rotates: the presented token
//!   is revoked and replaced inside one transaction, so a replayed token is
//!   dead on arrival.
//! - **Account lockout**: failed-attempt accounting as a single conditional
//!   `UPDATE`, so concurrent wrong-password requests against multiple server
//!   processes cannot undercount their way past the threshold.
//! - **Sessions**: a per-device registry independent of the token mechanism,
//!   for "active devices" views and revocation.
//! - **Email verification & password reset**: single-use, time-bounded opaque
//!   tokens consumed atomically with the state change they authorize. A
//!   password reset invalidates every outstanding refresh token and session.
//!
//! The database (`PostgreSQL` via sqlx) is the only shared mutable state; the
//! crate holds no in-process locks across requests. Expected outcomes (wrong
//! password, expired token, missing row) are values, never errors; errors are
//! reserved for infrastructure faults.

pub mod config;
pub mod error;
pub mod lockout;
pub mod login;
pub mod password;
pub mod session;
pub mod token;
pub mod verification;

mod storage;
mod utils;

pub use config::AuthConfig;
pub use error::{AuthRejection, RejectionBody};
pub use lockout::{lock_state, LockState};
pub use login::{
    authenticate, register, Credentials, IssuedCredentials, LoginOutcome, RegisterOutcome,
    Registration,
};
pub use password::{validate_password, PasswordCheck, PasswordRule};
pub use session::{DeviceInfo, SessionRecord};
pub use token::{AccessClaims, AccessTokenError, TokenIssuer, TokenPair};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
