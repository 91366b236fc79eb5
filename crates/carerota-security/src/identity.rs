//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Contracts for the external identity provider and profile store, plus an
//! in-memory implementation used for development and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::rbac::Role;

const EVENT_CAPACITY: usize = 64;

/// Opaque identity-provider subject identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Wrap a raw subject id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw subject id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Durable user record owned by the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Principal id the record is keyed by.
    pub id: PrincipalId,
    /// Login email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Coarse role.
    pub role: Role,
    /// Facility scope; absent for platform-wide accounts.
    #[serde(default)]
    pub facility_id: Option<String>,
    /// Deactivated accounts are treated as unauthenticated everywhere.
    pub is_active: bool,
}

/// Session material returned after a successful credential check.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedSession {
    /// Subject the session belongs to.
    pub principal_id: PrincipalId,
    /// Bearer credential presented to the API.
    pub access_token: String,
    /// Credential used to rotate the access token.
    pub refresh_token: String,
    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSession")
            .field("principal_id", &self.principal_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Kind of session change pushed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A principal signed in.
    SignedIn,
    /// The active session ended.
    SignedOut,
    /// The access token was rotated for the same principal.
    TokenRefreshed,
}

/// Notification emitted on every session change.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// What happened.
    pub kind: SessionEventKind,
    /// Principal now holding the session, `None` after sign-out.
    pub principal_id: Option<PrincipalId>,
    /// Access token now in force, when there is one.
    pub access_token: Option<String>,
}

impl SessionEvent {
    /// Sign-in notification.
    pub fn signed_in(session: &IssuedSession) -> Self {
        Self {
            kind: SessionEventKind::SignedIn,
            principal_id: Some(session.principal_id.clone()),
            access_token: Some(session.access_token.clone()),
        }
    }

    /// Token rotation notification.
    pub fn token_refreshed(session: &IssuedSession) -> Self {
        Self {
            kind: SessionEventKind::TokenRefreshed,
            principal_id: Some(session.principal_id.clone()),
            access_token: Some(session.access_token.clone()),
        }
    }

    /// Sign-out notification.
    pub fn signed_out() -> Self {
        Self {
            kind: SessionEventKind::SignedOut,
            principal_id: None,
            access_token: None,
        }
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvent")
            .field("kind", &self.kind)
            .field("principal_id", &self.principal_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors returned by identity collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Email/password pair rejected.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Token unknown or revoked.
    #[error("token invalid")]
    InvalidToken,
    /// Token past its expiry.
    #[error("token expired")]
    TokenExpired,
    /// Attempted to create an account that already exists.
    #[error("user already exists")]
    UserExists,
    /// Account lookup failed.
    #[error("user not found")]
    UserNotFound,
    /// Transport or backend failure.
    #[error("identity backend unavailable: {0}")]
    Unavailable(String),
}

/// Validates credentials against the external identity provider.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Exchange an email/password pair for a session.
    async fn verify(&self, email: &str, password: &str) -> Result<IssuedSession, IdentityError>;

    /// Resolve a bearer token to its principal.
    async fn verify_token(&self, token: &str) -> Result<PrincipalId, IdentityError>;

    /// End the session identified by `token`.
    async fn invalidate(&self, token: &str) -> Result<(), IdentityError>;
}

/// Loads durable user records by principal id.
#[async_trait]
pub trait ProfileResolver: Send + Sync + 'static {
    /// `Ok(None)` when no record exists for the principal.
    async fn get_by_principal(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<UserRecord>, IdentityError>;
}

/// Push channel of session changes plus the persisted session, if any.
#[async_trait]
pub trait SessionNotifications: Send + Sync + 'static {
    /// Session persisted by the provider client from an earlier sign-in.
    async fn current_session(&self) -> Result<Option<IssuedSession>, IdentityError>;

    /// Subscribe to future session changes.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

#[derive(Debug, Clone)]
struct StoredAccount {
    record: UserRecord,
    salt: String,
    password_digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone)]
struct StoredToken {
    principal: PrincipalId,
    kind: TokenKind,
    expires_at: DateTime<Utc>,
    // Hash of the paired token so a sign-out revokes both halves.
    pair: String,
}

#[derive(Debug, Default)]
struct ProviderState {
    accounts: HashMap<PrincipalId, StoredAccount>,
    tokens: HashMap<String, StoredToken>,
    persisted: Option<IssuedSession>,
}

/// In-memory identity provider and profile store.
///
/// Tokens are stored as SHA-256 digests only; passwords as salted digests.
#[derive(Debug, Clone)]
pub struct InMemoryIdentityProvider {
    state: Arc<RwLock<ProviderState>>,
    events: broadcast::Sender<SessionEvent>,
    available: Arc<AtomicBool>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new(Duration::hours(1), Duration::days(7))
    }
}

impl InMemoryIdentityProvider {
    /// Create an empty provider with the given token lifetimes.
    pub fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(ProviderState::default())),
            events,
            available: Arc::new(AtomicBool::new(true)),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Provision an account and return its record.
    pub fn create_user(
        &self,
        email: &str,
        name: &str,
        password: &str,
        role: Role,
        facility_id: Option<String>,
    ) -> Result<UserRecord, IdentityError> {
        let email = normalise_email(email);
        let mut state = self.state.write();
        if state
            .accounts
            .values()
            .any(|account| account.record.email == email)
        {
            return Err(IdentityError::UserExists);
        }
        let record = UserRecord {
            id: PrincipalId::new(uuid::Uuid::new_v4().to_string()),
            email,
            name: name.to_owned(),
            role,
            facility_id,
            is_active: true,
        };
        let salt = random_secret(16);
        let password_digest = digest(&[salt.as_bytes(), password.as_bytes()]);
        state.accounts.insert(
            record.id.clone(),
            StoredAccount {
                record: record.clone(),
                salt,
                password_digest,
            },
        );
        info!(principal = %record.id, role = %record.role, "account provisioned");
        Ok(record)
    }

    /// Replace the durable record for an existing principal.
    pub fn update_profile(&self, record: UserRecord) -> Result<(), IdentityError> {
        let mut state = self.state.write();
        let account = state
            .accounts
            .get_mut(&record.id)
            .ok_or(IdentityError::UserNotFound)?;
        account.record = record;
        Ok(())
    }

    /// Flip the active flag on an account.
    pub fn set_active(&self, principal: &PrincipalId, active: bool) -> Result<(), IdentityError> {
        let mut state = self.state.write();
        let account = state
            .accounts
            .get_mut(principal)
            .ok_or(IdentityError::UserNotFound)?;
        account.record.is_active = active;
        debug!(principal = %principal, active, "account activation changed");
        Ok(())
    }

    /// Remove the durable record while leaving issued tokens in place.
    pub fn remove_profile(&self, principal: &PrincipalId) -> Option<UserRecord> {
        self.state
            .write()
            .accounts
            .remove(principal)
            .map(|account| account.record)
    }

    /// Simulate the backend becoming (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Rotate a session using its refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, IdentityError> {
        self.ensure_available()?;
        let hash = digest(&[refresh_token.as_bytes()]);
        let session = {
            let mut state = self.state.write();
            let stored = state
                .tokens
                .get(&hash)
                .filter(|stored| stored.kind == TokenKind::Refresh)
                .cloned()
                .ok_or(IdentityError::InvalidToken)?;
            if Utc::now() >= stored.expires_at {
                return Err(IdentityError::TokenExpired);
            }
            state.tokens.remove(&hash);
            state.tokens.remove(&stored.pair);
            let session = self.mint_locked(&mut state, stored.principal);
            state.persisted = Some(session.clone());
            session
        };
        let _ = self.events.send(SessionEvent::token_refreshed(&session));
        Ok(session)
    }

    fn ensure_available(&self) -> Result<(), IdentityError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IdentityError::Unavailable(
                "identity provider unreachable".into(),
            ))
        }
    }

    fn mint_locked(&self, state: &mut ProviderState, principal: PrincipalId) -> IssuedSession {
        let now = Utc::now();
        // Expired pairs are dropped here so the map stays bounded by live sessions.
        state.tokens.retain(|_, stored| now < stored.expires_at);
        let access_token = random_secret(32);
        let refresh_token = random_secret(32);
        let access_hash = digest(&[access_token.as_bytes()]);
        let refresh_hash = digest(&[refresh_token.as_bytes()]);
        let expires_at = now + self.access_ttl;
        state.tokens.insert(
            access_hash.clone(),
            StoredToken {
                principal: principal.clone(),
                kind: TokenKind::Access,
                expires_at,
                pair: refresh_hash.clone(),
            },
        );
        state.tokens.insert(
            refresh_hash,
            StoredToken {
                principal: principal.clone(),
                kind: TokenKind::Refresh,
                expires_at: now + self.refresh_ttl,
                pair: access_hash,
            },
        );
        IssuedSession {
            principal_id: principal,
            access_token,
            refresh_token,
            expires_at,
        }
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryIdentityProvider {
    async fn verify(&self, email: &str, password: &str) -> Result<IssuedSession, IdentityError> {
        self.ensure_available()?;
        let email = normalise_email(email);
        let session = {
            let mut state = self.state.write();
            let principal = state
                .accounts
                .values()
                .find(|account| account.record.email == email)
                .filter(|account| {
                    digest(&[account.salt.as_bytes(), password.as_bytes()])
                        == account.password_digest
                })
                .map(|account| account.record.id.clone())
                .ok_or(IdentityError::InvalidCredentials)?;
            let session = self.mint_locked(&mut state, principal);
            state.persisted = Some(session.clone());
            session
        };
        debug!(principal = %session.principal_id, "credentials verified");
        let _ = self.events.send(SessionEvent::signed_in(&session));
        Ok(session)
    }

    async fn verify_token(&self, token: &str) -> Result<PrincipalId, IdentityError> {
        self.ensure_available()?;
        let hash = digest(&[token.as_bytes()]);
        let state = self.state.read();
        let stored = state
            .tokens
            .get(&hash)
            .filter(|stored| stored.kind == TokenKind::Access)
            .ok_or(IdentityError::InvalidToken)?;
        if Utc::now() >= stored.expires_at {
            return Err(IdentityError::TokenExpired);
        }
        Ok(stored.principal.clone())
    }

    async fn invalidate(&self, token: &str) -> Result<(), IdentityError> {
        self.ensure_available()?;
        let hash = digest(&[token.as_bytes()]);
        {
            let mut state = self.state.write();
            let stored = state.tokens.remove(&hash).ok_or(IdentityError::InvalidToken)?;
            state.tokens.remove(&stored.pair);
            if state
                .persisted
                .as_ref()
                .is_some_and(|session| session.access_token == token)
            {
                state.persisted = None;
            }
        }
        let _ = self.events.send(SessionEvent::signed_out());
        Ok(())
    }
}

#[async_trait]
impl ProfileResolver for InMemoryIdentityProvider {
    async fn get_by_principal(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<UserRecord>, IdentityError> {
        self.ensure_available()?;
        Ok(self
            .state
            .read()
            .accounts
            .get(principal)
            .map(|account| account.record.clone()))
    }
}

#[async_trait]
impl SessionNotifications for InMemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<IssuedSession>, IdentityError> {
        self.ensure_available()?;
        let state = self.state.read();
        Ok(state
            .persisted
            .clone()
            .filter(|session| Utc::now() < session.expires_at))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn random_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
