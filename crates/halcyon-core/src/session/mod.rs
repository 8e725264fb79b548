//! Persisted sessions and device secrets.
//!
//! The session store is the one genuinely shared resource of the login flow:
//! several tabs or devices can race to persist sessions for the same user.
//! The store itself stays dumb; the resume-then-revoke protocol that keeps
//! the at-most-one-active-session invariant lives in the finalizer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{crypto::KeyPassword, DeviceId, LocalId, UserId};

/// How the flow that produced a session was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionFlow {
    /// Ordinary credential login.
    Login,
    /// Password-reset completion.
    Reset,
}

/// Which verification path issued the session. Resume policy differs between
/// them (admin logins never resume SSO-sourced sessions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionSource {
    /// Password or two-factor login.
    Standard,
    /// SSO device-trust login.
    Sso,
}

/// Filter for [`SessionStore::find_by_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSourceFilter {
    /// Any active session qualifies for resumption.
    Any,
    /// Skip SSO-sourced sessions.
    ExcludeSso,
}

impl SessionSourceFilter {
    fn matches(self, source: SessionSource) -> bool {
        match self {
            SessionSourceFilter::Any => true,
            SessionSourceFilter::ExcludeSso => source != SessionSource::Sso,
        }
    }
}

/// A session to be persisted. Only the finalizer constructs these.
#[allow(missing_docs)]
pub struct NewSession {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: UserId,
    pub local_id: LocalId,
    /// Present unless the login skipped key unlock entirely.
    pub key_password: Option<KeyPassword>,
    pub trusted: bool,
    /// Whether the session survives a restart of the client.
    pub persistent: bool,
    pub flow: SessionFlow,
    pub source: SessionSource,
}

/// The validated, persisted record of a successful login. Immutable once
/// returned to the caller.
#[allow(missing_docs)]
#[derive(Clone)]
pub struct Session {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: UserId,
    pub local_id: LocalId,
    pub key_password: Option<KeyPassword>,
    pub trusted: bool,
    pub persistent: bool,
    pub flow: SessionFlow,
    pub source: SessionSource,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.uid)
            .field("user_id", &self.user_id)
            .field("local_id", &self.local_id)
            .field("trusted", &self.trusted)
            .field("flow", &self.flow)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Store failures. Kept deliberately coarse; callers treat the store as
/// infrastructure.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence of established sessions, keyed by user.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// An active session for the user matching the filter, if any.
    async fn find_by_user(
        &self,
        user_id: UserId,
        filter: SessionSourceFilter,
    ) -> Result<Option<Session>, StoreError>;

    /// Persists a new session, replacing any previous one for the same
    /// `(user, local slot)` pair.
    async fn persist(&self, session: NewSession) -> Result<Session, StoreError>;

    /// Whether the local slot is already bound to a session of a *different*
    /// user. Guards the two-tab race during finalize.
    async fn local_id_in_use(&self, local_id: LocalId, user_id: UserId)
        -> Result<bool, StoreError>;
}

/// A device secret persisted on this installation for one user, together with
/// the key passphrase sealed under it.
#[derive(Clone)]
pub struct PersistedDeviceSecret {
    /// Server-side record this secret belongs to.
    pub device_id: DeviceId,
    /// The random device secret, local to this installation.
    pub device_secret: String,
    /// Key passphrase sealed under the device secret
    /// (see `encrypt_with_passphrase`).
    pub sealed_key_password: String,
}

/// Local persistence of trusted-device secrets, keyed by user.
#[allow(missing_docs)]
#[async_trait::async_trait]
pub trait DeviceSecretStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<PersistedDeviceSecret>, StoreError>;
    async fn store(
        &self,
        user_id: UserId,
        secret: PersistedDeviceSecret,
    ) -> Result<(), StoreError>;
    async fn remove(&self, user_id: UserId) -> Result<(), StoreError>;
}

/// In-memory [`SessionStore`], used by tests and short-lived CLI contexts.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<UserId, Session>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_by_user(
        &self,
        user_id: UserId,
        filter: SessionSourceFilter,
    ) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&user_id)
            .filter(|s| filter.matches(s.source))
            .cloned())
    }

    async fn persist(&self, session: NewSession) -> Result<Session, StoreError> {
        let session = Session {
            uid: session.uid,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            user_id: session.user_id,
            local_id: session.local_id,
            key_password: session.key_password,
            trusted: session.trusted,
            persistent: session.persistent,
            flow: session.flow,
            source: session.source,
        };
        self.sessions
            .write()
            .await
            .insert(session.user_id, session.clone());
        Ok(session)
    }

    async fn local_id_in_use(
        &self,
        local_id: LocalId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .any(|s| s.local_id == local_id && s.user_id != user_id))
    }
}

/// In-memory [`DeviceSecretStore`].
#[derive(Default)]
pub struct InMemoryDeviceSecretStore {
    secrets: RwLock<HashMap<UserId, PersistedDeviceSecret>>,
}

#[async_trait::async_trait]
impl DeviceSecretStore for InMemoryDeviceSecretStore {
    async fn load(&self, user_id: UserId) -> Result<Option<PersistedDeviceSecret>, StoreError> {
        Ok(self.secrets.read().await.get(&user_id).cloned())
    }

    async fn store(
        &self,
        user_id: UserId,
        secret: PersistedDeviceSecret,
    ) -> Result<(), StoreError> {
        self.secrets.write().await.insert(user_id, secret);
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<(), StoreError> {
        self.secrets.write().await.remove(&user_id);
        Ok(())
    }
}
