//! The terminal path of every successful authentication branch.
//!
//! The finalizer owns the at-most-one-active-session invariant: the session
//! store is shared across tabs and devices, and the resume-then-revoke
//! protocol here is the concurrency-safety mechanism for it; there is no
//! transactional lock.

use halcyon_core::{
    api::CURRENT_AUTH_VERSION,
    crypto::KeyPassword,
    session::{NewSession, Session, SessionFlow, SessionSource, SessionSourceFilter},
};
use log::{debug, warn};

use crate::{cache::AuthCache, flow::FlowDeps, LoginError};

pub(crate) struct FinalizeOptions {
    pub key_password: Option<KeyPassword>,
    /// A fresh backup password must never silently resume a stale session;
    /// that path passes `false`.
    pub attempt_resume: bool,
    pub source: SessionSource,
    pub flow: SessionFlow,
    pub trusted: bool,
}

/// Resolves conflicts with already-active sessions, persists the new session
/// and runs the post-auth commitments.
///
/// Any network failure before persistence aborts the call un-wrapped; no
/// partial session is left behind. Revoke-on-resume, device recovery and the
/// key-transparency commit are best-effort and never block the success path.
pub(crate) async fn finalize_login(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    options: FinalizeOptions,
) -> Result<Session, LoginError> {
    // Stale credential hash: silently re-verify the password against the
    // upgrade endpoint. A failure here aborts the whole finalize call.
    if cache.auth_version < CURRENT_AUTH_VERSION {
        deps.api
            .upgrade_credential_hash(&cache.username, &cache.login_password)
            .await?;
    }

    let user_id = cache.user(deps.api.as_ref()).await?.id;

    // Admin contexts never resume into an SSO-sourced session; the standard
    // path searches all of them.
    let filter = if cache.ignore_unlock {
        SessionSourceFilter::ExcludeSso
    } else {
        SessionSourceFilter::Any
    };
    if options.attempt_resume {
        if let Some(existing) = deps.sessions.find_by_user(user_id, filter).await? {
            // The freshly-issued session is redundant; a failed revoke must
            // never block the resumed one from being returned.
            if let Err(err) = deps.api.revoke_session(&cache.auth_response.uid).await {
                debug!("failed to revoke redundant session: {err}");
            }
            return Ok(existing);
        }
    }

    // Best-effort reactivation of user keys from stored recovery material.
    // Runs before persistence because it can mutate the user record.
    if !cache.ignore_unlock {
        match deps.api.restore_recovery_keys().await {
            Ok(true) => cache.data.user.invalidate(),
            Ok(false) => {}
            Err(err) => debug!("device recovery skipped: {err}"),
        }
    }

    // Two tabs can hold two valid fresh sessions; refuse to bind both to the
    // same local slot.
    if deps
        .sessions
        .local_id_in_use(deps.local_id, user_id)
        .await?
    {
        return Err(LoginError::InvalidState(
            "local session slot already bound to another user",
        ));
    }

    let session = deps
        .sessions
        .persist(NewSession {
            uid: cache.auth_response.uid.clone(),
            access_token: cache.auth_response.access_token.clone(),
            refresh_token: cache.auth_response.refresh_token.clone(),
            user_id,
            local_id: deps.local_id,
            key_password: options.key_password,
            trusted: options.trusted,
            persistent: cache.persistent,
            flow: options.flow,
            source: options.source,
        })
        .await?;

    // Needs the finalized user record, which is why it runs last and not as
    // part of the key-unlock step.
    let user = cache.user(deps.api.as_ref()).await?;
    if let Err(err) = deps.kt.commit(user).await {
        warn!("key transparency commit failed: {err}");
    }

    Ok(session)
}
