use std::time::Duration;

use halcyon_core::crypto::KeyPassword;
use log::warn;

use crate::{cache::AuthCache, flow::FlowDeps, LoginError};

/// Applied before every decryption attempt: dampens timing side-channels and
/// smooths the UI transition.
pub(crate) const UNLOCK_DELAY: Duration = Duration::from_millis(500);

/// Decrypts the primary key with the mailbox password. `user` and `salts`
/// must already be in the cache; the unlock step is only reachable through
/// the policy step that fetched them.
pub(crate) async fn unlock(
    deps: &FlowDeps,
    cache: &AuthCache,
    clear_key_password: &str,
) -> Result<KeyPassword, LoginError> {
    let user = cache
        .data
        .user
        .get()
        .ok_or(LoginError::InvalidState("unlock without a fetched user"))?;
    let salts = cache
        .data
        .salts
        .get()
        .ok_or(LoginError::InvalidState("unlock without fetched salts"))?;

    tokio::time::sleep(UNLOCK_DELAY).await;

    let unlocked = deps
        .unlock
        .derive_and_decrypt(user, salts, clear_key_password)
        .await?;
    Ok(unlocked.key_password)
}

/// Opportunistic key maintenance after a successful unlock: legacy key
/// version upgrade and any pending migration. Both must never block login;
/// failures are logged and discarded here at the call site.
pub(crate) async fn run_key_maintenance(deps: &FlowDeps, cache: &mut AuthCache) {
    let Some(user) = cache.data.user.get() else {
        return;
    };
    let to_upgrade = user.to_upgrade_keys;
    let to_migrate = user.to_migrate_keys;

    if to_upgrade {
        if let Err(err) = deps.api.upgrade_keys().await {
            warn!("key upgrade failed, continuing login: {err}");
        }
    }
    if to_migrate {
        match deps.api.migrate_keys().await {
            // The migration rewrote the user's keys; cached records are stale.
            Ok(true) => cache.data.user.invalidate(),
            Ok(false) => {}
            Err(err) => warn!("key migration failed, continuing login: {err}"),
        }
    }
}
