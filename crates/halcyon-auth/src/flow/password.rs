use halcyon_core::{
    crypto::KeyPassword,
    session::{SessionFlow, SessionSource},
};

use crate::{
    cache::AuthCache,
    finalize::{self, FinalizeOptions},
    flow::FlowDeps,
    LoginError,
};

/// Replaces the server-issued temporary password. Keyless accounts only (the
/// policy routes keyed accounts elsewhere), so there is nothing to unlock;
/// the session is finalized as a reset flow.
pub(crate) async fn replace_temporary_password(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    new_password: &str,
) -> Result<halcyon_core::session::Session, LoginError> {
    deps.api.change_password(new_password).await?;
    cache.data.user.invalidate();

    finalize::finalize_login(
        deps,
        cache,
        FinalizeOptions {
            key_password: None,
            attempt_resume: true,
            source: SessionSource::Standard,
            flow: SessionFlow::Reset,
            trusted: false,
        },
    )
    .await
}

/// First-time key provisioning: creates address keys under the chosen
/// password, then derives the key passphrase from the fresh salts and
/// finalizes.
pub(crate) async fn setup_password(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    new_password: &str,
) -> Result<halcyon_core::session::Session, LoginError> {
    // The address list drives which keys the server provisions.
    cache.user_and_addresses(deps.api.as_ref()).await?;
    deps.api.setup_address_keys(new_password).await?;

    // Setup mutated the user and its keys; every cached record is stale.
    cache.data.user.invalidate();
    cache.data.addresses.invalidate();
    cache.data.salts.invalidate();

    let key_password = derive_after_provisioning(deps, cache, new_password).await?;

    finalize::finalize_login(
        deps,
        cache,
        FinalizeOptions {
            key_password: Some(key_password),
            attempt_resume: true,
            source: SessionSource::Standard,
            flow: SessionFlow::Login,
            trusted: false,
        },
    )
    .await
}

/// Refetches user and salts after the server rewrote the key material, then
/// derives the passphrase from the given password.
pub(crate) async fn derive_after_provisioning(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    password: &str,
) -> Result<KeyPassword, LoginError> {
    let (user, salts) = cache.user_and_salts(deps.api.as_ref()).await?;
    let unlocked = deps.unlock.derive_and_decrypt(user, salts, password).await?;
    Ok(unlocked.key_password)
}
