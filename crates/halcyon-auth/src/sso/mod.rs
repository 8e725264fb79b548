//! SSO device-trust sub-flow.
//!
//! SSO accounts never type a mailbox password during routine logins. Instead
//! each installation holds a random device secret; the key passphrase is
//! sealed under that secret and either recovered locally, released by a peer
//! device, or re-derived from the account's backup password. The sub-flow
//! entered from the transition policy forks on the state of this
//! installation's trusted-device record.

mod polling;

pub use polling::{AlwaysVisible, PollHandle, PollUpdate, VisibilityProbe};
use polling::spawn_poller;

use halcyon_core::{
    api::{api_codes, DeviceState, NewTrustedDevice, TrustedDevice, UnprivatizationContext},
    crypto::{
        decrypt_with_passphrase, encrypt_with_passphrase, generate_device_secret, KeyPassword,
        UnlockError,
    },
    require,
    session::{PersistedDeviceSecret, Session, SessionFlow, SessionSource},
    UserId,
};
use log::debug;

use crate::{
    cache::AuthCache,
    finalize::{self, FinalizeOptions},
    flow::{password, FlowDeps},
    DeviceTrustErrorKind, LoginError,
};

/// Where the SSO sub-flow stands; the caller renders the matching form.
pub enum SsoState {
    /// First login of a member without keys: choose a backup password.
    Setup {
        /// Organization context shown alongside the form.
        organization: UnprivatizationContext,
        /// The freshly created, unactivated device record.
        device: TrustedDevice,
        /// This installation's new device secret; activated on completion.
        device_secret: String,
    },
    /// No usable device record: enter the backup password.
    Unlock {
        #[allow(missing_docs)]
        device: TrustedDevice,
        #[allow(missing_docs)]
        device_secret: String,
    },
    /// The record exists but a peer has not approved it yet; polling runs in
    /// the background, and the backup password stays available as a bypass.
    Inactive {
        #[allow(missing_docs)]
        device: TrustedDevice,
        #[allow(missing_docs)]
        device_secret: String,
        /// Active peer devices that can approve this one.
        other_devices: Vec<TrustedDevice>,
        /// Handle of the approval poller.
        poll: PollHandle,
    },
    /// The account's password is temporary: a new backup password must be
    /// chosen before the login can complete.
    SetPassword {
        #[allow(missing_docs)]
        device: TrustedDevice,
        #[allow(missing_docs)]
        device_secret: String,
    },
}

/// Result of [`prepare_sso_data`]: either more input is needed or the login
/// completed without any.
pub(crate) enum SsoOutcome {
    State(SsoState),
    Finalized(Session),
}

/// Entry point of the sub-flow, reached once the user record is known.
pub(crate) async fn prepare_sso_data(
    deps: &FlowDeps,
    cache: &mut AuthCache,
) -> Result<SsoOutcome, LoginError> {
    let (user_id, has_keys, user_temporary) = {
        let user = cache.user(deps.api.as_ref()).await?;
        (user.id, !user.keys.is_empty(), user.temporary_password)
    };

    if !has_keys {
        return prepare_keyless(deps, cache).await;
    }

    let Some(persisted) = deps.device_secrets.load(user_id).await? else {
        return Ok(SsoOutcome::State(fresh_unlock_state(deps).await?));
    };

    let temporary = user_temporary || cache.auth_response.temporary_password;

    match deps.api.fetch_trusted_device(persisted.device_id).await {
        // Only an approved device may carry a password change; an inactive
        // one still needs peer approval first.
        Ok(device) if device.state == DeviceState::Active && temporary => {
            Ok(SsoOutcome::State(SsoState::SetPassword {
                device,
                device_secret: persisted.device_secret,
            }))
        }
        Ok(device) if device.state == DeviceState::Active => {
            match decrypt_with_passphrase(&persisted.sealed_key_password, &persisted.device_secret)
            {
                Ok(key_password) => {
                    let session = finalize_sso(deps, cache, KeyPassword::new(key_password)).await?;
                    Ok(SsoOutcome::Finalized(session))
                }
                // The local secret no longer opens the sealed passphrase;
                // treat the record as invalid and start over.
                Err(_) => Ok(SsoOutcome::State(
                    replace_stale_device(deps, user_id, Some(device.id)).await?,
                )),
            }
        }
        Ok(device) => Ok(SsoOutcome::State(
            inactive_state(deps, device, persisted.device_secret).await?,
        )),
        Err(err) => match LoginError::from(err) {
            LoginError::DeviceTrust(DeviceTrustErrorKind::Inactive) => {
                let device = deps
                    .api
                    .fetch_trusted_devices()
                    .await?
                    .into_iter()
                    .find(|d| d.id == persisted.device_id);
                match device {
                    Some(device) => Ok(SsoOutcome::State(
                        inactive_state(deps, device, persisted.device_secret).await?,
                    )),
                    None => Ok(SsoOutcome::State(
                        replace_stale_device(deps, user_id, None).await?,
                    )),
                }
            }
            LoginError::DeviceTrust(DeviceTrustErrorKind::NonExisting) => Ok(SsoOutcome::State(
                replace_stale_device(deps, user_id, None).await?,
            )),
            LoginError::DeviceTrust(DeviceTrustErrorKind::Invalid) => Ok(SsoOutcome::State(
                replace_stale_device(deps, user_id, Some(persisted.device_id)).await?,
            )),
            other => Err(other),
        },
    }
}

/// Keyless member: either the organization provides setup context, or the
/// account is finalized without key material.
async fn prepare_keyless(
    deps: &FlowDeps,
    cache: &mut AuthCache,
) -> Result<SsoOutcome, LoginError> {
    match deps.api.fetch_unprivatization_context().await {
        Ok(organization) => {
            let device = create_device(deps).await?;
            Ok(SsoOutcome::State(SsoState::Setup {
                organization,
                device,
                device_secret: generate_device_secret(),
            }))
        }
        Err(err) if err.response_code() == Some(api_codes::NO_UNPRIVATIZATION_DATA) => {
            let session = finalize::finalize_login(
                deps,
                cache,
                FinalizeOptions {
                    key_password: None,
                    attempt_resume: true,
                    source: SessionSource::Sso,
                    flow: SessionFlow::Login,
                    trusted: false,
                },
            )
            .await?;
            Ok(SsoOutcome::Finalized(session))
        }
        Err(err) => Err(err.into()),
    }
}

/// Derives the key passphrase from the backup password, activates the device
/// and finalizes. A wrong backup password is recoverable.
pub(crate) async fn unlock_sso(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    device: &TrustedDevice,
    device_secret: &str,
    backup_password: &str,
) -> Result<Session, LoginError> {
    let (user, salts) = cache.user_and_salts(deps.api.as_ref()).await?;
    let unlocked = deps
        .unlock
        .derive_and_decrypt(user, salts, backup_password)
        .await?;
    let key_password = unlocked.key_password;

    trust_device(deps, cache, device, device_secret, &key_password).await?;
    finalize_sso(deps, cache, key_password).await
}

/// A peer device approved ours and released the sealed key passphrase; the
/// unlock service is never consulted.
pub(crate) async fn device_confirmed(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    device_secret: &str,
    approved: TrustedDevice,
) -> Result<Session, LoginError> {
    let sealed = require!(approved.encrypted_secret);
    // A released secret our device secret cannot open is a broken record,
    // not a wrong password the user could correct.
    let key_password = KeyPassword::new(
        decrypt_with_passphrase(&sealed, device_secret)
            .map_err(|_| LoginError::Unlock(UnlockError::InvalidEnvelope))?,
    );

    let user_id = cache.user(deps.api.as_ref()).await?.id;
    deps.device_secrets
        .store(
            user_id,
            PersistedDeviceSecret {
                device_id: approved.id,
                device_secret: device_secret.to_owned(),
                sealed_key_password: sealed,
            },
        )
        .await?;

    finalize_sso(deps, cache, key_password).await
}

/// Replaces a temporary backup password, re-trusts the device under the new
/// key passphrase and finalizes without resuming.
pub(crate) async fn change_backup_password(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    device: &TrustedDevice,
    device_secret: &str,
    new_password: &str,
) -> Result<Session, LoginError> {
    deps.api.change_password(new_password).await?;
    cache.data.user.invalidate();
    cache.data.addresses.invalidate();
    cache.data.salts.invalidate();

    let key_password = password::derive_after_provisioning(deps, cache, new_password).await?;
    trust_device(deps, cache, device, device_secret, &key_password).await?;

    finalize::finalize_login(
        deps,
        cache,
        FinalizeOptions {
            key_password: Some(key_password),
            // A fresh backup password must not resume a stale session.
            attempt_resume: false,
            source: SessionSource::Sso,
            flow: SessionFlow::Reset,
            trusted: true,
        },
    )
    .await
}

/// First-time key provisioning for an unprivatized member, then the same
/// trust-and-finalize tail as the unlock path.
pub(crate) async fn complete_setup(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    device: &TrustedDevice,
    device_secret: &str,
    new_password: &str,
) -> Result<Session, LoginError> {
    cache.user_and_addresses(deps.api.as_ref()).await?;
    deps.api.setup_address_keys(new_password).await?;

    cache.data.user.invalidate();
    cache.data.addresses.invalidate();
    cache.data.salts.invalidate();

    let key_password = password::derive_after_provisioning(deps, cache, new_password).await?;
    trust_device(deps, cache, device, device_secret, &key_password).await?;
    finalize_sso(deps, cache, key_password).await
}

/// Activates the device record with the device secret sealed under the key
/// passphrase, and persists the inverse envelope locally so later logins can
/// recover the passphrase from the secret.
async fn trust_device(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    device: &TrustedDevice,
    device_secret: &str,
    key_password: &KeyPassword,
) -> Result<(), LoginError> {
    let activation = encrypt_with_passphrase(device_secret, key_password.as_str());
    deps.api
        .activate_trusted_device(device.id, &activation)
        .await?;

    let user_id = cache.user(deps.api.as_ref()).await?.id;
    deps.device_secrets
        .store(
            user_id,
            PersistedDeviceSecret {
                device_id: device.id,
                device_secret: device_secret.to_owned(),
                sealed_key_password: encrypt_with_passphrase(key_password.as_str(), device_secret),
            },
        )
        .await?;
    Ok(())
}

async fn finalize_sso(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    key_password: KeyPassword,
) -> Result<Session, LoginError> {
    finalize::finalize_login(
        deps,
        cache,
        FinalizeOptions {
            key_password: Some(key_password),
            attempt_resume: true,
            source: SessionSource::Sso,
            flow: SessionFlow::Login,
            trusted: true,
        },
    )
    .await
}

async fn create_device(deps: &FlowDeps) -> Result<TrustedDevice, LoginError> {
    let device = deps
        .api
        .create_trusted_device(&NewTrustedDevice {
            name: deps.device_name.clone(),
            // Random public handle; the device secret itself never leaves
            // this installation in the clear.
            activation_token: generate_device_secret(),
        })
        .await?;
    Ok(device)
}

async fn fresh_unlock_state(deps: &FlowDeps) -> Result<SsoState, LoginError> {
    let device = create_device(deps).await?;
    Ok(SsoState::Unlock {
        device,
        device_secret: generate_device_secret(),
    })
}

/// Discards a dead device record (and the local secret bound to it), then
/// starts over with a fresh one.
async fn replace_stale_device(
    deps: &FlowDeps,
    user_id: UserId,
    delete: Option<halcyon_core::DeviceId>,
) -> Result<SsoState, LoginError> {
    if let Some(id) = delete {
        if let Err(err) = deps.api.delete_trusted_device(id).await {
            debug!("failed to delete stale device record: {err}");
        }
    }
    deps.device_secrets.remove(user_id).await?;
    fresh_unlock_state(deps).await
}

/// The record awaits approval: collect the active peers that can grant it
/// and start polling.
async fn inactive_state(
    deps: &FlowDeps,
    device: TrustedDevice,
    device_secret: String,
) -> Result<SsoState, LoginError> {
    let other_devices: Vec<TrustedDevice> = deps
        .api
        .fetch_trusted_devices()
        .await?
        .into_iter()
        .filter(|d| d.state == DeviceState::Active && d.id != device.id)
        .collect();
    let poll = spawn_poller(deps.api.clone(), device.id, deps.visibility.clone());
    Ok(SsoState::Inactive {
        device,
        device_secret,
        other_devices,
        poll,
    })
}
