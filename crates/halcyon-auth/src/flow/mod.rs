//! The login flow state machine.
//!
//! One [`LoginFlow`] drives one user through one login attempt. The caller
//! renders the form matching [`LoginFlow::step`], feeds the collected input
//! to [`LoginFlow::submit`] and repeats until the outcome is
//! [`SubmitOutcome::Done`]. Between submissions the attempt's state (the
//! [`AuthCache`] and, for SSO, the sub-flow state) lives inside the machine;
//! a recoverable error leaves it untouched so the user can simply resubmit,
//! any other error cancels the attempt back to the login step.

pub(crate) mod password;
pub(crate) mod policy;
pub(crate) mod two_factor;
pub(crate) mod unlock;

use std::{mem, sync::Arc};

use halcyon_core::{
    api::{AuthApi, SecondFactor, TrustedDevice},
    crypto::{KeyPassword, KeyUnlockService},
    session::{DeviceSecretStore, Session, SessionFlow, SessionSource, SessionStore},
    LocalId,
};

use crate::{
    cache::AuthCache,
    finalize::{self, FinalizeOptions},
    kt::KeyTransparencyVerifier,
    sso::{self, SsoState, VisibilityProbe},
    LoginError,
};

/// Capabilities and installation identity the flow operates with.
pub struct FlowDeps {
    #[allow(missing_docs)]
    pub api: Arc<dyn AuthApi>,
    #[allow(missing_docs)]
    pub unlock: Arc<dyn KeyUnlockService>,
    #[allow(missing_docs)]
    pub sessions: Arc<dyn SessionStore>,
    #[allow(missing_docs)]
    pub device_secrets: Arc<dyn DeviceSecretStore>,
    #[allow(missing_docs)]
    pub kt: Arc<dyn KeyTransparencyVerifier>,
    #[allow(missing_docs)]
    pub visibility: Arc<dyn VisibilityProbe>,
    /// The local session slot this installation binds sessions to.
    pub local_id: LocalId,
    /// Name under which trusted-device records are created.
    pub device_name: String,
}

/// The form the caller should render next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AuthStep {
    Login,
    TwoFactor,
    Unlock,
    Sso,
    NewPassword,
    SetupPassword,
    Done,
}

/// One piece of user input, matching the current step.
pub enum StepInput {
    /// The initial credential form.
    Credentials {
        #[allow(missing_docs)]
        username: String,
        #[allow(missing_docs)]
        password: String,
        /// Whether the resulting session survives a client restart.
        persistent: bool,
        /// Administrative login without client-side key material.
        ignore_unlock: bool,
        /// Optional anti-abuse challenge payload, forwarded verbatim.
        challenge: Option<serde_json::Value>,
    },
    /// TOTP code or FIDO2 assertion for the two-factor step.
    SecondFactor(SecondFactor),
    /// The mailbox password for the unlock step.
    KeyPassword(String),
    /// Replacement for a temporary password.
    NewPassword(String),
    /// The password chosen during first-time key setup.
    SetupPassword(String),
    /// The SSO backup password (unlock sub-state, or bypass while polling).
    SsoBackupPassword(String),
    /// A new SSO backup password (setup and set-password sub-states).
    SsoNewBackupPassword(String),
    /// The approved device record delivered by the poller.
    SsoDeviceConfirmed(TrustedDevice),
}

/// What a submission produced.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// More input is needed; render the form for this step.
    Pending(AuthStep),
    /// The login completed.
    Done(Session),
}

enum FlowState {
    Login,
    TwoFactor(AuthCache),
    Unlock(AuthCache),
    Sso(AuthCache, SsoState),
    NewPassword(AuthCache),
    SetupPassword(AuthCache),
    Done,
}

/// Drives one login attempt; see the module docs.
pub struct LoginFlow {
    deps: FlowDeps,
    state: FlowState,
}

impl LoginFlow {
    #[allow(missing_docs)]
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            deps,
            state: FlowState::Login,
        }
    }

    /// The step whose form the caller should render.
    pub fn step(&self) -> AuthStep {
        match &self.state {
            FlowState::Login => AuthStep::Login,
            FlowState::TwoFactor(_) => AuthStep::TwoFactor,
            FlowState::Unlock(_) => AuthStep::Unlock,
            FlowState::Sso(..) => AuthStep::Sso,
            FlowState::NewPassword(_) => AuthStep::NewPassword,
            FlowState::SetupPassword(_) => AuthStep::SetupPassword,
            FlowState::Done => AuthStep::Done,
        }
    }

    /// The SSO sub-flow state, while on the SSO step.
    pub fn sso_state(&self) -> Option<&SsoState> {
        match &self.state {
            FlowState::Sso(_, sso) => Some(sso),
            _ => None,
        }
    }

    /// Mutable access to the SSO sub-flow state; needed to await the
    /// approval poller.
    pub fn sso_state_mut(&mut self) -> Option<&mut SsoState> {
        match &mut self.state {
            FlowState::Sso(_, sso) => Some(sso),
            _ => None,
        }
    }

    /// Abandons the current attempt. Drops the cache and any running
    /// approval poller; the next submission starts from the login step.
    pub fn cancel(&mut self) {
        self.state = FlowState::Login;
    }

    /// Feeds one piece of user input to the machine.
    ///
    /// On a recoverable error ([`LoginError::is_recoverable`]) the step and
    /// cache are preserved for resubmission. Any other error cancels the
    /// attempt. Input not matching the current step is rejected with
    /// [`LoginError::InvalidState`] and leaves the machine unchanged.
    pub async fn submit(&mut self, input: StepInput) -> Result<SubmitOutcome, LoginError> {
        let state = mem::replace(&mut self.state, FlowState::Login);
        match (state, input) {
            (
                FlowState::Login,
                StepInput::Credentials {
                    username,
                    password,
                    persistent,
                    ignore_unlock,
                    challenge,
                },
            ) => {
                self.login(username, password, persistent, ignore_unlock, challenge)
                    .await
            }
            (FlowState::TwoFactor(mut cache), StepInput::SecondFactor(factor)) => {
                match two_factor::submit_second_factor(&self.deps, &mut cache, &factor).await {
                    Ok(()) => self.advance(cache).await,
                    Err(err) => {
                        if err.is_recoverable() {
                            self.state = FlowState::TwoFactor(cache);
                        }
                        Err(err)
                    }
                }
            }
            (FlowState::Unlock(mut cache), StepInput::KeyPassword(clear_key_password)) => {
                match unlock::unlock(&self.deps, &cache, &clear_key_password).await {
                    Ok(key_password) => {
                        unlock::run_key_maintenance(&self.deps, &mut cache).await;
                        self.finish_standard(cache, Some(key_password)).await
                    }
                    Err(err) => {
                        if err.is_recoverable() {
                            self.state = FlowState::Unlock(cache);
                        }
                        Err(err)
                    }
                }
            }
            (FlowState::NewPassword(mut cache), StepInput::NewPassword(new_password)) => {
                let session =
                    password::replace_temporary_password(&self.deps, &mut cache, &new_password)
                        .await?;
                self.complete(session)
            }
            (FlowState::SetupPassword(mut cache), StepInput::SetupPassword(new_password)) => {
                let session = password::setup_password(&self.deps, &mut cache, &new_password).await?;
                self.complete(session)
            }
            (
                FlowState::Sso(
                    mut cache,
                    SsoState::Unlock {
                        device,
                        device_secret,
                    },
                ),
                StepInput::SsoBackupPassword(backup_password),
            ) => {
                match sso::unlock_sso(&self.deps, &mut cache, &device, &device_secret, &backup_password)
                    .await
                {
                    Ok(session) => self.complete(session),
                    Err(err) => {
                        if err.is_recoverable() {
                            self.state = FlowState::Sso(
                                cache,
                                SsoState::Unlock {
                                    device,
                                    device_secret,
                                },
                            );
                        }
                        Err(err)
                    }
                }
            }
            (
                FlowState::Sso(
                    mut cache,
                    SsoState::Inactive {
                        device,
                        device_secret,
                        other_devices,
                        poll,
                    },
                ),
                StepInput::SsoBackupPassword(backup_password),
            ) => {
                // Backup-password bypass while a peer approval is pending.
                // The poller keeps running until the attempt settles.
                match sso::unlock_sso(&self.deps, &mut cache, &device, &device_secret, &backup_password)
                    .await
                {
                    Ok(session) => self.complete(session),
                    Err(err) => {
                        if err.is_recoverable() {
                            self.state = FlowState::Sso(
                                cache,
                                SsoState::Inactive {
                                    device,
                                    device_secret,
                                    other_devices,
                                    poll,
                                },
                            );
                        }
                        Err(err)
                    }
                }
            }
            (
                FlowState::Sso(mut cache, SsoState::Inactive { device_secret, poll, .. }),
                StepInput::SsoDeviceConfirmed(approved),
            ) => {
                poll.unsubscribe();
                let session =
                    sso::device_confirmed(&self.deps, &mut cache, &device_secret, approved).await?;
                self.complete(session)
            }
            (
                FlowState::Sso(
                    mut cache,
                    SsoState::Setup {
                        device,
                        device_secret,
                        ..
                    },
                ),
                StepInput::SsoNewBackupPassword(new_password),
            ) => {
                let session = sso::complete_setup(
                    &self.deps,
                    &mut cache,
                    &device,
                    &device_secret,
                    &new_password,
                )
                .await?;
                self.complete(session)
            }
            (
                FlowState::Sso(
                    mut cache,
                    SsoState::SetPassword {
                        device,
                        device_secret,
                    },
                ),
                StepInput::SsoNewBackupPassword(new_password),
            ) => {
                let session = sso::change_backup_password(
                    &self.deps,
                    &mut cache,
                    &device,
                    &device_secret,
                    &new_password,
                )
                .await?;
                self.complete(session)
            }
            (state, _) => {
                self.state = state;
                Err(LoginError::InvalidState(
                    "input does not match the current step",
                ))
            }
        }
    }

    /// The credential exchange, then the first routing decision.
    async fn login(
        &mut self,
        username: String,
        password: String,
        persistent: bool,
        ignore_unlock: bool,
        challenge: Option<serde_json::Value>,
    ) -> Result<SubmitOutcome, LoginError> {
        let info = self.deps.api.auth_info(&username).await?;
        let response = self
            .deps
            .api
            .auth(&username, &password, &info, challenge.as_ref())
            .await?;
        let cache = AuthCache::new(
            username,
            password,
            response,
            info.version,
            persistent,
            ignore_unlock,
        );
        self.advance(cache).await
    }

    /// Runs the transition policy and either parks the machine on the next
    /// step or completes the login.
    async fn advance(&mut self, mut cache: AuthCache) -> Result<SubmitOutcome, LoginError> {
        match policy::next(&mut cache, self.deps.api.as_ref()).await? {
            policy::Transition::TwoFactor => {
                self.state = FlowState::TwoFactor(cache);
                Ok(SubmitOutcome::Pending(AuthStep::TwoFactor))
            }
            policy::Transition::Unlock => {
                self.state = FlowState::Unlock(cache);
                Ok(SubmitOutcome::Pending(AuthStep::Unlock))
            }
            policy::Transition::NewPassword => {
                self.state = FlowState::NewPassword(cache);
                Ok(SubmitOutcome::Pending(AuthStep::NewPassword))
            }
            policy::Transition::SetupPassword => {
                self.state = FlowState::SetupPassword(cache);
                Ok(SubmitOutcome::Pending(AuthStep::SetupPassword))
            }
            policy::Transition::Finalize => self.finish_standard(cache, None).await,
            policy::Transition::DeriveAndFinalize => {
                let key_password = self.derive_from_login_password(&mut cache).await?;
                unlock::run_key_maintenance(&self.deps, &mut cache).await;
                self.finish_standard(cache, Some(key_password)).await
            }
            policy::Transition::Sso => {
                match sso::prepare_sso_data(&self.deps, &mut cache).await? {
                    sso::SsoOutcome::Finalized(session) => self.complete(session),
                    sso::SsoOutcome::State(sso_state) => {
                        self.state = FlowState::Sso(cache, sso_state);
                        Ok(SubmitOutcome::Pending(AuthStep::Sso))
                    }
                }
            }
        }
    }

    /// One-password mode: the login password doubles as the key password.
    /// No dedicated unlock step, no extra delay.
    async fn derive_from_login_password(
        &self,
        cache: &mut AuthCache,
    ) -> Result<KeyPassword, LoginError> {
        let login_password = cache.login_password.clone();
        let (user, salts) = cache.user_and_salts(self.deps.api.as_ref()).await?;
        let unlocked = self
            .deps
            .unlock
            .derive_and_decrypt(user, salts, &login_password)
            .await?;
        Ok(unlocked.key_password)
    }

    async fn finish_standard(
        &mut self,
        mut cache: AuthCache,
        key_password: Option<KeyPassword>,
    ) -> Result<SubmitOutcome, LoginError> {
        let session = finalize::finalize_login(
            &self.deps,
            &mut cache,
            FinalizeOptions {
                key_password,
                attempt_resume: true,
                source: SessionSource::Standard,
                flow: SessionFlow::Login,
                trusted: false,
            },
        )
        .await?;
        self.complete(session)
    }

    fn complete(&mut self, session: Session) -> Result<SubmitOutcome, LoginError> {
        self.state = FlowState::Done;
        Ok(SubmitOutcome::Done(session))
    }
}
