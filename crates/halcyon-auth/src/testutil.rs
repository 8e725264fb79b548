//! Shared fixtures for the flow tests: a scriptable in-memory [`AuthApi`],
//! a deterministic key-unlock service and cache/deps constructors.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use halcyon_core::{
    api::{
        api_codes, Address, AuthApi, AuthInfo, AuthResponse, DeviceState, KeySalt,
        NewTrustedDevice, PasswordMode, SecondFactor, TrustedDevice, UnprivatizationContext, User,
        UserKey, CURRENT_AUTH_VERSION,
    },
    crypto::{KeyPassword, KeyUnlockService, UnlockError, UnlockedKeys},
    session::{InMemoryDeviceSecretStore, InMemorySessionStore},
    ApiError, DeviceId, LocalId, UserId,
};
use zeroize::Zeroizing;

use crate::{
    flow::FlowDeps,
    kt::{KeyTransparencyVerifier, KtError},
    sso::AlwaysVisible,
    AuthCache,
};

pub(crate) fn test_user_id() -> UserId {
    UserId::from(uuid::Uuid::from_u128(0x5eed))
}

pub(crate) fn api_err(status: u16, code: u32, message: &str) -> ApiError {
    ApiError::ResponseContent {
        status: reqwest::StatusCode::from_u16(status).unwrap(),
        code,
        message: message.to_owned(),
    }
}

pub(crate) fn test_device(state: DeviceState) -> TrustedDevice {
    TrustedDevice {
        id: DeviceId::new(),
        state,
        name: "Halcyon Web".into(),
        last_activity: None,
        encrypted_secret: None,
    }
}

fn default_user() -> User {
    User {
        id: test_user_id(),
        name: "jane".into(),
        keys: vec![UserKey {
            id: "key-1".into(),
            primary: true,
            private_key: "ZW52ZWxvcGU=".into(),
        }],
        sso: false,
        temporary_password: false,
        requires_key_setup: false,
        to_upgrade_keys: false,
        to_migrate_keys: false,
    }
}

/// Scriptable [`AuthApi`]. Failure slots are take-once: the injected error is
/// returned exactly once and the next call succeeds again, which is what the
/// resubmission tests need.
#[derive(Default)]
pub(crate) struct MockApi {
    user: Mutex<Option<User>>,
    auth_response: Mutex<Option<AuthResponse>>,
    salts: Mutex<Vec<KeySalt>>,
    addresses: Mutex<Vec<Address>>,
    devices: Mutex<Vec<TrustedDevice>>,
    unprivatization: Mutex<Option<UnprivatizationContext>>,

    revoked: Mutex<Vec<String>>,
    deleted: Mutex<Vec<DeviceId>>,

    user_fetches: AtomicUsize,
    salt_fetches: AtomicUsize,
    device_fetches: AtomicUsize,
    setup_calls: AtomicUsize,
    password_changes: AtomicUsize,
    credential_upgrades: AtomicUsize,
    recovery_calls: AtomicUsize,

    migration_mutates: Mutex<bool>,
    recovery_mutates: Mutex<bool>,

    fail_second_factor: Mutex<Option<ApiError>>,
    fail_revoke: Mutex<Option<ApiError>>,
    fail_credential_upgrade: Mutex<Option<ApiError>>,
    fail_key_upgrade: Mutex<Option<ApiError>>,
    fail_device_fetch: Mutex<Option<ApiError>>,
    fail_auth: Mutex<Option<ApiError>>,
}

impl MockApi {
    fn user(&self) -> User {
        self.user
            .lock()
            .unwrap()
            .get_or_insert_with(default_user)
            .clone()
    }

    pub(crate) fn with_user(&self, f: impl FnOnce(&mut User)) {
        f(self.user.lock().unwrap().get_or_insert_with(default_user));
    }

    /// Adjusts the response the next `auth` call returns.
    pub(crate) fn with_auth_response(&self, f: impl FnOnce(&mut AuthResponse)) {
        f(self
            .auth_response
            .lock()
            .unwrap()
            .get_or_insert_with(base_auth_response));
    }

    pub(crate) fn insert_device(&self, device: TrustedDevice) {
        self.devices.lock().unwrap().push(device);
    }

    pub(crate) fn with_device(&self, id: DeviceId, f: impl FnOnce(&mut TrustedDevice)) {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.id == id)
            .expect("unknown device in fixture");
        f(device);
    }

    pub(crate) fn set_device_state(&self, id: DeviceId, state: DeviceState) {
        self.with_device(id, |d| d.state = state);
    }

    pub(crate) fn set_unprivatization(&self, context: UnprivatizationContext) {
        *self.unprivatization.lock().unwrap() = Some(context);
    }

    pub(crate) fn set_migration_mutates(&self, mutates: bool) {
        *self.migration_mutates.lock().unwrap() = mutates;
    }

    pub(crate) fn set_recovery_mutates(&self, mutates: bool) {
        *self.recovery_mutates.lock().unwrap() = mutates;
    }

    pub(crate) fn fail_second_factor(&self, err: ApiError) {
        *self.fail_second_factor.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_revoke(&self, err: ApiError) {
        *self.fail_revoke.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_credential_upgrade(&self, err: ApiError) {
        *self.fail_credential_upgrade.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_key_upgrade(&self, err: ApiError) {
        *self.fail_key_upgrade.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_device_fetch(&self, err: ApiError) {
        *self.fail_device_fetch.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_auth(&self, err: ApiError) {
        *self.fail_auth.lock().unwrap() = Some(err);
    }

    pub(crate) fn user_fetches(&self) -> usize {
        self.user_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn salt_fetches(&self) -> usize {
        self.salt_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn device_fetches(&self) -> usize {
        self.device_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn password_changes(&self) -> usize {
        self.password_changes.load(Ordering::SeqCst)
    }

    pub(crate) fn credential_upgrades(&self) -> usize {
        self.credential_upgrades.load(Ordering::SeqCst)
    }

    pub(crate) fn recovery_calls(&self) -> usize {
        self.recovery_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub(crate) fn deleted_devices(&self) -> Vec<DeviceId> {
        self.deleted.lock().unwrap().clone()
    }

    fn take(slot: &Mutex<Option<ApiError>>) -> Result<(), ApiError> {
        match slot.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl AuthApi for MockApi {
    async fn auth_info(&self, _username: &str) -> Result<AuthInfo, ApiError> {
        Ok(AuthInfo {
            version: CURRENT_AUTH_VERSION,
            server_nonce: "bm9uY2U=".into(),
        })
    }

    async fn auth(
        &self,
        _username: &str,
        _password: &str,
        _info: &AuthInfo,
        _challenge: Option<&serde_json::Value>,
    ) -> Result<AuthResponse, ApiError> {
        Self::take(&self.fail_auth)?;
        Ok(self
            .auth_response
            .lock()
            .unwrap()
            .get_or_insert_with(base_auth_response)
            .clone())
    }

    async fn submit_second_factor(&self, _factor: &SecondFactor) -> Result<(), ApiError> {
        Self::take(&self.fail_second_factor)
    }

    async fn fetch_user(&self) -> Result<User, ApiError> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.user())
    }

    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError> {
        let addresses = self.addresses.lock().unwrap();
        if addresses.is_empty() {
            Ok(vec![Address {
                id: halcyon_core::AddressId::new(),
                email: "jane@halcyon.test".into(),
                has_keys: true,
            }])
        } else {
            Ok(addresses.clone())
        }
    }

    async fn fetch_key_salts(&self) -> Result<Vec<KeySalt>, ApiError> {
        self.salt_fetches.fetch_add(1, Ordering::SeqCst);
        let salts = self.salts.lock().unwrap();
        if salts.is_empty() {
            Ok(vec![KeySalt {
                key_id: "key-1".into(),
                key_salt: Some("c2FsdHNhbHQ=".into()),
            }])
        } else {
            Ok(salts.clone())
        }
    }

    async fn upgrade_credential_hash(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<(), ApiError> {
        self.credential_upgrades.fetch_add(1, Ordering::SeqCst);
        Self::take(&self.fail_credential_upgrade)
    }

    async fn change_password(&self, _new_password: &str) -> Result<(), ApiError> {
        self.password_changes.fetch_add(1, Ordering::SeqCst);
        self.with_user(|u| u.temporary_password = false);
        Ok(())
    }

    async fn setup_address_keys(&self, _new_password: &str) -> Result<(), ApiError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        // Provisioning gives the account its first key.
        self.with_user(|u| {
            u.requires_key_setup = false;
            if u.keys.is_empty() {
                u.keys.push(UserKey {
                    id: "key-1".into(),
                    primary: true,
                    private_key: "ZW52ZWxvcGU=".into(),
                });
            }
        });
        Ok(())
    }

    async fn upgrade_keys(&self) -> Result<(), ApiError> {
        Self::take(&self.fail_key_upgrade)
    }

    async fn migrate_keys(&self) -> Result<bool, ApiError> {
        if *self.migration_mutates.lock().unwrap() {
            self.with_user(|u| u.to_migrate_keys = false);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn restore_recovery_keys(&self) -> Result<bool, ApiError> {
        self.recovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.recovery_mutates.lock().unwrap())
    }

    async fn fetch_unprivatization_context(&self) -> Result<UnprivatizationContext, ApiError> {
        self.unprivatization
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                api_err(
                    422,
                    api_codes::NO_UNPRIVATIZATION_DATA,
                    "No unprivatization data",
                )
            })
    }

    async fn create_trusted_device(
        &self,
        device: &NewTrustedDevice,
    ) -> Result<TrustedDevice, ApiError> {
        let created = TrustedDevice {
            id: DeviceId::new(),
            state: DeviceState::Inactive,
            name: device.name.clone(),
            last_activity: None,
            encrypted_secret: None,
        };
        self.devices.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn fetch_trusted_devices(&self) -> Result<Vec<TrustedDevice>, ApiError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn fetch_trusted_device(&self, id: DeviceId) -> Result<TrustedDevice, ApiError> {
        self.device_fetches.fetch_add(1, Ordering::SeqCst);
        Self::take(&self.fail_device_fetch)?;
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| api_err(422, api_codes::DEVICE_NON_EXISTING, "No such device"))
    }

    async fn activate_trusted_device(
        &self,
        id: DeviceId,
        _encrypted_secret: &str,
    ) -> Result<(), ApiError> {
        self.with_device(id, |d| d.state = DeviceState::Active);
        Ok(())
    }

    async fn delete_trusted_device(&self, id: DeviceId) -> Result<(), ApiError> {
        self.devices.lock().unwrap().retain(|d| d.id != id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn revoke_session(&self, uid: &str) -> Result<(), ApiError> {
        Self::take(&self.fail_revoke)?;
        self.revoked.lock().unwrap().push(uid.to_owned());
        Ok(())
    }
}

/// Deterministic [`KeyUnlockService`]: any password starting with `wrong`
/// fails, everything else yields the passphrase `kp-<password>`.
#[derive(Default)]
pub(crate) struct MockUnlock {
    calls: AtomicUsize,
}

impl MockUnlock {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KeyUnlockService for MockUnlock {
    async fn derive_and_decrypt(
        &self,
        _user: &User,
        _salts: &[KeySalt],
        raw_password: &str,
    ) -> Result<UnlockedKeys, UnlockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if raw_password.starts_with("wrong") {
            return Err(UnlockError::WrongPassword);
        }
        Ok(UnlockedKeys {
            primary_key: Zeroizing::new(vec![0u8; 32]),
            key_password: KeyPassword::new(format!("kp-{raw_password}")),
        })
    }
}

/// [`KeyTransparencyVerifier`] that only counts commits.
#[derive(Default)]
pub(crate) struct CountingKt {
    commits: AtomicUsize,
}

impl CountingKt {
    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KeyTransparencyVerifier for CountingKt {
    async fn commit(&self, _user: &User) -> Result<(), KtError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handles to the stores behind a [`FlowDeps`], for post-hoc assertions.
pub(crate) struct TestStores {
    pub(crate) sessions: Arc<InMemorySessionStore>,
    pub(crate) device_secrets: Arc<InMemoryDeviceSecretStore>,
    pub(crate) kt: Arc<CountingKt>,
    pub(crate) unlock: Arc<MockUnlock>,
}

pub(crate) fn test_deps_full(api: Arc<MockApi>) -> (FlowDeps, TestStores) {
    let sessions = Arc::new(InMemorySessionStore::default());
    let device_secrets = Arc::new(InMemoryDeviceSecretStore::default());
    let kt = Arc::new(CountingKt::default());
    let unlock = Arc::new(MockUnlock::default());
    let deps = FlowDeps {
        api,
        unlock: unlock.clone(),
        sessions: sessions.clone(),
        device_secrets: device_secrets.clone(),
        kt: kt.clone(),
        visibility: Arc::new(AlwaysVisible),
        local_id: LocalId(0),
        device_name: "Halcyon Web".into(),
    };
    (
        deps,
        TestStores {
            sessions,
            device_secrets,
            kt,
            unlock,
        },
    )
}

pub(crate) fn test_deps(api: Arc<MockApi>) -> FlowDeps {
    test_deps_full(api).0
}

fn base_auth_response() -> AuthResponse {
    AuthResponse {
        uid: "uid-1".into(),
        access_token: "access".into(),
        refresh_token: "refresh".into(),
        user_id: test_user_id(),
        two_factor: Default::default(),
        password_mode: PasswordMode::One,
        temporary_password: false,
    }
}

/// A cache as produced by a fresh credential exchange, with the response
/// adjusted by `f`.
pub(crate) fn test_cache(f: impl FnOnce(&mut AuthResponse)) -> AuthCache {
    test_cache_with(CURRENT_AUTH_VERSION, f)
}

pub(crate) fn test_cache_with(
    auth_version: u8,
    f: impl FnOnce(&mut AuthResponse),
) -> AuthCache {
    let mut response = base_auth_response();
    f(&mut response);
    AuthCache::new(
        "jane@halcyon.test".into(),
        "login-pw".into(),
        response,
        auth_version,
        true,
        false,
    )
}

/// Two-password-mode cache; the fixture user already has keys.
pub(crate) fn test_cache_with_keys() -> AuthCache {
    test_cache(|r| r.password_mode = PasswordMode::Two)
}
