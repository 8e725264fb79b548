//! The Auth API capability.
//!
//! The orchestration core never talks HTTP directly; it is handed an
//! `Arc<dyn AuthApi>` and treats every call as an opaque suspension point.
//! [`HttpAuthApi`] is the production implementation.

mod http;
mod models;

pub use http::HttpAuthApi;
pub use models::*;

pub use crate::error::api_codes;

use crate::{ApiError, DeviceId};

/// Network operations the authentication core depends on.
///
/// Errors are passed through as [`ApiError`] unmodified; any reclassification
/// (wrong TOTP code, device-trust states, suspension) happens in the caller.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// First half of the credential exchange.
    async fn auth_info(&self, username: &str) -> Result<AuthInfo, ApiError>;

    /// Second half of the credential exchange. The challenge payload, when
    /// present, is produced by an external widget and forwarded verbatim.
    async fn auth(
        &self,
        username: &str,
        password: &str,
        info: &AuthInfo,
        challenge: Option<&serde_json::Value>,
    ) -> Result<AuthResponse, ApiError>;

    /// Submits the second factor for the pending session.
    async fn submit_second_factor(&self, factor: &SecondFactor) -> Result<(), ApiError>;

    /// The authenticated user record.
    async fn fetch_user(&self) -> Result<User, ApiError>;

    /// Addresses attached to the authenticated user.
    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError>;

    /// Per-key passphrase salts.
    async fn fetch_key_salts(&self) -> Result<Vec<KeySalt>, ApiError>;

    /// Re-verifies the password against the current hashing scheme. Called
    /// when the server reported a stale credential hash version.
    async fn upgrade_credential_hash(&self, username: &str, password: &str)
        -> Result<(), ApiError>;

    /// Replaces the account password (temporary-password and SSO backup
    /// password changes).
    async fn change_password(&self, new_password: &str) -> Result<(), ApiError>;

    /// Provisions first-time address keys for an account without any.
    async fn setup_address_keys(&self, new_password: &str) -> Result<(), ApiError>;

    /// Upgrades legacy-version keys. Best-effort; callers swallow failures.
    async fn upgrade_keys(&self) -> Result<(), ApiError>;

    /// Runs a pending key migration. Best-effort; callers swallow failures.
    /// Returns whether the user record was mutated.
    async fn migrate_keys(&self) -> Result<bool, ApiError>;

    /// Attempts to reactivate user keys from previously stored recovery
    /// material. Best-effort. Returns whether the user record was mutated.
    async fn restore_recovery_keys(&self) -> Result<bool, ApiError>;

    /// Organization context for members that have never held their own keys.
    async fn fetch_unprivatization_context(&self) -> Result<UnprivatizationContext, ApiError>;

    /// Creates a fresh, unactivated trusted device record.
    async fn create_trusted_device(
        &self,
        device: &NewTrustedDevice,
    ) -> Result<TrustedDevice, ApiError>;

    /// All trusted device records of the authenticated user.
    async fn fetch_trusted_devices(&self) -> Result<Vec<TrustedDevice>, ApiError>;

    /// A single trusted device record.
    async fn fetch_trusted_device(&self, id: DeviceId) -> Result<TrustedDevice, ApiError>;

    /// Activates a device, handing the server the encrypted device secret.
    async fn activate_trusted_device(
        &self,
        id: DeviceId,
        encrypted_secret: &str,
    ) -> Result<(), ApiError>;

    /// Deletes a trusted device record.
    async fn delete_trusted_device(&self, id: DeviceId) -> Result<(), ApiError>;

    /// Revokes a session by its identifier. Used to discard the redundant
    /// fresh session when an existing one is resumed.
    async fn revoke_session(&self, uid: &str) -> Result<(), ApiError>;
}
