//! Wire models for the platform auth API.
//!
//! The platform serializes JSON fields in PascalCase. Cryptographic payloads
//! (key blobs, SRP proofs, challenge payloads) are carried as opaque strings
//! or JSON values; their inner format is not this SDK's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{AddressId, DeviceId, UserId};

/// The credential hashing scheme version the SDK produces. Accounts reporting
/// an older version are transparently rehashed during finalize.
pub const CURRENT_AUTH_VERSION: u8 = 4;

/// Response of the `auth/info` endpoint, consumed by the subsequent `auth`
/// call. The server nonce is opaque to this SDK.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AuthInfo {
    /// Credential hashing scheme version for this account.
    pub version: u8,
    /// Opaque server nonce, echoed back by `auth`.
    pub server_nonce: String,
}

/// Which second factors an account has enabled.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TwoFactorInfo {
    /// Whether a second factor is required at all.
    pub enabled: bool,
    /// Time-based one-time codes.
    #[serde(default)]
    pub totp: bool,
    /// Hardware-token (FIDO2) assertion.
    #[serde(default)]
    pub fido2: bool,
}

/// Whether mailbox key decryption uses the login password or a separate one.
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PasswordMode {
    /// Login password doubles as the mailbox key password.
    One = 1,
    /// A distinct mailbox password must be collected before unlock.
    Two = 2,
}

/// Server-issued credentials returned by a successful `auth` call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct AuthResponse {
    /// The session identifier, sent as a header on authenticated calls.
    #[serde(rename = "UID")]
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: UserId,
    #[serde(default)]
    pub two_factor: TwoFactorInfo,
    pub password_mode: PasswordMode,
    /// Set when the server issued the credentials against a temporary
    /// password (e.g. an admin-triggered reset).
    #[serde(default)]
    pub temporary_password: bool,
}

/// A single user key as reported by the server. The encrypted blob is opaque
/// outside the key-unlock service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct UserKey {
    #[serde(rename = "ID")]
    pub id: String,
    pub primary: bool,
    /// Base64 envelope holding the encrypted private key.
    pub private_key: String,
}

/// The authenticated user record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    #[serde(rename = "ID")]
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub keys: Vec<UserKey>,
    /// Account is under single-sign-on / organization-managed encryption.
    #[serde(rename = "SSO", default)]
    pub sso: bool,
    /// The current password is temporary and must be replaced.
    #[serde(default)]
    pub temporary_password: bool,
    /// First-time accounts whose address keys still need provisioning.
    #[serde(default)]
    pub requires_key_setup: bool,
    /// Legacy key versions present; an upgrade should be attempted after
    /// unlock.
    #[serde(default)]
    pub to_upgrade_keys: bool,
    /// A key migration is pending for this account.
    #[serde(default)]
    pub to_migrate_keys: bool,
}

impl User {
    /// The primary key, if the account has any keys at all.
    pub fn primary_key(&self) -> Option<&UserKey> {
        self.keys.iter().find(|k| k.primary).or(self.keys.first())
    }
}

/// An address attached to a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct Address {
    #[serde(rename = "ID")]
    pub id: AddressId,
    pub email: String,
    #[serde(default)]
    pub has_keys: bool,
}

/// Per-key salt used to derive the key passphrase from a password.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct KeySalt {
    #[serde(rename = "ID")]
    pub key_id: String,
    /// Absent for keys predating salted passphrases.
    pub key_salt: Option<String>,
}

/// Second-factor proof submitted during the two-factor step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub enum SecondFactor {
    /// Six-digit time-based code.
    Totp(String),
    /// Opaque FIDO2 assertion produced by the platform's webauthn layer.
    Fido2(serde_json::Value),
}

/// Activation state of a trusted device record.
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// Created but not yet activated by the owner or a peer device.
    Inactive = 0,
    /// Activated; can hold an encrypted device secret.
    Active = 1,
}

/// A trusted device record as held by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct TrustedDevice {
    #[serde(rename = "ID")]
    pub id: DeviceId,
    pub state: DeviceState,
    pub name: String,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// Key passphrase encrypted to this device's secret; present once a peer
    /// (or the owner) has released it to the device.
    #[serde(default)]
    pub encrypted_secret: Option<String>,
}

/// Payload for creating a fresh, unactivated trusted device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct NewTrustedDevice {
    pub name: String,
    /// Public half of the activation exchange, opaque to the server.
    pub activation_token: String,
}

/// Organization context for accounts that have never held their own keys
/// ("unprivatized" members).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct UnprivatizationContext {
    pub organization_name: String,
    pub admin_email: String,
}
