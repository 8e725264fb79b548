//! Key-unlock crypto.
//!
//! The one thing this module owes the rest of the SDK: given a password and
//! the account's key salts, produce the key passphrase and the decrypted
//! primary key. Key-pair generation and the inner format of key envelopes are
//! out of scope.

mod unlock;

pub use unlock::{
    compute_credential_proof, decrypt_with_passphrase, encrypt_with_passphrase,
    generate_device_secret, StandardKeyUnlock,
};

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::api::{KeySalt, User};

/// Failures of the key-unlock service.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// The password did not decrypt the key material.
    #[error("Wrong password")]
    WrongPassword,
    /// The account has no key to unlock.
    #[error("The account has no primary key")]
    MissingPrimaryKey,
    /// A key envelope or salt could not be decoded.
    #[error("Malformed key envelope")]
    InvalidEnvelope,
}

/// The symmetric passphrase derived from a user password; decrypts the
/// account's primary key. Zeroized on drop, redacted in debug output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyPassword(String);

impl KeyPassword {
    /// Wraps an already-derived passphrase (e.g. one recovered from a trusted
    /// device record).
    pub fn new(value: String) -> Self {
        Self(value)
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPassword(<redacted>)")
    }
}

/// Result of a successful unlock.
pub struct UnlockedKeys {
    /// The decrypted primary private key.
    pub primary_key: Zeroizing<Vec<u8>>,
    /// The passphrase the key was decrypted with; persisted into the session
    /// so the key can be re-opened without the password.
    pub key_password: KeyPassword,
}

impl fmt::Debug for UnlockedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockedKeys(<redacted>)")
    }
}

/// Derives the key passphrase from a raw password and decrypts the primary
/// key. Injected so tests can substitute a deterministic implementation.
#[async_trait::async_trait]
pub trait KeyUnlockService: Send + Sync {
    #[allow(missing_docs)]
    async fn derive_and_decrypt(
        &self,
        user: &User,
        salts: &[KeySalt],
        raw_password: &str,
    ) -> Result<UnlockedKeys, UnlockError>;
}
