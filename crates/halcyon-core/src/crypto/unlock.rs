use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    api::{KeySalt, User},
    crypto::{KeyPassword, KeyUnlockService, UnlockError, UnlockedKeys},
};

/// Passphrase derivation cost. Bumping this is a server-coordinated change;
/// existing accounts are rehashed through the credential upgrade endpoint.
const PBKDF2_ITERATIONS: u32 = 600_000;

const NONCE_LEN: usize = 12;
const ENVELOPE_INFO: &[u8] = b"halcyon-key-envelope";

/// Production [`KeyUnlockService`]: PBKDF2-SHA256 passphrase derivation,
/// HKDF-SHA256 expansion, AES-256-GCM envelope decryption.
#[derive(Default)]
pub struct StandardKeyUnlock;

#[async_trait::async_trait]
impl KeyUnlockService for StandardKeyUnlock {
    async fn derive_and_decrypt(
        &self,
        user: &User,
        salts: &[KeySalt],
        raw_password: &str,
    ) -> Result<UnlockedKeys, UnlockError> {
        let primary = user.primary_key().ok_or(UnlockError::MissingPrimaryKey)?;

        // Keys predating salted passphrases have no salt entry; they derive
        // from the password alone.
        let salt = salts
            .iter()
            .find(|s| s.key_id == primary.id)
            .and_then(|s| s.key_salt.as_deref());

        let key_password = derive_key_password(raw_password, salt)?;
        let primary_key = open_envelope(&primary.private_key, key_password.as_str())
            .map_err(|_| UnlockError::WrongPassword)?;

        Ok(UnlockedKeys {
            primary_key,
            key_password,
        })
    }
}

fn derive_key_password(raw_password: &str, salt: Option<&str>) -> Result<KeyPassword, UnlockError> {
    let salt_bytes = match salt {
        Some(salt) => STANDARD
            .decode(salt)
            .map_err(|_| UnlockError::InvalidEnvelope)?,
        None => Vec::new(),
    };

    let mut derived = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(
        raw_password.as_bytes(),
        &salt_bytes,
        PBKDF2_ITERATIONS,
        derived.as_mut(),
    );
    Ok(KeyPassword::new(STANDARD.encode(derived.as_ref())))
}

fn envelope_key(passphrase: &str) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, passphrase.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(ENVELOPE_INFO, &mut key)
        .unwrap_or_else(|_| unreachable!("32 bytes is a valid HKDF-SHA256 output length"));
    key
}

fn open_envelope(envelope: &str, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, UnlockError> {
    let bytes = STANDARD
        .decode(envelope)
        .map_err(|_| UnlockError::InvalidEnvelope)?;
    if bytes.len() <= NONCE_LEN {
        return Err(UnlockError::InvalidEnvelope);
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new((&envelope_key(passphrase)).into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| UnlockError::WrongPassword)?;
    Ok(Zeroizing::new(plaintext))
}

fn seal_envelope(plaintext: &[u8], passphrase: &str) -> String {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new((&envelope_key(passphrase)).into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .unwrap_or_else(|_| unreachable!("AES-GCM encryption is infallible for in-memory buffers"));

    let mut envelope = nonce.to_vec();
    envelope.extend_from_slice(&ciphertext);
    STANDARD.encode(envelope)
}

/// Encrypts a small secret (e.g. a device secret) under a passphrase.
pub fn encrypt_with_passphrase(plaintext: &str, passphrase: &str) -> String {
    seal_envelope(plaintext.as_bytes(), passphrase)
}

/// Decrypts a secret sealed by [`encrypt_with_passphrase`]. A decryption
/// failure means the passphrase (or the envelope) does not match.
pub fn decrypt_with_passphrase(envelope: &str, passphrase: &str) -> Result<String, UnlockError> {
    let plaintext = open_envelope(envelope, passphrase)?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| UnlockError::InvalidEnvelope)
}

/// A fresh random device secret for a new trusted device record.
pub fn generate_device_secret() -> String {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    STANDARD.encode(secret)
}

/// Digest proof sent with `auth` and credential-upgrade calls. The platform's
/// SRP exchange is terminated at the API gateway; clients only supply this
/// binding of the password to the server nonce.
pub fn compute_credential_proof(server_nonce: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_nonce.as_bytes());
    hasher.update(b"\0");
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}
