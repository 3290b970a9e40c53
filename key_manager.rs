//! Password-based key derivation and verification.
//!
//! This module turns a [`Credential`] plus a per-file salt into a 16-byte
//! AES-128 [`DerivedKey`], and a key into the SHA-256 verifier stored in
//! container headers.
//!
//! ## Parameters
//!
//! - scrypt with N = 2^14, r = 8, p = 1 and a 16-byte output
//! - 8-byte salt from `OsRng`
//! - verifier = SHA-256(key)
//!
//! The parameters are part of the container format and must not change.

use crate::error::LockError;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 16;
pub const SALT_LEN: usize = 8;
pub const VERIFIER_LEN: usize = 32;

const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// A registered password. Never logged and wiped on drop.
#[derive(Clone)]
pub struct Credential {
    bytes: Vec<u8>,
}

impl Credential {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// Builds a credential from an OS string, which must be valid Unicode so
    /// that the same password yields the same bytes on every platform.
    pub fn from_os_str(value: &OsStr) -> Result<Self, LockError> {
        value.to_str().map(Self::from).ok_or_else(|| {
            LockError::InvalidPasswordType("password is not valid unicode".to_string())
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&[u8]> for Credential {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for Credential {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").finish_non_exhaustive()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// AES-128 key derived from a credential and a salt.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Fresh material for a new container.
#[derive(Debug)]
pub struct CredentialHeader {
    pub key: DerivedKey,
    pub salt: [u8; SALT_LEN],
    pub verifier: [u8; VERIFIER_LEN],
}

/// Runs scrypt over (password, salt). Deterministic for a given pair.
pub fn derive(credential: &Credential, salt: &[u8; SALT_LEN]) -> Result<DerivedKey, LockError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| LockError::crypto(format!("invalid scrypt parameters: {e}")))?;

    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(credential.as_bytes(), salt, &params, &mut key)
        .map_err(|e| LockError::crypto(format!("scrypt failed: {e}")))?;
    Ok(DerivedKey::from_bytes(key))
}

pub fn verifier_of(key: &DerivedKey) -> [u8; VERIFIER_LEN] {
    Sha256::digest(key.as_bytes()).into()
}

pub fn create_credential_header(credential: &Credential) -> Result<CredentialHeader, LockError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let key = derive(credential, &salt)?;
    let verifier = verifier_of(&key);
    Ok(CredentialHeader {
        key,
        salt,
        verifier,
    })
}

/// [`derive`] on the blocking pool; scrypt holds ~16 MiB and a core for a while.
pub async fn derive_blocking(
    credential: Credential,
    salt: [u8; SALT_LEN],
) -> Result<DerivedKey, LockError> {
    tokio::task::spawn_blocking(move || derive(&credential, &salt))
        .await
        .map_err(|e| LockError::crypto(format!("key derivation task failed: {e}")))?
}

pub async fn create_credential_header_blocking(
    credential: Credential,
) -> Result<CredentialHeader, LockError> {
    tokio::task::spawn_blocking(move || create_credential_header(&credential))
        .await
        .map_err(|e| LockError::crypto(format!("key derivation task failed: {e}")))?
}
