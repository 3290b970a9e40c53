//! Fixed 41-byte container header.
//!
//! ```text
//! [salt:8][verifier:32][padding_marker:1][ciphertext...]
//! ```
//!
//! The padding marker is `plaintext_len % 16`, written once at encryption time.

use crate::error::LockError;
use crate::key_manager::{SALT_LEN, VERIFIER_LEN};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = SALT_LEN + VERIFIER_LEN + 1;

const VERIFIER_OFFSET: usize = SALT_LEN;
const MARKER_OFFSET: usize = SALT_LEN + VERIFIER_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_LEN],
    pub verifier: [u8; VERIFIER_LEN],
    pub padding_marker: u8,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..VERIFIER_OFFSET].copy_from_slice(&self.salt);
        buf[VERIFIER_OFFSET..MARKER_OFFSET].copy_from_slice(&self.verifier);
        buf[MARKER_OFFSET] = self.padding_marker;
        buf
    }

    /// Parses the leading bytes of a container. `source` only names the
    /// container in error messages.
    pub fn from_bytes(data: &[u8], source: &str) -> Result<Self, LockError> {
        if data.is_empty() {
            return Err(LockError::EmptyFile(source.to_string()));
        }
        if data.len() < HEADER_LEN {
            return Err(LockError::FileTooSmall {
                path: source.to_string(),
                len: data.len(),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[..VERIFIER_OFFSET]);
        let mut verifier = [0u8; VERIFIER_LEN];
        verifier.copy_from_slice(&data[VERIFIER_OFFSET..MARKER_OFFSET]);

        Ok(Self {
            salt,
            verifier,
            padding_marker: data[MARKER_OFFSET],
        })
    }
}

/// Reads only the first [`HEADER_LEN`] bytes of `path`.
pub async fn read_header(path: &Path) -> Result<Header, LockError> {
    let file = fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut buf).await?;
    Header::from_bytes(&buf, &path.display().to_string())
}

pub async fn write_header<W>(
    writer: &mut W,
    salt: &[u8; SALT_LEN],
    verifier: &[u8; VERIFIER_LEN],
    padding_marker: u8,
) -> Result<(), LockError>
where
    W: AsyncWrite + Unpin,
{
    let header = Header {
        salt: *salt,
        verifier: *verifier,
        padding_marker,
    };
    writer.write_all(&header.to_bytes()).await?;
    Ok(())
}
