//! Ciphertext/plaintext length accounting for PKCS#7-padded AES blocks.
//!
//! A full 16-byte pad block is appended when the plaintext is already
//! block-aligned, so a padding marker of 0 means 16 pad bytes.

use crate::header::HEADER_LEN;

pub const BLOCK_SIZE: u64 = 16;

/// Ciphertext length for `plaintext_len` bytes of input.
pub fn padded_size(plaintext_len: u64) -> u64 {
    let pad_len = BLOCK_SIZE - plaintext_len % BLOCK_SIZE;
    plaintext_len + pad_len
}

/// On-disk length of a container holding `plaintext_len` bytes.
pub fn container_size(plaintext_len: u64) -> u64 {
    HEADER_LEN as u64 + padded_size(plaintext_len)
}

pub fn padding_marker(plaintext_len: u64) -> u8 {
    (plaintext_len % BLOCK_SIZE) as u8
}

/// Plaintext length recovered from a container's length and padding marker.
///
/// Returns `None` when the marker is out of range or the file cannot hold a
/// header plus the implied pad bytes.
pub fn plaintext_size(file_len: u64, padding_marker: u8) -> Option<u64> {
    let marker = u64::from(padding_marker);
    if marker >= BLOCK_SIZE {
        return None;
    }
    file_len
        .checked_sub(HEADER_LEN as u64)?
        .checked_sub(BLOCK_SIZE - marker)
}
