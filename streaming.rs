//! Streaming encryption and decryption of containers.
//!
//! This module provides [`StreamCipherPipeline`] for moving files through
//! AES-128 without loading them entirely into memory, and [`StreamSession`]
//! for observing progress while an operation runs.
//!
//! ## Container Format
//!
//! ```text
//! [header:41][block1:16][block2:16]...[pad_block:16]
//! ```
//!
//! Blocks are encrypted independently (ECB) with PKCS#7 padding. Equal
//! plaintext blocks produce equal ciphertext blocks, and nothing
//! authenticates the ciphertext; the header verifier only proves which
//! password was used.
//!
//! ## Flow Control
//!
//! Every chunk is written with `write_all` before the next read is issued,
//! so a sink that stops accepting bytes also stops the reader.

use crate::error::LockError;
use crate::header::{read_header, write_header, HEADER_LEN};
use crate::key_manager::{create_credential_header_blocking, Credential, DerivedKey};
use crate::sizing::{padded_size, padding_marker, plaintext_size};
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Default read size for streaming (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const BLOCK: usize = crate::sizing::BLOCK_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Incremental ECB transform with PKCS#7 padding.
///
/// Input may arrive in arbitrary slices; output is always whole blocks.
/// Decryption holds back the last complete block until [`finish`] so the
/// padding can be stripped.
///
/// [`finish`]: BlockTransform::finish
pub struct BlockTransform {
    cipher: Aes128,
    direction: Direction,
    pending: Vec<u8>,
}

impl BlockTransform {
    pub fn new(key: &DerivedKey, direction: Direction) -> Self {
        Self {
            cipher: Aes128::new(key.as_bytes().into()),
            direction,
            pending: Vec::with_capacity(BLOCK * 2),
        }
    }

    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let ready = match self.direction {
            Direction::Encrypt => self.pending.len() / BLOCK * BLOCK,
            Direction::Decrypt if self.pending.is_empty() => 0,
            Direction::Decrypt => (self.pending.len() - 1) / BLOCK * BLOCK,
        };
        if ready == 0 {
            return;
        }

        for chunk in self.pending[..ready].chunks_exact(BLOCK) {
            let mut block = Block::clone_from_slice(chunk);
            self.apply(&mut block);
            out.extend_from_slice(&block);
        }
        self.pending.drain(..ready);
    }

    /// Emits the final block: padding on encrypt, padding removal on decrypt.
    pub fn finish(mut self, out: &mut Vec<u8>) -> Result<(), LockError> {
        match self.direction {
            Direction::Encrypt => {
                let pad = BLOCK - self.pending.len();
                self.pending.resize(BLOCK, pad as u8);
                let mut block = Block::clone_from_slice(&self.pending);
                self.cipher.encrypt_block(&mut block);
                out.extend_from_slice(&block);
            }
            Direction::Decrypt => {
                if self.pending.len() != BLOCK {
                    return Err(LockError::crypto(format!(
                        "ciphertext ends with {} bytes, expected one full block",
                        self.pending.len()
                    )));
                }
                let mut block = Block::clone_from_slice(&self.pending);
                self.cipher.decrypt_block(&mut block);

                let pad = block[BLOCK - 1] as usize;
                if pad == 0 || pad > BLOCK || block[BLOCK - pad..].iter().any(|b| *b as usize != pad) {
                    return Err(LockError::crypto("bad padding in final block"));
                }
                out.extend_from_slice(&block[..BLOCK - pad]);
            }
        }
        Ok(())
    }

    fn apply(&self, block: &mut Block) {
        match self.direction {
            Direction::Encrypt => self.cipher.encrypt_block(block),
            Direction::Decrypt => self.cipher.decrypt_block(block),
        }
    }
}

/// Per-operation progress shared with observers.
#[derive(Debug, Default)]
pub struct StreamSession {
    bytes_processed: AtomicU64,
    expected_size: AtomicU64,
    complete: AtomicBool,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size.load(Ordering::Relaxed)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Progress in `[0, 1]`; an operation with nothing to do counts as done.
    pub fn fraction(&self) -> f64 {
        let expected = self.expected_size();
        if expected == 0 {
            return if self.is_complete() { 1.0 } else { 0.0 };
        }
        (self.bytes_processed() as f64 / expected as f64).min(1.0)
    }

    fn start(&self, expected: u64) {
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.expected_size.store(expected, Ordering::Relaxed);
        self.complete.store(false, Ordering::Release);
    }

    fn advance(&self, n: usize) {
        self.bytes_processed.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.complete.store(true, Ordering::Release);
    }
}

/// Chunked AES-128 pipeline between files and arbitrary [`AsyncWrite`] sinks.
#[derive(Debug, Clone)]
pub struct StreamCipherPipeline {
    chunk_size: usize,
}

impl Default for StreamCipherPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl StreamCipherPipeline {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypts `src` into a new container at `dst`.
    /// Returns the number of ciphertext bytes written after the header.
    pub async fn encrypt(
        &self,
        src: &Path,
        dst: &Path,
        credential: &Credential,
        session: &StreamSession,
    ) -> Result<u64, LockError> {
        let plaintext_len = fs::metadata(src).await?.len();
        debug!(src = %src.display(), dst = %dst.display(), plaintext_len, "encrypting file");

        let mut input = fs::File::open(src).await?;
        let mut output = fs::File::create(dst).await?;
        let written = self
            .encrypt_stream(&mut input, &mut output, credential, plaintext_len, session)
            .await?;

        info!(src = %src.display(), dst = %dst.display(), bytes = written, "file encrypted");
        Ok(written)
    }

    /// Writes a fresh header followed by the ciphertext of `reader`.
    ///
    /// `plaintext_len` must be the exact number of bytes `reader` yields; it
    /// determines the padding marker written before any ciphertext.
    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        credential: &Credential,
        plaintext_len: u64,
        session: &StreamSession,
    ) -> Result<u64, LockError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        session.start(padded_size(plaintext_len));

        let fresh = create_credential_header_blocking(credential.clone()).await?;
        write_header(
            writer,
            &fresh.salt,
            &fresh.verifier,
            padding_marker(plaintext_len),
        )
        .await?;

        let transform = BlockTransform::new(&fresh.key, Direction::Encrypt);
        self.pump(transform, reader, writer, session).await
    }

    /// Decrypts the container at `src` into `sink`.
    ///
    /// `key` comes from a prior successful resolution; `None` fails with
    /// [`LockError::InvalidPassword`]. A container whose length does not
    /// agree with its padding marker fails with [`LockError::Crypto`] before
    /// anything is written. Returns the plaintext byte count.
    pub async fn decrypt_to_sink<W>(
        &self,
        src: &Path,
        sink: &mut W,
        key: Option<&DerivedKey>,
        session: &StreamSession,
    ) -> Result<u64, LockError>
    where
        W: AsyncWrite + Unpin,
    {
        let key = key.ok_or_else(|| LockError::InvalidPassword(src.display().to_string()))?;

        let header = read_header(src).await?;
        let file_len = fs::metadata(src).await?.len();
        let expected = plaintext_size(file_len, header.padding_marker).ok_or_else(|| {
            LockError::crypto(format!(
                "{} has {} bytes, inconsistent with padding marker {}",
                src.display(),
                file_len,
                header.padding_marker
            ))
        })?;
        debug!(src = %src.display(), file_len, expected, "decrypting container");

        let mut input = fs::File::open(src).await?;
        input.seek(SeekFrom::Start(HEADER_LEN as u64)).await?;

        session.start(expected);
        let transform = BlockTransform::new(key, Direction::Decrypt);
        let written = self.pump(transform, &mut input, sink, session).await?;

        info!(src = %src.display(), bytes = written, "container decrypted");
        Ok(written)
    }

    pub async fn decrypt_to_file(
        &self,
        src: &Path,
        dst: &Path,
        key: Option<&DerivedKey>,
        session: &StreamSession,
    ) -> Result<u64, LockError> {
        let key = key.ok_or_else(|| LockError::InvalidPassword(src.display().to_string()))?;
        let mut output = fs::File::create(dst).await?;
        let result = self.decrypt_to_sink(src, &mut output, Some(key), session).await;
        if let Err(e) = &result {
            drop(output);
            warn!(dst = %dst.display(), error = %e, "decryption failed, removing partial output");
            fs::remove_file(dst).await.ok(); // Best effort, keep the original error
        }
        result
    }

    /// Decrypts ciphertext from a reader already positioned past the header.
    pub async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        key: &DerivedKey,
        session: &StreamSession,
    ) -> Result<u64, LockError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let transform = BlockTransform::new(key, Direction::Decrypt);
        self.pump(transform, reader, writer, session).await
    }

    async fn pump<R, W>(
        &self,
        mut transform: BlockTransform,
        reader: &mut R,
        writer: &mut W,
        session: &StreamSession,
    ) -> Result<u64, LockError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut out = Vec::with_capacity(self.chunk_size + BLOCK);
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            out.clear();
            transform.update(&buffer[..n], &mut out);
            if !out.is_empty() {
                // Suspends here until the sink has room.
                writer.write_all(&out).await?;
                session.advance(out.len());
                total += out.len() as u64;
            }
        }

        out.clear();
        transform.finish(&mut out)?;
        writer.write_all(&out).await?;
        session.advance(out.len());
        total += out.len() as u64;

        writer.flush().await?;
        session.finish();
        Ok(total)
    }
}
