//! # lockstream - Password-Resolved Streaming File Encryption
//!
//! lockstream encrypts files into self-describing containers, works out
//! which of a set of registered passwords opens an arbitrary container by
//! looking only at its header, and streams decrypted bytes straight into an
//! HTTP response.
//!
//! ## Features
//!
//! - **scrypt + SHA-256 verifier**: password checks without storing keys
//! - **Streaming API**: containers are never fully buffered in memory
//! - **Credential registry**: first registered password that matches wins
//! - **Content server**: `GET /src?path=...` serves decrypted or raw bytes
//!
//! ## Quick Start
//!
//! ```no_run
//! use lockstream::{CipherRegistry, Credential, StreamCipherPipeline, StreamSession};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = StreamCipherPipeline::default();
//!     let session = StreamSession::new();
//!     pipeline
//!         .encrypt(Path::new("photo.jpg"), Path::new("photo.jpg.lock"), &Credential::from("pw"), &session)
//!         .await?;
//!
//!     let registry = CipherRegistry::new();
//!     registry.register("pw");
//!     let hit = registry.resolve(Path::new("photo.jpg.lock")).await;
//!
//!     let mut out = Vec::new();
//!     pipeline
//!         .decrypt_to_sink(Path::new("photo.jpg.lock"), &mut out, hit.as_ref().map(|r| &r.key), &session)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Container Format
//!
//! `[salt:8][verifier:32][padding_marker:1][AES-128-ECB ciphertext]`
//!
//! The ciphertext is not authenticated and ECB leaks repeated blocks. The
//! format is kept as-is for compatibility with existing containers.

pub mod config;
pub mod error;
pub mod header;
pub mod key_manager;
pub mod registry;
pub mod server;
pub mod sizing;
pub mod streaming;

// Re-export common types for convenience
pub use error::LockError;
pub use key_manager::{Credential, DerivedKey};
pub use registry::{CipherRegistry, Resolution};
pub use streaming::{StreamCipherPipeline, StreamSession};
