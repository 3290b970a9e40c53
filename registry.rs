//! Ordered set of registered passwords and container resolution.
//!
//! [`CipherRegistry::resolve`] tries each credential in registration order
//! against a file's header and stops at the first verifier match, so the
//! earliest-registered password wins. Each attempt runs the KDF again; with a
//! handful of human-entered passwords this is acceptable.

use crate::error::LockError;
use crate::header::{read_header, Header};
use crate::key_manager::{derive_blocking, verifier_of, Credential, DerivedKey};
use crate::sizing::plaintext_size;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub index: usize,
    pub key: DerivedKey,
    pub plaintext_size: u64,
}

/// File state a cached resolution was made against.
#[derive(Debug, Clone)]
struct CacheEntry {
    modified: Option<SystemTime>,
    len: u64,
    resolution: Resolution,
}

/// Append-only credential list shared between requests.
#[derive(Debug, Default)]
pub struct CipherRegistry {
    entries: RwLock<Vec<Credential>>,
    cache: Option<Mutex<HashMap<PathBuf, CacheEntry>>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the last successful match per path. An entry is only used
    /// while the file's mtime and length are unchanged.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Mutex::new(HashMap::new()));
        self
    }

    /// Appends `credential` and returns its stable index.
    pub fn register(&self, credential: impl Into<Credential>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(credential.into());
        let index = entries.len() - 1;
        info!(index, "password registered");
        index
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the first registered password that opens the container at
    /// `path`. Missing files, unreadable headers and non-matching files all
    /// resolve to `None`.
    pub async fn resolve(&self, path: &Path) -> Option<Resolution> {
        let meta = match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat file for resolution");
                return None;
            }
        };
        let modified = meta.modified().ok();
        if let Some(hit) = self.cached(path, modified, meta.len()) {
            debug!(path = %path.display(), index = hit.index, "resolution cache hit");
            return Some(hit);
        }

        let candidates = self.entries.read().unwrap_or_else(|e| e.into_inner()).clone();
        for (index, credential) in candidates.into_iter().enumerate() {
            match self.try_credential(path, credential, meta.len()).await {
                Ok(Some((key, plaintext_size))) => {
                    debug!(path = %path.display(), index, plaintext_size, "container resolved");
                    let resolution = Resolution {
                        index,
                        key,
                        plaintext_size,
                    };
                    self.remember(path, modified, meta.len(), &resolution);
                    return Some(resolution);
                }
                Ok(None) => continue,
                Err(e) if e.is_unrecognized_container() => {
                    debug!(path = %path.display(), error = %e, "not a container");
                    return None;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "resolution aborted");
                    return None;
                }
            }
        }
        None
    }

    /// Like [`resolve`](Self::resolve) but reports why nothing matched.
    pub async fn require(&self, path: &Path) -> Result<Resolution, LockError> {
        if !fs::try_exists(path).await? {
            return Err(LockError::NotFound(path.display().to_string()));
        }
        // Surface header problems before falling back to a password error.
        read_header(path).await?;
        self.resolve(path)
            .await
            .ok_or_else(|| LockError::InvalidPassword(path.display().to_string()))
    }

    async fn try_credential(
        &self,
        path: &Path,
        credential: Credential,
        file_len: u64,
    ) -> Result<Option<(DerivedKey, u64)>, LockError> {
        // Headers are per file and candidates per password, so read it per attempt.
        let header: Header = read_header(path).await?;
        let key = derive_blocking(credential, header.salt).await?;
        if verifier_of(&key) != header.verifier {
            return Ok(None);
        }
        match plaintext_size(file_len, header.padding_marker) {
            Some(size) => Ok(Some((key, size))),
            None => {
                warn!(
                    path = %path.display(),
                    file_len,
                    marker = header.padding_marker,
                    "verifier matched but container size is inconsistent"
                );
                Ok(None)
            }
        }
    }

    fn cached(&self, path: &Path, modified: Option<SystemTime>, len: u64) -> Option<Resolution> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(path) {
            Some(entry) if entry.modified == modified && entry.len == len => {
                Some(entry.resolution.clone())
            }
            Some(_) => {
                debug!(path = %path.display(), "file changed, dropping cached resolution");
                cache.remove(path);
                None
            }
            None => None,
        }
    }

    fn remember(&self, path: &Path, modified: Option<SystemTime>, len: u64, resolution: &Resolution) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(
                path.to_path_buf(),
                CacheEntry {
                    modified,
                    len,
                    resolution: resolution.clone(),
                },
            );
        }
    }

    #[cfg(test)]
    fn cached_paths(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{StreamCipherPipeline, StreamSession};
    use tempfile::TempDir;

    async fn encrypted_file(dir: &TempDir, name: &str, data: &[u8], password: &str) -> PathBuf {
        let src = dir.path().join(format!("{name}.plain"));
        let dst = dir.path().join(name);
        std::fs::write(&src, data).expect("write plaintext");
        StreamCipherPipeline::default()
            .encrypt(&src, &dst, &Credential::from(password), &StreamSession::new())
            .await
            .expect("encrypt");
        dst
    }

    #[test]
    fn register_returns_sequential_indices() {
        let registry = CipherRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.register("a"), 0);
        assert_eq!(registry.register("b"), 1);
        assert_eq!(registry.register("a"), 2);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn resolves_matching_password_with_size() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "doc.bin", b"twenty-one bytes long", "right").await;

        let registry = CipherRegistry::new();
        registry.register("wrong");
        registry.register("right");

        let hit = registry.resolve(&path).await.expect("should resolve");
        assert_eq!(hit.index, 1);
        assert_eq!(hit.plaintext_size, 21);
    }

    #[tokio::test]
    async fn earliest_registration_wins() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "dup.bin", b"same", "shared").await;

        let registry = CipherRegistry::new();
        registry.register("shared");
        registry.register("shared");
        let hit = registry.resolve(&path).await.expect("should resolve");
        assert_eq!(hit.index, 0);
    }

    #[tokio::test]
    async fn unknown_files_resolve_to_none() {
        let tmp = TempDir::new().expect("tempdir");
        let registry = CipherRegistry::new();
        registry.register("pw");

        let plain = tmp.path().join("notes.txt");
        std::fs::write(&plain, b"short").expect("write");
        assert!(registry.resolve(&plain).await.is_none());
        assert!(registry.resolve(&tmp.path().join("missing")).await.is_none());
        assert!(registry.resolve(tmp.path()).await.is_none());

        let err = registry.require(&plain).await.unwrap_err();
        assert!(matches!(err, LockError::FileTooSmall { .. }));
        let err = registry.require(&tmp.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, LockError::NotFound(_)));
    }

    #[tokio::test]
    async fn require_reports_invalid_password() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "locked.bin", b"locked", "secret").await;
        let registry = CipherRegistry::new();
        registry.register("guess");
        let err = registry.require(&path).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidPassword(_)));
    }

    #[tokio::test]
    async fn cache_does_not_remember_misses() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "later.bin", b"registered later", "late").await;

        let registry = CipherRegistry::new().with_cache();
        registry.register("early");
        assert!(registry.resolve(&path).await.is_none());
        assert_eq!(registry.cached_paths(), 0);

        let late = registry.register("late");
        let hit = registry.resolve(&path).await.expect("later registration must be tried");
        assert_eq!(hit.index, late);
        assert_eq!(registry.cached_paths(), 1);
    }

    #[tokio::test]
    async fn cache_is_replaced_when_file_changes() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "swap.bin", b"first", "one").await;

        let registry = CipherRegistry::new().with_cache();
        registry.register("one");
        registry.register("two");
        let first = registry.resolve(&path).await.expect("first");
        assert_eq!(first.index, 0);
        assert_eq!(first.plaintext_size, 5);

        // A longer plaintext changes the container length, so the entry is stale.
        let replacement = encrypted_file(&tmp, "swap2.bin", b"second container, other password", "two").await;
        std::fs::rename(&replacement, &path).expect("replace");

        let second = registry.resolve(&path).await.expect("second");
        assert_eq!(second.index, 1);
        assert_eq!(second.plaintext_size, 32);
        assert_ne!(first.key, second.key);
        assert_eq!(registry.cached_paths(), 1);
    }

    #[tokio::test]
    async fn cache_returns_same_resolution() {
        let tmp = TempDir::new().expect("tempdir");
        let path = encrypted_file(&tmp, "cached.bin", b"cache me", "pw").await;

        let registry = CipherRegistry::new().with_cache();
        registry.register("pw");
        let first = registry.resolve(&path).await.expect("first");
        let second = registry.resolve(&path).await.expect("second");
        assert_eq!(first.index, second.index);
        assert_eq!(first.key, second.key);
        assert_eq!(second.plaintext_size, 8);
    }
}
