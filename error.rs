use thiserror::Error;

/// Error types for lockstream operations
#[derive(Debug, Error)]
pub enum LockError {
    /// Password cannot be represented as a byte sequence
    #[error("Invalid password type: {0}")]
    InvalidPasswordType(String),

    /// Container has no bytes at all
    #[error("Empty file: {0}")]
    EmptyFile(String),

    /// Container is shorter than the fixed header
    #[error("File too small: {path} has {len} bytes")]
    FileTooSmall { path: String, len: usize },

    /// No registered credential opens the container
    #[error("Invalid password for {0}")]
    InvalidPassword(String),

    /// Path missing at resolution or serving time
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cipher failures (bad padding, misaligned ciphertext, KDF errors)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Other file and stream I/O errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LockError {
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// True for failures that only mean "this file is not one of ours".
    pub fn is_unrecognized_container(&self) -> bool {
        matches!(
            self,
            Self::EmptyFile(_) | Self::FileTooSmall { .. } | Self::InvalidPassword(_)
        )
    }
}

impl From<std::io::Error> for LockError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Storage(err.to_string()),
        }
    }
}
