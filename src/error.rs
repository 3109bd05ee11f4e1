use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed input: {0}")]
    Format(String),

    /// AEAD tag mismatch: wrong password or key, or tampered data.
    #[error("authentication failed: wrong password/key or corrupted data")]
    AuthenticationFailure,

    #[error("decryption failed: bad padding (wrong password or corrupted data)")]
    PaddingFailure,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("OS random generator unavailable")]
    RandomUnavailable,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

impl VaultError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        VaultError::InvalidArgument(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        VaultError::Format(msg.into())
    }
}
