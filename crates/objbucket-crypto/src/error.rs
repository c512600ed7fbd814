//! Error types for the objbucket-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while sealing or opening framed ciphertext
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid key material
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption or authentication failed
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Ciphertext framing is malformed
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
