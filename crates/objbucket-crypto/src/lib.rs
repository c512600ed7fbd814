//! # objbucket-crypto
//!
//! AEAD framing primitives for objbucket's encrypted bucket decorator.
//!
//! This crate provides:
//! - **Key management**: a 32-byte symmetric [`EncryptionKey`], wiped on drop
//! - **Chunked framing**: AES-256-GCM over fixed-size plaintext chunks with
//!   per-object random nonce material
//! - **Range math**: deterministic translation between plaintext byte ranges
//!   and the ciphertext chunks that cover them
//!
//! The framing is chunked rather than a single AEAD pass over the whole
//! object so a ranged read can be served by decrypting only the chunks it
//! touches. See [`framing`] for the wire layout.

pub mod error;
pub mod framing;
pub mod keys;

pub use error::{CryptoError, Result};
pub use framing::{
    FrameHeader, FrameLayout, FrameOpener, FrameSealer, DEFAULT_CHUNK_SIZE, HEADER_SIZE, TAG_SIZE,
};
pub use keys::{EncryptionKey, KEY_SIZE, NONCE_SIZE};
