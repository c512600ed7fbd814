//! Chunked AEAD framing for encrypted objects
//!
//! Objects are stored as a small header followed by fixed-size encrypted
//! chunks. Each chunk is sealed with AES-256-GCM using a per-object random
//! nonce prefix combined with the chunk index, and carries its index as
//! associated data so chunks cannot be reordered or substituted.
//!
//! Physical layout:
//!
//! ```text
//! header:  magic (4) | version (1) | chunk_size LE (4) | nonce prefix (8)
//! chunk i: ciphertext (<= chunk_size) | GCM tag (16)
//! ```
//!
//! Every chunk except the last holds exactly `chunk_size` plaintext bytes,
//! which makes the mapping between logical plaintext offsets and physical
//! ciphertext offsets a pure function of the sealed length. A ranged read
//! therefore only needs the header and the chunks covering the range.
//! Empty plaintext is sealed as a single empty chunk so that every stored
//! object is authenticated.

use crate::{
    keys::{EncryptionKey, NONCE_SIZE},
    CryptoError, Result,
};
use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use rand::rngs::OsRng;

/// Frame format magic bytes
pub const MAGIC: [u8; 4] = *b"OBKT";

/// Current frame format version
pub const FRAME_VERSION: u8 = 1;

/// Length of the per-object frame header in bytes
pub const HEADER_SIZE: usize = 17;

/// AES-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Length of the per-object random nonce prefix in bytes
pub const NONCE_PREFIX_SIZE: usize = 8;

/// Default plaintext chunk size: 64 KiB
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Per-object frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    chunk_size: u32,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl FrameHeader {
    /// Create a header with a freshly generated random nonce prefix.
    pub fn generate(chunk_size: u32) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CryptoError::MalformedFrame(
                "chunk size must be non-zero".to_string(),
            ));
        }
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce_prefix);
        Ok(Self {
            chunk_size,
            nonce_prefix,
        })
    }

    /// Encode the header into its wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&MAGIC);
        buf[4] = FRAME_VERSION;
        buf[5..9].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[9..].copy_from_slice(&self.nonce_prefix);
        buf
    }

    /// Decode a header from the start of a framed object.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CryptoError::MalformedFrame(format!(
                "header truncated: {} bytes",
                bytes.len()
            )));
        }
        if bytes[..4] != MAGIC {
            return Err(CryptoError::MalformedFrame("bad magic".to_string()));
        }
        if bytes[4] != FRAME_VERSION {
            return Err(CryptoError::MalformedFrame(format!(
                "unsupported frame version {}",
                bytes[4]
            )));
        }
        let mut chunk_size_bytes = [0u8; 4];
        chunk_size_bytes.copy_from_slice(&bytes[5..9]);
        let chunk_size = u32::from_le_bytes(chunk_size_bytes);
        if chunk_size == 0 {
            return Err(CryptoError::MalformedFrame(
                "chunk size must be non-zero".to_string(),
            ));
        }
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&bytes[9..HEADER_SIZE]);
        Ok(Self {
            chunk_size,
            nonce_prefix,
        })
    }

    /// Plaintext chunk size for this object.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Layout math for this object.
    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            chunk_size: self.chunk_size,
        }
    }

    fn chunk_nonce(&self, index: u32) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_le_bytes());
        nonce
    }
}

/// Pure offset arithmetic over the framed layout.
///
/// All functions are deterministic given the chunk size, so range requests
/// can be translated without touching the ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    chunk_size: u32,
}

impl FrameLayout {
    /// Create a layout for the given plaintext chunk size.
    pub fn new(chunk_size: u32) -> Self {
        Self { chunk_size }
    }

    fn sealed_chunk_size(&self) -> u64 {
        self.chunk_size as u64 + TAG_SIZE as u64
    }

    /// Number of chunks an object of `plaintext_len` bytes occupies.
    ///
    /// Always at least one: empty plaintext is stored as one empty chunk.
    pub fn chunk_count(&self, plaintext_len: u64) -> u64 {
        if plaintext_len == 0 {
            return 1;
        }
        plaintext_len.div_ceil(self.chunk_size as u64)
    }

    /// Total sealed size (header included) for an object of `plaintext_len` bytes.
    pub fn sealed_size(&self, plaintext_len: u64) -> u64 {
        HEADER_SIZE as u64 + plaintext_len + self.chunk_count(plaintext_len) * TAG_SIZE as u64
    }

    /// Recover the plaintext size from the total sealed size.
    pub fn plaintext_size(&self, sealed_len: u64) -> Result<u64> {
        let body = sealed_len
            .checked_sub(HEADER_SIZE as u64)
            .ok_or_else(|| CryptoError::MalformedFrame("sealed object too short".to_string()))?;
        if body < TAG_SIZE as u64 {
            return Err(CryptoError::MalformedFrame(
                "sealed body shorter than one tag".to_string(),
            ));
        }
        let chunks = body.div_ceil(self.sealed_chunk_size());
        let plaintext = body - chunks * TAG_SIZE as u64;
        if self.sealed_size(plaintext) != sealed_len {
            return Err(CryptoError::MalformedFrame(format!(
                "sealed size {} does not match chunk geometry",
                sealed_len
            )));
        }
        Ok(plaintext)
    }

    /// Inclusive range of chunk indices covering the plaintext byte range.
    pub fn chunks_for_range(&self, offset: u64, length: u64, plaintext_len: u64) -> (u64, u64) {
        let chunk_size = self.chunk_size as u64;
        let first = offset / chunk_size;
        let end = (offset + length).max(offset + 1) - 1;
        let last = (end / chunk_size).min(self.chunk_count(plaintext_len) - 1);
        (first, last.max(first))
    }

    /// Physical offset (header included) of the given chunk index.
    pub fn chunk_offset(&self, index: u64) -> u64 {
        HEADER_SIZE as u64 + index * self.sealed_chunk_size()
    }

    /// Plaintext bytes held by chunks before `index`.
    pub fn plaintext_offset(&self, index: u64) -> u64 {
        index * self.chunk_size as u64
    }
}

/// Seals plaintext chunks into framed ciphertext.
///
/// Each sealer generates a fresh random nonce prefix, so sealing the same
/// plaintext twice under one key never reuses a nonce and never produces
/// the same ciphertext.
pub struct FrameSealer {
    cipher: Aes256Gcm,
    header: FrameHeader,
    next_index: u32,
}

impl FrameSealer {
    /// Create a sealer with the default chunk size.
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        Self::with_chunk_size(key, DEFAULT_CHUNK_SIZE)
    }

    /// Create a sealer with an explicit chunk size.
    pub fn with_chunk_size(key: &EncryptionKey, chunk_size: u32) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher,
            header: FrameHeader::generate(chunk_size)?,
            next_index: 0,
        })
    }

    /// The header this sealer writes at the start of the object.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Seal the next plaintext chunk in sequence.
    ///
    /// `plaintext` must be exactly `chunk_size` bytes for every chunk
    /// except the last.
    pub fn seal_chunk(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > self.header.chunk_size() as usize {
            return Err(CryptoError::Encryption(format!(
                "chunk of {} bytes exceeds chunk size {}",
                plaintext.len(),
                self.header.chunk_size()
            )));
        }
        let index = self.next_index;
        self.next_index = index
            .checked_add(1)
            .ok_or_else(|| CryptoError::Encryption("chunk index overflow".to_string()))?;
        let nonce = self.header.chunk_nonce(index);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &index.to_le_bytes(),
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Seal a whole object in one call: header followed by all chunks.
    pub fn seal_object(key: &EncryptionKey, chunk_size: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut sealer = Self::with_chunk_size(key, chunk_size)?;
        let mut out = Vec::with_capacity(
            sealer.header.layout().sealed_size(plaintext.len() as u64) as usize,
        );
        out.extend_from_slice(&sealer.header.encode());
        if plaintext.is_empty() {
            out.extend_from_slice(&sealer.seal_chunk(&[])?);
            return Ok(out);
        }
        for chunk in plaintext.chunks(chunk_size as usize) {
            out.extend_from_slice(&sealer.seal_chunk(chunk)?);
        }
        Ok(out)
    }
}

/// Opens framed ciphertext chunks sealed by [`FrameSealer`].
pub struct FrameOpener {
    cipher: Aes256Gcm,
    header: FrameHeader,
}

impl FrameOpener {
    /// Create an opener from the object's header bytes.
    pub fn new(key: &EncryptionKey, header_bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(header_bytes)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher, header })
    }

    /// The decoded object header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Open one sealed chunk at the given index.
    pub fn open_chunk(&self, index: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let index = u32::try_from(index)
            .map_err(|_| CryptoError::MalformedFrame("chunk index overflow".to_string()))?;
        let nonce = self.header.chunk_nonce(index);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &index.to_le_bytes(),
                },
            )
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    /// Open consecutive sealed chunks starting at `first_index`.
    pub fn open_chunks(&self, first_index: u64, sealed: &[u8]) -> Result<Vec<u8>> {
        let layout = self.header.layout();
        let sealed_chunk = layout.sealed_chunk_size() as usize;
        let mut out = Vec::with_capacity(sealed.len());
        for (i, chunk) in sealed.chunks(sealed_chunk).enumerate() {
            if chunk.len() < TAG_SIZE {
                return Err(CryptoError::MalformedFrame(
                    "sealed chunk shorter than tag".to_string(),
                ));
            }
            out.extend_from_slice(&self.open_chunk(first_index + i as u64, chunk)?);
        }
        Ok(out)
    }

    /// Open a whole framed object (header included) in one call.
    pub fn open_object(key: &EncryptionKey, framed: &[u8]) -> Result<Vec<u8>> {
        let opener = Self::new(key, framed)?;
        opener.open_chunks(0, &framed[HEADER_SIZE..])
    }
}
