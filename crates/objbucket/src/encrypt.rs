//! Encryption decorator.
//!
//! Seals uploads with the chunked AEAD framing from `objbucket-crypto` and
//! transparently unseals reads. Ranged reads are translated to the physical
//! ciphertext range covering the requested chunks, so a small range never
//! downloads or decrypts the whole object. Reported attributes carry the
//! logical (plaintext) size.

use async_trait::async_trait;
use bytes::Bytes;

use objbucket_crypto::{EncryptionKey, FrameOpener, FrameSealer, DEFAULT_CHUNK_SIZE, HEADER_SIZE};

use crate::bucket::{Bucket, ObjectAttributes, VisitAttrs};
use crate::error::{BucketError, Result};
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::ObjectStream;

/// A [`Bucket`] decorator storing all content encrypted.
///
/// The key is supplied by the caller and never persisted. Every upload
/// seals with fresh random nonce material, so uploading identical plaintext
/// twice produces different ciphertext.
pub struct EncryptedBucket<B> {
    inner: B,
    key: EncryptionKey,
    chunk_size: u32,
}

impl<B: Bucket> EncryptedBucket<B> {
    /// Wrap `inner`, sealing content with `key`.
    pub fn new(inner: B, key: EncryptionKey) -> Self {
        Self::with_chunk_size(inner, key, DEFAULT_CHUNK_SIZE)
    }

    /// Wrap `inner` with an explicit plaintext chunk size for new uploads.
    /// Reads honor the chunk size recorded in each object's header.
    pub fn with_chunk_size(inner: B, key: EncryptionKey, chunk_size: u32) -> Self {
        Self {
            inner,
            key,
            chunk_size,
        }
    }

    async fn opener_for(&self, name: &str) -> Result<FrameOpener> {
        let header = self
            .inner
            .get_range(name, 0, Some(HEADER_SIZE as u64))
            .await?
            .read_all()
            .await?;
        Ok(FrameOpener::new(&self.key, &header)?)
    }
}

#[async_trait]
impl<B: Bucket> Bucket for EncryptedBucket<B> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn supported_iter_options(&self) -> Vec<IterOptionType> {
        self.inner.supported_iter_options()
    }

    fn supported_upload_options(&self) -> Vec<UploadOptionType> {
        self.inner.supported_upload_options()
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        self.inner.iter_with_attributes(dir, visit, options).await
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        if length == Some(0) {
            return Err(BucketError::InvalidArgument(
                "length must be positive".to_string(),
            ));
        }

        let sealed_size = self.inner.attributes(name).await?.size;
        let opener = self.opener_for(name).await?;
        let layout = opener.header().layout();
        let plain_size = layout.plaintext_size(sealed_size)?;

        if offset >= plain_size {
            return Ok(ObjectStream::empty());
        }
        let wanted = plain_size - offset;
        let wanted = match length {
            Some(length) => length.min(wanted),
            None => wanted,
        };

        let (first, last) = layout.chunks_for_range(offset, wanted, plain_size);
        let phys_start = layout.chunk_offset(first);
        let phys_end = layout.chunk_offset(last + 1).min(sealed_size);
        let sealed = self
            .inner
            .get_range(name, phys_start, Some(phys_end - phys_start))
            .await?
            .read_all()
            .await?;

        let plain = opener.open_chunks(first, &sealed)?;
        let skip = (offset - layout.plaintext_offset(first)) as usize;
        let end = (skip as u64 + wanted) as usize;
        Ok(ObjectStream::from_bytes(Bytes::from(plain).slice(skip..end)))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name).await
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        let attrs = self.inner.attributes(name).await?;
        // The header records the chunk size the object was sealed with,
        // which may differ from this decorator's configured one.
        let opener = self.opener_for(name).await?;
        let size = opener.header().layout().plaintext_size(attrs.size)?;
        Ok(ObjectAttributes { size, ..attrs })
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        let plaintext = stream.read_all().await?;
        let sealed = FrameSealer::seal_object(&self.key, self.chunk_size, &plaintext)?;
        self.inner
            .upload(name, ObjectStream::from_bytes(Bytes::from(sealed)), options)
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmem::InMemBucket;
    use std::sync::Arc;

    fn encrypted(chunk_size: u32) -> (Arc<InMemBucket>, EncryptedBucket<Arc<InMemBucket>>) {
        let backing = Arc::new(InMemBucket::new());
        let bucket =
            EncryptedBucket::with_chunk_size(backing.clone(), EncryptionKey::generate(), chunk_size);
        (backing, bucket)
    }

    async fn upload(bucket: &dyn Bucket, name: &str, content: &str) {
        bucket
            .upload(
                name,
                ObjectStream::from_bytes(Bytes::copy_from_slice(content.as_bytes())),
                &[],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_roundtrip_and_logical_size() {
        let (backing, bucket) = encrypted(DEFAULT_CHUNK_SIZE);
        upload(&bucket, "dir/obj1", "foo bar baz").await;

        let attrs = bucket.attributes("dir/obj1").await.unwrap();
        assert_eq!(attrs.size, 11);

        // The backing bucket holds framed ciphertext, not the plaintext.
        let raw = backing.raw_contents("dir/obj1").unwrap();
        assert!(raw.len() > 11);
        assert_ne!(&raw[..], b"foo bar baz");

        let content = bucket.get("dir/obj1").await.unwrap().read_all().await.unwrap();
        assert_eq!(content, b"foo bar baz");
    }

    #[tokio::test]
    async fn test_range_decode_matches_plain_semantics() {
        // A chunk size smaller than the payload forces multi-chunk framing.
        for chunk_size in [4u32, 5, 64, DEFAULT_CHUNK_SIZE] {
            let (_backing, bucket) = encrypted(chunk_size);
            upload(&bucket, "obj", "foo bar baz").await;

            let bar = bucket.get_range("obj", 4, Some(3)).await.unwrap();
            assert_eq!(bar.read_all().await.unwrap(), b"bar", "chunk_size={chunk_size}");

            let baz = bucket.get_range("obj", 8, Some(3)).await.unwrap();
            assert_eq!(baz.read_all().await.unwrap(), b"baz", "chunk_size={chunk_size}");

            let clamped = bucket.get_range("obj", 8, Some(100)).await.unwrap();
            assert_eq!(clamped.read_all().await.unwrap(), b"baz");

            let empty = bucket.get_range("obj", 100, None).await.unwrap();
            assert!(empty.read_all().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_nonce_reuse_across_uploads() {
        let (backing, bucket) = encrypted(DEFAULT_CHUNK_SIZE);

        upload(&bucket, "obj", "same plaintext").await;
        let first = backing.raw_contents("obj").unwrap();

        upload(&bucket, "obj", "same plaintext").await;
        let second = backing.raw_contents("obj").unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_missing_object_classifies_not_found() {
        let (_backing, bucket) = encrypted(DEFAULT_CHUNK_SIZE);
        let err = bucket.get_range("dir/nonexistent", 0, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_object_roundtrip() {
        let (_backing, bucket) = encrypted(DEFAULT_CHUNK_SIZE);
        upload(&bucket, "empty", "").await;

        assert_eq!(bucket.attributes("empty").await.unwrap().size, 0);
        assert!(bucket.get("empty").await.unwrap().read_all().await.unwrap().is_empty());
    }
}
