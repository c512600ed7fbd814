//! Name-prefixing decorator.
//!
//! Confines every operation of a wrapped bucket to a sub-namespace. Names
//! are prefixed on the way in and stripped on the way out, so two prefixed
//! views with different prefixes over one backing bucket never observe each
//! other's objects.

use async_trait::async_trait;

use crate::bucket::{Bucket, ObjectAttributes, VisitAttrs, DIR_DELIM};
use crate::error::{BucketError, Result};
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::ObjectStream;

/// A [`Bucket`] view confined to a fixed name prefix.
pub struct PrefixedBucket<B> {
    inner: B,
    // Normalized to always end with the delimiter.
    prefix: String,
}

impl<B: Bucket> PrefixedBucket<B> {
    /// Wrap `inner`, confining all operations under `prefix`.
    ///
    /// Leading and trailing delimiters in `prefix` are ignored; an empty
    /// prefix is rejected since the view would be indistinguishable from
    /// the wrapped bucket.
    pub fn new(inner: B, prefix: &str) -> Result<Self> {
        let trimmed = prefix.trim_matches(DIR_DELIM);
        if trimmed.is_empty() {
            return Err(BucketError::InvalidArgument(
                "bucket prefix is empty".to_string(),
            ));
        }
        Ok(Self {
            inner,
            prefix: format!("{trimmed}{DIR_DELIM}"),
        })
    }

    /// The wrapped bucket.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn with_prefix(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn conditional_prefix(&self, dir: &str) -> String {
        if dir.is_empty() {
            self.prefix.clone()
        } else {
            self.with_prefix(dir)
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(&self.prefix).unwrap_or(name)
    }
}

#[async_trait]
impl<B: Bucket> Bucket for PrefixedBucket<B> {
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
        let dir = self.conditional_prefix(dir);
        self.inner
            .iter_with_attributes(
                &dir,
                &mut |attrs| visit(attrs.map_name(|name| self.strip_prefix(name).to_string())),
                options,
            )
            .await
    }

    async fn get(&self, name: &str) -> Result<ObjectStream> {
        self.inner.get(&self.with_prefix(name)).await
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        self.inner
            .get_range(&self.with_prefix(name), offset, length)
            .await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(&self.with_prefix(name)).await
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        self.inner.attributes(&self.with_prefix(name)).await
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        self.inner
            .upload(&self.with_prefix(name), stream, options)
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(&self.with_prefix(name)).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmem::InMemBucket;
    use bytes::Bytes;
    use std::sync::Arc;

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
    async fn test_prefix_applied_and_stripped() {
        let backing = Arc::new(InMemBucket::new());
        let prefixed = PrefixedBucket::new(backing.clone(), "tenant-a").unwrap();

        upload(&prefixed, "dir/obj", "payload").await;
        assert!(backing.exists("tenant-a/dir/obj").await.unwrap());

        let mut seen = Vec::new();
        prefixed
            .iter("", &mut |name| {
                seen.push(name.to_string());
                Ok(())
            }, &[])
            .await
            .unwrap();
        assert_eq!(seen, vec!["dir/"]);

        let content = prefixed.get("dir/obj").await.unwrap().read_all().await.unwrap();
        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn test_disjoint_views() {
        let backing = Arc::new(InMemBucket::new());
        let a = PrefixedBucket::new(backing.clone(), "a").unwrap();
        let b = PrefixedBucket::new(backing.clone(), "b").unwrap();

        upload(&a, "obj", "from a").await;
        assert!(!b.exists("obj").await.unwrap());
        assert!(b.get("obj").await.unwrap_err().is_not_found());

        upload(&b, "obj", "from b").await;
        let mut seen = Vec::new();
        b.iter("", &mut |name| {
            seen.push(name.to_string());
            Ok(())
        }, &[IterOption::recursive()])
            .await
            .unwrap();
        assert_eq!(seen, vec!["obj"]);
    }

    #[tokio::test]
    async fn test_empty_prefix_rejected() {
        assert!(PrefixedBucket::new(InMemBucket::new(), "//").is_err());
    }

    #[tokio::test]
    async fn test_prefix_normalization() {
        let backing = Arc::new(InMemBucket::new());
        let prefixed = PrefixedBucket::new(backing.clone(), "/deep/path/").unwrap();
        upload(&prefixed, "obj", "x").await;
        assert!(backing.exists("deep/path/obj").await.unwrap());
    }
}
