//! Directory transfer between a bucket and local disk.
//!
//! Transfers run through a bounded pool of concurrent object copies and can
//! be cancelled between and during individual transfers. A failed directory
//! download removes the partially written destination before returning.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bucket::{Bucket, DIR_DELIM};
use crate::error::{BucketError, Result};
use crate::options::IterOption;
use crate::stream::ObjectStream;

/// Settings shared by [`download_dir`] and [`upload_dir`].
#[derive(Clone)]
pub struct SyncOptions {
    /// How many objects transfer at once. Zero is treated as one.
    pub concurrency: usize,
    /// Cancels in-flight and pending transfers when triggered.
    pub cancel: CancellationToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }
}

impl SyncOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }
}

/// Download one object into the file at `dest`, creating parent directories.
pub async fn download_file(
    bucket: &dyn Bucket,
    name: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BucketError::Cancelled);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut object = bucket.get(name).await?;
    let mut file = fs::File::create(dest).await?;
    let copied: Result<u64> = tokio::select! {
        _ = cancel.cancelled() => Err(BucketError::Cancelled),
        copied = tokio::io::copy(&mut object, &mut file) => Ok(copied?),
    };
    match copied {
        Ok(bytes) => {
            file.flush().await?;
            debug!(object = name, bytes, "downloaded object");
            Ok(())
        }
        Err(err) => {
            drop(file);
            if let Err(remove_err) = fs::remove_file(dest).await {
                warn!(object = name, error = %remove_err, "failed to remove partial download");
            }
            Err(err)
        }
    }
}

/// Download every object under `src_dir` into `dest`, mirroring the name
/// hierarchy. If any transfer fails, `dest` is removed before returning the
/// first error.
pub async fn download_dir(
    bucket: &dyn Bucket,
    src_dir: &str,
    dest: &Path,
    options: &SyncOptions,
) -> Result<()> {
    let src_dir = normalize_dir(src_dir);
    let mut names: Vec<String> = Vec::new();
    bucket
        .iter(&src_dir, &mut |name| {
            if !name.ends_with(DIR_DELIM) {
                names.push(name.to_string());
            }
            Ok(())
        }, &[IterOption::recursive()])
        .await?;

    fs::create_dir_all(dest).await?;
    let total = names.len();
    let result = stream::iter(names)
        .map(Ok::<_, BucketError>)
        .try_for_each_concurrent(options.concurrency.max(1), |name| {
            let src_dir = &src_dir;
            async move {
                let rel = name.strip_prefix(src_dir.as_str()).unwrap_or(&name);
                let target = join_object_path(dest, rel);
                download_file(bucket, &name, &target, &options.cancel)
                    .await
                    .map_err(|err| err.context(format!("download object {name}")))
            }
        })
        .await;

    if let Err(err) = result {
        if let Err(cleanup_err) = fs::remove_dir_all(dest).await {
            warn!(dest = %dest.display(), error = %cleanup_err, "failed to remove partial download dir");
        }
        return Err(err);
    }
    debug!(src = %src_dir, dest = %dest.display(), objects = total, "downloaded directory");
    Ok(())
}

/// Upload one local file as the object `name`.
pub async fn upload_file(
    bucket: &dyn Bucket,
    src: &Path,
    name: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BucketError::Cancelled);
    }
    let file = fs::File::open(src).await?;
    let size = file.metadata().await?.len();
    let upload = bucket.upload(name, ObjectStream::seekable(file, Some(size)), &[]);
    tokio::select! {
        _ = cancel.cancelled() => Err(BucketError::Cancelled),
        result = upload => result,
    }?;
    debug!(object = name, bytes = size, "uploaded object");
    Ok(())
}

/// Upload every file under the local directory `src` as objects below
/// `dest_prefix`. Files already uploaded stay in place if a later transfer
/// fails.
pub async fn upload_dir(
    bucket: &dyn Bucket,
    src: &Path,
    dest_prefix: &str,
    options: &SyncOptions,
) -> Result<()> {
    let prefix = normalize_dir(dest_prefix);
    let files = collect_local_files(src).await?;
    let total = files.len();

    stream::iter(files)
        .map(Ok::<_, BucketError>)
        .try_for_each_concurrent(options.concurrency.max(1), |(path, rel)| {
            let prefix = &prefix;
            async move {
                let name = format!("{prefix}{rel}");
                upload_file(bucket, &path, &name, &options.cancel)
                    .await
                    .map_err(|err| err.context(format!("upload file {}", path.display())))
            }
        })
        .await?;

    debug!(src = %src.display(), prefix = %prefix, files = total, "uploaded directory");
    Ok(())
}

fn normalize_dir(dir: &str) -> String {
    if dir.is_empty() || dir.ends_with(DIR_DELIM) {
        dir.to_string()
    } else {
        format!("{dir}{DIR_DELIM}")
    }
}

/// Join an object name suffix onto a local path, one component per delimiter.
fn join_object_path(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in rel.split(DIR_DELIM).filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Files under `root`, paired with their delimiter-joined relative names.
async fn collect_local_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, rel)) = pending.pop() {
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() {
                file_name
            } else {
                format!("{rel}{DIR_DELIM}{file_name}")
            };
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), child_rel));
            } else if file_type.is_file() {
                files.push((entry.path(), child_rel));
            }
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{ObjectAttributes, VisitAttrs};
    use crate::inmem::InMemBucket;
    use crate::options::{IterOptionType, UploadOption, UploadOptionType};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn seed(bucket: &InMemBucket, name: &str, content: &str) {
        bucket
            .upload(
                name,
                ObjectStream::from_bytes(Bytes::copy_from_slice(content.as_bytes())),
                &[],
            )
            .await
            .unwrap();
    }

    /// Delegates everything but fails `get_range` for one object name.
    struct FailingBucket {
        inner: InMemBucket,
        fail_on: String,
    }

    #[async_trait]
    impl Bucket for FailingBucket {
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
            if name == self.fail_on {
                return Err(BucketError::Other("synthetic failure".to_string()));
            }
            self.inner.get_range(name, offset, length).await
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            self.inner.exists(name).await
        }

        async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
            self.inner.attributes(name).await
        }

        async fn upload(
            &self,
            name: &str,
            stream: ObjectStream,
            options: &[UploadOption],
        ) -> Result<()> {
            self.inner.upload(name, stream, options).await
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.inner.delete(name).await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_download_dir_mirrors_hierarchy() {
        let bucket = InMemBucket::new();
        seed(&bucket, "dir/obj1", "one").await;
        seed(&bucket, "dir/sub/obj2", "two").await;
        seed(&bucket, "other/obj3", "three").await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        download_dir(&bucket, "dir", &dest, &SyncOptions::with_concurrency(4))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest.join("obj1")).unwrap(), b"one");
        assert_eq!(std::fs::read(dest.join("sub/obj2")).unwrap(), b"two");
        assert!(!dest.join("obj3").exists());
    }

    #[tokio::test]
    async fn test_download_dir_cleans_up_on_failure() {
        let bucket = FailingBucket {
            inner: InMemBucket::new(),
            fail_on: "dir/obj3".to_string(),
        };
        seed(&bucket.inner, "dir/obj1", "one").await;
        seed(&bucket.inner, "dir/obj2", "two").await;
        seed(&bucket.inner, "dir/obj3", "three").await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let err = download_dir(&bucket, "dir", &dest, &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dir/obj3"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_dir_cancelled_before_start() {
        let bucket = InMemBucket::new();
        seed(&bucket, "dir/obj1", "one").await;

        let options = SyncOptions::default();
        options.cancel.cancel();

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let err = download_dir(&bucket, "dir", &dest, &options)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_upload_dir_roundtrip() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("obj1"), "one").unwrap();
        std::fs::write(tmp.path().join("sub/obj2"), "two").unwrap();

        let bucket = InMemBucket::new();
        upload_dir(&bucket, tmp.path(), "dst", &SyncOptions::with_concurrency(2))
            .await
            .unwrap();

        assert_eq!(
            bucket.get("dst/obj1").await.unwrap().read_all().await.unwrap(),
            b"one"
        );
        assert_eq!(
            bucket
                .get("dst/sub/obj2")
                .await
                .unwrap()
                .read_all()
                .await
                .unwrap(),
            b"two"
        );
    }

    #[tokio::test]
    async fn test_upload_dir_keeps_partial_progress() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("obj1"), "one").unwrap();

        let bucket = InMemBucket::new();
        upload_dir(&bucket, tmp.path(), "", &SyncOptions::default())
            .await
            .unwrap();
        assert!(bucket.exists("obj1").await.unwrap());
    }
}
