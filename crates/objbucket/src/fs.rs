//! Local-filesystem bucket.
//!
//! Objects are plain files under a root directory, with `/` in object names
//! mapping to subdirectories. Useful for tests and for running the full
//! stack against local disk without any remote provider.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::bucket::{
    Bucket, IterObjectAttributes, ObjectAttributes, VisitAttrs, DIR_DELIM,
};
use crate::error::{BucketError, Result};
use crate::options::{
    apply_iter_options, apply_upload_options, validate_iter_options, validate_upload_options,
    IterOption, IterOptionType, UploadOption, UploadOptionType,
};
use crate::stream::ObjectStream;

/// A [`Bucket`] backed by a directory on local disk.
pub struct FsBucket {
    root: PathBuf,
}

impl FsBucket {
    /// Open a bucket rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root directory objects are stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn open_validated(&self, name: &str) -> Result<fs::File> {
        let path = self.object_path(name)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BucketError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Depth-first walk emitting entries in lexical order, recursing into
    /// subdirectories in place when asked.
    fn walk<'a, 'b: 'a>(
        &'a self,
        rel: String,
        recursive: bool,
        want_mtime: bool,
        visit: &'a mut VisitAttrs<'b>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let abs = self.root.join(&rel);
            let mut read_dir = match fs::read_dir(&abs).await {
                Ok(read_dir) => read_dir,
                // A missing or concurrently removed directory yields nothing.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            let mut children: Vec<(String, bool, Option<DateTime<Utc>>)> = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    children.push((format!("{rel}{file_name}{DIR_DELIM}"), true, None));
                } else if file_type.is_file() {
                    let mtime = if want_mtime {
                        Some(DateTime::<Utc>::from(entry.metadata().await?.modified()?))
                    } else {
                        None
                    };
                    children.push((format!("{rel}{file_name}"), false, mtime));
                }
            }
            children.sort_by(|a, b| a.0.cmp(&b.0));

            for (name, is_dir, mtime) in children {
                if is_dir {
                    if recursive {
                        self.walk(name, recursive, want_mtime, &mut *visit).await?;
                    } else if dir_has_content(&self.root.join(&name)).await? {
                        // Empty directories are invisible, matching stores
                        // where directories only exist as name prefixes.
                        visit(IterObjectAttributes::new(name))?;
                    }
                    continue;
                }
                let attrs = match mtime {
                    Some(mtime) => IterObjectAttributes::with_last_modified(name, mtime),
                    None => IterObjectAttributes::new(name),
                };
                visit(attrs)?;
            }
            Ok(())
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BucketError::InvalidArgument(
            "object name is empty".to_string(),
        ));
    }
    if name.ends_with(DIR_DELIM) {
        return Err(BucketError::InvalidArgument(format!(
            "object name {name:?} ends with the directory delimiter"
        )));
    }
    let escapes = Path::new(name)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(BucketError::InvalidArgument(format!(
            "object name {name:?} escapes the bucket root"
        )));
    }
    Ok(())
}

async fn dir_has_content(path: &Path) -> Result<bool> {
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[async_trait]
impl Bucket for FsBucket {
    fn name(&self) -> String {
        format!("fs:{}", self.root.display())
    }

    fn supported_iter_options(&self) -> Vec<IterOptionType> {
        vec![IterOptionType::Recursive, IterOptionType::UpdatedAt]
    }

    fn supported_upload_options(&self) -> Vec<UploadOptionType> {
        vec![UploadOptionType::IfNotExists]
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        validate_iter_options(&self.name(), &self.supported_iter_options(), options)?;
        let params = apply_iter_options(options);
        let dir = if dir.is_empty() || dir.ends_with(DIR_DELIM) {
            dir.to_string()
        } else {
            format!("{dir}{DIR_DELIM}")
        };
        self.walk(dir, params.recursive, params.last_modified, visit)
            .await
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
        let mut file = self.open_validated(name).await?;
        let size = file.metadata().await?.len();
        if offset >= size {
            return Ok(ObjectStream::empty());
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        match length {
            Some(length) => {
                let remaining = length.min(size - offset);
                Ok(ObjectStream::plain(file.take(remaining), Some(remaining)))
            }
            None if offset == 0 => Ok(ObjectStream::seekable(file, Some(size))),
            None => Ok(ObjectStream::plain(file, Some(size - offset))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.object_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        let path = self.object_path(name)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BucketError::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(ObjectAttributes {
            size: meta.len(),
            last_modified: DateTime::<Utc>::from(meta.modified()?),
            version: None,
        })
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        validate_upload_options(&self.name(), &self.supported_upload_options(), options)?;
        let params = apply_upload_options(options)?;
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Stage into a swap file next to the target, then rename into
        // place. A mid-copy failure leaves the previous object untouched,
        // and the swap file doubles as an upload lock.
        let mut swap_name = path.clone().into_os_string();
        swap_name.push(".swap");
        let swap = PathBuf::from(swap_name);
        let mut swap_file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&swap)
            .await?;

        let result = async {
            if params.if_not_exists && fs::try_exists(&path).await? {
                return Err(BucketError::ConditionNotMet(format!(
                    "object {name} already exists"
                )));
            }
            let mut stream = stream;
            tokio::io::copy(&mut stream, &mut swap_file).await?;
            swap_file.flush().await?;
            // Atomic within the directory: readers see the old object or
            // the new one, never a partial write.
            fs::rename(&swap, &path).await?;
            Ok(())
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&swap).await;
        }
        result
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BucketError::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        }

        // Prune now-empty parent directories up to the root.
        let mut parent = path.parent().map(Path::to_path_buf);
        while let Some(dir) = parent {
            if dir == self.root || dir_has_content(&dir).await? {
                break;
            }
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            parent = dir.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn upload(bucket: &FsBucket, name: &str, content: &str) {
        bucket
            .upload(
                name,
                ObjectStream::from_bytes(Bytes::copy_from_slice(content.as_bytes())),
                &[],
            )
            .await
            .unwrap();
    }

    async fn names(bucket: &FsBucket, dir: &str, options: &[IterOption]) -> Vec<String> {
        let mut out = Vec::new();
        bucket
            .iter(dir, &mut |name| {
                out.push(name.to_string());
                Ok(())
            }, options)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_roundtrip_and_ranges() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        upload(&bucket, "dir/obj1", "foo bar baz").await;

        let all = bucket.get("dir/obj1").await.unwrap();
        assert!(all.capabilities().seek);
        assert_eq!(all.read_all().await.unwrap(), b"foo bar baz");

        let bar = bucket.get_range("dir/obj1", 4, Some(3)).await.unwrap();
        assert_eq!(bar.read_all().await.unwrap(), b"bar");

        let tail = bucket.get_range("dir/obj1", 8, None).await.unwrap();
        assert_eq!(tail.read_all().await.unwrap(), b"baz");

        let past_end = bucket.get_range("dir/obj1", 100, None).await.unwrap();
        assert!(past_end.read_all().await.unwrap().is_empty());

        let err = bucket.get_range("dir/obj1", 0, Some(0)).await.unwrap_err();
        assert!(matches!(err, BucketError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_iter_modes() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        upload(&bucket, "id1/obj_1", "one").await;
        upload(&bucket, "id1/sub/obj_2", "two").await;
        upload(&bucket, "id2/obj_3", "three").await;
        upload(&bucket, "obj_4", "four").await;

        assert_eq!(names(&bucket, "", &[]).await, vec!["id1/", "id2/", "obj_4"]);
        assert_eq!(
            names(&bucket, "", &[IterOption::recursive()]).await,
            vec!["id1/obj_1", "id1/sub/obj_2", "id2/obj_3", "obj_4"],
        );
        assert_eq!(names(&bucket, "id1", &[]).await, vec!["id1/obj_1", "id1/sub/"]);
    }

    #[tokio::test]
    async fn test_empty_dirs_skipped() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        tokio::fs::create_dir_all(tmp.path().join("hollow/inner"))
            .await
            .unwrap();
        upload(&bucket, "solid/obj", "x").await;

        assert_eq!(names(&bucket, "", &[]).await, vec!["solid/"]);
    }

    #[tokio::test]
    async fn test_conditional_upload_and_delete() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        upload(&bucket, "a/b/obj", "v1").await;

        let err = bucket
            .upload(
                "a/b/obj",
                ObjectStream::from_bytes(Bytes::from_static(b"v2")),
                &[UploadOption::if_not_exists()],
            )
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());

        bucket.delete("a/b/obj").await.unwrap();
        assert!(bucket.delete("a/b/obj").await.unwrap_err().is_not_found());
        // Emptied parents disappear with the object.
        assert!(!tmp.path().join("a").exists());
    }

    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "source went away",
            )))
        }
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_previous_object() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        upload(&bucket, "dir/obj", "v1").await;

        let err = bucket
            .upload("dir/obj", ObjectStream::plain(FailingReader, None), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::Io(_)));

        // The previous version survives and the swap file is gone.
        let content = bucket.get("dir/obj").await.unwrap().read_all().await.unwrap();
        assert_eq!(content, b"v1");
        assert!(!tmp.path().join("dir/obj.swap").exists());
    }

    #[tokio::test]
    async fn test_name_escaping_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let bucket = FsBucket::new(tmp.path()).unwrap();
        let err = bucket.get("../outside").await.unwrap_err();
        assert!(matches!(err, BucketError::InvalidArgument(_)));
    }
}
