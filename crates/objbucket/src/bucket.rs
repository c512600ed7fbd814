//! The Bucket capability contract.
//!
//! Every backend adapter and every decorator implements [`Bucket`]. The
//! trait is object-safe so heterogeneous backends can sit behind
//! `Box<dyn Bucket>` chosen at construction time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::ObjectStream;

/// Delimiter separating path segments in object names.
pub const DIR_DELIM: char = '/';

/// How a backend expresses an object's change-detection token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionKind {
    /// Entity tag; opaque, compared by exact value equality only
    ETag,
}

/// An opaque change-detection token for optimistic-concurrency uploads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub kind: VersionKind,
    pub value: String,
}

impl ObjectVersion {
    /// Construct an ETag version.
    pub fn etag(value: impl Into<String>) -> Self {
        Self {
            kind: VersionKind::ETag,
            value: value.into(),
        }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    /// Object size in bytes; equals the bytes readable from offset 0 to EOF
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Version token, if the backend tracks one
    pub version: Option<ObjectVersion>,
}

/// Per-entry metadata produced during listing.
///
/// Directory-like entries carry names ending in [`DIR_DELIM`]. The
/// modification time is present only when the `UpdatedAt` iter option was
/// requested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterObjectAttributes {
    name: String,
    last_modified: Option<DateTime<Utc>>,
}

impl IterObjectAttributes {
    /// Create an entry without a modification time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_modified: None,
        }
    }

    /// Create an entry carrying a modification time.
    pub fn with_last_modified(name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_modified: Some(last_modified),
        }
    }

    /// The entry's full name, including the listed directory prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this entry names a directory level rather than an object.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with(DIR_DELIM)
    }

    /// The modification time, if it was requested and available.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Rewrite the entry name; used by name-mapping decorators.
    pub fn map_name(mut self, f: impl FnOnce(&str) -> String) -> Self {
        self.name = f(&self.name);
        self
    }
}

/// Callback receiving plain entry names during [`Bucket::iter`].
pub type VisitName<'a> = dyn FnMut(&str) -> Result<()> + Send + 'a;

/// Callback receiving entry attributes during [`Bucket::iter_with_attributes`].
pub type VisitAttrs<'a> = dyn FnMut(IterObjectAttributes) -> Result<()> + Send + 'a;

/// The provider-agnostic object storage contract.
///
/// All operations may be called concurrently from multiple tasks on one
/// instance. A bucket is constructed once, used for its whole lifetime, and
/// closed exactly once by its owner; decorators forward `close` because they
/// own the bucket they wrap.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Human-readable bucket name for logs and error messages.
    fn name(&self) -> String;

    /// Iteration option types this bucket honors.
    fn supported_iter_options(&self) -> Vec<IterOptionType>;

    /// Upload option types this bucket honors.
    fn supported_upload_options(&self) -> Vec<UploadOptionType>;

    /// Call `visit` once per entry directly under `dir`, or once per object
    /// in the whole sub-tree when the `Recursive` option is set. Entries are
    /// visited in lexical order where the backend can provide it; empty
    /// directories are skipped.
    async fn iter(
        &self,
        dir: &str,
        visit: &mut VisitName<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        // Attribute fetching is wasted work for a name-only listing.
        let filtered = crate::options::filter_name_iter_options(options);
        self.iter_with_attributes(
            dir,
            &mut |attrs: IterObjectAttributes| visit(attrs.name()),
            &filtered,
        )
        .await
    }

    /// Like [`Bucket::iter`], but `visit` receives [`IterObjectAttributes`].
    /// Modification times are only populated when the `UpdatedAt` option was
    /// requested.
    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()>;

    /// Read the whole object. Equivalent by contract to
    /// `get_range(name, 0, None)`.
    async fn get(&self, name: &str) -> Result<ObjectStream> {
        self.get_range(name, 0, None).await
    }

    /// Read `length` bytes starting at `offset`; `None` reads to EOF.
    /// Ranges past EOF are clamped; an offset at or past EOF yields an empty
    /// stream. A zero `length` is rejected before any I/O.
    async fn get_range(&self, name: &str, offset: u64, length: Option<u64>)
        -> Result<ObjectStream>;

    /// Whether the object exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Fetch the object's metadata.
    async fn attributes(&self, name: &str) -> Result<ObjectAttributes>;

    /// Store the stream under `name`. Options are validated against
    /// [`Bucket::supported_upload_options`] before any I/O; an unsupported
    /// option fails the call naming the option.
    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()>;

    /// Delete the object. Deleting a missing object is a `NotFound` error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Release backend resources. Called exactly once by the owner.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<B: Bucket + ?Sized> Bucket for std::sync::Arc<B> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn supported_iter_options(&self) -> Vec<IterOptionType> {
        (**self).supported_iter_options()
    }

    fn supported_upload_options(&self) -> Vec<UploadOptionType> {
        (**self).supported_upload_options()
    }

    async fn iter(
        &self,
        dir: &str,
        visit: &mut VisitName<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        (**self).iter(dir, visit, options).await
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        (**self).iter_with_attributes(dir, visit, options).await
    }

    async fn get(&self, name: &str) -> Result<ObjectStream> {
        (**self).get(name).await
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        (**self).get_range(name, offset, length).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name).await
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        (**self).attributes(name).await
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        (**self).upload(name, stream, options).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        (**self).delete(name).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
