//! In-memory reference bucket.
//!
//! Deterministic, fully contract-compliant, and safe for concurrent use; it
//! is the oracle the acceptance suite runs against, bare and under every
//! decorator combination.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::sync::Arc;

use crate::bucket::{
    Bucket, IterObjectAttributes, ObjectAttributes, ObjectVersion, VisitAttrs, DIR_DELIM,
};
use crate::error::{BucketError, Result};
use crate::options::{
    apply_iter_options, apply_upload_options, validate_iter_options, validate_upload_options,
    IterOption, IterOptionType, UploadOption, UploadOptionType,
};
use crate::stream::ObjectStream;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    etag: String,
}

/// A deterministic in-memory [`Bucket`].
///
/// Upload time acts as the object's modification time and an MD5 digest of
/// the content acts as its ETag version. Iteration is lexically sorted.
#[derive(Clone, Default)]
pub struct InMemBucket {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl InMemBucket {
    /// Create a new empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the bucket holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Raw stored bytes of an object, if present. Test hook for inspecting
    /// what decorators actually persisted.
    pub fn raw_contents(&self, name: &str) -> Option<Bytes> {
        self.objects.get(name).map(|entry| entry.data.clone())
    }

    /// Sorted snapshot of the objects under `dir` (recursively when asked).
    fn snapshot(&self, dir: &str, recursive: bool) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut last_dir: Option<String> = None;
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(dir))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        for name in names {
            let remainder = &name[dir.len()..];
            match remainder.find(DIR_DELIM) {
                Some(pos) if !recursive => {
                    let dir_name = format!("{}{}", dir, &remainder[..=pos]);
                    let mtime = self
                        .objects
                        .get(&name)
                        .map(|o| o.last_modified)
                        .unwrap_or_else(Utc::now);
                    match &mut last_dir {
                        // Sorted input, so duplicates are adjacent; keep the
                        // newest child time for the directory entry.
                        Some(last) if *last == dir_name => {
                            if let Some(entry) = entries.last_mut() {
                                entry.1 = entry.1.max(mtime);
                            }
                        }
                        _ => {
                            last_dir = Some(dir_name.clone());
                            entries.push((dir_name, mtime));
                        }
                    }
                }
                _ => {
                    let mtime = self
                        .objects
                        .get(&name)
                        .map(|o| o.last_modified)
                        .unwrap_or_else(Utc::now);
                    last_dir = None;
                    entries.push((name, mtime));
                }
            }
        }
        entries
    }
}

fn normalize_dir(dir: &str) -> String {
    if dir.is_empty() || dir.ends_with(DIR_DELIM) {
        dir.to_string()
    } else {
        format!("{dir}{DIR_DELIM}")
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
    Ok(())
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl Bucket for InMemBucket {
    fn name(&self) -> String {
        "inmem".to_string()
    }

    fn supported_iter_options(&self) -> Vec<IterOptionType> {
        vec![IterOptionType::Recursive, IterOptionType::UpdatedAt]
    }

    fn supported_upload_options(&self) -> Vec<UploadOptionType> {
        vec![
            UploadOptionType::IfNotExists,
            UploadOptionType::IfMatch,
            UploadOptionType::IfNotMatch,
        ]
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        validate_iter_options(&self.name(), &self.supported_iter_options(), options)?;
        let params = apply_iter_options(options);
        let dir = normalize_dir(dir);

        for (name, last_modified) in self.snapshot(&dir, params.recursive) {
            let attrs = if params.last_modified {
                IterObjectAttributes::with_last_modified(name, last_modified)
            } else {
                IterObjectAttributes::new(name)
            };
            visit(attrs)?;
        }
        Ok(())
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        validate_name(name)?;
        if length == Some(0) {
            return Err(BucketError::InvalidArgument(
                "length must be positive".to_string(),
            ));
        }
        let object = self
            .objects
            .get(name)
            .ok_or_else(|| BucketError::NotFound(name.to_string()))?;

        let size = object.data.len() as u64;
        if offset >= size {
            return Ok(ObjectStream::empty());
        }
        let end = match length {
            Some(length) => offset.saturating_add(length).min(size),
            None => size,
        };
        Ok(ObjectStream::from_bytes(
            object.data.slice(offset as usize..end as usize),
        ))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.contains_key(name))
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        let object = self
            .objects
            .get(name)
            .ok_or_else(|| BucketError::NotFound(name.to_string()))?;
        Ok(ObjectAttributes {
            size: object.data.len() as u64,
            last_modified: object.last_modified,
            version: Some(ObjectVersion::etag(object.etag.clone())),
        })
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        validate_name(name)?;
        validate_upload_options(&self.name(), &self.supported_upload_options(), options)?;
        let params = apply_upload_options(options)?;
        let data = Bytes::from(stream.read_all().await?);

        let stored = StoredObject {
            etag: md5_hex(&data),
            last_modified: Utc::now(),
            data,
        };

        // The entry API keeps the precondition check and the write atomic
        // per object name.
        match self.objects.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if params.if_not_exists {
                    return Err(BucketError::ConditionNotMet(format!(
                        "object {name} already exists"
                    )));
                }
                if let Some(condition) = &params.condition {
                    let current = &entry.get().etag;
                    if params.if_match && *current != condition.value {
                        return Err(BucketError::ConditionNotMet(format!(
                            "object {name} version does not match"
                        )));
                    }
                    if params.if_not_match && *current == condition.value {
                        return Err(BucketError::ConditionNotMet(format!(
                            "object {name} version matches"
                        )));
                    }
                }
                entry.insert(stored);
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if params.if_match {
                    return Err(BucketError::ConditionNotMet(format!(
                        "object {name} does not exist"
                    )));
                }
                entry.insert(stored);
            }
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BucketError::NotFound(name.to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
