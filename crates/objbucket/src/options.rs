//! Option negotiation for iteration and upload.
//!
//! Backends vary in which listing and upload behaviors they can honor, so
//! options are a closed set of typed values paired with an explicit
//! supported-set query per backend. Requested options are validated against
//! that set before any I/O; silently dropping an option would change the
//! semantics of the call (a non-recursive listing where recursion was asked
//! for), so unsupported options fail the call instead.

use crate::bucket::ObjectVersion;
use crate::error::{BucketError, Result};

/// The kinds of iteration options a backend may support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IterOptionType {
    /// Flatten the whole sub-tree instead of listing one level
    Recursive,
    /// Fetch per-entry modification times during listing
    UpdatedAt,
}

impl IterOptionType {
    /// Stable name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            IterOptionType::Recursive => "recursive",
            IterOptionType::UpdatedAt => "updated_at",
        }
    }
}

/// A single requested iteration option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterOption {
    kind: IterOptionType,
}

impl IterOption {
    /// Request recursive traversal: visit objects in the whole sub-tree and
    /// skip intermediate directory entries.
    pub fn recursive() -> Self {
        Self {
            kind: IterOptionType::Recursive,
        }
    }

    /// Request per-entry modification times. Costs one extra metadata fetch
    /// per entry on backends that do not return it with the listing.
    pub fn updated_at() -> Self {
        Self {
            kind: IterOptionType::UpdatedAt,
        }
    }

    /// The option's type tag.
    pub fn kind(&self) -> IterOptionType {
        self.kind
    }
}

/// Resolved iteration parameters after option application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterParams {
    pub recursive: bool,
    pub last_modified: bool,
}

/// Fold requested options into [`IterParams`].
pub fn apply_iter_options(options: &[IterOption]) -> IterParams {
    let mut params = IterParams::default();
    for option in options {
        match option.kind {
            IterOptionType::Recursive => params.recursive = true,
            IterOptionType::UpdatedAt => params.last_modified = true,
        }
    }
    params
}

/// Reject any requested option whose type is absent from `supported`.
pub fn validate_iter_options(
    bucket: &str,
    supported: &[IterOptionType],
    options: &[IterOption],
) -> Result<()> {
    for option in options {
        if !supported.contains(&option.kind) {
            return Err(BucketError::UnsupportedOption {
                bucket: bucket.to_string(),
                option: option.kind.as_str(),
            });
        }
    }
    Ok(())
}

/// Keep only the options relevant to a plain name listing.
///
/// `iter` never reports attributes, so an `UpdatedAt` request would pay for
/// metadata nobody reads.
pub fn filter_name_iter_options(options: &[IterOption]) -> Vec<IterOption> {
    options
        .iter()
        .filter(|o| o.kind == IterOptionType::Recursive)
        .copied()
        .collect()
}

/// The kinds of upload options a backend may support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadOptionType {
    /// Fail with condition-not-met if the object already exists
    IfNotExists,
    /// Fail unless the stored version matches the supplied one
    IfMatch,
    /// Fail if the stored version matches the supplied one
    IfNotMatch,
}

impl UploadOptionType {
    /// Stable name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOptionType::IfNotExists => "if_not_exists",
            UploadOptionType::IfMatch => "if_match",
            UploadOptionType::IfNotMatch => "if_not_match",
        }
    }
}

/// A single requested upload option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOption {
    kind: UploadOptionType,
    condition: Option<ObjectVersion>,
}

impl UploadOption {
    /// Only upload if the object does not exist yet.
    pub fn if_not_exists() -> Self {
        Self {
            kind: UploadOptionType::IfNotExists,
            condition: None,
        }
    }

    /// Only upload if the stored object's version matches `version`.
    pub fn if_match(version: ObjectVersion) -> Self {
        Self {
            kind: UploadOptionType::IfMatch,
            condition: Some(version),
        }
    }

    /// Only upload if the stored object's version differs from `version`.
    pub fn if_not_match(version: ObjectVersion) -> Self {
        Self {
            kind: UploadOptionType::IfNotMatch,
            condition: Some(version),
        }
    }

    /// The option's type tag.
    pub fn kind(&self) -> UploadOptionType {
        self.kind
    }
}

/// Resolved upload preconditions after option application.
#[derive(Clone, Debug, Default)]
pub struct UploadParams {
    pub condition: Option<ObjectVersion>,
    pub if_not_exists: bool,
    pub if_match: bool,
    pub if_not_match: bool,
}

impl UploadParams {
    /// Whether any precondition was requested.
    pub fn has_conditions(&self) -> bool {
        self.if_not_exists || self.if_match || self.if_not_match
    }
}

/// Fold requested options into [`UploadParams`].
///
/// `IfMatch` / `IfNotMatch` carry the version to compare against; both in
/// one call must agree on it.
pub fn apply_upload_options(options: &[UploadOption]) -> Result<UploadParams> {
    let mut params = UploadParams::default();
    for option in options {
        match option.kind {
            UploadOptionType::IfNotExists => params.if_not_exists = true,
            UploadOptionType::IfMatch => {
                set_condition(&mut params, option)?;
                params.if_match = true;
            }
            UploadOptionType::IfNotMatch => {
                set_condition(&mut params, option)?;
                params.if_not_match = true;
            }
        }
    }
    Ok(params)
}

fn set_condition(params: &mut UploadParams, option: &UploadOption) -> Result<()> {
    let version = option.condition.clone().ok_or_else(|| {
        BucketError::InvalidArgument(format!(
            "upload option {} requires a version condition",
            option.kind.as_str()
        ))
    })?;
    if let Some(existing) = &params.condition {
        if *existing != version {
            return Err(BucketError::InvalidArgument(
                "conflicting version conditions in upload options".to_string(),
            ));
        }
    }
    params.condition = Some(version);
    Ok(())
}

/// Reject any requested upload option whose type is absent from `supported`.
pub fn validate_upload_options(
    bucket: &str,
    supported: &[UploadOptionType],
    options: &[UploadOption],
) -> Result<()> {
    for option in options {
        if !supported.contains(&option.kind) {
            return Err(BucketError::UnsupportedOption {
                bucket: bucket.to_string(),
                option: option.kind.as_str(),
            });
        }
    }
    Ok(())
}
