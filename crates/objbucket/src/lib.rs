//! # objbucket
//!
//! Provider-agnostic object storage with composable decorators.
//!
//! Everything revolves around the [`Bucket`] trait: a small, object-safe
//! contract for listing, reading, writing, and deleting named objects.
//! Backends adapt one store each ([`InMemBucket`], [`FsBucket`]); decorators
//! wrap any bucket with an extra concern while preserving the contract:
//!
//! - [`MetricsBucket`] counts operations, failures, and byte flow
//! - [`TracedBucket`] spans each operation and its stream's lifetime
//! - [`EncryptedBucket`] seals content with chunked AEAD framing
//! - [`PrefixedBucket`] scopes all names under a fixed prefix
//!
//! Decorators nest in any order, so a typical production stack reads
//! `MetricsBucket<TracedBucket<EncryptedBucket<PrefixedBucket<...>>>>`.
//! Reads yield an [`ObjectStream`] whose seek and positional-read
//! capabilities survive every wrapper. The [`sync`] module transfers whole
//! directory trees between a bucket and local disk with bounded concurrency.

pub mod bucket;
pub mod encrypt;
pub mod error;
pub mod fs;
pub mod inmem;
pub mod metrics;
pub mod options;
pub mod prefix;
pub mod stream;
pub mod sync;
pub mod testing;
pub mod traced;

pub use bucket::{
    Bucket, IterObjectAttributes, ObjectAttributes, ObjectVersion, VersionKind, VisitAttrs,
    VisitName, DIR_DELIM,
};
pub use encrypt::EncryptedBucket;
pub use error::{BucketError, Result};
pub use fs::FsBucket;
pub use inmem::InMemBucket;
pub use metrics::{BucketMetrics, MetricsBucket, MetricsRegistry, Operation};
pub use options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
pub use prefix::PrefixedBucket;
pub use stream::{Capabilities, ObjectStream, ReadAt, StreamObserver, StreamOutcome};
pub use sync::{download_dir, download_file, upload_dir, upload_file, SyncOptions};
pub use traced::TracedBucket;

pub use objbucket_crypto::EncryptionKey;
