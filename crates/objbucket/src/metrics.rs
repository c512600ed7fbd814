//! Metrics decorator and its registry.
//!
//! Series are keyed by a caller-supplied bucket identity so that many
//! decorated buckets can share one [`MetricsRegistry`] without colliding.
//! Registration is additive: registering the same identity twice returns
//! the same series, so counters only ever increase across the life of the
//! registry.
//!
//! Per `{bucket, operation}` the registry tracks attempted and failed
//! operation counters, an operation duration histogram, a fetched-bytes
//! counter for read paths, and a transferred-bytes histogram; per `{bucket}`
//! a last-successful-upload-time gauge.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bucket::{Bucket, ObjectAttributes, VisitAttrs, VisitName};
use crate::error::{BucketError, Result};
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::{ObjectStream, StreamObserver, StreamOutcome};

/// The operation kinds a bucket exposes, used as metric labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Iter,
    Attributes,
    Get,
    GetRange,
    Exists,
    Upload,
    Delete,
}

impl Operation {
    /// All operation kinds, in label order.
    pub const ALL: [Operation; 7] = [
        Operation::Iter,
        Operation::Attributes,
        Operation::Get,
        Operation::GetRange,
        Operation::Exists,
        Operation::Upload,
        Operation::Delete,
    ];

    /// The label value for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Iter => "iter",
            Operation::Attributes => "attributes",
            Operation::Get => "get",
            Operation::GetRange => "get_range",
            Operation::Exists => "exists",
            Operation::Upload => "upload",
            Operation::Delete => "delete",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// A monotonically increasing counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`.
    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge holding one floating point value.
#[derive(Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Replace the value.
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// A fixed-bound histogram with a cumulative count and sum.
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum: Mutex<f64>,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: Mutex::new(0.0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += value;
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observed values.
    pub fn sum(&self) -> f64 {
        *self.sum.lock()
    }
}

const DURATION_BOUNDS: &[f64] = &[
    0.001, 0.01, 0.1, 0.3, 0.6, 1.0, 3.0, 6.0, 9.0, 20.0, 30.0, 60.0, 90.0, 120.0,
];

const BYTE_BOUNDS: &[f64] = &[
    1024.0,
    32768.0,
    262144.0,
    1048576.0,
    8388608.0,
    33554432.0,
    268435456.0,
    1073741824.0,
];

/// Per-operation series for one bucket identity.
pub struct OperationMetrics {
    /// Total attempted operations
    pub attempted: Counter,
    /// Operations that failed (expected errors excluded)
    pub failed: Counter,
    /// Operation wall-clock duration in seconds
    pub duration_seconds: Histogram,
    /// Bytes fetched from the bucket on read paths
    pub fetched_bytes: Counter,
    /// Bytes moved per streaming operation
    pub transferred_bytes: Histogram,
}

impl OperationMetrics {
    fn new() -> Self {
        Self {
            attempted: Counter::default(),
            failed: Counter::default(),
            duration_seconds: Histogram::new(DURATION_BOUNDS),
            fetched_bytes: Counter::default(),
            transferred_bytes: Histogram::new(BYTE_BOUNDS),
        }
    }
}

/// All series for one bucket identity.
pub struct BucketMetrics {
    bucket: String,
    ops: [OperationMetrics; 7],
    /// Unix timestamp of the last successful upload, in seconds
    pub last_successful_upload_time: Gauge,
}

impl BucketMetrics {
    fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ops: std::array::from_fn(|_| OperationMetrics::new()),
            last_successful_upload_time: Gauge::default(),
        }
    }

    /// The bucket identity these series are labeled with.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Series for one operation kind.
    pub fn op(&self, op: Operation) -> &OperationMetrics {
        &self.ops[op.index()]
    }
}

/// Shared, additive registry of per-bucket metric series.
///
/// Never global: callers construct one and pass it to each
/// [`MetricsBucket`]. Identities are independent; registering an identity
/// that already exists yields the existing series.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    buckets: Arc<DashMap<String, Arc<BucketMetrics>>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the series for a bucket identity.
    pub fn register(&self, bucket: &str) -> Arc<BucketMetrics> {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(BucketMetrics::new(bucket)))
            .clone()
    }

    /// Look up the series for a bucket identity, if registered.
    pub fn get(&self, bucket: &str) -> Option<Arc<BucketMetrics>> {
        self.buckets.get(bucket).map(|entry| entry.clone())
    }
}

/// Decides whether a bucket error counts as expected rather than a failure.
pub type ErrPredicate = Arc<dyn Fn(&BucketError) -> bool + Send + Sync>;

/// A [`Bucket`] decorator recording operation metrics.
pub struct MetricsBucket<B> {
    inner: B,
    metrics: Arc<BucketMetrics>,
    is_expected_err: Option<ErrPredicate>,
}

impl<B: Bucket> MetricsBucket<B> {
    /// Wrap `inner`, recording series under `bucket_id` in `registry`.
    pub fn new(bucket_id: &str, inner: B, registry: &MetricsRegistry) -> Self {
        Self {
            inner,
            metrics: registry.register(bucket_id),
            is_expected_err: None,
        }
    }

    /// Mark errors matching `pred` as expected: they still propagate but do
    /// not increment failure counters.
    pub fn with_expected_errs(mut self, pred: ErrPredicate) -> Self {
        self.is_expected_err = Some(pred);
        self
    }

    /// The series this decorator records into.
    pub fn metrics(&self) -> &Arc<BucketMetrics> {
        &self.metrics
    }

    /// Replace the wrapped bucket, keeping the recorded series.
    pub fn swap_inner(&mut self, inner: B) -> B {
        std::mem::replace(&mut self.inner, inner)
    }

    fn failure_expected(&self, err: &BucketError) -> bool {
        self.is_expected_err.as_ref().is_some_and(|pred| pred(err))
    }

    fn record<T>(&self, op: Operation, started: Instant, result: &Result<T>) {
        let series = self.metrics.op(op);
        series
            .duration_seconds
            .observe(started.elapsed().as_secs_f64());
        if let Err(err) = result {
            if !self.failure_expected(err) {
                series.failed.inc();
            }
        }
    }

    fn stream_observer(&self, op: Operation) -> Box<dyn StreamObserver> {
        Box::new(MetricsObserver {
            metrics: self.metrics.clone(),
            op,
            count_failures: true,
            count_duration: true,
        })
    }
}

struct MetricsObserver {
    metrics: Arc<BucketMetrics>,
    op: Operation,
    // Upload failures and durations are recorded at the call site, not per
    // stream, to avoid double counting.
    count_failures: bool,
    count_duration: bool,
}

impl StreamObserver for MetricsObserver {
    fn on_read(&mut self, n: usize) {
        self.metrics.op(self.op).fetched_bytes.inc_by(n as u64);
    }

    fn on_complete(&mut self, outcome: StreamOutcome) {
        let series = self.metrics.op(self.op);
        if self.count_duration {
            series
                .duration_seconds
                .observe(outcome.elapsed.as_secs_f64());
        }
        series.transferred_bytes.observe(outcome.bytes as f64);
        if self.count_failures && outcome.failed {
            series.failed.inc();
        }
    }
}

#[async_trait]
impl<B: Bucket> Bucket for MetricsBucket<B> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn supported_iter_options(&self) -> Vec<IterOptionType> {
        self.inner.supported_iter_options()
    }

    fn supported_upload_options(&self) -> Vec<UploadOptionType> {
        self.inner.supported_upload_options()
    }

    async fn iter(
        &self,
        dir: &str,
        visit: &mut VisitName<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        self.metrics.op(Operation::Iter).attempted.inc();
        let started = Instant::now();
        let result = self.inner.iter(dir, visit, options).await;
        self.record(Operation::Iter, started, &result);
        result
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        self.metrics.op(Operation::Iter).attempted.inc();
        let started = Instant::now();
        let result = self.inner.iter_with_attributes(dir, visit, options).await;
        self.record(Operation::Iter, started, &result);
        result
    }

    async fn get(&self, name: &str) -> Result<ObjectStream> {
        self.metrics.op(Operation::Get).attempted.inc();
        let started = Instant::now();
        match self.inner.get(name).await {
            // Duration for a successful read covers the whole stream and is
            // recorded by the observer at completion.
            Ok(stream) => Ok(stream.instrument(self.stream_observer(Operation::Get), None)),
            Err(err) => {
                let series = self.metrics.op(Operation::Get);
                series
                    .duration_seconds
                    .observe(started.elapsed().as_secs_f64());
                if !self.failure_expected(&err) {
                    series.failed.inc();
                }
                Err(err)
            }
        }
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        self.metrics.op(Operation::GetRange).attempted.inc();
        let started = Instant::now();
        match self.inner.get_range(name, offset, length).await {
            Ok(stream) => Ok(stream.instrument(self.stream_observer(Operation::GetRange), None)),
            Err(err) => {
                let series = self.metrics.op(Operation::GetRange);
                series
                    .duration_seconds
                    .observe(started.elapsed().as_secs_f64());
                if !self.failure_expected(&err) {
                    series.failed.inc();
                }
                Err(err)
            }
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.metrics.op(Operation::Exists).attempted.inc();
        let started = Instant::now();
        let result = self.inner.exists(name).await;
        self.record(Operation::Exists, started, &result);
        result
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        self.metrics.op(Operation::Attributes).attempted.inc();
        let started = Instant::now();
        let result = self.inner.attributes(name).await;
        self.record(Operation::Attributes, started, &result);
        result
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        self.metrics.op(Operation::Upload).attempted.inc();
        let started = Instant::now();
        let stream = stream.instrument(
            Box::new(MetricsObserver {
                metrics: self.metrics.clone(),
                op: Operation::Upload,
                count_failures: false,
                count_duration: false,
            }),
            None,
        );
        let result = self.inner.upload(name, stream, options).await;
        self.record(Operation::Upload, started, &result);
        if result.is_ok() {
            self.metrics
                .last_successful_upload_time
                .set(Utc::now().timestamp_millis() as f64 / 1000.0);
        }
        result
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.metrics.op(Operation::Delete).attempted.inc();
        let started = Instant::now();
        let result = self.inner.delete(name).await;
        self.record(Operation::Delete, started, &result);
        result
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

    fn payload(content: &str) -> ObjectStream {
        ObjectStream::from_bytes(Bytes::copy_from_slice(content.as_bytes()))
    }

    #[tokio::test]
    async fn test_upload_and_failure_accounting() {
        let registry = MetricsRegistry::new();
        let bucket = MetricsBucket::new("test", InMemBucket::new(), &registry);

        bucket.upload("a", payload("1"), &[]).await.unwrap();
        bucket.upload("b", payload("2"), &[]).await.unwrap();
        // Invalid name fails the upload.
        assert!(bucket.upload("", payload("3"), &[]).await.is_err());

        let m = bucket.metrics();
        assert_eq!(m.op(Operation::Upload).attempted.value(), 3);
        assert_eq!(m.op(Operation::Upload).failed.value(), 1);
        // One duration observation per call: the upload stream completing
        // must not add a second one.
        assert_eq!(m.op(Operation::Upload).duration_seconds.count(), 3);
        assert!(m.last_successful_upload_time.value() > 0.0);
    }

    #[tokio::test]
    async fn test_get_not_found_counts_as_failure() {
        let registry = MetricsRegistry::new();
        let bucket = MetricsBucket::new("test", InMemBucket::new(), &registry);

        assert!(bucket.get("missing").await.is_err());
        assert_eq!(bucket.metrics().op(Operation::Get).attempted.value(), 1);
        assert_eq!(bucket.metrics().op(Operation::Get).failed.value(), 1);
    }

    #[tokio::test]
    async fn test_expected_not_found_not_a_failure() {
        let registry = MetricsRegistry::new();
        let bucket = MetricsBucket::new("test", InMemBucket::new(), &registry)
            .with_expected_errs(Arc::new(|err| err.is_not_found()));

        assert!(bucket.get("missing").await.is_err());
        assert_eq!(bucket.metrics().op(Operation::Get).attempted.value(), 1);
        assert_eq!(bucket.metrics().op(Operation::Get).failed.value(), 0);
    }

    #[tokio::test]
    async fn test_fetched_bytes_and_duration() {
        let registry = MetricsRegistry::new();
        let bucket = MetricsBucket::new("test", InMemBucket::new(), &registry);

        bucket.upload("obj", payload("hello world"), &[]).await.unwrap();
        let content = bucket.get("obj").await.unwrap().read_all().await.unwrap();
        assert_eq!(content, b"hello world");

        let get = bucket.metrics().op(Operation::Get);
        assert_eq!(get.fetched_bytes.value(), 11);
        // One observation from the drained stream.
        assert_eq!(get.duration_seconds.count(), 1);
        assert_eq!(get.transferred_bytes.count(), 1);
    }

    #[tokio::test]
    async fn test_registry_is_additive() {
        let registry = MetricsRegistry::new();
        let first = MetricsBucket::new("same-id", InMemBucket::new(), &registry);
        first.upload("a", payload("1"), &[]).await.unwrap();

        // Same identity, same series: counts continue, never reset.
        let second = MetricsBucket::new("same-id", InMemBucket::new(), &registry);
        second.upload("b", payload("2"), &[]).await.unwrap();

        assert_eq!(
            registry
                .get("same-id")
                .unwrap()
                .op(Operation::Upload)
                .attempted
                .value(),
            2
        );
    }

    #[tokio::test]
    async fn test_swap_inner_keeps_series() {
        let registry = MetricsRegistry::new();
        let mut bucket = MetricsBucket::new("swap", InMemBucket::new(), &registry);
        bucket.upload("a", payload("1"), &[]).await.unwrap();

        bucket.swap_inner(InMemBucket::new());
        bucket.upload("a", payload("1"), &[]).await.unwrap();
        assert_eq!(bucket.metrics().op(Operation::Upload).attempted.value(), 2);
    }

    #[tokio::test]
    async fn test_distinct_identities_do_not_collide() {
        let registry = MetricsRegistry::new();
        let a = MetricsBucket::new("a", InMemBucket::new(), &registry);
        let b = MetricsBucket::new("b", InMemBucket::new(), &registry);

        a.upload("x", payload("1"), &[]).await.unwrap();
        assert_eq!(a.metrics().op(Operation::Upload).attempted.value(), 1);
        assert_eq!(b.metrics().op(Operation::Upload).attempted.value(), 0);
    }
}
