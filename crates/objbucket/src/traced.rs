//! Tracing decorator.
//!
//! Opens a span around every operation. For streaming reads the span is
//! carried by the returned stream and closed only once the stream is
//! drained or dropped, so the span covers the entire transfer rather than
//! just the call that produced the stream.

use async_trait::async_trait;
use tracing::{debug_span, Instrument, Span};

use crate::bucket::{Bucket, ObjectAttributes, VisitAttrs, VisitName};
use crate::error::Result;
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::{ObjectStream, StreamObserver, StreamOutcome};

/// A [`Bucket`] decorator adding spans around every operation.
pub struct TracedBucket<B> {
    inner: B,
}

impl<B: Bucket> TracedBucket<B> {
    /// Wrap `inner` with tracing spans.
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    fn span(&self, op: &'static str, object: &str) -> Span {
        debug_span!(
            "bucket_operation",
            operation = op,
            bucket = %self.inner.name(),
            object = object,
        )
    }
}

/// Keeps the operation span alive for the lifetime of a returned stream.
struct SpanObserver {
    span: Span,
}

impl StreamObserver for SpanObserver {
    fn on_complete(&mut self, outcome: StreamOutcome) {
        let _enter = self.span.enter();
        tracing::debug!(
            bytes = outcome.bytes,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            failed = outcome.failed,
            "stream finished"
        );
    }
}

#[async_trait]
impl<B: Bucket> Bucket for TracedBucket<B> {
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
        let span = self.span("iter", dir);
        self.inner.iter(dir, visit, options).instrument(span).await
    }

    async fn iter_with_attributes(
        &self,
        dir: &str,
        visit: &mut VisitAttrs<'_>,
        options: &[IterOption],
    ) -> Result<()> {
        let span = self.span("iter_with_attributes", dir);
        self.inner
            .iter_with_attributes(dir, visit, options)
            .instrument(span)
            .await
    }

    async fn get(&self, name: &str) -> Result<ObjectStream> {
        let span = self.span("get", name);
        let stream = self.inner.get(name).instrument(span.clone()).await?;
        Ok(stream.instrument(Box::new(SpanObserver { span }), None))
    }

    async fn get_range(
        &self,
        name: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<ObjectStream> {
        let span = self.span("get_range", name);
        let stream = self
            .inner
            .get_range(name, offset, length)
            .instrument(span.clone())
            .await?;
        Ok(stream.instrument(Box::new(SpanObserver { span }), None))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let span = self.span("exists", name);
        self.inner.exists(name).instrument(span).await
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        let span = self.span("attributes", name);
        self.inner.attributes(name).instrument(span).await
    }

    async fn upload(
        &self,
        name: &str,
        stream: ObjectStream,
        options: &[UploadOption],
    ) -> Result<()> {
        let span = self.span("upload", name);
        self.inner
            .upload(name, stream, options)
            .instrument(span)
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let span = self.span("delete", name);
        self.inner.delete(name).instrument(span).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
