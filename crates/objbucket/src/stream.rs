//! Object byte streams and capability-preserving instrumentation.
//!
//! A stream handed out by a backend may be sequential-only, or may
//! additionally support absolute seeking, positioned reads, or both. Upload
//! retry and range logic elsewhere depends on those capabilities without
//! buffering data itself, so any wrapper placed around a stream must expose
//! exactly the capabilities of the stream it wraps. [`ObjectStream`] encodes
//! the four combinations as tagged variants chosen at construction, and
//! [`ObjectStream::instrument`] wraps each variant back into the same
//! variant.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, ReadBuf};

use crate::error::{BucketError, Result};

/// A sequential-only byte stream.
pub trait SequentialStream: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin + ?Sized> SequentialStream for T {}

/// A stream supporting absolute seeks.
pub trait SeekStream: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> SeekStream for T {}

/// Positioned reads that never move the sequential cursor.
#[async_trait]
pub trait ReadAt: Send {
    /// Read up to `buf.len()` bytes starting at `offset`.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

#[async_trait]
impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset).await
    }
}

/// A stream supporting positioned reads alongside sequential reading.
pub trait ReadAtStream: AsyncRead + ReadAt + Send + Unpin {}
impl<T: AsyncRead + ReadAt + Send + Unpin + ?Sized> ReadAtStream for T {}

/// A stream supporting seeks and positioned reads.
pub trait RandomAccessStream: AsyncRead + AsyncSeek + ReadAt + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + ReadAt + Send + Unpin + ?Sized> RandomAccessStream for T {}

/// The random-access abilities a stream exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub seek: bool,
    pub read_at: bool,
}

enum Repr {
    Plain(Box<dyn SequentialStream>),
    Seek(Box<dyn SeekStream>),
    ReadAt(Box<dyn ReadAtStream>),
    Random(Box<dyn RandomAccessStream>),
}

/// A byte stream returned by [`Bucket::get`](crate::Bucket::get) and
/// consumed by [`Bucket::upload`](crate::Bucket::upload).
///
/// The variant is fixed at construction by whoever produced the underlying
/// stream and records which capabilities it has; wrappers preserve it.
pub struct ObjectStream {
    repr: Repr,
    size: Option<u64>,
}

impl ObjectStream {
    /// Full-capability stream over an in-memory buffer.
    pub fn from_bytes(data: Bytes) -> Self {
        let size = data.len() as u64;
        Self {
            repr: Repr::Random(Box::new(BytesStream::new(data))),
            size: Some(size),
        }
    }

    /// Empty stream.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Sequential-only stream.
    pub fn plain(reader: impl AsyncRead + Send + Unpin + 'static, size: Option<u64>) -> Self {
        Self {
            repr: Repr::Plain(Box::new(reader)),
            size,
        }
    }

    /// Stream supporting absolute seeks.
    pub fn seekable(
        reader: impl AsyncRead + AsyncSeek + Send + Unpin + 'static,
        size: Option<u64>,
    ) -> Self {
        Self {
            repr: Repr::Seek(Box::new(reader)),
            size,
        }
    }

    /// Stream supporting positioned reads but not seeks.
    pub fn with_read_at(
        reader: impl AsyncRead + ReadAt + Send + Unpin + 'static,
        size: Option<u64>,
    ) -> Self {
        Self {
            repr: Repr::ReadAt(Box::new(reader)),
            size,
        }
    }

    /// Stream supporting both seeks and positioned reads.
    pub fn random(
        reader: impl AsyncRead + AsyncSeek + ReadAt + Send + Unpin + 'static,
        size: Option<u64>,
    ) -> Self {
        Self {
            repr: Repr::Random(Box::new(reader)),
            size,
        }
    }

    /// The capabilities this stream exposes.
    pub fn capabilities(&self) -> Capabilities {
        match self.repr {
            Repr::Plain(_) => Capabilities {
                seek: false,
                read_at: false,
            },
            Repr::Seek(_) => Capabilities {
                seek: true,
                read_at: false,
            },
            Repr::ReadAt(_) => Capabilities {
                seek: false,
                read_at: true,
            },
            Repr::Random(_) => Capabilities {
                seek: true,
                read_at: true,
            },
        }
    }

    /// The total stream size when cheaply derivable, without reading through
    /// the stream. `None` means unknown, never a guess. Unaffected by reads.
    pub fn size_hint(&self) -> Option<u64> {
        self.size
    }

    /// Seek to an absolute position. Fails on streams without the seek
    /// capability.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        use tokio::io::AsyncSeekExt;
        match &mut self.repr {
            Repr::Seek(inner) => Ok(inner.seek(pos).await?),
            Repr::Random(inner) => Ok(inner.seek(pos).await?),
            _ => Err(BucketError::InvalidArgument(
                "stream does not support seek".to_string(),
            )),
        }
    }

    /// Read at an absolute offset without moving the sequential cursor.
    /// Fails on streams without the read-at capability.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match &mut self.repr {
            Repr::ReadAt(inner) => Ok(inner.read_at(buf, offset).await?),
            Repr::Random(inner) => Ok(inner.read_at(buf, offset).await?),
            _ => Err(BucketError::InvalidArgument(
                "stream does not support positioned reads".to_string(),
            )),
        }
    }

    /// Drain the stream to a buffer, pre-sized from the size hint.
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size.unwrap_or(0) as usize);
        self.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Wrap the stream with instrumentation, preserving its capabilities.
    ///
    /// The observer sees every read and one terminal [`StreamOutcome`]. The
    /// outcome is recorded exactly once: at EOF, at the first read error, or
    /// when the stream is dropped, whichever comes first. Errors for which
    /// `is_expected_err` returns true do not classify the stream as failed.
    pub fn instrument(
        self,
        observer: Box<dyn StreamObserver>,
        is_expected_err: Option<IoErrPredicate>,
    ) -> Self {
        let state = InstrumentState::new(observer, is_expected_err);
        let repr = match self.repr {
            Repr::Plain(inner) => Repr::Plain(Box::new(Instrumented { inner, state })),
            Repr::Seek(inner) => Repr::Seek(Box::new(Instrumented { inner, state })),
            Repr::ReadAt(inner) => Repr::ReadAt(Box::new(Instrumented { inner, state })),
            Repr::Random(inner) => Repr::Random(Box::new(Instrumented { inner, state })),
        };
        Self {
            repr,
            size: self.size,
        }
    }
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self.repr {
            Repr::Plain(_) => "Plain",
            Repr::Seek(_) => "Seek",
            Repr::ReadAt(_) => "ReadAt",
            Repr::Random(_) => "Random",
        };
        f.debug_struct("ObjectStream")
            .field("repr", &variant)
            .field("size", &self.size)
            .finish()
    }
}

impl AsyncRead for ObjectStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().repr {
            Repr::Plain(inner) => Pin::new(inner).poll_read(cx, buf),
            Repr::Seek(inner) => Pin::new(inner).poll_read(cx, buf),
            Repr::ReadAt(inner) => Pin::new(inner).poll_read(cx, buf),
            Repr::Random(inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

/// Full-capability stream over an owned byte buffer.
pub struct BytesStream {
    data: Bytes,
    pos: u64,
}

impl BytesStream {
    /// Create a stream positioned at the start of `data`.
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsyncRead for BytesStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let pos = this.pos.min(this.data.len() as u64) as usize;
        let remaining = &this.data[pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for BytesStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let len = this.data.len() as i64;
        let target = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => this.pos as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        this.pos = target as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

#[async_trait]
impl ReadAt for BytesStream {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = offset.min(self.data.len() as u64) as usize;
        let remaining = &self.data[start..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        Ok(n)
    }
}

/// Terminal accounting for one instrumented stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamOutcome {
    /// Total bytes transferred through the stream
    pub bytes: u64,
    /// Wall-clock time from wrapping to completion
    pub elapsed: Duration,
    /// Whether the stream terminated with an unexpected error
    pub failed: bool,
}

/// Receives read and completion events from an instrumented stream.
pub trait StreamObserver: Send {
    /// A read moved `n` bytes.
    fn on_read(&mut self, _n: usize) {}

    /// The stream reached a terminal state. Called exactly once.
    fn on_complete(&mut self, outcome: StreamOutcome);
}

/// Decides whether a terminal read error counts as an operation failure.
pub type IoErrPredicate = Arc<dyn Fn(&io::Error) -> bool + Send + Sync>;

struct InstrumentState {
    observer: Box<dyn StreamObserver>,
    is_expected_err: Option<IoErrPredicate>,
    started: Instant,
    bytes: u64,
    failed: bool,
    done: bool,
}

impl InstrumentState {
    fn new(observer: Box<dyn StreamObserver>, is_expected_err: Option<IoErrPredicate>) -> Self {
        Self {
            observer,
            is_expected_err,
            started: Instant::now(),
            bytes: 0,
            failed: false,
            done: false,
        }
    }

    fn record_read(&mut self, n: usize) {
        if self.done {
            return;
        }
        self.bytes += n as u64;
        self.observer.on_read(n);
    }

    fn record_err(&mut self, err: &io::Error) {
        let expected = self
            .is_expected_err
            .as_ref()
            .is_some_and(|pred| pred(err));
        if !expected {
            self.failed = true;
        }
        self.complete();
    }

    fn complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.observer.on_complete(StreamOutcome {
            bytes: self.bytes,
            elapsed: self.started.elapsed(),
            failed: self.failed,
        });
    }
}

struct Instrumented<S> {
    inner: S,
    state: InstrumentState,
}

impl<S: AsyncRead + Unpin> AsyncRead for Instrumented<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n == 0 && buf.remaining() > 0 {
                    this.state.complete();
                } else {
                    this.state.record_read(n);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.state.record_err(&err);
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncSeek + Unpin> AsyncSeek for Instrumented<S> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}

#[async_trait]
impl<S: ReadAt> ReadAt for Instrumented<S> {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self.inner.read_at(buf, offset).await {
            Ok(n) => {
                self.state.record_read(n);
                Ok(n)
            }
            Err(err) => {
                self.state.record_err(&err);
                Err(err)
            }
        }
    }
}

impl<S> Drop for Instrumented<S> {
    fn drop(&mut self) {
        self.state.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        reads: Arc<Mutex<Vec<usize>>>,
        outcomes: Arc<Mutex<Vec<StreamOutcome>>>,
    }

    impl StreamObserver for Recorder {
        fn on_read(&mut self, n: usize) {
            self.reads.lock().push(n);
        }

        fn on_complete(&mut self, outcome: StreamOutcome) {
            self.outcomes.lock().push(outcome);
        }
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::NotFound, "missing")))
        }
    }

    #[tokio::test]
    async fn test_capabilities_by_variant() {
        let full = ObjectStream::from_bytes(Bytes::from_static(b"abc"));
        assert_eq!(
            full.capabilities(),
            Capabilities {
                seek: true,
                read_at: true
            }
        );

        let plain = ObjectStream::plain(std::io::Cursor::new(b"abc".to_vec()), Some(3));
        assert_eq!(plain.capabilities(), Capabilities::default());

        let seekable = ObjectStream::seekable(std::io::Cursor::new(b"abc".to_vec()), Some(3));
        assert_eq!(
            seekable.capabilities(),
            Capabilities {
                seek: true,
                read_at: false
            }
        );
    }

    #[tokio::test]
    async fn test_instrument_preserves_capabilities() {
        for (stream, caps) in [
            (
                ObjectStream::from_bytes(Bytes::from_static(b"abc")),
                Capabilities {
                    seek: true,
                    read_at: true,
                },
            ),
            (
                ObjectStream::plain(std::io::Cursor::new(b"abc".to_vec()), Some(3)),
                Capabilities::default(),
            ),
            (
                ObjectStream::seekable(std::io::Cursor::new(b"abc".to_vec()), Some(3)),
                Capabilities {
                    seek: true,
                    read_at: false,
                },
            ),
        ] {
            let wrapped = stream.instrument(Box::new(Recorder::default()), None);
            assert_eq!(wrapped.capabilities(), caps);
        }
    }

    #[tokio::test]
    async fn test_size_hint_survives_reads() {
        let recorder = Recorder::default();
        let mut stream = ObjectStream::from_bytes(Bytes::from_static(b"hello world"))
            .instrument(Box::new(recorder.clone()), None);
        assert_eq!(stream.size_hint(), Some(11));

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hell");
        assert_eq!(stream.size_hint(), Some(11));
    }

    #[tokio::test]
    async fn test_outcome_recorded_once() {
        let recorder = Recorder::default();
        let stream = ObjectStream::from_bytes(Bytes::from_static(b"hello world"))
            .instrument(Box::new(recorder.clone()), None);

        // Drain to EOF, then drop. Both paths try to complete; only one may
        // record.
        let content = stream.read_all().await.unwrap();
        assert_eq!(content, b"hello world");

        let outcomes = recorder.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].bytes, 11);
        assert!(!outcomes[0].failed);
    }

    #[tokio::test]
    async fn test_drop_without_eof_records() {
        let recorder = Recorder::default();
        let mut stream = ObjectStream::from_bytes(Bytes::from_static(b"hello world"))
            .instrument(Box::new(recorder.clone()), None);

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        drop(stream);

        let outcomes = recorder.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].bytes, 5);
        assert!(!outcomes[0].failed);
    }

    #[tokio::test]
    async fn test_read_error_classifies_failure() {
        let recorder = Recorder::default();
        let mut stream =
            ObjectStream::plain(FailingReader, None).instrument(Box::new(recorder.clone()), None);
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf).await.is_err());
        drop(stream);

        let outcomes = recorder.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].failed);
    }

    #[tokio::test]
    async fn test_expected_error_not_a_failure() {
        let recorder = Recorder::default();
        let expected: IoErrPredicate = Arc::new(|err| err.kind() == io::ErrorKind::NotFound);
        let mut stream = ObjectStream::plain(FailingReader, None)
            .instrument(Box::new(recorder.clone()), Some(expected));
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf).await.is_err());
        drop(stream);

        let outcomes = recorder.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].failed);
    }

    #[tokio::test]
    async fn test_read_at_leaves_cursor() {
        let mut stream = ObjectStream::from_bytes(Bytes::from_static(b"hello world"));
        let mut buf = [0u8; 5];
        let n = stream.read_at(&mut buf, 6).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        let mut head = [0u8; 5];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"hello");
    }

    #[tokio::test]
    async fn test_seek() {
        let mut stream = ObjectStream::from_bytes(Bytes::from_static(b"hello world"));
        stream.seek(SeekFrom::Start(6)).await.unwrap();
        let rest = stream.read_all().await.unwrap();
        assert_eq!(rest, b"world");
    }

    #[test]
    fn test_debug_shows_variant_and_size() {
        let full = ObjectStream::from_bytes(Bytes::from_static(b"abc"));
        let rendered = format!("{full:?}");
        assert!(rendered.contains("Random"));
        assert!(rendered.contains("Some(3)"));

        let plain = ObjectStream::plain(std::io::Cursor::new(Vec::new()), None);
        assert!(format!("{plain:?}").contains("Plain"));
    }

    #[tokio::test]
    async fn test_seek_unsupported() {
        let mut stream = ObjectStream::plain(std::io::Cursor::new(b"abc".to_vec()), None);
        assert!(stream.seek(SeekFrom::Start(0)).await.is_err());
    }
}
