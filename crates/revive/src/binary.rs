//! # Binary Values
//!
//! Typed buffer views, in-memory blobs, and live byte streams.
//!
//! A `ByteStream` is a shared handle: clones refer to the same underlying
//! source and carry the same identity. The source can be taken exactly once.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use bytes::BytesMut;
use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::Error;
use crate::Result;

/// The element type of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    DataView,
    Int8Array,
    Uint8Array,
    Uint8ClampedArray,
    Int16Array,
    Uint16Array,
    Int32Array,
    Uint32Array,
    Float32Array,
    Float64Array,
    BigInt64Array,
    BigUint64Array,
}

impl ViewKind {
    pub const ALL: [ViewKind; 12] = [
        ViewKind::DataView,
        ViewKind::Int8Array,
        ViewKind::Uint8Array,
        ViewKind::Uint8ClampedArray,
        ViewKind::Int16Array,
        ViewKind::Uint16Array,
        ViewKind::Int32Array,
        ViewKind::Uint32Array,
        ViewKind::Float32Array,
        ViewKind::Float64Array,
        ViewKind::BigInt64Array,
        ViewKind::BigUint64Array,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::DataView => "DataView",
            ViewKind::Int8Array => "Int8Array",
            ViewKind::Uint8Array => "Uint8Array",
            ViewKind::Uint8ClampedArray => "Uint8ClampedArray",
            ViewKind::Int16Array => "Int16Array",
            ViewKind::Uint16Array => "Uint16Array",
            ViewKind::Int32Array => "Int32Array",
            ViewKind::Uint32Array => "Uint32Array",
            ViewKind::Float32Array => "Float32Array",
            ViewKind::Float64Array => "Float64Array",
            ViewKind::BigInt64Array => "BigInt64Array",
            ViewKind::BigUint64Array => "BigUint64Array",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Width of one element in bytes. `DataView` is byte-addressed.
    pub fn bytes_per_element(&self) -> usize {
        match self {
            ViewKind::DataView
            | ViewKind::Int8Array
            | ViewKind::Uint8Array
            | ViewKind::Uint8ClampedArray => 1,
            ViewKind::Int16Array | ViewKind::Uint16Array => 2,
            ViewKind::Int32Array | ViewKind::Uint32Array | ViewKind::Float32Array => 4,
            ViewKind::Float64Array | ViewKind::BigInt64Array | ViewKind::BigUint64Array => 8,
        }
    }
}

/// A typed window onto a buffer.
///
/// **Invariant**: `byte_offset + byte_length <= buffer.len()` and
/// `byte_length` is a multiple of the element width.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferView {
    pub kind: ViewKind,
    pub buffer: Bytes,
    pub byte_offset: usize,
    pub byte_length: usize,
}

impl BufferView {
    pub fn new(
        kind: ViewKind,
        buffer: Bytes,
        byte_offset: usize,
        byte_length: usize,
    ) -> Result<Self> {
        let end = byte_offset.checked_add(byte_length);
        if end.is_none_or(|end| end > buffer.len()) {
            return Err(Error::Revive {
                name: kind.name().into(),
                reason: format!(
                    "view [{}, +{}) exceeds buffer of {} bytes",
                    byte_offset,
                    byte_length,
                    buffer.len()
                ),
            });
        }
        if byte_length % kind.bytes_per_element() != 0 {
            return Err(Error::Revive {
                name: kind.name().into(),
                reason: format!(
                    "byte length {} is not a multiple of {}",
                    byte_length,
                    kind.bytes_per_element()
                ),
            });
        }
        Ok(Self { kind, buffer, byte_offset, byte_length })
    }

    /// A view covering a whole buffer.
    pub fn whole(kind: ViewKind, buffer: Bytes) -> Result<Self> {
        let len = buffer.len();
        Self::new(kind, buffer, 0, len)
    }

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.byte_length / self.kind.bytes_per_element()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.byte_offset..self.byte_offset + self.byte_length]
    }
}

/// File metadata carried by a `Blob` that came from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: f64,
}

/// Immutable binary content with a media type.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
    pub file: Option<FileInfo>,
}

impl Blob {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            file: None,
        }
    }

    pub fn file(
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
        name: impl Into<String>,
        last_modified: f64,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            file: Some(FileInfo { name: name.into(), last_modified }),
        }
    }
}

/// Chunks produced by a byte stream.
pub type Chunks = BoxStream<'static, io::Result<Bytes>>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A live byte stream with a stable identity.
#[derive(Clone)]
pub struct ByteStream {
    id: u64,
    source: Arc<Mutex<Option<Chunks>>>,
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            source: Arc::new(Mutex::new(Some(stream.boxed()))),
        }
    }

    /// A stream yielding `bytes` as a single chunk (no chunk if empty).
    pub fn from_bytes(bytes: Bytes) -> Self {
        let chunks: Vec<io::Result<Bytes>> =
            if bytes.is_empty() { Vec::new() } else { vec![Ok(bytes)] };
        Self::new(futures::stream::iter(chunks))
    }

    /// Identity shared by all clones of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Takes the underlying chunks, leaving the stream consumed.
    pub fn take(&self) -> Option<Chunks> {
        self.source.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_consumed(&self) -> bool {
        self.source.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Reads the whole stream into memory.
    pub async fn buffer(&self) -> Result<Bytes> {
        let mut chunks = self.take().ok_or(Error::StreamConsumed(self.id))?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| Error::Io(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("id", &self.id)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl PartialEq for ByteStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
