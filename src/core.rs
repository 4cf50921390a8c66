use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors surfaced by streams and transports.
///
/// The enum is `Clone` because a failure captured by a background upload or
/// prefetch task is re-raised on every later call that would observe it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Stream is closed")]
    StreamClosed,

    #[error("Range out of bounds: {0}")]
    OutOfRange(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Object partially committed: {0}")]
    PartiallyCommitted(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Read side of a remote object stream.
///
/// A reader captures the object length once at open time. Reads past that
/// snapshot return 0 (EOF). Handles are single-owner: they can be sent to
/// another thread but must not be used from two threads at once.
pub trait BlobReader: Send {
    /// Read up to buf.len() bytes into buf.
    /// Returns number of bytes read (0 = EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to absolute position. Discards any prefetched data that does not
    /// cover the new position.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Get current position. Valid on closed streams.
    fn pos(&self) -> u64;

    /// Object length as observed when the stream was opened.
    fn len(&self) -> u64;

    /// True when the open-time snapshot recorded an empty object.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if at end of the snapshot length.
    fn eof(&self) -> bool;

    /// Close the stream, cancelling in-flight prefetches. Idempotent.
    fn close(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("pos", &self.pos())
            .field("len", &self.len())
            .finish()
    }
}

/// Write side of a remote object stream.
pub trait BlobWriter: Send {
    /// Append all of data to the stream. Never blocks on network I/O unless
    /// the upload backlog is full.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Append `data[offset..offset + len]`. Fails with `InvalidArgument` and
    /// writes nothing when the window exceeds the slice bounds.
    fn write_range(&mut self, data: &[u8], offset: usize, len: usize) -> Result<()>;

    /// Submit the current partial chunk and block until every submitted chunk
    /// is committed remotely. Idempotent when no new bytes were written.
    fn flush(&mut self) -> Result<()>;

    /// Get current logical write position. Valid on closed streams.
    fn pos(&self) -> u64;

    /// Flush, wait for all outstanding uploads, and mark the stream terminal.
    /// Repeated close is a no-op success. A prior chunk failure is surfaced
    /// here as `PartiallyCommitted`, never hidden.
    fn close(&mut self) -> Result<()>;
}
