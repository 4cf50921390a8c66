//! # Srota
//!
//! Srota (स्रोत - "stream" in Sanskrit) lets you read and write remote blob
//! objects like they're regular files on disk, over a store that only speaks
//! whole-range PUT/GET. It handles the messy details: batching small writes
//! into network-sized chunks, prefetching read data ahead of demand, and
//! keeping offset bookkeeping honest when somebody else overwrites the object
//! under you.
//!
//! ## Basic usage
//!
//! ```rust
//! use srota::{BlobReader, BlobStreamStore, BlobWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlobStreamStore::new();
//!
//! let mut writer = store.open_writer("reports/2026-08.bin")?;
//! writer.write(b"hello blob")?;
//! writer.close()?;
//!
//! let mut reader = store.open_reader("reports/2026-08.bin")?;
//! let mut buffer = vec![0u8; 1024];
//! let bytes_read = reader.read(&mut buffer)?;
//! assert_eq!(&buffer[..bytes_read], b"hello blob");
//! # Ok(())
//! # }
//! ```
//!
//! ## What it does
//!
//! On the write side, bytes accumulate in a chunk-sized buffer. Each time the
//! buffer fills, the chunk is queued for a background worker that uploads
//! chunks strictly in submission order. `write` only blocks when the upload
//! backlog hits its configured bound. `flush` pushes out the current partial
//! chunk and waits for everything to commit; `close` does an implicit flush
//! and never hides a background failure.
//!
//! On the read side, the object length is captured once when the stream
//! opens. With a nonzero read-ahead depth, consecutive blocks are fetched
//! concurrently ahead of the read position; they may arrive out of order but
//! are always consumed in offset order. With depth 0, every read is one
//! synchronous range fetch. That is slower, but each call observes the
//! remote object exactly as it currently is.
//!
//! ## Tuning the behavior
//!
//! ```rust
//! use srota::BlobStreamStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlobStreamStore::builder()
//!     .chunk_size(8 * 1024 * 1024)          // upload 8MB at a time
//!     .read_ahead_queue_depth(4)            // keep 4 blocks in flight
//!     .read_ahead_block_size(2 * 1024 * 1024)
//!     .max_in_flight_uploads(2)             // backpressure after 2 chunks
//!     .build();
//!
//! let mut writer = store.open_writer("big-file.bin")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using with standard I/O libraries
//!
//! The streams come as `Box<dyn BlobReader>` / `Box<dyn BlobWriter>`, using
//! this crate's traits. To use them with libraries that require
//! `std::io::Read`, `Seek`, or `Write`, wrap them in the adapters:
//!
//! ```rust
//! use std::io::{Read, Seek, SeekFrom, Write};
//! use srota::{BlobStreamStore, BlobWriter, ReaderAdapter, WriterAdapter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlobStreamStore::new();
//!
//! let mut out = WriterAdapter::new(store.open_writer("notes.txt")?);
//! out.write_all(b"hello adapter")?;
//! out.flush()?;
//! out.into_inner().close()?;
//!
//! let mut file = ReaderAdapter::new(store.open_reader("notes.txt")?);
//! file.seek(SeekFrom::Start(6))?;
//! let mut text = String::new();
//! file.read_to_string(&mut text)?;
//! assert_eq!(text, "adapter");
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrent overwrites
//!
//! A reader opened before an out-of-band overwrite keeps its length snapshot.
//! Prefetched blocks that were already in flight may carry pre-overwrite
//! bytes; fetches issued afterwards see the new content, and a fetch past the
//! new (shorter) length fails with `OutOfRange` rather than silently padding
//! the stream. If you need byte-exact observations of a mutating object, set
//! the read-ahead depth to 0.
//!
//! ## Failure semantics
//!
//! The streams never retry; the transport either succeeds or fails a call and
//! the result is propagated. A chunk upload failure is captured and re-raised
//! on the next `write`, `flush`, or `close`; after a failure the remote
//! object keeps the prefix of chunks that committed before it (plus whatever
//! the transport zero-filled), which `close` reports as `PartiallyCommitted`.
//!
//! ## Thread safety
//!
//! The store can be shared between threads. Stream handles can be sent to
//! another thread but must not be used from two threads at once; open one
//! stream per logical reader or writer instead.

pub mod core;
pub mod read;
pub mod store;
pub mod transfer;
pub mod write;

pub use crate::core::*;
pub use crate::read::BlobReadStream;
pub use crate::store::*;
pub use crate::transfer::{BlobTransport, MemoryBlobStore};
pub use crate::write::BlobWriteStream;

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Wraps a [`BlobReader`] for libraries that want `std::io::Read + Seek`.
pub struct ReaderAdapter {
    inner: Box<dyn BlobReader>,
}

impl ReaderAdapter {
    pub fn new(reader: Box<dyn BlobReader>) -> Self {
        Self { inner: reader }
    }

    pub fn into_inner(self) -> Box<dyn BlobReader> {
        self.inner
    }
}

impl From<Box<dyn BlobReader>> for ReaderAdapter {
    fn from(reader: Box<dyn BlobReader>) -> Self {
        Self::new(reader)
    }
}

impl Read for ReaderAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(io::Error::other)
    }
}

impl Seek for ReaderAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => {
                let current = self.inner.pos();
                if offset >= 0 {
                    current.saturating_add(offset as u64)
                } else {
                    current.saturating_sub(offset.unsigned_abs())
                }
            }
            SeekFrom::End(offset) => {
                let len = self.inner.len();
                if offset >= 0 {
                    len.saturating_add(offset as u64)
                } else {
                    len.saturating_sub(offset.unsigned_abs())
                }
            }
        };

        self.inner.seek(new_pos).map_err(io::Error::other)?;
        Ok(new_pos)
    }
}

/// Wraps a [`BlobWriter`] for libraries that want `std::io::Write`.
pub struct WriterAdapter {
    inner: Box<dyn BlobWriter>,
}

impl WriterAdapter {
    pub fn new(writer: Box<dyn BlobWriter>) -> Self {
        Self { inner: writer }
    }

    pub fn into_inner(self) -> Box<dyn BlobWriter> {
        self.inner
    }
}

impl From<Box<dyn BlobWriter>> for WriterAdapter {
    fn from(writer: Box<dyn BlobWriter>) -> Self {
        Self::new(writer)
    }
}

impl Write for WriterAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(io::Error::other)
    }
}
