use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::debug;

use crate::core::{BlobReader, BlobWriter, Result};
use crate::read::BlobReadStream;
use crate::transfer::{BlobTransport, MemoryBlobStore};
use crate::write::BlobWriteStream;

/// Tunables for the streams opened by a [`BlobStreamStore`].
///
/// Captured once at stream construction; nothing reads ambient state.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Size of each uploaded chunk.
    pub chunk_size: usize,
    /// Number of prefetch blocks kept in flight. 0 disables read-ahead and
    /// forces one synchronous range fetch per read call.
    pub read_ahead_queue_depth: usize,
    /// Granularity of each prefetch fetch, and the cap on a direct read.
    pub read_ahead_block_size: u64,
    /// Backpressure bound on queued-plus-active chunk uploads.
    pub max_in_flight_uploads: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            read_ahead_queue_depth: 2,
            read_ahead_block_size: 4 * 1024 * 1024,
            max_in_flight_uploads: 4,
        }
    }
}

/// Opens buffered streams over objects reachable through a [`BlobTransport`].
///
/// Owns the background runtime the upload and prefetch tasks run on. The
/// store can be shared between threads; the streams it opens are single-owner.
pub struct BlobStreamStore {
    transport: Arc<dyn BlobTransport>,
    config: StreamConfig,
    runtime: Arc<Runtime>,
}

pub struct BlobStreamStoreBuilder {
    config: StreamConfig,
    transport: Option<Arc<dyn BlobTransport>>,
}

impl Default for BlobStreamStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStreamStoreBuilder {
    pub fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            transport: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn BlobTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size.max(1);
        self
    }

    pub fn read_ahead_queue_depth(mut self, depth: usize) -> Self {
        self.config.read_ahead_queue_depth = depth;
        self
    }

    pub fn read_ahead_block_size(mut self, block_size: u64) -> Self {
        self.config.read_ahead_block_size = block_size.max(1);
        self
    }

    pub fn max_in_flight_uploads(mut self, max: usize) -> Self {
        self.config.max_in_flight_uploads = max.max(1);
        self
    }

    pub fn build(self) -> BlobStreamStore {
        let transport: Arc<dyn BlobTransport> = match self.transport {
            Some(transport) => transport,
            None => MemoryBlobStore::new(),
        };

        let runtime = Runtime::new().expect("Failed to create background runtime");

        BlobStreamStore {
            transport,
            config: self.config,
            runtime: Arc::new(runtime),
        }
    }
}

impl BlobStreamStore {
    pub fn new() -> Self {
        BlobStreamStoreBuilder::new().build()
    }

    pub fn builder() -> BlobStreamStoreBuilder {
        BlobStreamStoreBuilder::new()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Create (or truncate) the object and open a write stream over it.
    pub fn open_writer(&self, object_id: &str) -> Result<Box<dyn BlobWriter>> {
        self.runtime.block_on(self.transport.create(object_id))?;
        debug!(object_id, "opened write stream");

        Ok(Box::new(BlobWriteStream::new(
            Arc::from(object_id),
            Arc::clone(&self.transport),
            &self.config,
            Arc::clone(&self.runtime),
        )))
    }

    /// Open a read stream. The object length is captured here, once; the
    /// stream never re-queries it.
    pub fn open_reader(&self, object_id: &str) -> Result<Box<dyn BlobReader>> {
        let length = self.runtime.block_on(self.transport.get_length(object_id))?;
        debug!(object_id, length, "opened read stream");

        Ok(Box::new(BlobReadStream::new(
            Arc::from(object_id),
            Arc::clone(&self.transport),
            &self.config,
            Arc::clone(&self.runtime),
            length,
        )))
    }

    /// Current remote length, bypassing any stream snapshot.
    pub fn object_length(&self, object_id: &str) -> Result<u64> {
        self.runtime.block_on(self.transport.get_length(object_id))
    }
}

impl Default for BlobStreamStore {
    fn default() -> Self {
        Self::new()
    }
}
