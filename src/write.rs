use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::core::{BlobWriter, Result, StreamError};
use crate::store::StreamConfig;
use crate::transfer::BlobTransport;

/// One filled chunk handed to the upload worker.
/// Immutable once submitted; ownership moves with the message.
struct ChunkUploadTask {
    offset: u64,
    data: Bytes,
}

enum UploadMsg {
    Chunk(ChunkUploadTask),
    /// Barrier: the worker replies once every chunk submitted before it has
    /// been attempted.
    Sync(oneshot::Sender<Result<()>>),
}

/// Buffered write stream over a remote object.
///
/// Bytes accumulate in a chunk-sized buffer; each time the buffer fills it is
/// frozen into a [`ChunkUploadTask`] and queued for the background worker,
/// which transmits chunks strictly in submission order. The queue is bounded
/// by `max_in_flight_uploads`, so `write` blocks only when the caller outruns
/// the network.
pub struct BlobWriteStream {
    object_id: Arc<str>,
    chunk_size: usize,
    buffer: BytesMut,
    /// Logical offset of buffer[0]; equals the sum of all submitted chunk
    /// lengths.
    buffer_offset: u64,
    tx: Option<mpsc::Sender<UploadMsg>>,
    failure: Arc<Mutex<Option<StreamError>>>,
    closed: bool,
    _runtime: Arc<Runtime>,
}

impl BlobWriteStream {
    pub(crate) fn new(
        object_id: Arc<str>,
        transport: Arc<dyn BlobTransport>,
        config: &StreamConfig,
        runtime: Arc<Runtime>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.max_in_flight_uploads.max(1));
        let failure = Arc::new(Mutex::new(None));

        runtime.spawn(run_uploader(
            Arc::clone(&object_id),
            transport,
            rx,
            Arc::clone(&failure),
        ));

        Self {
            object_id,
            chunk_size: config.chunk_size.max(1),
            buffer: BytesMut::with_capacity(config.chunk_size.max(1)),
            buffer_offset: 0,
            tx: Some(tx),
            failure,
            closed: false,
            _runtime: runtime,
        }
    }

    fn captured_failure(&self) -> StreamError {
        self.failure
            .lock()
            .ok()
            .and_then(|slot| (*slot).clone())
            .unwrap_or_else(|| StreamError::Transfer("upload worker terminated".into()))
    }

    fn check_failure(&self) -> Result<()> {
        if let Ok(slot) = self.failure.lock()
            && let Some(err) = (*slot).clone()
        {
            return Err(err);
        }
        Ok(())
    }

    /// Freeze the current buffer (if non-empty) into a chunk and queue it.
    /// Blocks when the upload backlog is at its bound.
    fn submit_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let filled = std::mem::replace(&mut self.buffer, BytesMut::with_capacity(self.chunk_size));
        let task = ChunkUploadTask {
            offset: self.buffer_offset,
            data: filled.freeze(),
        };
        self.buffer_offset += task.data.len() as u64;
        trace!(
            object_id = %self.object_id,
            offset = task.offset,
            len = task.data.len(),
            "submitting chunk"
        );

        let tx = self.tx.as_ref().ok_or(StreamError::StreamClosed)?;
        if tx.blocking_send(UploadMsg::Chunk(task)).is_err() {
            return Err(self.captured_failure());
        }
        Ok(())
    }

    /// Block until everything submitted so far is committed or failed.
    fn await_all(&self) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(StreamError::StreamClosed)?;
        let (ack_tx, ack_rx) = oneshot::channel();

        if tx.blocking_send(UploadMsg::Sync(ack_tx)).is_err() {
            return Err(self.captured_failure());
        }
        match ack_rx.blocking_recv() {
            Ok(status) => status,
            Err(_) => Err(self.captured_failure()),
        }
    }
}

impl BlobWriter for BlobWriteStream {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_range(data, 0, data.len())
    }

    fn write_range(&mut self, data: &[u8], offset: usize, len: usize) -> Result<()> {
        if self.closed {
            return Err(StreamError::StreamClosed);
        }

        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                StreamError::InvalidArgument(format!(
                    "window {}+{} exceeds source buffer of {} bytes",
                    offset,
                    len,
                    data.len()
                ))
            })?;

        self.check_failure()?;

        let mut src = &data[offset..end];
        while !src.is_empty() {
            let take = (self.chunk_size - self.buffer.len()).min(src.len());
            self.buffer.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.buffer.len() == self.chunk_size {
                self.submit_chunk()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(StreamError::StreamClosed);
        }
        self.check_failure()?;
        self.submit_chunk()?;
        self.await_all()
    }

    fn pos(&self) -> u64 {
        self.buffer_offset + self.buffer.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let result = self.submit_chunk().and_then(|_| self.await_all());
        self.closed = true;
        self.tx = None;

        match result {
            Ok(()) => {
                debug!(object_id = %self.object_id, len = self.buffer_offset, "write stream closed");
                Ok(())
            }
            // The remote object keeps whatever prefix of chunks committed
            // before the failure; nothing is rolled back.
            Err(err) => Err(StreamError::PartiallyCommitted(err.to_string())),
        }
    }
}

impl Drop for BlobWriteStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

async fn run_uploader(
    object_id: Arc<str>,
    transport: Arc<dyn BlobTransport>,
    mut rx: mpsc::Receiver<UploadMsg>,
    failure: Arc<Mutex<Option<StreamError>>>,
) {
    let failed = |failure: &Mutex<Option<StreamError>>| {
        failure.lock().ok().is_some_and(|slot| slot.is_some())
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            UploadMsg::Chunk(task) => {
                // First failure short-circuits everything behind it.
                if failed(&failure) {
                    continue;
                }

                match transport.put_range(&object_id, task.offset, task.data).await {
                    Ok(()) => {
                        trace!(object_id = %object_id, offset = task.offset, "chunk committed")
                    }
                    Err(err) => {
                        debug!(object_id = %object_id, offset = task.offset, %err, "chunk failed");
                        if let Ok(mut slot) = failure.lock() {
                            slot.get_or_insert(err);
                        }
                    }
                }
            }
            UploadMsg::Sync(ack) => {
                let status = failure
                    .lock()
                    .ok()
                    .and_then(|slot| (*slot).clone())
                    .map_or(Ok(()), Err);
                let _ = ack.send(status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlobStreamStore;
    use crate::transfer::MemoryBlobStore;
    use async_trait::async_trait;

    struct FailingTransport;

    #[async_trait]
    impl BlobTransport for FailingTransport {
        async fn create(&self, _object_id: &str) -> Result<()> {
            Ok(())
        }

        async fn put_range(&self, _object_id: &str, _offset: u64, _data: Bytes) -> Result<()> {
            Err(StreamError::Transfer("injected put failure".into()))
        }

        async fn get_range(&self, _object_id: &str, _offset: u64, _len: u64) -> Result<Bytes> {
            Err(StreamError::Transfer("injected get failure".into()))
        }

        async fn get_length(&self, _object_id: &str) -> Result<u64> {
            Ok(0)
        }
    }

    fn memory_store(chunk_size: usize) -> BlobStreamStore {
        BlobStreamStore::builder()
            .transport(MemoryBlobStore::new())
            .chunk_size(chunk_size)
            .build()
    }

    #[test]
    fn bad_window_writes_nothing() {
        let store = memory_store(16);
        let mut writer = store.open_writer("obj").unwrap();

        let err = writer.write_range(b"abcdef", 4, 10).unwrap_err();
        assert!(matches!(err, StreamError::InvalidArgument(_)));
        assert_eq!(writer.pos(), 0);

        let err = writer.write_range(b"abcdef", usize::MAX, 2).unwrap_err();
        assert!(matches!(err, StreamError::InvalidArgument(_)));

        writer.close().unwrap();
        assert_eq!(store.object_length("obj").unwrap(), 0);
    }

    #[test]
    fn pos_tracks_buffered_and_submitted_bytes() {
        let store = memory_store(4);
        let mut writer = store.open_writer("obj").unwrap();

        writer.write(b"abc").unwrap();
        assert_eq!(writer.pos(), 3);
        writer.write(b"defgh").unwrap();
        assert_eq!(writer.pos(), 8);

        writer.close().unwrap();
        assert_eq!(store.object_length("obj").unwrap(), 8);
    }

    #[test]
    fn write_after_close_fails() {
        let store = memory_store(16);
        let mut writer = store.open_writer("obj").unwrap();

        writer.write(b"data").unwrap();
        writer.close().unwrap();

        assert!(matches!(
            writer.write(b"more").unwrap_err(),
            StreamError::StreamClosed
        ));
        assert!(matches!(
            writer.flush().unwrap_err(),
            StreamError::StreamClosed
        ));
        // pos stays readable after close
        assert_eq!(writer.pos(), 4);
    }

    #[test]
    fn close_is_idempotent() {
        let store = memory_store(16);
        let mut writer = store.open_writer("obj").unwrap();

        writer.write(b"data").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn flush_with_no_new_bytes_is_noop() {
        let store = memory_store(16);
        let mut writer = store.open_writer("obj").unwrap();

        writer.write(b"data").unwrap();
        writer.flush().unwrap();
        assert_eq!(store.object_length("obj").unwrap(), 4);

        writer.flush().unwrap();
        assert_eq!(store.object_length("obj").unwrap(), 4);
        writer.close().unwrap();
    }

    #[test]
    fn upload_failure_surfaces_on_flush_and_close() {
        let store = BlobStreamStore::builder()
            .transport(Arc::new(FailingTransport))
            .chunk_size(2)
            .build();
        let mut writer = store.open_writer("obj").unwrap();

        // Fills one chunk, forcing a submission that will fail in the
        // background.
        writer.write(b"abcd").unwrap();

        let err = writer.flush().unwrap_err();
        assert!(matches!(err, StreamError::Transfer(_)));

        // Later writes re-raise the captured cause.
        let err = writer.write(b"ef").unwrap_err();
        assert!(matches!(err, StreamError::Transfer(_)));

        let err = writer.close().unwrap_err();
        assert!(matches!(err, StreamError::PartiallyCommitted(_)));

        // Terminal after the failed close; a second close is a no-op.
        writer.close().unwrap();
    }
}
