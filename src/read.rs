use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use bytes::Bytes;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::core::{BlobReader, Result, StreamError};
use crate::store::StreamConfig;
use crate::transfer::BlobTransport;

/// A fetched range of the object, owned by the session until consumed.
struct PrefetchBlock {
    start: u64,
    data: Bytes,
}

/// Sliding window of in-flight prefetches.
///
/// Blocks are issued in offset order and complete in arrival order on the
/// channel; `ready` reorders early arrivals so consumption stays strictly in
/// offset order.
struct PrefetchWindow {
    /// Start offsets of issued blocks, ascending. Front is next to consume.
    issued: VecDeque<u64>,
    /// Blocks that arrived ahead of their turn, keyed by start offset.
    ready: AHashMap<u64, Result<Bytes>>,
    rx: mpsc::Receiver<(u64, Result<Bytes>)>,
    tx: mpsc::Sender<(u64, Result<Bytes>)>,
    /// Offset the next issued block will start at.
    next_issue: u64,
}

/// Buffered read stream over a remote object.
///
/// The object length is a snapshot taken at open; reads at or past it return
/// 0. With a nonzero queue depth, consecutive blocks are fetched ahead of the
/// read position and consumed strictly in offset order. With depth 0 every
/// read is one synchronous range fetch, so each call observes the remote
/// object as it currently is.
pub struct BlobReadStream {
    object_id: Arc<str>,
    transport: Arc<dyn BlobTransport>,
    depth: usize,
    block_size: u64,
    runtime: Arc<Runtime>,
    pos: u64,
    length: u64,
    current: Option<PrefetchBlock>,
    window: Option<PrefetchWindow>,
    closed: bool,
}

impl BlobReadStream {
    pub(crate) fn new(
        object_id: Arc<str>,
        transport: Arc<dyn BlobTransport>,
        config: &StreamConfig,
        runtime: Arc<Runtime>,
        length: u64,
    ) -> Self {
        Self {
            object_id,
            transport,
            depth: config.read_ahead_queue_depth,
            block_size: config.read_ahead_block_size.max(1),
            runtime,
            pos: 0,
            length,
            current: None,
            window: None,
            closed: false,
        }
    }

    /// Spawn one range fetch; its result arrives on the window channel tagged
    /// with the start offset.
    fn issue_fetch(&self, tx: mpsc::Sender<(u64, Result<Bytes>)>, start: u64, len: u64) {
        let transport = Arc::clone(&self.transport);
        let object_id = Arc::clone(&self.object_id);
        trace!(object_id = %object_id, start, len, "issuing prefetch");

        self.runtime.spawn(async move {
            let result = transport.get_range(&object_id, start, len).await;
            // Send fails only when the window was dropped (seek/close); the
            // fetched bytes are discarded in that case.
            let _ = tx.send((start, result)).await;
        });
    }

    /// Open a fresh window at the current position and fill it to depth.
    fn open_window(&mut self) -> PrefetchWindow {
        let (tx, rx) = mpsc::channel(self.depth.max(1));
        let mut window = PrefetchWindow {
            issued: VecDeque::with_capacity(self.depth),
            ready: AHashMap::new(),
            rx,
            tx,
            next_issue: self.pos,
        };
        for _ in 0..self.depth {
            self.extend_window(&mut window);
        }
        window
    }

    /// Issue the next consecutive block unless the snapshot length is
    /// exhausted.
    fn extend_window(&self, window: &mut PrefetchWindow) {
        if window.next_issue >= self.length {
            return;
        }
        let start = window.next_issue;
        let len = self.block_size.min(self.length - start);
        self.issue_fetch(window.tx.clone(), start, len);
        window.issued.push_back(start);
        window.next_issue = start + len;
    }

    /// Take the next block in offset order, waiting for its completion if it
    /// has not arrived yet, and top the window back up.
    fn next_block(&mut self) -> Result<PrefetchBlock> {
        let mut window = match self.window.take() {
            Some(window) => window,
            None => self.open_window(),
        };

        let expected = match window.issued.pop_front() {
            Some(start) => start,
            None => {
                // Window drained at the snapshot length; callers check EOF
                // before asking for a block.
                return Err(StreamError::OutOfRange(format!(
                    "no prefetch block at offset {}",
                    self.pos
                )));
            }
        };

        let result = loop {
            if let Some(result) = window.ready.remove(&expected) {
                break result;
            }
            match window.rx.blocking_recv() {
                Some((start, result)) => {
                    window.ready.insert(start, result);
                }
                None => break Err(StreamError::Transfer("prefetch task terminated".into())),
            }
        };

        match result {
            Ok(data) => {
                self.extend_window(&mut window);
                self.window = Some(window);
                Ok(PrefetchBlock {
                    start: expected,
                    data,
                })
            }
            // A failed block invalidates the window; a later read after a
            // seek starts a fresh one.
            Err(err) => Err(err),
        }
    }

    /// One synchronous fetch sized to the caller's request, capped at the
    /// block size. No bytes are retained between calls, so each read observes
    /// the remote object's current content.
    fn read_direct(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64)
            .min(self.block_size)
            .min(self.length - self.pos);

        let (tx, rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let object_id = Arc::clone(&self.object_id);
        let offset = self.pos;

        self.runtime.spawn(async move {
            let _ = tx.send(transport.get_range(&object_id, offset, want).await);
        });

        let data = rx
            .blocking_recv()
            .map_err(|_| StreamError::Transfer("fetch task terminated".into()))??;

        let n = data.len();
        buf[..n].copy_from_slice(&data);
        self.pos += n as u64;
        Ok(n)
    }
}

impl BlobReader for BlobReadStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(StreamError::StreamClosed);
        }
        if buf.is_empty() || self.pos >= self.length {
            return Ok(0);
        }

        if self.depth == 0 {
            return self.read_direct(buf);
        }

        let mut total = 0;
        while total < buf.len() && self.pos < self.length {
            let covered = self.current.as_ref().is_some_and(|block| {
                self.pos >= block.start && self.pos < block.start + block.data.len() as u64
            });
            if !covered {
                self.current = None;
                let block = self.next_block()?;
                if block.start != self.pos {
                    // The object shrank under an issued prefetch; refuse to
                    // stitch a gap into the byte stream.
                    return Err(StreamError::OutOfRange(format!(
                        "prefetched block at {} does not cover read position {}",
                        block.start, self.pos
                    )));
                }
                self.current = Some(block);
            }

            let block = match self.current.as_ref() {
                Some(block) => block,
                None => break,
            };
            let offset = (self.pos - block.start) as usize;
            let n = (block.data.len() - offset).min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&block.data[offset..offset + n]);
            total += n;
            self.pos += n as u64;

            if offset + n == block.data.len() {
                self.current = None;
            }
        }

        trace!(object_id = %self.object_id, pos = self.pos, read = total, "read");
        Ok(total)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if self.closed {
            return Err(StreamError::StreamClosed);
        }

        let keep = self
            .current
            .as_ref()
            .is_some_and(|block| pos >= block.start && pos < block.start + block.data.len() as u64);
        if !keep {
            self.current = None;
        }
        if pos != self.pos || !keep {
            // Dropping the window cancels in-flight prefetches; their results
            // are discarded when their sends fail.
            self.window = None;
        }

        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.length
    }

    fn eof(&self) -> bool {
        self.pos >= self.length
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.current = None;
            self.window = None;
            self.closed = true;
            debug!(object_id = %self.object_id, "read stream closed");
        }
        Ok(())
    }
}

impl Drop for BlobReadStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
