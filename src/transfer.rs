use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::core::{Result, StreamError};

/// Remote object transfer capability consumed by the streams.
///
/// Implementations are trusted to terminate every call with success or
/// failure; the streams do not retry and do not apply timeouts. Retry policy
/// belongs to the transport or to the caller.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Create the object, truncating any existing content to length 0.
    async fn create(&self, object_id: &str) -> Result<()>;

    /// Write bytes at the given offset, extending the object as needed.
    /// Must be safe to retry by the caller.
    async fn put_range(&self, object_id: &str, offset: u64, data: Bytes) -> Result<()>;

    /// Read up to len bytes starting at offset. The returned slice is
    /// truncated at the current object length; an offset at or past the
    /// current length fails with `OutOfRange`.
    async fn get_range(&self, object_id: &str, offset: u64, len: u64) -> Result<Bytes>;

    /// Current object length.
    async fn get_length(&self, object_id: &str) -> Result<u64>;
}

/// In-process transport backed by a concurrent map.
///
/// Stands where a real blob-service client would: the test suite runs the
/// streams against it, and out-of-band overwrites can be simulated by writing
/// through a second handle to the same store.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the object's content wholesale, as a foreign writer would.
    pub fn overwrite(&self, object_id: &str, data: &[u8]) {
        self.objects.insert(object_id.to_string(), data.to_vec());
    }

    pub fn remove(&self, object_id: &str) {
        self.objects.remove(object_id);
    }
}

#[async_trait]
impl BlobTransport for MemoryBlobStore {
    async fn create(&self, object_id: &str) -> Result<()> {
        self.objects.insert(object_id.to_string(), Vec::new());
        Ok(())
    }

    async fn put_range(&self, object_id: &str, offset: u64, data: Bytes) -> Result<()> {
        let mut entry = self
            .objects
            .entry(object_id.to_string())
            .or_insert_with(Vec::new);

        let offset = offset as usize;
        let end = offset + data.len();

        // A gap below the write offset is zero-filled. This is the degraded
        // state a stream leaves behind when an earlier chunk failed.
        if entry.len() < end {
            entry.resize(end, 0);
        }
        entry[offset..end].copy_from_slice(&data);
        Ok(())
    }

    async fn get_range(&self, object_id: &str, offset: u64, len: u64) -> Result<Bytes> {
        let entry = self
            .objects
            .get(object_id)
            .ok_or_else(|| StreamError::NotFound(object_id.to_string()))?;

        let total = entry.len() as u64;
        if offset >= total {
            return Err(StreamError::OutOfRange(format!(
                "offset {} past object length {}",
                offset, total
            )));
        }

        let end = offset.saturating_add(len).min(total);
        Ok(Bytes::copy_from_slice(
            &entry[offset as usize..end as usize],
        ))
    }

    async fn get_length(&self, object_id: &str) -> Result<u64> {
        let entry = self
            .objects
            .get(object_id)
            .ok_or_else(|| StreamError::NotFound(object_id.to_string()))?;
        Ok(entry.len() as u64)
    }
}
