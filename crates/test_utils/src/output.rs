//! A collecting in-memory output sink.

use bytes::Bytes;
use std::sync::Mutex;
use wotfetch_api::*;

/// An [OutputSink] that collects everything handed to it.
#[derive(Debug, Default)]
pub struct MemOutputSink(Mutex<Vec<(IdentityId, u64, Bytes)>>);

impl MemOutputSink {
    /// Everything enqueued so far, in arrival order.
    pub fn entries(&self) -> Vec<(IdentityId, u64, Bytes)> {
        self.0.lock().unwrap().clone()
    }

    /// Number of enqueued entries.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Whether nothing was enqueued yet.
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

impl OutputSink for MemOutputSink {
    fn enqueue(
        &self,
        identity: IdentityId,
        edition: u64,
        data: Bytes,
    ) -> BoxFut<'_, WotResult<()>> {
        self.0.lock().unwrap().push((identity, edition, data));
        Box::pin(async move { Ok(()) })
    }
}
