//! Output queue hand-off types.

use crate::*;
use std::sync::Arc;

/// The durable hand-off for fetched payloads.
///
/// Downstream parsing of the payload into trust edges is slow; enqueuing
/// must be fast so it never blocks a fetch-completion callback.
pub trait OutputSink: 'static + Send + Sync + std::fmt::Debug {
    /// Enqueue fetched data for downstream processing.
    fn enqueue(
        &self,
        identity: IdentityId,
        edition: u64,
        data: bytes::Bytes,
    ) -> BoxFut<'_, WotResult<()>>;
}

/// Trait-object [OutputSink].
pub type DynOutputSink = Arc<dyn OutputSink>;
