//! Read access to the externally computed trust/score graph.

use crate::*;
use std::sync::Arc;

/// One trust edge, carrying everything needed to rebuild a hint for its
/// target from the already-known graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEdge {
    /// The trusting peer.
    pub source: IdentityId,
    /// The trusted peer.
    pub target: IdentityId,
    /// When the edge was last modified.
    pub date: Timestamp,
    /// Capacity of the source at the time of the snapshot.
    pub source_capacity: u8,
    /// Raw score of the source at the time of the snapshot.
    pub source_score: i32,
    /// The edition of the target's data the source last vouched for.
    pub edition: u64,
}

/// Snapshot read access to the trust/score engine.
///
/// The engine commits its own changes before invoking scheduler
/// callbacks, so every read through this trait is guaranteed to see an
/// already-consistent snapshot.
pub trait TrustView: 'static + Send + Sync + std::fmt::Debug {
    /// Whether the identity's data should currently be fetched at all.
    fn is_eligible(&self, identity: IdentityId)
        -> BoxFut<'_, WotResult<bool>>;

    /// Whether the identity is at rank <= 1 relative to some local trust
    /// root with a positive direct trust value. These identities belong
    /// to the hot set of the subscription-based watcher.
    fn is_directly_trusted(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>>;

    /// Whether the identity is itself a local trust root.
    fn is_local_root(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>>;

    /// Whether the identity is owned by the local user. Own identities
    /// are usually local roots, but not always: a freshly restored or
    /// replaced own identity may not have been re-rooted yet.
    fn is_own(&self, identity: IdentityId) -> BoxFut<'_, WotResult<bool>>;

    /// The incoming trust edges of the target whose sources may
    /// contribute hints. Used to rebuild the hint queue in bulk when an
    /// identity transitions into eligibility.
    fn hinting_edges(
        &self,
        target: IdentityId,
    ) -> BoxFut<'_, WotResult<Vec<TrustEdge>>>;

    /// The "next edition to fetch" counter of the identity.
    fn next_edition(&self, identity: IdentityId)
        -> BoxFut<'_, WotResult<u64>>;
}

/// Trait-object [TrustView].
pub type DynTrustView = Arc<dyn TrustView>;

/// Whether the hot-set watcher (rather than the opportunistic downloader)
/// is responsible for this identity. The two watched sets are disjoint
/// covers of the eligible set by construction.
pub async fn watch_covered(
    trust: &DynTrustView,
    identity: &IdentityId,
) -> WotResult<bool> {
    Ok(trust.is_local_root(identity.clone()).await?
        || trust.is_directly_trusted(identity.clone()).await?)
}
