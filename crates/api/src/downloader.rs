//! The callback surface shared by both download strategies.

use crate::*;
use std::sync::Arc;

/// Statistics exposed for operational visibility. The counters are
/// monotonically increasing; the gauges reflect current state.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DownloaderStats {
    /// Hints currently queued for download.
    pub queued: u64,
    /// Fetches currently running.
    pub running: u64,
    /// Identities currently watched through a standing subscription.
    pub watching: u64,
    /// Start/stop commands awaiting execution.
    pub pending_commands: u64,
    /// Completed downloads handed to the output queue.
    pub succeeded: u64,
    /// Hints pruned as obsolete without their own download.
    pub skipped: u64,
    /// Attempts that failed but are worth retrying.
    pub failed_temporarily: u64,
    /// Attempts that failed for good (malformed payload).
    pub failed_permanently: u64,
    /// Attempts whose claimed edition did not exist on the network.
    pub not_found: u64,
}

impl DownloaderStats {
    /// Field-wise sum of two stat sets.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            queued: self.queued + other.queued,
            running: self.running + other.running,
            watching: self.watching + other.watching,
            pending_commands: self.pending_commands + other.pending_commands,
            succeeded: self.succeeded + other.succeeded,
            skipped: self.skipped + other.skipped,
            failed_temporarily: self.failed_temporarily
                + other.failed_temporarily,
            failed_permanently: self.failed_permanently
                + other.failed_permanently,
            not_found: self.not_found + other.not_found,
        }
    }
}

/// A new-claim notification as delivered by the trust engine: one peer's
/// raw claim about the newest edition of another identity's data.
#[derive(Debug, Clone)]
pub struct HintClaim {
    /// The claiming peer.
    pub source: IdentityId,
    /// The peer whose data the claim is about.
    pub target: IdentityId,
    /// When the claim was made. Full precision; rounding to days happens
    /// at hint construction.
    pub date: Timestamp,
    /// Capacity of the source.
    pub source_capacity: u8,
    /// Raw score of the source.
    pub source_score: i32,
    /// The claimed edition.
    pub edition: u64,
}

/// One download strategy: either the subscription-based hot-set watcher
/// ("fast path") or the opportunistic bounded-concurrency downloader
/// ("slow path").
///
/// All callbacks are invoked by the controller under its single lock, in
/// the fixed order domain lock, controller lock, storage. The trust view
/// passed at construction always reflects an already-committed snapshot.
pub trait Downloader: 'static + Send + Sync + std::fmt::Debug {
    /// The trust engine's "should this identity be fetched at all?"
    /// verdict changed.
    fn on_eligibility_changed(
        &self,
        identity: IdentityId,
        eligible: bool,
    ) -> BoxFut<'_, WotResult<()>>;

    /// A peer claimed a new edition for another identity's data.
    fn on_new_hint(&self, claim: HintClaim) -> BoxFut<'_, WotResult<()>>;

    /// A trust edge changed. Called only when the truster is a local
    /// root and the value or a root-ness flag changed; `old`/`new` are
    /// `None` on creation/deletion respectively.
    fn on_trust_changed(
        &self,
        old: Option<TrustEdge>,
        new: Option<TrustEdge>,
    ) -> BoxFut<'_, WotResult<()>>;

    /// A non-own identity is about to be deleted.
    fn on_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>>;

    /// An own identity is about to be deleted.
    fn on_own_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>>;

    /// An own identity was deleted and replaced by the given identity.
    fn on_own_identity_post_delete(
        &self,
        replacement: IdentityId,
    ) -> BoxFut<'_, WotResult<()>>;

    /// An own identity is about to be restored from its keys; its data
    /// may need to be re-acquired from the network.
    fn on_own_identity_pre_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>>;

    /// An own identity finished restoring.
    fn on_own_identity_post_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>>;

    /// A refetch of the identity's data starting at the given edition was
    /// requested. Must never move a watched edition backward once
    /// progress has been made.
    fn on_refetch_requested(
        &self,
        identity: IdentityId,
        edition: u64,
    ) -> BoxFut<'_, WotResult<()>>;

    /// Debug: would this downloader currently fetch the identity?
    fn should_fetch(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>>;

    /// Debug: drop all pending start/stop commands.
    fn delete_all_commands(&self) -> BoxFut<'_, WotResult<()>>;

    /// Current statistics.
    fn stats(&self) -> BoxFut<'_, WotResult<DownloaderStats>>;

    /// Blocking shutdown: disables further scheduling, cancels all
    /// in-flight network operations and resolves only once none remain.
    /// The downloader cannot be restarted afterwards.
    fn shutdown(&self) -> BoxFut<'_, WotResult<()>>;
}

/// Trait-object [Downloader].
pub type DynDownloader = Arc<dyn Downloader>;

/// A factory for constructing [Downloader] instances.
pub trait DownloaderFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> WotResult<()>;

    /// Construct a downloader instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        trust: DynTrustView,
        transport: DynTransport,
        output: DynOutputSink,
    ) -> BoxFut<'static, WotResult<DynDownloader>>;
}

/// Trait-object [DownloaderFactory].
pub type DynDownloaderFactory = Arc<dyn DownloaderFactory>;
