//! Persisted hint queue types.

use crate::*;
use std::sync::Arc;

/// Result of inserting a hint into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No hint existed for the key; the hint was stored.
    Inserted,
    /// An older-edition hint for the same key was replaced.
    Replaced,
    /// The claim was stale or duplicate: a hint with an equal or newer
    /// edition already exists for the key. Editions never move backward.
    Rejected,
}

/// Represents the ability to store hints and iterate them in download
/// priority order.
///
/// Implementations must keep their iteration order in exact agreement
/// with [Hint::cmp_priority] at all times, and must enforce key
/// uniqueness and edition monotonicity on insert.
pub trait HintStore: 'static + Send + Sync + std::fmt::Debug {
    /// Insert a hint, subject to uniqueness and edition monotonicity.
    fn insert(&self, hint: Hint) -> BoxFut<'_, WotResult<InsertOutcome>>;

    /// Get the hint stored for the key.
    fn get(&self, key: HintKey) -> BoxFut<'_, WotResult<Option<Hint>>>;

    /// Remove the hint stored for the key. Returns whether one existed.
    fn remove(&self, key: HintKey) -> BoxFut<'_, WotResult<bool>>;

    /// Remove the hint stored for the key only if it still carries the
    /// given edition. Used by fetch completions so a concurrently
    /// replaced, newer hint survives the failure of an older attempt.
    fn remove_exact(
        &self,
        key: HintKey,
        edition: u64,
    ) -> BoxFut<'_, WotResult<bool>>;

    /// Remove every hint for the target with an edition at or below the
    /// given one. Returns the number removed. Used after a successful
    /// fetch, when those hints become informationally obsolete.
    fn remove_target_up_to(
        &self,
        target: IdentityId,
        edition: u64,
    ) -> BoxFut<'_, WotResult<usize>>;

    /// Remove every hint in which the identity appears as source or as
    /// target. Returns the number removed. Used when an identity becomes
    /// ineligible or is deleted.
    fn remove_for_identity(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<usize>>;

    /// The up to `limit` highest-priority hints whose targets are
    /// pairwise distinct and not in `exclude_targets`. This is the refill
    /// query of the opportunistic downloader: one fetch per target at a
    /// time.
    fn select_ready(
        &self,
        exclude_targets: Vec<IdentityId>,
        limit: usize,
    ) -> BoxFut<'_, WotResult<Vec<Hint>>>;

    /// All hints in priority order. Debug and consistency checking only.
    fn ordered(&self) -> BoxFut<'_, WotResult<Vec<Hint>>>;

    /// Number of stored hints.
    fn count(&self) -> BoxFut<'_, WotResult<usize>>;
}

/// Trait-object [HintStore].
pub type DynHintStore = Arc<dyn HintStore>;

/// A factory for constructing [HintStore] instances.
pub trait HintStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> WotResult<()>;

    /// Construct a hint store instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, WotResult<DynHintStore>>;
}

/// Trait-object [HintStoreFactory].
pub type DynHintStoreFactory = Arc<dyn HintStoreFactory>;
