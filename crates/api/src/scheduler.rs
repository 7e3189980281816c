//! The scheduler controller facade.

use crate::*;
use std::sync::Arc;

/// The single external-facing entry point of the download scheduling
/// subsystem.
///
/// Implementations fan every [Downloader] callback out to both download
/// strategies, serialized behind one controller-wide lock, and add the
/// consistency queries that span both.
pub trait Scheduler: Downloader {
    /// Debug: whether any strategy would currently fetch the identity.
    ///
    /// The watched sets of the two strategies are disjoint covers of the
    /// eligible set by construction; if both claim the identity this
    /// returns an error instead of a value.
    fn should_fetch_state(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>>;
}

/// Trait-object [Scheduler].
pub type DynScheduler = Arc<dyn Scheduler>;

/// A factory for constructing [Scheduler] instances.
pub trait SchedulerFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> WotResult<()>;

    /// Construct a scheduler instance, wiring up the transport and both
    /// downloaders from the builder's factories.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        trust: DynTrustView,
        output: DynOutputSink,
    ) -> BoxFut<'static, WotResult<DynScheduler>>;
}

/// Trait-object [SchedulerFactory].
pub type DynSchedulerFactory = Arc<dyn SchedulerFactory>;
