//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general wotfetch builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the
    /// builder.
    pub config: crate::config::Config,

    /// The [hint_store::HintStoreFactory] to be used for creating
    /// [hint_store::HintStore] instances.
    pub hint_store: hint_store::DynHintStoreFactory,

    /// The [transport::TransportFactory] to be used for creating
    /// [transport::Transport] instances.
    pub transport: transport::DynTransportFactory,

    /// The [downloader::DownloaderFactory] producing the hot-set watcher
    /// ("fast path").
    pub fast_downloader: downloader::DynDownloaderFactory,

    /// The [downloader::DownloaderFactory] producing the opportunistic
    /// downloader ("slow path").
    pub slow_downloader: downloader::DynDownloaderFactory,

    /// The [scheduler::SchedulerFactory] to be used for creating
    /// [scheduler::Scheduler] instances.
    pub scheduler: scheduler::DynSchedulerFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn set_default_config(&mut self) -> WotResult<()> {
        let Self {
            config,
            hint_store,
            transport,
            fast_downloader,
            slow_downloader,
            scheduler,
        } = self;

        hint_store.default_config(config)?;
        transport.default_config(config)?;
        fast_downloader.default_config(config)?;
        slow_downloader.default_config(config)?;
        scheduler.default_config(config)?;

        Ok(())
    }

    /// Convenience: set the default config and freeze the builder.
    pub fn with_default_config(mut self) -> WotResult<Self> {
        self.set_default_config()?;
        Ok(self)
    }

    /// Freeze the builder in an Arc<> for module construction.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
