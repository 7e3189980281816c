#![deny(missing_docs)]
//! Wotfetch keeps the published data of a web-of-trust's identities
//! reasonably fresh by scheduling downloads from a slow, unreliable
//! content-addressed network.
//!
//! Two complementary strategies share the work: a subscription-based
//! watcher for the small hot set of directly trusted and own identities,
//! and an opportunistic bounded-concurrency downloader driven by a
//! prioritized queue of edition hints for everyone else. A controller
//! facade keeps both consistent with the externally computed trust
//! graph.

use wotfetch_api::{builder::Builder, config::Config};

/// Construct a production-ready default builder.
///
/// - `hint_store` - The default hint store is
///   [factories::MemHintStoreFactory].
/// - `transport` - The default transport is
///   [factories::MemTransportFactory]. Swap in a binding to a real
///   content-addressed network for anything beyond local operation.
/// - `fast_downloader` - The default hot-set watcher is
///   [factories::CoreFastDownloaderFactory].
/// - `slow_downloader` - The default opportunistic downloader is
///   [factories::CoreSlowDownloaderFactory].
/// - `scheduler` - The default controller is
///   [factories::CoreSchedulerFactory].
pub fn default_builder() -> Builder {
    Builder {
        config: Config::default(),
        hint_store: factories::MemHintStoreFactory::create(),
        transport: factories::MemTransportFactory::create(),
        fast_downloader: factories::CoreFastDownloaderFactory::create(),
        slow_downloader: factories::CoreSlowDownloaderFactory::create(),
        scheduler: factories::CoreSchedulerFactory::create(),
    }
}

pub mod factories;
