//! Factories for generating instances of wotfetch modules.

mod command;
pub use command::*;

pub mod mem_hint_store;
pub use mem_hint_store::MemHintStoreFactory;

pub mod mem_transport;
pub use mem_transport::*;

pub mod core_slow_downloader;
pub use core_slow_downloader::CoreSlowDownloaderFactory;

pub mod core_fast_downloader;
pub use core_fast_downloader::CoreFastDownloaderFactory;

pub mod core_scheduler;
pub use core_scheduler::CoreSchedulerFactory;
