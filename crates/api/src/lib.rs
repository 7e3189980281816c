#![deny(missing_docs)]
//! Wotfetch API contains the module traits and basic types required to
//! define the api of the web-of-trust identity download scheduler.
//!
//! The scheduler keeps the published data of cryptographically identified
//! peers fresh by downloading it from a slow, unreliable content-addressed
//! network. The modules defined here split that job into a prioritized
//! hint queue, an opportunistic bounded-concurrency downloader and a
//! subscription-based hot-set watcher, all behind a single controller
//! facade.
//!
//! If you want to use wotfetch itself, please see the wotfetch_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub(crate) mod serde_bytes_base64 {
    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::prelude::*;
        serializer.serialize_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
    }

    pub fn deserialize<'de, D, T: From<bytes::Bytes>>(
        deserializer: D,
    ) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::prelude::*;
        let s: &'de str = serde::Deserialize::deserialize(deserializer)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map(|v| bytes::Bytes::copy_from_slice(&v).into())
            .map_err(serde::de::Error::custom)
    }
}

pub mod builder;
pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::IdentityId;

mod timestamp;
pub use timestamp::*;

mod hint;
pub use hint::*;

pub mod trust;
pub use trust::*;

pub mod transport;
pub use transport::*;

pub mod hint_store;
pub use hint_store::*;

pub mod output;
pub use output::*;

pub mod downloader;
pub use downloader::*;

pub mod scheduler;
pub use scheduler::*;
