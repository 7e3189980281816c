//! Content-addressed network fetch types.

use crate::*;
use std::sync::Arc;

/// A resolved content key: one identity's data at one edition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentKey {
    /// The identity whose data the key addresses.
    pub identity: IdentityId,
    /// The edition of that data.
    pub edition: u64,
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.identity, self.edition)
    }
}

/// The terminal outcome of a single-shot fetch attempt.
///
/// This is the failure taxonomy the opportunistic downloader keys its
/// hint handling off of; the transport must classify, not retry.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The payload resolved.
    Success {
        /// The fetched bytes.
        data: bytes::Bytes,
    },
    /// The claimed edition does not exist on the network. Either a lie or
    /// a stale claim; the hint that caused the attempt is dropped for
    /// good.
    NotFound,
    /// The attempt was aborted as part of normal shutdown or
    /// cancellation. Never counts against the hint.
    Cancelled,
    /// The payload arrived but is malformed. Retrying the same edition
    /// cannot help.
    Corrupt,
    /// Local resource exhaustion. Worth retrying later.
    OutOfResources,
    /// Connectivity problem. Worth retrying later.
    Connectivity,
}

/// Handle to a standing subscription on an updatable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked by the transport when data arrives on a
/// subscription. May be invoked from any task.
pub trait UpdateHandler: 'static + Send + Sync + std::fmt::Debug {
    /// New data for the subscribed identity at the given edition.
    fn update(
        &self,
        identity: IdentityId,
        edition: u64,
        data: bytes::Bytes,
    ) -> BoxFut<'_, ()>;
}

/// Trait-object [UpdateHandler].
pub type DynUpdateHandler = Arc<dyn UpdateHandler>;

/// The content-addressed network fetch primitives the schedulers build
/// on. Fetches are expensive, slow and unreliable; subscriptions are
/// cheap to keep running but expensive to create in bulk.
pub trait Transport: 'static + Send + Sync + std::fmt::Debug {
    /// Run a single fetch attempt for the key. No transport-level
    /// retries: the outcome classification decides what happens to the
    /// hint that requested it.
    fn fetch(&self, key: ContentKey) -> BoxFut<'static, FetchOutcome>;

    /// Open a long-lived, self-renewing subscription for the identity's
    /// data, starting at the given edition.
    fn subscribe(
        &self,
        identity: IdentityId,
        start_edition: u64,
        handler: DynUpdateHandler,
    ) -> BoxFut<'_, WotResult<SubscriptionId>>;

    /// Cancel a subscription. Cancelling an unknown subscription is a
    /// no-op, never an error.
    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
    ) -> BoxFut<'_, WotResult<()>>;
}

/// Trait-object [Transport].
pub type DynTransport = Arc<dyn Transport>;

/// A factory for constructing [Transport] instances.
pub trait TransportFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> WotResult<()>;

    /// Construct a transport instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, WotResult<DynTransport>>;
}

/// Trait-object [TransportFactory].
pub type DynTransportFactory = Arc<dyn TransportFactory>;
