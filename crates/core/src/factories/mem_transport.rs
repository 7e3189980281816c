//! A memory-backed transport for local operation and testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wotfetch_api::{builder, config::*, transport::*, *};

const MOD_NAME: &str = "MemTransport";

/// Configuration parameters for [MemTransportFactory]. Currently empty;
/// kept for config-file uniformity across modules.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemTransportConfig {}

impl ModConfig for MemTransportConfig {}

/// A memory-based transport factory. Only ever resolves content that was
/// published on the same instance; anything beyond local operation needs
/// a binding to a real content-addressed network.
#[derive(Debug)]
pub struct MemTransportFactory {}

impl MemTransportFactory {
    /// Construct a new MemTransportFactory.
    pub fn create() -> DynTransportFactory {
        let out: DynTransportFactory = Arc::new(Self {});
        out
    }
}

impl TransportFactory for MemTransportFactory {
    fn default_config(&self, config: &mut Config) -> WotResult<()> {
        config.add_default_module_config::<MemTransportConfig>(
            MOD_NAME.into(),
        )
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, WotResult<DynTransport>> {
        Box::pin(async move {
            let _config = builder
                .config
                .get_module_config::<MemTransportConfig>(MOD_NAME)?;
            let out: DynTransport = MemTransport::create();
            Ok(out)
        })
    }
}

#[derive(Default)]
struct Inner {
    manual: bool,
    published: HashMap<ContentKey, bytes::Bytes>,
    outcomes: HashMap<ContentKey, FetchOutcome>,
    pending: HashMap<ContentKey, tokio::sync::oneshot::Sender<FetchOutcome>>,
    fetch_log: Vec<ContentKey>,
    subs: HashMap<SubscriptionId, (IdentityId, u64, DynUpdateHandler)>,
    next_sub_id: u64,
    subscribe_count: usize,
    unsubscribe_count: usize,
}

/// The memory transport. Beyond the [Transport] impl it exposes
/// publishing plus the scripting and inspection hooks the module tests
/// drive fetch outcomes with.
#[derive(Default)]
pub struct MemTransport(Mutex<Inner>);

impl std::fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTransport").finish()
    }
}

impl MemTransport {
    /// Construct a new MemTransport.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish data for an identity at an edition: subsequent fetches of
    /// the key succeed and every matching subscription is notified.
    pub async fn publish(
        &self,
        identity: IdentityId,
        edition: u64,
        data: bytes::Bytes,
    ) {
        let handlers: Vec<DynUpdateHandler> = {
            let mut inner = self.0.lock().unwrap();
            inner.published.insert(
                ContentKey {
                    identity: identity.clone(),
                    edition,
                },
                data.clone(),
            );
            inner
                .subs
                .values()
                .filter(|(id, start, _)| *id == identity && *start <= edition)
                .map(|(_, _, h)| h.clone())
                .collect()
        };
        for handler in handlers {
            handler.update(identity.clone(), edition, data.clone()).await;
        }
    }

    /// In manual mode fetches park until [MemTransport::resolve_pending]
    /// is called for their key.
    pub fn set_manual(&self, manual: bool) {
        self.0.lock().unwrap().manual = manual;
    }

    /// Script the outcome of future fetches of the key.
    pub fn set_outcome(&self, key: ContentKey, outcome: FetchOutcome) {
        self.0.lock().unwrap().outcomes.insert(key, outcome);
    }

    /// Resolve a parked manual-mode fetch. Returns false if no fetch is
    /// parked on the key or the fetcher already gave up on it.
    pub fn resolve_pending(
        &self,
        key: &ContentKey,
        outcome: FetchOutcome,
    ) -> bool {
        match self.0.lock().unwrap().pending.remove(key) {
            Some(send) => send.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Keys of currently parked manual-mode fetches.
    pub fn pending_keys(&self) -> Vec<ContentKey> {
        self.0.lock().unwrap().pending.keys().cloned().collect()
    }

    /// Number of currently parked manual-mode fetches.
    pub fn pending_count(&self) -> usize {
        self.0.lock().unwrap().pending.len()
    }

    /// Every fetch attempted so far, in call order.
    pub fn fetch_log(&self) -> Vec<ContentKey> {
        self.0.lock().unwrap().fetch_log.clone()
    }

    /// Number of fetches attempted so far.
    pub fn fetch_count(&self) -> usize {
        self.0.lock().unwrap().fetch_log.len()
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.0.lock().unwrap().subs.len()
    }

    /// Identities with at least one open subscription.
    pub fn subscribed_identities(&self) -> Vec<IdentityId> {
        self.0
            .lock()
            .unwrap()
            .subs
            .values()
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    /// The start edition of the open subscription on the identity, if any.
    pub fn subscription_start(&self, identity: &IdentityId) -> Option<u64> {
        self.0
            .lock()
            .unwrap()
            .subs
            .values()
            .find(|(id, _, _)| id == identity)
            .map(|(_, start, _)| *start)
    }

    /// Number of subscribe calls so far.
    pub fn subscribe_count(&self) -> usize {
        self.0.lock().unwrap().subscribe_count
    }

    /// Number of unsubscribe calls so far.
    pub fn unsubscribe_count(&self) -> usize {
        self.0.lock().unwrap().unsubscribe_count
    }
}

impl Transport for MemTransport {
    fn fetch(&self, key: ContentKey) -> BoxFut<'static, FetchOutcome> {
        let mut inner = self.0.lock().unwrap();
        inner.fetch_log.push(key.clone());
        if inner.manual {
            let (send, recv) = tokio::sync::oneshot::channel();
            inner.pending.insert(key, send);
            Box::pin(async move {
                recv.await.unwrap_or(FetchOutcome::Cancelled)
            })
        } else {
            let outcome = match inner.outcomes.get(&key) {
                Some(outcome) => outcome.clone(),
                None => match inner.published.get(&key) {
                    Some(data) => FetchOutcome::Success { data: data.clone() },
                    None => FetchOutcome::NotFound,
                },
            };
            Box::pin(async move { outcome })
        }
    }

    fn subscribe(
        &self,
        identity: IdentityId,
        start_edition: u64,
        handler: DynUpdateHandler,
    ) -> BoxFut<'_, WotResult<SubscriptionId>> {
        let mut inner = self.0.lock().unwrap();
        inner.subscribe_count += 1;
        inner.next_sub_id += 1;
        let id = SubscriptionId(inner.next_sub_id);
        inner.subs.insert(id, (identity, start_edition, handler));
        Box::pin(async move { Ok(id) })
    }

    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
    ) -> BoxFut<'_, WotResult<()>> {
        let mut inner = self.0.lock().unwrap();
        inner.unsubscribe_count += 1;
        inner.subs.remove(&subscription);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use wotfetch_test_utils::{random_bytes, random_identity_id};

    #[derive(Debug, Default)]
    struct RecordingHandler(Mutex<Vec<(IdentityId, u64, bytes::Bytes)>>);

    impl UpdateHandler for RecordingHandler {
        fn update(
            &self,
            identity: IdentityId,
            edition: u64,
            data: bytes::Bytes,
        ) -> BoxFut<'_, ()> {
            self.0.lock().unwrap().push((identity, edition, data));
            Box::pin(async move {})
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unpublished_content_is_not_found() {
        let t = MemTransport::create();
        let key = ContentKey {
            identity: random_identity_id(),
            edition: 0,
        };
        assert!(matches!(
            t.fetch(key).await,
            FetchOutcome::NotFound
        ));
        assert_eq!(1, t.fetch_count());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn published_content_resolves() {
        let t = MemTransport::create();
        let id = random_identity_id();
        let data = random_bytes(64);
        t.publish(id.clone(), 3, data.clone()).await;
        match t
            .fetch(ContentKey {
                identity: id,
                edition: 3,
            })
            .await
        {
            FetchOutcome::Success { data: got } => assert_eq!(data, got),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scripted_outcomes_override_published() {
        let t = MemTransport::create();
        let id = random_identity_id();
        let key = ContentKey {
            identity: id.clone(),
            edition: 1,
        };
        t.publish(id, 1, random_bytes(8)).await;
        t.set_outcome(key.clone(), FetchOutcome::Connectivity);
        assert!(matches!(t.fetch(key).await, FetchOutcome::Connectivity));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_fetches_park_until_resolved() {
        let t = MemTransport::create();
        t.set_manual(true);
        let key = ContentKey {
            identity: random_identity_id(),
            edition: 7,
        };
        let fut = t.fetch(key.clone());
        assert_eq!(vec![key.clone()], t.pending_keys());
        assert!(t.resolve_pending(&key, FetchOutcome::Corrupt));
        assert!(matches!(fut.await, FetchOutcome::Corrupt));
        assert!(!t.resolve_pending(&key, FetchOutcome::NotFound));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscriptions_receive_matching_editions_only() {
        let t = MemTransport::create();
        let id = random_identity_id();
        let handler = Arc::new(RecordingHandler::default());
        let sub = t
            .subscribe(id.clone(), 5, handler.clone())
            .await
            .unwrap();

        t.publish(id.clone(), 4, random_bytes(4)).await;
        t.publish(id.clone(), 5, random_bytes(4)).await;
        t.publish(random_identity_id(), 9, random_bytes(4)).await;

        let got = handler.0.lock().unwrap().clone();
        assert_eq!(1, got.len());
        assert_eq!(5, got[0].1);

        t.unsubscribe(sub).await.unwrap();
        t.publish(id, 6, random_bytes(4)).await;
        assert_eq!(1, handler.0.lock().unwrap().len());
        assert_eq!(0, t.subscription_count());

        // Unknown subscription ids are a no-op.
        t.unsubscribe(SubscriptionId(999)).await.unwrap();
    }
}
