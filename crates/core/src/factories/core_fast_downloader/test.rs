use super::*;
use crate::factories::mem_transport::MemTransport;
use wotfetch_test_utils::*;

struct Test {
    trust: Arc<MemTrustView>,
    transport: Arc<MemTransport>,
    output: Arc<MemOutputSink>,
    dl: CoreFastDownloader,
}

impl Test {
    fn with_config(config: CoreFastDownloaderConfig) -> Self {
        enable_tracing();
        let trust = Arc::new(MemTrustView::default());
        let transport = MemTransport::create();
        let output = Arc::new(MemOutputSink::default());
        let dl = CoreFastDownloader::new(
            config,
            trust.clone(),
            transport.clone(),
            output.clone(),
        );
        Self {
            trust,
            transport,
            output,
            dl,
        }
    }

    fn new() -> Self {
        Self::with_config(CoreFastDownloaderConfig {
            batch_delay_ms: 10,
            retry_delay_ms: 10,
        })
    }

    /// An identity that belongs in the hot set.
    fn hot_identity(&self) -> IdentityId {
        let id = random_identity_id();
        self.trust.set_eligible(id.clone(), true);
        self.trust.set_directly_trusted(id.clone(), true);
        id
    }

    /// Reconcile the identity and wait until it is watched.
    async fn watch(&self, id: &IdentityId) {
        self.dl
            .on_eligibility_changed(id.clone(), true)
            .await
            .unwrap();
        iter_check!({
            if self
                .transport
                .subscribed_identities()
                .contains(id)
            {
                break;
            }
        });
    }

    async fn stats(&self) -> DownloaderStats {
        self.dl.stats().await.unwrap()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_set_follows_the_trust_graph() {
    let test = Test::new();
    let id = test.hot_identity();
    test.trust.set_next_edition(id.clone(), 4);

    test.watch(&id).await;
    assert_eq!(Some(4), test.transport.subscription_start(&id));
    assert_eq!(1, test.stats().await.watching);
    assert!(test.dl.should_fetch(id.clone()).await.unwrap());

    // The direct trust goes away; the identity falls out of the hot set.
    test.trust.set_directly_trusted(id.clone(), false);
    test.dl
        .on_trust_changed(
            Some(TrustEdge {
                source: random_identity_id(),
                target: id.clone(),
                date: Timestamp::now(),
                source_capacity: 100,
                source_score: 50,
                edition: 4,
            }),
            None,
        )
        .await
        .unwrap();

    iter_check!({
        if test.transport.subscription_count() == 0 {
            break;
        }
    });
    assert_eq!(0, test.stats().await.watching);
    assert!(!test.dl.should_fetch(id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn opposing_commands_collapse_within_the_batch_delay() {
    let test = Test::with_config(CoreFastDownloaderConfig {
        batch_delay_ms: 1000 * 60,
        retry_delay_ms: 1000 * 60,
    });
    // Consume the immediate startup pass with an unrelated identity, so
    // everything after runs on the coalescing delay.
    let warmup = test.hot_identity();
    test.watch(&warmup).await;

    let id = test.hot_identity();
    test.dl
        .on_eligibility_changed(id.clone(), true)
        .await
        .unwrap();
    assert_eq!(1, test.stats().await.pending_commands);

    test.trust.set_eligible(id.clone(), false);
    test.dl
        .on_eligibility_changed(id.clone(), false)
        .await
        .unwrap();

    // The start and the stop cancelled out; nothing for `id` ever
    // reaches the transport.
    assert_eq!(0, test.stats().await.pending_commands);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(1, test.transport.subscribe_count());
    assert_eq!(0, test.transport.unsubscribe_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn urgent_events_cut_an_open_coalescing_window_short() {
    let test = Test::with_config(CoreFastDownloaderConfig {
        batch_delay_ms: 1000 * 60,
        retry_delay_ms: 1000 * 60,
    });
    let warmup = test.hot_identity();
    test.watch(&warmup).await;

    // A normal wake opens the 60s window.
    let id = test.hot_identity();
    test.dl
        .on_eligibility_changed(id.clone(), true)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // The delete must not wait the window out.
    test.dl
        .on_identity_pre_delete(warmup.clone())
        .await
        .unwrap();
    iter_check!({
        let subscribed = test.transport.subscribed_identities();
        if !subscribed.contains(&warmup) && subscribed.contains(&id) {
            break;
        }
    });
}

/// Delegates to a [MemTransport] but parks subscribe calls until the
/// test hands out a permit.
#[derive(Debug)]
struct GatedTransport {
    inner: Arc<MemTransport>,
    gate: Arc<tokio::sync::Semaphore>,
    attempts: std::sync::atomic::AtomicUsize,
}

impl Transport for GatedTransport {
    fn fetch(&self, key: ContentKey) -> BoxFut<'static, FetchOutcome> {
        self.inner.fetch(key)
    }

    fn subscribe(
        &self,
        identity: IdentityId,
        start_edition: u64,
        handler: DynUpdateHandler,
    ) -> BoxFut<'_, WotResult<SubscriptionId>> {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Box::pin(async move {
            self.gate.acquire().await.unwrap().forget();
            self.inner.subscribe(identity, start_edition, handler).await
        })
    }

    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
    ) -> BoxFut<'_, WotResult<()>> {
        self.inner.unsubscribe(subscription)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn eligibility_loss_during_a_slow_subscribe_still_stops_the_watch() {
    enable_tracing();
    let trust = Arc::new(MemTrustView::default());
    let mem = MemTransport::create();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = Arc::new(GatedTransport {
        inner: mem.clone(),
        gate: gate.clone(),
        attempts: Default::default(),
    });
    let dl = CoreFastDownloader::new(
        CoreFastDownloaderConfig {
            batch_delay_ms: 10,
            retry_delay_ms: 10,
        },
        trust.clone(),
        transport.clone(),
        Arc::new(MemOutputSink::default()),
    );

    let id = random_identity_id();
    trust.set_eligible(id.clone(), true);
    trust.set_directly_trusted(id.clone(), true);
    dl.on_eligibility_changed(id.clone(), true).await.unwrap();

    // The start command is mid-execution, parked inside subscribe.
    iter_check!({
        if transport
            .attempts
            .load(std::sync::atomic::Ordering::SeqCst)
            == 1
        {
            break;
        }
    });

    // The stop arriving now must not be dropped against the stale
    // not-yet-watching state.
    trust.set_eligible(id.clone(), false);
    dl.on_eligibility_changed(id.clone(), false).await.unwrap();

    gate.add_permits(1);
    iter_check!({
        if mem.subscribe_count() == 1 && mem.subscription_count() == 0 {
            break;
        }
    });
    assert_eq!(0, dl.stats().await.unwrap().watching);
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_flow_into_the_output_queue() {
    let test = Test::new();
    let id = test.hot_identity();
    test.watch(&id).await;

    let data = random_bytes(16);
    test.transport.publish(id.clone(), 1, data.clone()).await;

    iter_check!({
        if !test.output.is_empty() {
            break;
        }
    });
    assert_eq!(vec![(id.clone(), 1, data.clone())], test.output.entries());
    assert_eq!(1, test.stats().await.succeeded);

    // A replay of an already-delivered edition is dropped.
    test.transport.publish(id.clone(), 1, data).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(1, test.output.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn refetch_is_ignored_once_progress_was_made() {
    let test = Test::new();
    let id = test.hot_identity();
    test.watch(&id).await;

    test.transport
        .publish(id.clone(), 7, random_bytes(4))
        .await;
    iter_check!({
        if !test.output.is_empty() {
            break;
        }
    });

    test.dl
        .on_refetch_requested(id.clone(), 5)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // No restart: the watched edition never moves backward.
    assert_eq!(1, test.transport.subscribe_count());
    assert_eq!(Some(0), test.transport.subscription_start(&id));
}

#[tokio::test(flavor = "multi_thread")]
async fn refetch_below_the_start_edition_restarts_the_watch() {
    let test = Test::new();
    let id = test.hot_identity();
    test.trust.set_next_edition(id.clone(), 5);
    test.watch(&id).await;
    assert_eq!(Some(5), test.transport.subscription_start(&id));

    // Nothing arrived yet and editions below the start are wanted.
    test.dl
        .on_refetch_requested(id.clone(), 3)
        .await
        .unwrap();

    iter_check!({
        if test.transport.subscription_start(&id) == Some(3) {
            break;
        }
    });
    assert_eq!(2, test.transport.subscribe_count());
    assert_eq!(1, test.transport.unsubscribe_count());
    assert_eq!(1, test.stats().await.watching);
}

#[tokio::test(flavor = "multi_thread")]
async fn refetch_within_the_open_range_is_a_no_op() {
    let test = Test::new();
    let id = test.hot_identity();
    test.watch(&id).await;

    test.dl
        .on_refetch_requested(id.clone(), 2)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(1, test.transport.subscribe_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn deletion_stops_the_watch() {
    let test = Test::new();
    let id = test.hot_identity();
    test.watch(&id).await;

    test.dl
        .on_identity_pre_delete(id.clone())
        .await
        .unwrap();
    iter_check!({
        if test.transport.subscription_count() == 0 {
            break;
        }
    });
    assert_eq!(0, test.stats().await.watching);
}

#[tokio::test(flavor = "multi_thread")]
async fn own_identity_restore_replays_from_edition_zero() {
    let test = Test::new();
    let id = test.hot_identity();
    test.trust.set_own(id.clone(), true);
    test.trust.set_local_root(id.clone(), true);
    test.trust.set_next_edition(id.clone(), 9);
    test.watch(&id).await;
    assert_eq!(Some(9), test.transport.subscription_start(&id));

    test.dl
        .on_own_identity_pre_restore(id.clone())
        .await
        .unwrap();
    iter_check!({
        if test.transport.subscription_start(&id) == Some(0) {
            break;
        }
    });

    // Restoration done: pick the watch back up at the current counter.
    test.dl
        .on_own_identity_post_restore(id.clone())
        .await
        .unwrap();
    iter_check!({
        if test.transport.subscription_start(&id) == Some(9) {
            break;
        }
    });
    assert_eq!(3, test.transport.subscribe_count());
    assert_eq!(1, test.stats().await.watching);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_all_commands_drops_pending_work() {
    let test = Test::with_config(CoreFastDownloaderConfig {
        batch_delay_ms: 1000 * 60,
        retry_delay_ms: 1000 * 60,
    });
    let warmup = test.hot_identity();
    test.watch(&warmup).await;

    let id = test.hot_identity();
    test.dl
        .on_eligibility_changed(id.clone(), true)
        .await
        .unwrap();
    assert_eq!(1, test.stats().await.pending_commands);

    test.dl.delete_all_commands().await.unwrap();
    assert_eq!(0, test.stats().await.pending_commands);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(1, test.transport.subscribe_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_all_subscriptions() {
    let test = Test::new();
    let a = test.hot_identity();
    let b = test.hot_identity();
    test.watch(&a).await;
    test.watch(&b).await;
    assert_eq!(2, test.transport.subscription_count());

    test.dl.shutdown().await.unwrap();
    assert_eq!(0, test.transport.subscription_count());
    assert_eq!(0, test.stats().await.watching);
    assert!(!test.dl.should_fetch(a).await.unwrap());

    // New reconciles are dropped after shutdown.
    let subscribes = test.transport.subscribe_count();
    test.dl
        .on_eligibility_changed(b.clone(), true)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(subscribes, test.transport.subscribe_count());
}
