//! The opportunistic bounded-concurrency downloader ("slow path").
//!
//! Everything eligible that is not covered by the hot-set watcher is
//! downloaded from here, driven by a prioritized queue of edition hints.
//! At most one fetch per target runs at a time, and at most
//! `parallel_request_count` fetches run overall. Every completion wakes
//! the refill loop so freed slots go to other targets right away; a
//! target that failed temporarily sits out a cooldown first, so a flaky
//! network cannot spin its claim.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wotfetch_api::{builder, config::*, hint_store::*, transport::*, *};

const MOD_NAME: &str = "CoreSlowDownloader";

/// Configuration parameters for [CoreSlowDownloaderFactory].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSlowDownloaderConfig {
    /// How many fetches may run concurrently. Default: 8.
    pub parallel_request_count: u32,

    /// Claims from sources below this capacity are ignored outright.
    /// Such sources sit too far from the local trust roots for their
    /// claims to be worth network traffic. Default: 2.
    pub min_source_capacity: u8,

    /// How long a target sits out of refill after a temporary fetch
    /// failure before its claim may be retried. Default: 10s.
    pub retry_cooldown_ms: u32,
}

impl CoreSlowDownloaderConfig {
    /// The post-failure cooldown as a [std::time::Duration].
    pub fn retry_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_cooldown_ms as u64)
    }
}

impl Default for CoreSlowDownloaderConfig {
    fn default() -> Self {
        Self {
            parallel_request_count: 8,
            min_source_capacity: 2,
            retry_cooldown_ms: 1000 * 10,
        }
    }
}

impl ModConfig for CoreSlowDownloaderConfig {}

/// The production opportunistic downloader factory.
#[derive(Debug)]
pub struct CoreSlowDownloaderFactory {}

impl CoreSlowDownloaderFactory {
    /// Construct a new CoreSlowDownloaderFactory.
    pub fn create() -> DynDownloaderFactory {
        let out: DynDownloaderFactory = Arc::new(Self {});
        out
    }
}

impl DownloaderFactory for CoreSlowDownloaderFactory {
    fn default_config(&self, config: &mut Config) -> WotResult<()> {
        config.add_default_module_config::<CoreSlowDownloaderConfig>(
            MOD_NAME.into(),
        )
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
        trust: DynTrustView,
        transport: DynTransport,
        output: DynOutputSink,
    ) -> BoxFut<'static, WotResult<DynDownloader>> {
        Box::pin(async move {
            let config = builder
                .config
                .get_module_config::<CoreSlowDownloaderConfig>(MOD_NAME)?;
            let store =
                builder.hint_store.create(builder.clone()).await?;
            let out: DynDownloader = Arc::new(CoreSlowDownloader::new(
                config, store, trust, transport, output,
            ));
            Ok(out)
        })
    }
}

struct InFlightFetch {
    cancel: Option<tokio::sync::oneshot::Sender<()>>,
}

#[derive(Default)]
struct Inner {
    in_flight: HashMap<IdentityId, InFlightFetch>,
    /// Targets sitting out a post-failure cooldown.
    deferred: HashSet<IdentityId>,
    succeeded: u64,
    skipped: u64,
    failed_temporarily: u64,
    failed_permanently: u64,
    not_found: u64,
    shutting_down: bool,
    fatal: Option<WotError>,
}

impl Inner {
    fn cancel_in_flight(&mut self, identity: &IdentityId) {
        if let Some(fetch) = self.in_flight.get_mut(identity) {
            if let Some(cancel) = fetch.cancel.take() {
                let _ = cancel.send(());
            }
        }
    }
}

/// Everything the refill loop and the per-fetch tasks need, cheaply
/// clonable into spawned tasks.
#[derive(Clone)]
struct TaskCtx {
    config: Arc<CoreSlowDownloaderConfig>,
    inner: Arc<Mutex<Inner>>,
    store: DynHintStore,
    trust: DynTrustView,
    transport: DynTransport,
    output: DynOutputSink,
    wake_send: tokio::sync::mpsc::Sender<()>,
    drained: Arc<tokio::sync::Notify>,
}

impl TaskCtx {
    /// Remember corruption so every later call fails with it too, then
    /// hand the error back for propagation.
    fn escalate(&self, err: WotError) -> WotError {
        if err.is_corrupt() {
            self.inner
                .lock()
                .unwrap()
                .fatal
                .get_or_insert_with(|| err.clone());
        }
        err
    }

    fn wake(&self) {
        // A full channel already guarantees a refill pass is coming.
        let _ = self.wake_send.try_send(());
    }
}

struct CoreSlowDownloader {
    ctx: TaskCtx,
    refill_task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for CoreSlowDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSlowDownloader").finish()
    }
}

impl Drop for CoreSlowDownloader {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

impl CoreSlowDownloader {
    fn new(
        config: CoreSlowDownloaderConfig,
        store: DynHintStore,
        trust: DynTrustView,
        transport: DynTransport,
        output: DynOutputSink,
    ) -> Self {
        let (wake_send, wake_recv) = tokio::sync::mpsc::channel(32);
        let ctx = TaskCtx {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner::default())),
            store,
            trust,
            transport,
            output,
            wake_send,
            drained: Arc::new(tokio::sync::Notify::new()),
        };
        let refill_task =
            tokio::task::spawn(refill_loop(ctx.clone(), wake_recv));
        Self { ctx, refill_task }
    }

    /// Whether callbacks should still do anything. Corruption is
    /// escalated to every caller; shutdown silently drops new work.
    fn check_active(&self) -> WotResult<bool> {
        let lock = self.ctx.inner.lock().unwrap();
        if let Some(err) = &lock.fatal {
            return Err(err.clone());
        }
        Ok(!lock.shutting_down)
    }
}

async fn refill_loop(
    ctx: TaskCtx,
    mut wake_recv: tokio::sync::mpsc::Receiver<()>,
) {
    while wake_recv.recv().await.is_some() {
        // Coalesce a burst of wakes into one pass.
        while wake_recv.try_recv().is_ok() {}
        refill(&ctx).await;
    }
}

/// Fill free fetch slots with the highest-priority hints whose targets
/// are not already being fetched.
async fn refill(ctx: &TaskCtx) {
    let (limit, exclude) = {
        let lock = ctx.inner.lock().unwrap();
        if lock.shutting_down || lock.fatal.is_some() {
            return;
        }
        let limit = (ctx.config.parallel_request_count as usize)
            .saturating_sub(lock.in_flight.len());
        let exclude = lock
            .in_flight
            .keys()
            .chain(lock.deferred.iter())
            .cloned()
            .collect::<Vec<_>>();
        (limit, exclude)
    };
    if limit == 0 {
        return;
    }

    let hints = match ctx.store.select_ready(exclude, limit).await {
        Ok(hints) => hints,
        Err(err) => {
            let err = ctx.escalate(err);
            tracing::error!(?err, "failed to query ready hints");
            return;
        }
    };

    for hint in hints {
        let (cancel_send, cancel_recv) = tokio::sync::oneshot::channel();
        {
            let mut lock = ctx.inner.lock().unwrap();
            if lock.shutting_down {
                return;
            }
            lock.in_flight.insert(
                hint.target.clone(),
                InFlightFetch {
                    cancel: Some(cancel_send),
                },
            );
        }
        tokio::task::spawn(fetch_task(ctx.clone(), hint, cancel_recv));
    }
}

async fn fetch_task(
    ctx: TaskCtx,
    hint: Hint,
    cancel: tokio::sync::oneshot::Receiver<()>,
) {
    let fetch = ctx.transport.fetch(hint.content_key());
    let outcome = tokio::select! {
        outcome = fetch => outcome,
        _ = cancel => FetchOutcome::Cancelled,
    };

    let wake = match handle_outcome(&ctx, &hint, outcome).await {
        Ok(wake) => wake,
        Err(err) => {
            let err = ctx.escalate(err);
            tracing::error!(
                ?err,
                target = ?hint.target,
                "failed handling fetch outcome"
            );
            false
        }
    };

    let (drained, shutting_down) = {
        let mut lock = ctx.inner.lock().unwrap();
        lock.in_flight.remove(&hint.target);
        (lock.in_flight.is_empty(), lock.shutting_down)
    };
    if shutting_down {
        if drained {
            ctx.drained.notify_waiters();
        }
    } else if wake {
        ctx.wake();
    }
}

/// Apply a fetch outcome to the queue and the counters. Returns whether
/// the refill loop should run again so the freed slot is filled; only
/// cancellation skips the wake, since it is part of a purge or shutdown.
async fn handle_outcome(
    ctx: &TaskCtx,
    hint: &Hint,
    outcome: FetchOutcome,
) -> WotResult<bool> {
    match outcome {
        FetchOutcome::Success { data } => {
            ctx.output
                .enqueue(hint.target.clone(), hint.edition, data)
                .await?;
            let pruned = ctx
                .store
                .remove_target_up_to(hint.target.clone(), hint.edition)
                .await?;
            let mut lock = ctx.inner.lock().unwrap();
            lock.succeeded += 1;
            // Everything else pruned was satisfied without its own fetch.
            lock.skipped += pruned.saturating_sub(1) as u64;
            Ok(true)
        }
        FetchOutcome::NotFound => {
            // A lie or a stale claim. Drop it, but spare any newer claim
            // that replaced it while we were fetching.
            ctx.store
                .remove_exact(hint.key(), hint.edition)
                .await?;
            ctx.inner.lock().unwrap().not_found += 1;
            Ok(true)
        }
        FetchOutcome::Corrupt => {
            tracing::warn!(
                target = ?hint.target,
                edition = hint.edition,
                "fetched payload was malformed"
            );
            ctx.store
                .remove_exact(hint.key(), hint.edition)
                .await?;
            ctx.inner.lock().unwrap().failed_permanently += 1;
            Ok(true)
        }
        FetchOutcome::OutOfResources | FetchOutcome::Connectivity => {
            {
                let mut lock = ctx.inner.lock().unwrap();
                lock.failed_temporarily += 1;
                lock.deferred.insert(hint.target.clone());
            }
            // The cooldown keeps this target out of refill while the
            // freed slot goes to other queued targets.
            let ctx = ctx.clone();
            let target = hint.target.clone();
            tokio::task::spawn(async move {
                tokio::time::sleep(ctx.config.retry_cooldown()).await;
                if ctx.inner.lock().unwrap().deferred.remove(&target) {
                    ctx.wake();
                }
            });
            Ok(true)
        }
        FetchOutcome::Cancelled => Ok(false),
    }
}

/// Queue hints for a target from every adequate incoming trust edge,
/// plus the self-hint when an own identity is not covered by the
/// watcher. Returns whether anything was queued.
async fn rebuild_hints(
    ctx: &TaskCtx,
    identity: &IdentityId,
) -> WotResult<bool> {
    let mut queued = false;
    for edge in ctx.trust.hinting_edges(identity.clone()).await? {
        if edge.source_capacity < ctx.config.min_source_capacity {
            continue;
        }
        let hint = match Hint::new(
            edge.source,
            edge.target,
            edge.date,
            edge.source_capacity,
            edge.source_score,
            edge.edition,
        ) {
            Ok(hint) => hint,
            Err(err) => {
                tracing::debug!(?err, "skipping unusable trust edge");
                continue;
            }
        };
        if ctx.store.insert(hint).await? != InsertOutcome::Rejected {
            queued = true;
        }
    }
    if ctx.trust.is_own(identity.clone()).await?
        && !watch_covered(&ctx.trust, identity).await?
    {
        // No peer may know this identity yet. The self-hint keeps it
        // re-acquirable from our own next-edition counter.
        let edition = ctx.trust.next_edition(identity.clone()).await?;
        let outcome = ctx
            .store
            .insert(Hint::new_self(identity.clone(), edition))
            .await?;
        if outcome != InsertOutcome::Rejected {
            queued = true;
        }
    }
    Ok(queued)
}

/// Drop everything queued or running for the identity.
async fn purge_identity(
    ctx: &TaskCtx,
    identity: &IdentityId,
) -> WotResult<()> {
    ctx.store.remove_for_identity(identity.clone()).await?;
    let mut lock = ctx.inner.lock().unwrap();
    lock.deferred.remove(identity);
    lock.cancel_in_flight(identity);
    Ok(())
}

impl Downloader for CoreSlowDownloader {
    fn on_eligibility_changed(
        &self,
        identity: IdentityId,
        eligible: bool,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if !eligible {
                purge_identity(&ctx, &identity)
                    .await
                    .map_err(|e| ctx.escalate(e))?;
                return Ok(());
            }
            if watch_covered(&ctx.trust, &identity).await? {
                // The hot-set watcher owns it.
                return Ok(());
            }
            if rebuild_hints(&ctx, &identity)
                .await
                .map_err(|e| ctx.escalate(e))?
            {
                ctx.wake();
            }
            Ok(())
        })
    }

    fn on_new_hint(&self, claim: HintClaim) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if claim.source_capacity < ctx.config.min_source_capacity {
                return Ok(());
            }
            if !ctx.trust.is_eligible(claim.target.clone()).await? {
                return Ok(());
            }
            if watch_covered(&ctx.trust, &claim.target).await? {
                return Ok(());
            }
            let hint = match Hint::new(
                claim.source,
                claim.target,
                claim.date,
                claim.source_capacity,
                claim.source_score,
                claim.edition,
            ) {
                Ok(hint) => hint,
                Err(err) => {
                    tracing::debug!(?err, "rejecting unusable claim");
                    return Ok(());
                }
            };
            let outcome = ctx
                .store
                .insert(hint)
                .await
                .map_err(|e| ctx.escalate(e))?;
            if outcome != InsertOutcome::Rejected {
                ctx.wake();
            }
            Ok(())
        })
    }

    fn on_trust_changed(
        &self,
        old: Option<TrustEdge>,
        new: Option<TrustEdge>,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            let target = match new.as_ref().or(old.as_ref()) {
                Some(edge) => edge.target.clone(),
                None => return Ok(()),
            };
            if !ctx.trust.is_eligible(target.clone()).await? {
                // An eligibility callback handles the full purge.
                return Ok(());
            }
            if watch_covered(&ctx.trust, &target).await? {
                // The edge change may have promoted the target into the
                // hot set; whatever we had queued is now the watcher's.
                purge_identity(&ctx, &target)
                    .await
                    .map_err(|e| ctx.escalate(e))?;
                return Ok(());
            }
            match new {
                Some(edge) => {
                    if edge.source_capacity < ctx.config.min_source_capacity
                    {
                        // The source fell below the threshold; whatever
                        // claim it had stored goes with it.
                        ctx.store
                            .remove(HintKey {
                                source: edge.source,
                                target: edge.target,
                            })
                            .await
                            .map_err(|e| ctx.escalate(e))?;
                        return Ok(());
                    }
                    let hint = match Hint::new(
                        edge.source,
                        edge.target,
                        edge.date,
                        edge.source_capacity,
                        edge.source_score,
                        edge.edition,
                    ) {
                        Ok(hint) => hint,
                        Err(_) => return Ok(()),
                    };
                    let outcome = ctx
                        .store
                        .insert(hint)
                        .await
                        .map_err(|e| ctx.escalate(e))?;
                    if outcome != InsertOutcome::Rejected {
                        ctx.wake();
                    }
                }
                None => {
                    if let Some(edge) = old {
                        ctx.store
                            .remove(HintKey {
                                source: edge.source,
                                target: edge.target,
                            })
                            .await
                            .map_err(|e| ctx.escalate(e))?;
                    }
                }
            }
            Ok(())
        })
    }

    fn on_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            purge_identity(&ctx, &identity)
                .await
                .map_err(|e| ctx.escalate(e))
        })
    }

    fn on_own_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        self.on_identity_pre_delete(identity)
    }

    fn on_own_identity_post_delete(
        &self,
        replacement: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if !ctx.trust.is_eligible(replacement.clone()).await? {
                return Ok(());
            }
            if watch_covered(&ctx.trust, &replacement).await? {
                return Ok(());
            }
            if rebuild_hints(&ctx, &replacement)
                .await
                .map_err(|e| ctx.escalate(e))?
            {
                ctx.wake();
            }
            Ok(())
        })
    }

    fn on_own_identity_pre_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if watch_covered(&ctx.trust, &identity).await? {
                return Ok(());
            }
            if rebuild_hints(&ctx, &identity)
                .await
                .map_err(|e| ctx.escalate(e))?
            {
                ctx.wake();
            }
            Ok(())
        })
    }

    fn on_own_identity_post_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if watch_covered(&ctx.trust, &identity).await? {
                // Restoration rooted the identity; the watcher takes over.
                purge_identity(&ctx, &identity)
                    .await
                    .map_err(|e| ctx.escalate(e))?;
            }
            Ok(())
        })
    }

    fn on_refetch_requested(
        &self,
        identity: IdentityId,
        _edition: u64,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            if !ctx.trust.is_eligible(identity.clone()).await? {
                return Ok(());
            }
            if watch_covered(&ctx.trust, &identity).await? {
                return Ok(());
            }
            if rebuild_hints(&ctx, &identity)
                .await
                .map_err(|e| ctx.escalate(e))?
            {
                ctx.wake();
            }
            Ok(())
        })
    }

    fn should_fetch(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(false);
            }
            Ok(ctx.trust.is_eligible(identity.clone()).await?
                && !watch_covered(&ctx.trust, &identity).await?)
        })
    }

    fn delete_all_commands(&self) -> BoxFut<'_, WotResult<()>> {
        // Nothing deferred on this path; fetches run as hints arrive.
        Box::pin(async move { Ok(()) })
    }

    fn stats(&self) -> BoxFut<'_, WotResult<DownloaderStats>> {
        let ctx = self.ctx.clone();
        Box::pin(async move {
            let queued = ctx.store.count().await? as u64;
            let lock = ctx.inner.lock().unwrap();
            Ok(DownloaderStats {
                queued,
                running: lock.in_flight.len() as u64,
                watching: 0,
                pending_commands: 0,
                succeeded: lock.succeeded,
                skipped: lock.skipped,
                failed_temporarily: lock.failed_temporarily,
                failed_permanently: lock.failed_permanently,
                not_found: lock.not_found,
            })
        })
    }

    fn shutdown(&self) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        Box::pin(async move {
            {
                let mut lock = ctx.inner.lock().unwrap();
                lock.shutting_down = true;
                let targets: Vec<IdentityId> =
                    lock.in_flight.keys().cloned().collect();
                for target in targets {
                    lock.cancel_in_flight(&target);
                }
            }
            loop {
                // Arm before checking so a completion between the check
                // and the await cannot be missed.
                let notified = ctx.drained.notified();
                if ctx.inner.lock().unwrap().in_flight.is_empty() {
                    break;
                }
                notified.await;
            }
            Ok(())
        })
    }
}
