//! The subscription-based hot-set watcher ("fast path").
//!
//! Local trust roots and directly trusted identities are few, and their
//! data is what the local user actually looks at, so each of them gets a
//! standing transport subscription instead of hint-driven polling.
//! Watch-set changes are queued as start/stop commands and executed in
//! coalesced batches, so a burst of trust churn settles to the minimal
//! set of subscription transitions. Lifecycle events (deletes, restores,
//! refetches) bypass the coalescing delay.

use crate::factories::{Command, CommandQueue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wotfetch_api::{builder, config::*, transport::*, *};

const MOD_NAME: &str = "CoreFastDownloader";

/// Configuration parameters for [CoreFastDownloaderFactory].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreFastDownloaderConfig {
    /// How long to let watch-set commands accumulate before executing
    /// the batch. Lifecycle events skip this delay. Default: 10s.
    pub batch_delay_ms: u32,

    /// How long to wait before retrying a command batch that failed with
    /// a non-fatal error. Default: 60s.
    pub retry_delay_ms: u32,
}

impl CoreFastDownloaderConfig {
    /// The coalescing delay as a [std::time::Duration].
    pub fn batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_delay_ms as u64)
    }

    /// The retry delay as a [std::time::Duration].
    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms as u64)
    }
}

impl Default for CoreFastDownloaderConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 1000 * 10,
            retry_delay_ms: 1000 * 60,
        }
    }
}

impl ModConfig for CoreFastDownloaderConfig {}

/// The production hot-set watcher factory.
#[derive(Debug)]
pub struct CoreFastDownloaderFactory {}

impl CoreFastDownloaderFactory {
    /// Construct a new CoreFastDownloaderFactory.
    pub fn create() -> DynDownloaderFactory {
        let out: DynDownloaderFactory = Arc::new(Self {});
        out
    }
}

impl DownloaderFactory for CoreFastDownloaderFactory {
    fn default_config(&self, config: &mut Config) -> WotResult<()> {
        config.add_default_module_config::<CoreFastDownloaderConfig>(
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
                .get_module_config::<CoreFastDownloaderConfig>(MOD_NAME)?;
            let out: DynDownloader = Arc::new(CoreFastDownloader::new(
                config, trust, transport, output,
            ));
            Ok(out)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// Process after the coalescing delay.
    Normal,
    /// Process immediately.
    Urgent,
}

struct WatchEntry {
    subscription: SubscriptionId,
    start_edition: u64,
    last_received: Option<u64>,
}

#[derive(Default)]
struct Inner {
    watching: HashMap<IdentityId, WatchEntry>,
    commands: CommandQueue,
    /// Commands drained from the queue but not yet executed. New requests
    /// collapse against these, not the stale `watching` state.
    executing: HashMap<IdentityId, Command>,
    /// Forced start editions for queued restarts. Consumed on execution.
    restart_editions: HashMap<IdentityId, u64>,
    first_pass_done: bool,
    succeeded: u64,
    shutting_down: bool,
    fatal: Option<WotError>,
}

impl Inner {
    /// Whether the identity will be watched once any mid-execution
    /// command for it has landed.
    fn effectively_watched(&self, identity: &IdentityId) -> bool {
        match self.executing.get(identity) {
            Some(Command::Start) => true,
            Some(Command::Stop) => false,
            None => self.watching.contains_key(identity),
        }
    }
}

#[derive(Clone)]
struct FastCtx {
    config: Arc<CoreFastDownloaderConfig>,
    inner: Arc<Mutex<Inner>>,
    trust: DynTrustView,
    transport: DynTransport,
    output: DynOutputSink,
    wake_send: tokio::sync::mpsc::Sender<Wake>,
}

impl FastCtx {
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

    fn wake(&self, wake: Wake) {
        let _ = self.wake_send.try_send(wake);
    }
}

/// Delivers subscription updates into the output queue and the watch
/// bookkeeping.
struct SubscriptionSink {
    inner: Arc<Mutex<Inner>>,
    output: DynOutputSink,
}

impl std::fmt::Debug for SubscriptionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSink").finish()
    }
}

impl UpdateHandler for SubscriptionSink {
    fn update(
        &self,
        identity: IdentityId,
        edition: u64,
        data: bytes::Bytes,
    ) -> BoxFut<'_, ()> {
        Box::pin(async move {
            {
                let mut lock = self.inner.lock().unwrap();
                if lock.shutting_down {
                    return;
                }
                match lock.watching.get_mut(&identity) {
                    Some(entry) => {
                        // Stale replays never move the watermark backward.
                        if entry
                            .last_received
                            .map_or(false, |last| last >= edition)
                        {
                            return;
                        }
                        entry.last_received = Some(edition);
                    }
                    // A late update from a subscription already torn down.
                    None => return,
                }
            }
            if let Err(err) = self
                .output
                .enqueue(identity.clone(), edition, data)
                .await
            {
                if err.is_corrupt() {
                    self.inner
                        .lock()
                        .unwrap()
                        .fatal
                        .get_or_insert_with(|| err.clone());
                }
                tracing::error!(
                    ?err,
                    ?identity,
                    "failed to enqueue watched update"
                );
                return;
            }
            self.inner.lock().unwrap().succeeded += 1;
        })
    }
}

struct CoreFastDownloader {
    ctx: FastCtx,
    command_task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for CoreFastDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreFastDownloader").finish()
    }
}

impl Drop for CoreFastDownloader {
    fn drop(&mut self) {
        self.command_task.abort();
    }
}

impl CoreFastDownloader {
    fn new(
        config: CoreFastDownloaderConfig,
        trust: DynTrustView,
        transport: DynTransport,
        output: DynOutputSink,
    ) -> Self {
        let (wake_send, wake_recv) = tokio::sync::mpsc::channel(32);
        let ctx = FastCtx {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner::default())),
            trust,
            transport,
            output,
            wake_send,
        };
        let command_task =
            tokio::task::spawn(command_loop(ctx.clone(), wake_recv));
        Self { ctx, command_task }
    }

    fn check_active(&self) -> WotResult<bool> {
        let lock = self.ctx.inner.lock().unwrap();
        if let Some(err) = &lock.fatal {
            return Err(err.clone());
        }
        Ok(!lock.shutting_down)
    }

    /// Queue whatever command moves the identity toward its desired
    /// watch state and schedule a batch pass.
    fn reconcile(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            let desired = ctx.trust.is_eligible(identity.clone()).await?
                && watch_covered(&ctx.trust, &identity).await?;
            {
                let mut lock = ctx.inner.lock().unwrap();
                let watching = lock.effectively_watched(&identity);
                if desired {
                    lock.commands.request_start(identity, watching);
                } else {
                    lock.commands.request_stop(identity, watching);
                }
            }
            ctx.wake(Wake::Normal);
            Ok(())
        })
    }
}

async fn command_loop(
    ctx: FastCtx,
    mut wake_recv: tokio::sync::mpsc::Receiver<Wake>,
) {
    while let Some(wake) = wake_recv.recv().await {
        let mut urgent = wake == Wake::Urgent;
        while let Ok(wake) = wake_recv.try_recv() {
            urgent |= wake == Wake::Urgent;
        }
        // The first pass after startup runs right away so the initial
        // watch set comes up without waiting out the churn window.
        let first_pass = !ctx.inner.lock().unwrap().first_pass_done;
        if !urgent && !first_pass {
            // Let a churn burst accumulate so opposing commands collapse
            // before any subscription is touched. An urgent wake cuts
            // the window short.
            let window = tokio::time::sleep(ctx.config.batch_delay());
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    wake = wake_recv.recv() => match wake {
                        Some(Wake::Urgent) => break,
                        Some(Wake::Normal) => (),
                        None => return,
                    },
                }
            }
            while wake_recv.try_recv().is_ok() {}
        }
        process_commands(&ctx).await;
        ctx.inner.lock().unwrap().first_pass_done = true;
    }
}

async fn process_commands(ctx: &FastCtx) {
    let batch = {
        let mut lock = ctx.inner.lock().unwrap();
        if lock.shutting_down || lock.fatal.is_some() {
            return;
        }
        let batch = lock.commands.drain();
        for (identity, command) in &batch {
            lock.executing.insert(identity.clone(), *command);
        }
        batch
    };

    let mut failed = Vec::new();
    for (identity, command) in batch {
        let result = match command {
            Command::Start => execute_start(ctx, &identity).await,
            Command::Stop => execute_stop(ctx, &identity).await,
        };
        ctx.inner.lock().unwrap().executing.remove(&identity);
        match result {
            Ok(()) => (),
            Err(err) if err.is_corrupt() => {
                let err = ctx.escalate(err);
                ctx.inner.lock().unwrap().executing.clear();
                tracing::error!(?err, "watch command batch aborted");
                return;
            }
            Err(err) => {
                tracing::warn!(
                    ?err,
                    ?identity,
                    ?command,
                    "watch command failed, will retry"
                );
                failed.push((identity, command));
            }
        }
    }

    if !failed.is_empty() {
        ctx.inner.lock().unwrap().commands.restore(failed);
        let retry = ctx.clone();
        tokio::task::spawn(async move {
            tokio::time::sleep(retry.config.retry_delay()).await;
            retry.wake(Wake::Urgent);
        });
    }
}

/// Open (or reopen) the subscription for an identity. A start executed
/// while the identity is already watched is a restart: the old
/// subscription is torn down first.
async fn execute_start(
    ctx: &FastCtx,
    identity: &IdentityId,
) -> WotResult<()> {
    let (prior, start_override) = {
        let mut lock = ctx.inner.lock().unwrap();
        (
            lock.watching.remove(identity),
            lock.restart_editions.get(identity).copied(),
        )
    };
    if let Some(entry) = prior {
        ctx.transport.unsubscribe(entry.subscription).await?;
    }

    let start_edition = match start_override {
        Some(edition) => edition,
        None => ctx.trust.next_edition(identity.clone()).await?,
    };
    let handler: DynUpdateHandler = Arc::new(SubscriptionSink {
        inner: ctx.inner.clone(),
        output: ctx.output.clone(),
    });
    let subscription = ctx
        .transport
        .subscribe(identity.clone(), start_edition, handler)
        .await?;

    let undo = {
        let mut lock = ctx.inner.lock().unwrap();
        if lock.shutting_down {
            true
        } else {
            lock.restart_editions.remove(identity);
            lock.watching.insert(
                identity.clone(),
                WatchEntry {
                    subscription,
                    start_edition,
                    last_received: None,
                },
            );
            false
        }
    };
    if undo {
        ctx.transport.unsubscribe(subscription).await?;
    }
    Ok(())
}

async fn execute_stop(
    ctx: &FastCtx,
    identity: &IdentityId,
) -> WotResult<()> {
    let entry = {
        let mut lock = ctx.inner.lock().unwrap();
        lock.restart_editions.remove(identity);
        lock.watching.remove(identity)
    };
    if let Some(entry) = entry {
        ctx.transport.unsubscribe(entry.subscription).await?;
    }
    Ok(())
}

impl Downloader for CoreFastDownloader {
    fn on_eligibility_changed(
        &self,
        identity: IdentityId,
        _eligible: bool,
    ) -> BoxFut<'_, WotResult<()>> {
        self.reconcile(identity)
    }

    fn on_new_hint(&self, _claim: HintClaim) -> BoxFut<'_, WotResult<()>> {
        // Watched identities are driven by their subscriptions; claims
        // about everyone else belong to the opportunistic path.
        Box::pin(async move { Ok(()) })
    }

    fn on_trust_changed(
        &self,
        old: Option<TrustEdge>,
        new: Option<TrustEdge>,
    ) -> BoxFut<'_, WotResult<()>> {
        match new.as_ref().or(old.as_ref()) {
            Some(edge) => self.reconcile(edge.target.clone()),
            None => Box::pin(async move { Ok(()) }),
        }
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
            {
                let mut lock = ctx.inner.lock().unwrap();
                let watching = lock.effectively_watched(&identity);
                lock.commands.request_stop(identity, watching);
            }
            ctx.wake(Wake::Urgent);
            Ok(())
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
            if ctx.trust.is_eligible(replacement.clone()).await?
                && watch_covered(&ctx.trust, &replacement).await?
            {
                let mut lock = ctx.inner.lock().unwrap();
                let watching = lock.effectively_watched(&replacement);
                lock.commands.request_start(replacement, watching);
                drop(lock);
                ctx.wake(Wake::Urgent);
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
            if !watch_covered(&ctx.trust, &identity).await? {
                // Not rooted yet; the opportunistic path re-acquires it.
                return Ok(());
            }
            // The restored data has to be pulled from edition zero; a
            // plain start would pick up at the next-edition counter.
            {
                let mut lock = ctx.inner.lock().unwrap();
                lock.restart_editions.insert(identity.clone(), 0);
                lock.commands.request_restart(identity);
            }
            ctx.wake(Wake::Urgent);
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
            if !watch_covered(&ctx.trust, &identity).await? {
                return Ok(());
            }
            let edition = ctx.trust.next_edition(identity.clone()).await?;
            {
                let mut lock = ctx.inner.lock().unwrap();
                lock.restart_editions.insert(identity.clone(), edition);
                lock.commands.request_restart(identity);
            }
            ctx.wake(Wake::Urgent);
            Ok(())
        })
    }

    fn on_refetch_requested(
        &self,
        identity: IdentityId,
        edition: u64,
    ) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        let active = self.check_active();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            let restart = {
                let mut lock = ctx.inner.lock().unwrap();
                match lock.watching.get(&identity) {
                    // Not ours.
                    None => false,
                    Some(entry) => {
                        if entry
                            .last_received
                            .map_or(false, |last| last >= edition)
                        {
                            // Progress was already made past the request;
                            // never move a watched edition backward.
                            false
                        } else if edition < entry.start_edition {
                            lock.restart_editions
                                .insert(identity.clone(), edition);
                            lock.commands.request_restart(identity);
                            true
                        } else {
                            // The open subscription already covers it.
                            false
                        }
                    }
                }
            };
            if restart {
                ctx.wake(Wake::Urgent);
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
                && watch_covered(&ctx.trust, &identity).await?)
        })
    }

    fn delete_all_commands(&self) -> BoxFut<'_, WotResult<()>> {
        let active = self.check_active();
        let ctx = self.ctx.clone();
        Box::pin(async move {
            if !active? {
                return Ok(());
            }
            ctx.inner.lock().unwrap().commands.clear();
            Ok(())
        })
    }

    fn stats(&self) -> BoxFut<'_, WotResult<DownloaderStats>> {
        let ctx = self.ctx.clone();
        Box::pin(async move {
            let lock = ctx.inner.lock().unwrap();
            Ok(DownloaderStats {
                watching: lock.watching.len() as u64,
                pending_commands: lock.commands.len() as u64,
                succeeded: lock.succeeded,
                ..Default::default()
            })
        })
    }

    fn shutdown(&self) -> BoxFut<'_, WotResult<()>> {
        let ctx = self.ctx.clone();
        Box::pin(async move {
            let entries: Vec<WatchEntry> = {
                let mut lock = ctx.inner.lock().unwrap();
                lock.shutting_down = true;
                lock.commands.clear();
                lock.executing.clear();
                lock.restart_editions.clear();
                lock.watching.drain().map(|(_, entry)| entry).collect()
            };
            for entry in entries {
                if let Err(err) =
                    ctx.transport.unsubscribe(entry.subscription).await
                {
                    tracing::warn!(
                        ?err,
                        "failed to close subscription during shutdown"
                    );
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test;
