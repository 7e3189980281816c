//! The controller facade in front of both download strategies.
//!
//! Every trust-engine callback is fanned out to the hot-set watcher
//! first and the opportunistic downloader second, serialized behind one
//! controller-wide lock so the strategies always observe events in the
//! same order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wotfetch_api::{builder, config::*, downloader::*, scheduler::*, *};

const MOD_NAME: &str = "CoreScheduler";

/// Configuration parameters for [CoreSchedulerFactory]. Currently empty;
/// kept for config-file uniformity across modules.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSchedulerConfig {}

impl ModConfig for CoreSchedulerConfig {}

/// The production scheduler controller factory.
#[derive(Debug)]
pub struct CoreSchedulerFactory {}

impl CoreSchedulerFactory {
    /// Construct a new CoreSchedulerFactory.
    pub fn create() -> DynSchedulerFactory {
        let out: DynSchedulerFactory = Arc::new(Self {});
        out
    }
}

impl SchedulerFactory for CoreSchedulerFactory {
    fn default_config(&self, config: &mut Config) -> WotResult<()> {
        config.add_default_module_config::<CoreSchedulerConfig>(
            MOD_NAME.into(),
        )
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
        trust: DynTrustView,
        output: DynOutputSink,
    ) -> BoxFut<'static, WotResult<DynScheduler>> {
        Box::pin(async move {
            let _config = builder
                .config
                .get_module_config::<CoreSchedulerConfig>(MOD_NAME)?;
            let transport =
                builder.transport.create(builder.clone()).await?;
            let fast = builder
                .fast_downloader
                .create(
                    builder.clone(),
                    trust.clone(),
                    transport.clone(),
                    output.clone(),
                )
                .await?;
            let slow = builder
                .slow_downloader
                .create(builder.clone(), trust, transport, output)
                .await?;
            let out: DynScheduler = Arc::new(CoreScheduler {
                lock: tokio::sync::Mutex::new(()),
                fast,
                slow,
                shut_down: AtomicBool::new(false),
            });
            Ok(out)
        })
    }
}

#[derive(Debug)]
struct CoreScheduler {
    lock: tokio::sync::Mutex<()>,
    fast: DynDownloader,
    slow: DynDownloader,
    shut_down: AtomicBool,
}

impl CoreScheduler {
    fn check_open(&self) -> WotResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(WotError::other("scheduler is shut down"));
        }
        Ok(())
    }
}

macro_rules! fan_out {
    ($self:ident, $cb:ident $(, $arg:expr)*) => {
        Box::pin(async move {
            $self.check_open()?;
            let _guard = $self.lock.lock().await;
            $self.fast.$cb($($arg.clone()),*).await?;
            $self.slow.$cb($($arg),*).await?;
            Ok(())
        })
    };
}

impl Downloader for CoreScheduler {
    fn on_eligibility_changed(
        &self,
        identity: IdentityId,
        eligible: bool,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_eligibility_changed, identity, eligible)
    }

    fn on_new_hint(&self, claim: HintClaim) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_new_hint, claim)
    }

    fn on_trust_changed(
        &self,
        old: Option<TrustEdge>,
        new: Option<TrustEdge>,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_trust_changed, old, new)
    }

    fn on_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_identity_pre_delete, identity)
    }

    fn on_own_identity_pre_delete(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_own_identity_pre_delete, identity)
    }

    fn on_own_identity_post_delete(
        &self,
        replacement: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_own_identity_post_delete, replacement)
    }

    fn on_own_identity_pre_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_own_identity_pre_restore, identity)
    }

    fn on_own_identity_post_restore(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_own_identity_post_restore, identity)
    }

    fn on_refetch_requested(
        &self,
        identity: IdentityId,
        edition: u64,
    ) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, on_refetch_requested, identity, edition)
    }

    fn should_fetch(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        Box::pin(async move {
            self.check_open()?;
            let _guard = self.lock.lock().await;
            Ok(self.fast.should_fetch(identity.clone()).await?
                || self.slow.should_fetch(identity).await?)
        })
    }

    fn delete_all_commands(&self) -> BoxFut<'_, WotResult<()>> {
        fan_out!(self, delete_all_commands)
    }

    fn stats(&self) -> BoxFut<'_, WotResult<DownloaderStats>> {
        Box::pin(async move {
            self.check_open()?;
            let _guard = self.lock.lock().await;
            let fast = self.fast.stats().await?;
            let slow = self.slow.stats().await?;
            Ok(fast.merge(&slow))
        })
    }

    fn shutdown(&self) -> BoxFut<'_, WotResult<()>> {
        Box::pin(async move {
            self.check_open()?;
            let _guard = self.lock.lock().await;
            // Terminal: even a failed shutdown is not retried.
            self.shut_down.store(true, Ordering::Release);
            self.fast.shutdown().await?;
            self.slow.shutdown().await?;
            Ok(())
        })
    }
}

impl Scheduler for CoreScheduler {
    fn should_fetch_state(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        Box::pin(async move {
            self.check_open()?;
            let _guard = self.lock.lock().await;
            let fast = self.fast.should_fetch(identity.clone()).await?;
            let slow = self.slow.should_fetch(identity.clone()).await?;
            if fast && slow {
                debug_assert!(
                    false,
                    "both strategies claim {identity:?}"
                );
                return Err(WotError::other(format!(
                    "watch sets are not disjoint: both strategies claim \
                     identity {identity}"
                )));
            }
            Ok(fast || slow)
        })
    }
}
