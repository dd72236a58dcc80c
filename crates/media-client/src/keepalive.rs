//! Periodic keepalive for live proxies
//!
//! The media server garbage-collects objects nobody has touched within
//! their time-to-live. [`KeepAliveScheduler`] walks the live arena of a
//! context on a fixed period and sends `keepAlive` for every proxy that is
//! still held and not released.

use crate::context::MediaContext;
use crate::continuation::Continuation;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one keepalive round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveReport {
    /// Proxies a keepalive succeeded for
    pub sent: usize,
    /// Proxies whose keepalive failed
    pub failed: usize,
    /// Dead arena entries removed before the round
    pub swept: usize,
}

/// Background task refreshing every live proxy of a context
///
/// Stops on [`shutdown`](Self::shutdown) or when dropped.
#[derive(Debug)]
pub struct KeepAliveScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAliveScheduler {
    /// Spawn with the period from the context's configuration
    pub fn spawn(ctx: MediaContext) -> Self {
        let period = ctx.config().keepalive_interval();
        Self::spawn_with_interval(ctx, period)
    }

    /// Spawn with an explicit period
    pub fn spawn_with_interval(ctx: MediaContext, period: Duration) -> Self {
        // tokio intervals reject a zero period
        let period = period.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runtime = ctx.runtime().clone();

        let handle = runtime.spawn(async move {
            info!("Starting keepalive scheduler (interval: {:?})", period);

            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let report = Self::run_once(&ctx).await;
                        debug!(
                            "Keepalive round: {} sent, {} failed, {} swept",
                            report.sent, report.failed, report.swept
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Shutting down keepalive scheduler");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Run a single keepalive round over the live arena
    pub async fn run_once(ctx: &MediaContext) -> KeepAliveReport {
        let swept = ctx.objects().sweep();

        let mut pending = Vec::new();
        for proxy in ctx.objects().live_objects() {
            let object = proxy.media_object();
            if object.is_released() {
                continue;
            }
            let (cont, rx) = Continuation::channel();
            object.keep_alive_async(cont);
            pending.push((object.reference().clone(), rx));
        }

        let mut report = KeepAliveReport {
            swept,
            ..Default::default()
        };
        for (reference, rx) in pending {
            match rx.await {
                Ok(Ok(())) => report.sent += 1,
                Ok(Err(e)) => {
                    warn!("Keepalive for {} failed: {}", reference, e);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!("Keepalive for {} was abandoned", reference);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Signal the task to stop and wait for it
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Keepalive scheduler ended abnormally: {}", e);
            }
        }
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
