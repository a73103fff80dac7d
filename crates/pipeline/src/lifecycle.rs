//! Supervision of the pipeline's concurrent units.
//!
//! Cancellation is cooperative: units watch the shared
//! [`CancellationToken`] themselves. [`StageGroup::wait`] only observes,
//! and [`StageGroup::shutdown`] aborts whatever is still running once the
//! grace period is over.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why [`StageGroup::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every unit finished on its own.
    Drained,
    /// The token fired first. Units may still be winding down.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct StageGroup {
    units: JoinSet<()>,
}

impl StageGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `unit` as an independent task.
    pub fn spawn<F>(&mut self, name: &'static str, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(unit = name, "starting unit");
        self.units.spawn(async move {
            unit.await;
            debug!(unit = name, "unit finished");
        });
    }

    /// Start `count` units built by `make`, which receives the replica index.
    pub fn spawn_many<M, F>(&mut self, name: &'static str, count: usize, mut make: M)
    where
        M: FnMut(usize) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        for index in 0..count {
            self.spawn(name, make(index));
        }
    }

    /// Units that have not been reaped yet.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Block until every unit has finished or `cancel` fires, whichever
    /// comes first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> WaitOutcome {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                joined = self.units.join_next() => match joined {
                    None => return WaitOutcome::Drained,
                    Some(Err(e)) if e.is_panic() => error!(error = %e, "unit panicked"),
                    Some(_) => {}
                },
            }
        }
    }

    /// Give running units `grace` to exit on their own, then abort the rest.
    /// Returns how many units had to be aborted.
    pub async fn shutdown(mut self, grace: Duration) -> usize {
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.units.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "unit panicked during shutdown");
                    }
                }
            }
        })
        .await;

        if drained.is_ok() {
            info!("all units exited");
            return 0;
        }

        let stragglers = self.units.len();
        warn!(stragglers, grace = ?grace, "units did not exit in time, forcing shutdown");
        self.units.shutdown().await;
        stragglers
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = os_signal() => {
            info!("shutdown signal received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "could not register unix signal handlers, using ctrl_c");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without any signal source, only a programmatic cancel can stop us.
        error!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn wait_returns_drained_when_units_finish() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = StageGroup::new();
        group.spawn_many("worker", 3, |i| {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10 * i as u64)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(group.len(), 3);

        let cancel = CancellationToken::new();
        assert_eq!(group.wait(&cancel).await, WaitOutcome::Drained);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn wait_returns_immediately_on_cancel_with_slow_units() {
        let mut group = StageGroup::new();
        group.spawn("stuck", std::future::pending());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(1), group.wait(&cancel))
            .await
            .expect("wait should return on cancel");
        assert_eq!(outcome, WaitOutcome::Cancelled);

        let aborted = group.shutdown(Duration::from_millis(20)).await;
        assert_eq!(aborted, 1);
    }

    #[tokio::test]
    async fn shutdown_lets_cooperative_units_finish() {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = StageGroup::new();
        {
            let cancel = cancel.clone();
            let finished = finished.clone();
            group.spawn("cooperative", async move {
                cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        cancel.cancel();
        assert_eq!(group.wait(&cancel).await, WaitOutcome::Cancelled);
        assert_eq!(group.shutdown(Duration::from_secs(1)).await, 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_unit_does_not_stop_the_group() {
        let mut group = StageGroup::new();
        group.spawn("boom", async { panic!("unit failure") });
        group.spawn("fine", async {});

        let cancel = CancellationToken::new();
        assert_eq!(group.wait(&cancel).await, WaitOutcome::Drained);
    }

    #[tokio::test]
    async fn cancel_on_signal_exits_when_token_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(cancel_on_signal(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
