//! Periodic top-level poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vaccibot_core::Region;
use vaccibot_queue::WorkSender;
use vaccibot_source::{DataSource, RateLimitedFetcher};

/// When the scheduler polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Immediately, then every interval until cancelled.
    Every(Duration),
    /// A single poll, then stop.
    Once,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// This many regions were handed downstream.
    Published(usize),
    /// The fetch failed; nothing was published.
    Failed,
    /// Cancellation was observed before or during the fetch.
    Cancelled,
}

/// Feeds regions into the pipeline.
///
/// The scheduler owns the region queue's only sender, so dropping it when
/// [`run`](Self::run) returns is what tells the next stage that no more
/// regions are coming.
pub struct PollScheduler<S> {
    fetcher: Arc<RateLimitedFetcher<S>>,
    output: WorkSender<Region>,
    mode: PollMode,
}

impl<S: DataSource> PollScheduler<S> {
    pub fn new(fetcher: Arc<RateLimitedFetcher<S>>, output: WorkSender<Region>, mode: PollMode) -> Self {
        Self {
            fetcher,
            output,
            mode,
        }
    }

    /// Fetch regions once and publish them all, or none on failure.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> PollOutcome {
        let regions = match self.fetcher.regions(cancel).await {
            Ok(regions) => regions,
            Err(e) if e.is_cancelled() => return PollOutcome::Cancelled,
            Err(e) => {
                error!(error = %e, "poll failed");
                return PollOutcome::Failed;
            }
        };

        let count = regions.len();
        for region in regions {
            if self.output.send(region).is_err() {
                warn!("region queue closed, dropping the rest of this poll");
                return PollOutcome::Cancelled;
            }
        }
        info!(regions = count, "poll published");
        PollOutcome::Published(count)
    }

    /// Poll according to the mode until done or cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        match self.mode {
            PollMode::Once => {
                self.poll_once(&cancel).await;
            }
            PollMode::Every(every) => {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    // The first tick completes immediately.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if self.poll_once(&cancel).await == PollOutcome::Cancelled {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
