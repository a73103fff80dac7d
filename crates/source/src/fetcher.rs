//! Rate-limited, deadline-bounded, cancellable access to a [`DataSource`].

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vaccibot_core::{Facility, Lineage, Region, ServiceSlot};

use crate::error::SourceError;
use crate::traits::DataSource;

/// Wraps a [`DataSource`] behind one token bucket shared by every call.
///
/// The bucket holds a single token, so calls are spaced at least
/// `1 / requests_per_second` apart no matter how many stages share the
/// fetcher. Failures are returned as-is; retrying is the next poll's job.
pub struct RateLimitedFetcher<S> {
    source: S,
    limiter: DefaultDirectRateLimiter,
    timeout: Duration,
}

impl<S: DataSource> RateLimitedFetcher<S> {
    pub fn new(source: S, requests_per_second: NonZeroU32, timeout: Duration) -> Self {
        let quota = Quota::per_second(requests_per_second).allow_burst(NonZeroU32::MIN);
        Self {
            source,
            limiter: RateLimiter::direct(quota),
            timeout,
        }
    }

    /// Fetch all regions.
    pub async fn regions(&self, cancel: &CancellationToken) -> Result<Vec<Region>, SourceError> {
        self.call("regions".to_string(), cancel, self.source.list_regions())
            .await
    }

    /// Fetch the facilities of `region`.
    pub async fn facilities(
        &self,
        region: &Region,
        cancel: &CancellationToken,
    ) -> Result<Vec<Facility>, SourceError> {
        let what = format!("facilities of {}", region.lineage());
        self.call(what, cancel, self.source.list_facilities(region))
            .await
    }

    /// Fetch the service slots of `facility`.
    pub async fn service_slots(
        &self,
        facility: &Facility,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceSlot>, SourceError> {
        let what = format!("slots of {}", facility.lineage());
        self.call(what, cancel, self.source.list_service_slots(facility))
            .await
    }

    /// Wait for a token, then run `request` under the per-call deadline.
    ///
    /// Returns [`SourceError::Cancelled`] as soon as `cancel` fires, whether
    /// the call is still queued on the limiter or already in flight.
    async fn call<T, F>(
        &self,
        what: String,
        cancel: &CancellationToken,
        request: F,
    ) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled { what });
        }

        let admitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.limiter.until_ready() => true,
        };
        if !admitted {
            return Err(SourceError::Cancelled { what });
        }

        debug!(what = %what, "fetching");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.timeout, request) => Some(result),
        };

        match outcome {
            None => Err(SourceError::Cancelled { what }),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(SourceError::Timeout {
                what,
                timeout: self.timeout,
            }),
        }
    }
}
