//! The polling pipeline.
//!
//! ```text
//! PollScheduler → FanOut(region→facility) → FanOut(facility→slot) → FilterStage → DedupNotifier
//! ```
//!
//! Stages talk only through work queues. Each stage closes its output when
//! its input is exhausted, so a single poll (`PollMode::Once`) drains the
//! whole pipeline and every unit exits on its own.

pub mod dedup;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod lifecycle;
pub mod scheduler;

use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use vaccibot_core::{Config, Facility, FacilityId, Region, ServiceSlot};
use vaccibot_notify::{AlertRenderer, Notifier};
use vaccibot_queue::work_queue;
use vaccibot_source::{DataSource, RateLimitedFetcher};
use vaccibot_storage::KeyValueStore;

pub use dedup::{should_notify, DedupKey, DedupNotifier, DedupOutcome, DedupPolicy, DedupRecord, DEDUP_BUCKET};
pub use error::{DedupError, PipelineError};
pub use fanout::{Expand, FanOutStage};
pub use filter::{FacilityBlocklist, FilterStage, KeywordFilter};
pub use lifecycle::{cancel_on_signal, StageGroup, WaitOutcome};
pub use scheduler::{PollMode, PollOutcome, PollScheduler};

/// Everything the stages need, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub requests_per_second: NonZeroU32,
    pub request_timeout: Duration,
    pub poll: PollMode,
    pub facility_workers: usize,
    pub slot_workers: usize,
    pub blocklist: BTreeSet<FacilityId>,
    pub keywords: String,
    pub link_base: String,
    pub policy: DedupPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            requests_per_second: NonZeroU32::MIN.saturating_add(1),
            request_timeout: Duration::from_secs(30),
            poll: PollMode::Every(Duration::from_secs(10 * 60)),
            facility_workers: 1,
            slot_workers: 1,
            blocklist: BTreeSet::from([182, 319]),
            keywords: "covid|ковид|вакцин".to_string(),
            link_base: "https://gorzdrav.spb.ru/service-covid-vaccination-schedule".to_string(),
            policy: DedupPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config, once: bool) -> Result<Self, PipelineError> {
        let requests_per_second =
            NonZeroU32::new(config.upstream.requests_per_second).ok_or_else(|| PipelineError::Invalid {
                key: "VACCIBOT_RPS",
                reason: "must be greater than 0".to_string(),
            })?;
        let poll = if once {
            PollMode::Once
        } else {
            PollMode::Every(config.schedule.check_every)
        };
        Ok(Self {
            requests_per_second,
            request_timeout: config.upstream.request_timeout,
            poll,
            facility_workers: config.pipeline.facility_workers,
            slot_workers: config.pipeline.slot_workers,
            blocklist: config.pipeline.blocklist.clone(),
            keywords: config.pipeline.keywords.clone(),
            link_base: config.pipeline.link_base.clone(),
            policy: DedupPolicy {
                min_resend: config.schedule.send_every,
                resend: config.schedule.resend_policy,
            },
        })
    }
}

/// Wire every stage into `group`. The stages start immediately and stop when
/// `cancel` fires or, in [`PollMode::Once`], when the single poll has drained.
pub fn spawn_pipeline<S, N, K>(
    group: &mut StageGroup,
    cancel: &CancellationToken,
    source: S,
    notifier: N,
    store: K,
    settings: PipelineSettings,
) -> Result<(), PipelineError>
where
    S: DataSource + 'static,
    N: Notifier + 'static,
    K: KeyValueStore + 'static,
{
    let filter = KeywordFilter::new(&settings.keywords)?;
    let renderer = AlertRenderer::new(&settings.link_base)?;
    let blocklist = FacilityBlocklist::new(settings.blocklist.iter().copied());
    let fetcher = Arc::new(RateLimitedFetcher::new(
        source,
        settings.requests_per_second,
        settings.request_timeout,
    ));

    let (region_tx, region_rx) = work_queue::<Region>();
    let (facility_tx, facility_rx) = work_queue::<Facility>();
    let (slot_tx, slot_rx) = work_queue::<ServiceSlot>();
    let (matched_tx, matched_rx) = work_queue::<ServiceSlot>();

    let dedup = DedupNotifier::new(notifier, store, renderer, settings.policy, matched_rx);
    group.spawn("dedup", dedup.run(cancel.clone()));

    let filter = FilterStage::new(filter, slot_rx, matched_tx);
    group.spawn("filter", filter.run(cancel.clone()));

    FanOutStage::new("facility→slot", fetcher.clone(), facility_rx, slot_tx)
        .skip_parents(move |facility: &Facility| blocklist.contains(facility))
        .spawn_into(group, settings.slot_workers.max(1), cancel);

    FanOutStage::new("region→facility", fetcher.clone(), region_rx, facility_tx)
        .spawn_into(group, settings.facility_workers.max(1), cancel);

    let scheduler = PollScheduler::new(fetcher, region_tx, settings.poll);
    group.spawn("scheduler", scheduler.run(cancel.clone()));

    info!(units = group.len(), poll = ?settings.poll, "pipeline started");
    Ok(())
}
