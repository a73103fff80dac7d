//! Keyword filter stage and the facility blocklist.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vaccibot_core::{Facility, FacilityId, ServiceSlot};
use vaccibot_queue::{WorkReceiver, WorkSender};

/// Case-insensitive match on a slot's name.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    pattern: Regex,
}

impl KeywordFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, slot: &ServiceSlot) -> bool {
        self.pattern.is_match(&slot.name)
    }
}

/// Facilities that are never queried.
#[derive(Debug, Clone, Default)]
pub struct FacilityBlocklist {
    ids: BTreeSet<FacilityId>,
}

impl FacilityBlocklist {
    pub fn new(ids: impl IntoIterator<Item = FacilityId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, facility: &Facility) -> bool {
        self.ids.contains(&facility.id)
    }
}

/// Forwards only the slots accepted by a [`KeywordFilter`]. Rejected slots
/// leave no trace.
pub struct FilterStage {
    filter: KeywordFilter,
    input: WorkReceiver<ServiceSlot>,
    output: WorkSender<ServiceSlot>,
}

impl FilterStage {
    pub fn new(
        filter: KeywordFilter,
        input: WorkReceiver<ServiceSlot>,
        output: WorkSender<ServiceSlot>,
    ) -> Self {
        Self {
            filter,
            input,
            output,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.input.recv() => match next {
                    Some(slot) => slot,
                    None => break,
                },
            };
            if self.filter.matches(&slot) && self.output.send(slot).is_err() {
                break;
            }
        }
        debug!("filter stage stopped");
    }
}
