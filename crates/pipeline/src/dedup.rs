//! Notification dedup.
//!
//! Each slot is identified by a [`DedupKey`]; the last alert sent for it is a
//! [`DedupRecord`]. A record is written only after the alert went out, so a
//! crash between sending and persisting can duplicate an alert but never
//! lose one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaccibot_core::config::ResendPolicy;
use vaccibot_core::{FacilityId, Lineage, RegionId, ServiceSlot, SlotId};
use vaccibot_notify::{AlertRenderer, Notifier};
use vaccibot_queue::WorkReceiver;
use vaccibot_storage::KeyValueStore;

use crate::error::DedupError;

/// Store bucket holding every [`DedupRecord`].
pub const DEDUP_BUCKET: &str = "gorzdrav_sent";

/// Stable identity of a slot across polls.
///
/// Stored as a JSON object with named fields, so identities can never
/// collide through a shared delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub region_id: RegionId,
    pub facility_id: FacilityId,
    pub slot_id: SlotId,
}

impl DedupKey {
    pub fn new(region_id: impl Into<RegionId>, facility_id: FacilityId, slot_id: impl Into<SlotId>) -> Self {
        Self {
            region_id: region_id.into(),
            facility_id,
            slot_id: slot_id.into(),
        }
    }

    pub fn from_slot(slot: &ServiceSlot) -> Self {
        Self::new(slot.facility.region.id.clone(), slot.facility.id, slot.id.clone())
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// What was last announced for a key, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub free_tickets: i64,
    pub free_participants: i64,
    pub last_notified: DateTime<Utc>,
}

impl DedupRecord {
    pub fn for_slot(slot: &ServiceSlot, now: DateTime<Utc>) -> Self {
        Self {
            free_tickets: slot.count_free_ticket,
            free_participants: slot.count_free_participant,
            last_notified: now,
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn counters_match(&self, slot: &ServiceSlot) -> bool {
        self.free_tickets == slot.count_free_ticket
            && self.free_participants == slot.count_free_participant
    }

    /// Whether `min_resend` has passed since the last alert. A cooldown too
    /// large to represent never elapses.
    pub fn cooldown_elapsed(&self, min_resend: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(min_resend)
            .ok()
            .and_then(|cooldown| self.last_notified.checked_add_signed(cooldown))
            .map(|due| now >= due)
            .unwrap_or(false)
    }
}

/// Notify on first sighting; afterwards only once the cooldown has elapsed
/// and the counters differ from the last alert.
pub fn should_notify(
    existing: Option<&DedupRecord>,
    slot: &ServiceSlot,
    min_resend: Duration,
    now: DateTime<Utc>,
) -> bool {
    match existing {
        None => true,
        Some(record) => record.cooldown_elapsed(min_resend, now) && !record.counters_match(slot),
    }
}

/// Resend interval plus the rule that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub min_resend: Duration,
    pub resend: ResendPolicy,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            min_resend: Duration::from_secs(30 * 60),
            resend: ResendPolicy::default(),
        }
    }
}

impl DedupPolicy {
    pub fn should_notify(
        &self,
        existing: Option<&DedupRecord>,
        slot: &ServiceSlot,
        now: DateTime<Utc>,
    ) -> bool {
        match self.resend {
            ResendPolicy::CooldownAndChange => should_notify(existing, slot, self.min_resend, now),
            ResendPolicy::ChangeOnly => existing.map_or(true, |record| !record.counters_match(slot)),
        }
    }
}

/// What happened to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// An alert was sent and the record updated.
    Notified,
    /// Nothing new to say.
    Suppressed,
}

/// Final stage: decides, alerts and records.
///
/// Runs as a single unit, which is what makes the per-key
/// read-modify-write on the store race-free.
pub struct DedupNotifier<N, K> {
    notifier: N,
    store: K,
    renderer: AlertRenderer,
    policy: DedupPolicy,
    input: WorkReceiver<ServiceSlot>,
}

impl<N: Notifier, K: KeyValueStore> DedupNotifier<N, K> {
    pub fn new(
        notifier: N,
        store: K,
        renderer: AlertRenderer,
        policy: DedupPolicy,
        input: WorkReceiver<ServiceSlot>,
    ) -> Self {
        Self {
            notifier,
            store,
            renderer,
            policy,
            input,
        }
    }

    pub async fn process(&self, slot: &ServiceSlot) -> Result<DedupOutcome, DedupError> {
        self.process_at(slot, Utc::now()).await
    }

    /// One fetch and at most one write against the store.
    pub async fn process_at(
        &self,
        slot: &ServiceSlot,
        now: DateTime<Utc>,
    ) -> Result<DedupOutcome, DedupError> {
        let key = DedupKey::from_slot(slot).encode()?;

        let existing = match self.store.get(DEDUP_BUCKET, &key).await? {
            None => None,
            Some(raw) => match DedupRecord::decode(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(lineage = %slot.lineage(), error = %e, "unreadable dedup record, treating slot as new");
                    None
                }
            },
        };

        if !self.policy.should_notify(existing.as_ref(), slot, now) {
            return Ok(DedupOutcome::Suppressed);
        }

        let text = self.renderer.render_alert(slot)?;
        self.notifier.send_message(&text).await?;

        match slot.facility.location() {
            Some(point) => {
                if let Err(e) = self.notifier.send_location(point).await {
                    warn!(lineage = %slot.lineage(), error = %e, "location not delivered");
                }
            }
            None => debug!(lineage = %slot.lineage(), "facility has no usable coordinates"),
        }

        let record = serde_json::to_vec(&DedupRecord::for_slot(slot, now))?;
        self.store.put(DEDUP_BUCKET, &key, &record).await?;
        Ok(DedupOutcome::Notified)
    }

    /// Process slots until the input is exhausted or `cancel` fires. A slot
    /// already being processed is always finished.
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

            match self.process(&slot).await {
                Ok(DedupOutcome::Notified) => info!(
                    lineage = %slot.lineage(),
                    channel = self.notifier.channel_name(),
                    free_tickets = slot.count_free_ticket,
                    free_participants = slot.count_free_participant,
                    "alert sent"
                ),
                Ok(DedupOutcome::Suppressed) => {
                    debug!(lineage = %slot.lineage(), "already announced")
                }
                Err(e) => error!(lineage = %slot.lineage(), error = %e, "dedup step failed"),
            }
        }
        debug!("dedup notifier stopped");
    }
}
