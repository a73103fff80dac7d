//! End-to-end runs of the pipeline against scripted capabilities.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vaccibot_core::config::ResendPolicy;
use vaccibot_core::{Facility, FacilityId, GeoPoint, Region, ServiceSlot};
use vaccibot_notify::{Notifier, NotifyError};
use vaccibot_pipeline::{
    spawn_pipeline, DedupKey, DedupPolicy, DedupRecord, PipelineSettings, PollMode, StageGroup,
    WaitOutcome, DEDUP_BUCKET,
};
use vaccibot_source::{DataSource, SourceError};
use vaccibot_storage::{KeyValueStore, MemoryStore};

// ── Scripted capabilities ────────────────────────────────────────────

#[derive(Default)]
struct ScriptedSource {
    regions: Vec<Region>,
    facilities: HashMap<String, Vec<Facility>>,
    slots: Mutex<HashMap<FacilityId, Vec<ServiceSlot>>>,
    rejected: Vec<FacilityId>,
    region_calls: AtomicUsize,
    slot_calls: Mutex<Vec<FacilityId>>,
    delay: Duration,
}

impl ScriptedSource {
    fn set_slots(&self, facility: FacilityId, slots: Vec<ServiceSlot>) {
        self.slots.lock().unwrap().insert(facility, slots);
    }
}

#[async_trait::async_trait]
impl DataSource for ScriptedSource {
    async fn list_regions(&self) -> Result<Vec<Region>, SourceError> {
        self.region_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.regions.clone())
    }

    async fn list_facilities(&self, region: &Region) -> Result<Vec<Facility>, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.facilities.get(&region.id).cloned().unwrap_or_default())
    }

    async fn list_service_slots(&self, facility: &Facility) -> Result<Vec<ServiceSlot>, SourceError> {
        self.slot_calls.lock().unwrap().push(facility.id);
        if self.rejected.contains(&facility.id) {
            return Err(SourceError::UpstreamRejected {
                what: format!("slots of facility {}", facility.id),
                error_code: 39,
                message: Some("МИС недоступна".to_string()),
            });
        }
        Ok(self
            .slots
            .lock()
            .unwrap()
            .get(&facility.id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    locations: Mutex<Vec<GeoPoint>>,
}

impl RecordingNotifier {
    fn sent(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_location(&self, point: GeoPoint) -> Result<(), NotifyError> {
        self.locations.lock().unwrap().push(point);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn region() -> Region {
    Region {
        id: "78".to_string(),
        name: "SPb".to_string(),
        okato: None,
    }
}

fn facility(id: FacilityId) -> Facility {
    Facility {
        id,
        lpu_short_name: format!("Clinic {id}"),
        latitude: Some("59.93".to_string()),
        longitude: Some("30.31".to_string()),
        covid_vaccination: true,
        is_active: true,
        ..Default::default()
    }
}

fn slot(id: &str, name: &str, tickets: i64, participants: i64) -> ServiceSlot {
    ServiceSlot {
        id: id.to_string(),
        name: name.to_string(),
        count_free_ticket: tickets,
        count_free_participant: participants,
        ..Default::default()
    }
}

fn settings(min_resend: Duration) -> PipelineSettings {
    PipelineSettings {
        requests_per_second: NonZeroU32::new(1000).unwrap(),
        request_timeout: Duration::from_secs(1),
        poll: PollMode::Once,
        facility_workers: 2,
        slot_workers: 3,
        policy: DedupPolicy {
            min_resend,
            resend: ResendPolicy::CooldownAndChange,
        },
        ..Default::default()
    }
}

async fn run_once(
    source: &Arc<ScriptedSource>,
    notifier: &Arc<RecordingNotifier>,
    store: &Arc<MemoryStore>,
    settings: PipelineSettings,
) {
    let cancel = CancellationToken::new();
    let mut group = StageGroup::new();
    spawn_pipeline(
        &mut group,
        &cancel,
        source.clone(),
        notifier.clone(),
        store.clone(),
        settings,
    )
    .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), group.wait(&cancel))
        .await
        .expect("single poll should drain");
    assert_eq!(outcome, WaitOutcome::Drained);
}

async fn record(store: &MemoryStore, facility: FacilityId, slot: &str) -> Option<DedupRecord> {
    let key = DedupKey::new("78", facility, slot).encode().unwrap();
    store
        .get(DEDUP_BUCKET, &key)
        .await
        .unwrap()
        .map(|raw| DedupRecord::decode(&raw).unwrap())
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn blocklisted_facility_produces_nothing() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), vec![facility(182), facility(7)])]),
        ..Default::default()
    });
    source.set_slots(182, vec![slot("s1", "COVID vaccination", 9, 9)]);
    source.set_slots(7, vec![slot("s1", "COVID vaccination", 1, 0)]);

    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    run_once(&source, &notifier, &store, settings(Duration::from_secs(1800))).await;

    assert_eq!(*source.slot_calls.lock().unwrap(), vec![7]);
    assert!(record(&store, 182, "s1").await.is_none());
    assert!(record(&store, 7, "s1").await.is_some());
    assert_eq!(notifier.sent(), 1);
    assert!(!notifier.messages.lock().unwrap()[0].contains("Clinic 182"));
}

#[tokio::test]
async fn only_matching_slots_are_announced() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), vec![facility(7)])]),
        ..Default::default()
    });
    source.set_slots(
        7,
        vec![
            slot("a", "Терапевт", 4, 4),
            slot("b", "Вакцинация от COVID-19", 2, 0),
            slot("c", "ковид, повторная", 1, 1),
        ],
    );

    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    run_once(&source, &notifier, &store, settings(Duration::from_secs(1800))).await;

    assert_eq!(notifier.sent(), 2);
    assert_eq!(notifier.locations.lock().unwrap().len(), 2);
    assert!(record(&store, 7, "a").await.is_none());
    assert!(record(&store, 7, "b").await.is_some());
    assert!(record(&store, 7, "c").await.is_some());
}

#[tokio::test]
async fn unchanged_slot_within_cooldown_is_announced_once() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), vec![facility(7)])]),
        ..Default::default()
    });
    source.set_slots(7, vec![slot("s1", "COVID vaccination", 0, 0)]);

    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    run_once(&source, &notifier, &store, settings(Duration::from_secs(1800))).await;
    run_once(&source, &notifier, &store, settings(Duration::from_secs(1800))).await;

    assert_eq!(notifier.sent(), 1);
}

#[tokio::test]
async fn changed_counters_after_cooldown_are_announced_again() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), vec![facility(7)])]),
        ..Default::default()
    });
    source.set_slots(7, vec![slot("s1", "COVID vaccination", 0, 0)]);

    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    // A zero cooldown has always elapsed by the next poll.
    run_once(&source, &notifier, &store, settings(Duration::ZERO)).await;
    run_once(&source, &notifier, &store, settings(Duration::ZERO)).await;
    assert_eq!(notifier.sent(), 1, "unchanged counters stay quiet");

    source.set_slots(7, vec![slot("s1", "COVID vaccination", 5, 0)]);
    run_once(&source, &notifier, &store, settings(Duration::ZERO)).await;

    assert_eq!(notifier.sent(), 2);
    let stored = record(&store, 7, "s1").await.unwrap();
    assert_eq!((stored.free_tickets, stored.free_participants), (5, 0));
}

#[tokio::test]
async fn one_rejected_facility_does_not_affect_the_others() {
    let facilities: Vec<Facility> = (1..=10).map(facility).collect();
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), facilities)]),
        rejected: vec![4],
        ..Default::default()
    });
    for id in 1..=10 {
        source.set_slots(id, vec![slot("s1", "COVID vaccination", id, 0)]);
    }

    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    run_once(&source, &notifier, &store, settings(Duration::from_secs(1800))).await;

    assert_eq!(notifier.sent(), 9);
    assert_eq!(store.len(DEDUP_BUCKET).await, 9);
    assert!(record(&store, 4, "s1").await.is_none());
    for id in (1..=10).filter(|&id| id != 4) {
        assert_eq!(record(&store, id, "s1").await.unwrap().free_tickets, id);
    }
}

#[tokio::test]
async fn cancelled_before_start_fetches_nothing() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut group = StageGroup::new();
    let mut config = settings(Duration::from_secs(1800));
    config.poll = PollMode::Every(Duration::from_secs(60));
    spawn_pipeline(&mut group, &cancel, source.clone(), notifier.clone(), store, config).unwrap();

    assert_eq!(group.wait(&cancel).await, WaitOutcome::Cancelled);
    assert_eq!(group.shutdown(Duration::from_secs(1)).await, 0);
    assert_eq!(source.region_calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.sent(), 0);
}

#[tokio::test]
async fn cancellation_stops_a_running_pipeline() {
    let source = Arc::new(ScriptedSource {
        regions: vec![region()],
        facilities: HashMap::from([("78".to_string(), vec![facility(7)])]),
        delay: Duration::from_secs(30),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());

    let cancel = CancellationToken::new();
    let mut group = StageGroup::new();
    let mut config = settings(Duration::from_secs(1800));
    config.poll = PollMode::Every(Duration::from_secs(60));
    spawn_pipeline(&mut group, &cancel, source.clone(), notifier, store, config).unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(1), group.wait(&cancel))
        .await
        .expect("wait should return promptly on cancel");
    assert_eq!(outcome, WaitOutcome::Cancelled);

    // The slow facility fetch is interrupted by the fetcher, so every unit
    // exits within the grace period.
    assert_eq!(group.shutdown(Duration::from_secs(1)).await, 0);
    assert_eq!(source.region_calls.load(Ordering::SeqCst), 1);
    assert!(source.slot_calls.lock().unwrap().is_empty());
}
