//! Full sync passes against the in-memory CRM.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use pulse_core::{from_millis, EntityKind, EventName, SyncEvent, MAX_OFFSET};
use pulse_db::{Account, Database, DbConfig};
use pulse_sync::{
    AccountCredentials, CheckpointStore, Credential, EngineSettings, Failure, InMemoryCheckpointStore,
    InMemoryCrm, MemoryQueue, OutboxQueue, SqliteCheckpointStore, SyncEngine, SyncError,
};

const ACCOUNT: &str = "4242";
const T0: i64 = 1_700_000_000_000;
const NOW: i64 = T0 + 3_600_000;

fn ts(ms: i64) -> DateTime<Utc> {
    from_millis(ms).unwrap()
}

fn credentials() -> Arc<AccountCredentials> {
    Arc::new(AccountCredentials::new(
        ACCOUNT,
        Credential {
            access_token: "token-0".into(),
            refresh_token: "refresh-0".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        },
    ))
}

struct Harness {
    crm: Arc<InMemoryCrm>,
    store: Arc<InMemoryCheckpointStore>,
    queue: Arc<MemoryQueue>,
    engine: SyncEngine,
}

impl Harness {
    fn new(checkpoint: Option<i64>, settings: EngineSettings) -> Self {
        let crm = Arc::new(InMemoryCrm::new());
        let store = Arc::new(match checkpoint {
            Some(at) => InMemoryCheckpointStore::with_checkpoint(ACCOUNT, EntityKind::Meetings, ts(at)),
            None => InMemoryCheckpointStore::new(),
        });
        let queue = Arc::new(MemoryQueue::new());
        let engine = SyncEngine::new(crm.clone(), store.clone(), queue.clone(), settings);
        Harness {
            crm,
            store,
            queue,
            engine,
        }
    }

    async fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.store
            .load(ACCOUNT, EntityKind::Meetings)
            .await
            .unwrap()
            .last_pulled_at
    }

    async fn events(&self) -> Vec<SyncEvent> {
        self.queue.events_for(ACCOUNT).await
    }
}

/// `count` meetings modified one millisecond apart after `T0`, ids sortable
/// in modification order.
fn meetings(count: i64) -> Vec<pulse_core::remote::RawRecord> {
    (0..count)
        .map(|i| InMemoryCrm::meeting(&format!("m{:05}", i), ts(T0 + 1 + i), ts(T0 + 1 + i)))
        .collect()
}

#[tokio::test]
async fn end_to_end_two_pages_commit_pass_start() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(103));

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.events_emitted, 103);
    assert_eq!(report.committed, ts(NOW));
    assert_eq!(h.checkpoint().await, Some(ts(NOW)));

    let ids: Vec<String> = h
        .events()
        .await
        .iter()
        .map(|e| e.record_id().to_string())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids.len(), 103);
    assert_eq!(ids, sorted);

    let requests = h.crm.search_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].after.as_deref(), Some("100"));
}

#[tokio::test]
async fn second_pass_without_changes_emits_nothing() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(5));

    h.engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();
    let second = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW + 60_000))
        .await
        .unwrap();

    assert_eq!(second.events_emitted, 0);
    assert_eq!(h.events().await.len(), 5);
    assert_eq!(h.checkpoint().await, Some(ts(NOW + 60_000)));
}

#[tokio::test]
async fn second_pass_picks_up_only_new_changes() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(3));
    h.engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    // m00001 edited, one meeting created after the first pass
    h.crm
        .upsert_meeting(InMemoryCrm::meeting("m00001", ts(T0 + 2), ts(NOW + 10)));
    h.crm
        .insert_meeting(InMemoryCrm::meeting("fresh", ts(NOW + 20), ts(NOW + 20)));

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW + 60_000))
        .await
        .unwrap();
    assert_eq!(report.events_emitted, 2);

    let events = h.events().await;
    let latest = &events[3..];
    assert_eq!(latest[0].record_id(), "m00001");
    assert_eq!(latest[0].name(), EventName::Updated);
    assert_eq!(latest[0].occurred_at(), ts(NOW + 10));
    assert_eq!(latest[1].record_id(), "fresh");
    assert_eq!(latest[1].name(), EventName::Created);
}

#[tokio::test]
async fn offset_ceiling_is_crossed_by_rewinding() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    let total = MAX_OFFSET as i64 + 150;
    h.crm.insert_meetings(meetings(total));

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(report.rewinds, 1);
    assert_eq!(report.duplicates_skipped, 1);
    assert_eq!(report.events_emitted, total as usize);

    let events = h.events().await;
    let mut ids: Vec<&str> = events.iter().map(|e| e.record_id()).collect();
    ids.dedup();
    assert_eq!(ids.len(), total as usize);

    // no request ever went past the ceiling
    assert!(h
        .crm
        .search_requests()
        .iter()
        .filter_map(|r| r.after.as_deref())
        .all(|after| after.parse::<u64>().unwrap() < MAX_OFFSET));
    assert_eq!(h.checkpoint().await, Some(ts(NOW)));
}

#[tokio::test]
async fn shared_timestamps_across_rewinds_are_emitted_once() {
    let settings = EngineSettings {
        page_size: 10,
        max_offset: 20,
        ..EngineSettings::default()
    };
    let h = Harness::new(Some(T0), settings);
    // 60 meetings, three per millisecond
    h.crm.insert_meetings((0..60).map(|i| {
        InMemoryCrm::meeting(&format!("m{:05}", i), ts(T0 + 1), ts(T0 + 1 + i / 3))
    }));

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert!(report.rewinds >= 2);
    assert!(report.duplicates_skipped >= 1);
    assert_eq!(report.events_emitted, 60);

    let mut ids: Vec<String> = h
        .events()
        .await
        .iter()
        .map(|e| e.record_id().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 60);
}

#[tokio::test(start_paused = true)]
async fn exhausted_search_aborts_without_commit() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(3));
    h.crm.fail_all_searches(Some(Failure::Unavailable));

    let started = tokio::time::Instant::now();
    let result = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await;

    match result {
        Err(SyncError::Exhausted { attempts, .. }) => assert_eq!(attempts, 5),
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(h.crm.search_calls(), 5);
    // 10 + 20 + 40 + 80 seconds with the default 5 s base
    assert_eq!(started.elapsed(), Duration::from_secs(150));
    assert_eq!(h.checkpoint().await, Some(ts(T0)));
    assert!(h.events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_lookup_on_second_page_keeps_first_page_and_checkpoint() {
    let settings = EngineSettings {
        page_size: 2,
        max_attempts: 2,
        base_delay_ms: 100,
        ..EngineSettings::default()
    };
    let h = Harness::new(Some(T0), settings);
    h.crm.insert_meetings(meetings(4));
    // one association read per record: page one uses two, page two fails
    h.crm.fail_lookups_after(2, 2, Failure::Timeout);

    let result = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await;

    assert!(matches!(result, Err(SyncError::Exhausted { .. })));
    let queued: Vec<String> = h
        .events()
        .await
        .iter()
        .map(|e| e.record_id().to_string())
        .collect();
    assert_eq!(queued, vec!["m00000", "m00001"]);
    assert_eq!(h.checkpoint().await, Some(ts(T0)));
}

#[tokio::test]
async fn classification_against_checkpoint() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings([
        InMemoryCrm::meeting("new", ts(T0 + 10), ts(T0 + 20)),
        InMemoryCrm::meeting("old", ts(T0 - 5_000), ts(T0 + 30)),
        InMemoryCrm::meeting("boundary", ts(T0), ts(T0 + 40)),
    ]);

    h.engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    let events = h.events().await;
    assert_eq!(events.len(), 3);

    assert_eq!(events[0].record_id(), "new");
    assert_eq!(events[0].name(), EventName::Created);
    assert_eq!(events[0].occurred_at(), ts(T0 + 10));

    assert_eq!(events[1].record_id(), "old");
    assert_eq!(events[1].name(), EventName::Updated);
    assert_eq!(events[1].occurred_at(), ts(T0 + 30));

    assert_eq!(events[2].record_id(), "boundary");
    assert_eq!(events[2].name(), EventName::Updated);
    assert_eq!(events[2].occurred_at(), ts(T0 + 40));

    for event in &events {
        assert!(event.occurred_at() >= ts(T0) && event.occurred_at() <= ts(NOW));
    }
}

#[tokio::test]
async fn participants_and_payload_fields() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm
        .insert_meeting(InMemoryCrm::meeting("m1", ts(T0 + 1), ts(T0 + 2)));
    h.crm.link_contact("m1", "c1", Some("ada@example.com"));
    h.crm.link_contact("m1", "c2", None);

    h.engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    let events = h.events().await;
    assert_eq!(events[0].related_ids().to_vec(), vec!["ada@example.com".to_string()]);
    assert_eq!(events[0].fields()["meeting_id"], "m1");
    assert_eq!(events[0].fields()["meeting_title"], "Meeting m1");
    assert!(!events[0].fields().contains_key("meeting_start"));
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    let mut broken = InMemoryCrm::meeting("broken", ts(T0 + 1), ts(T0 + 1));
    broken.properties = None;
    h.crm.insert_meetings([broken, InMemoryCrm::meeting("ok", ts(T0 + 2), ts(T0 + 2))]);

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(report.malformed_skipped, 1);
    assert_eq!(report.events_emitted, 1);
    assert_eq!(h.checkpoint().await, Some(ts(NOW)));
}

#[tokio::test]
async fn batched_lookups_produce_same_events() {
    let populate = |crm: &InMemoryCrm| {
        crm.insert_meetings(meetings(30));
        for i in (0..30).step_by(4) {
            let meeting = format!("m{:05}", i);
            crm.link_contact(
                &meeting,
                &format!("c{}", i),
                Some(format!("p{}@example.com", i).as_str()),
            );
            crm.link_contact(&meeting, "shared", Some("shared@example.com"));
        }
    };

    let per_record = Harness::new(Some(T0), EngineSettings::default());
    populate(&per_record.crm);
    per_record
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    let batched = Harness::new(
        Some(T0),
        EngineSettings {
            batch_participant_lookups: true,
            ..EngineSettings::default()
        },
    );
    populate(&batched.crm);
    batched
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(per_record.events().await, batched.events().await);
    assert_eq!(per_record.crm.association_calls(), 30);
    assert_eq!(batched.crm.association_calls(), 1);
}

#[tokio::test]
async fn cancellation_mid_page_queues_nothing_from_that_page() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(3));

    let cancel = CancellationToken::new();
    h.crm.cancel_on_lookup(cancel.clone());

    let result = h
        .engine
        .run_pass_at(credentials(), cancel, ts(NOW))
        .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(h.events().await.is_empty());
    assert_eq!(h.checkpoint().await, Some(ts(T0)));
}

#[tokio::test(start_paused = true)]
async fn rejected_token_is_refreshed_and_pass_completes() {
    let h = Harness::new(Some(T0), EngineSettings::default());
    h.crm.insert_meetings(meetings(2));
    h.crm.require_token("issued-elsewhere");

    let creds = credentials();
    let report = h
        .engine
        .run_pass_at(Arc::clone(&creds), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(report.events_emitted, 2);
    assert_eq!(h.crm.refresh_calls(), 1);
    let current = creds.snapshot().await;
    assert_eq!(current.access_token, "token-1");
    assert_eq!(current.refresh_token, "refresh-1");
}

#[tokio::test]
async fn first_pass_has_no_lower_bound() {
    let h = Harness::new(None, EngineSettings::default());
    h.crm.insert_meetings(meetings(4));

    let report = h
        .engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert!(report.window.start().is_none());
    assert!(h.crm.search_requests()[0].filter_groups.is_empty());
    assert!(h
        .events()
        .await
        .iter()
        .all(|e| e.name() == EventName::Created));
    assert_eq!(h.checkpoint().await, Some(ts(NOW)));
}

#[tokio::test]
async fn sqlite_backed_pass_writes_outbox_and_checkpoint() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.accounts()
        .upsert(&Account {
            account_id: ACCOUNT.into(),
            access_token: "token-0".into(),
            refresh_token: "refresh-0".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            enabled: true,
        })
        .await
        .unwrap();
    db.checkpoints()
        .upsert(ACCOUNT, EntityKind::Meetings, ts(T0))
        .await
        .unwrap();

    let crm = Arc::new(InMemoryCrm::new());
    crm.insert_meetings(meetings(7));
    let engine = SyncEngine::new(
        crm,
        Arc::new(SqliteCheckpointStore::new(db.clone())),
        Arc::new(OutboxQueue::new(db.clone())),
        EngineSettings::default(),
    );

    engine
        .run_pass_at(credentials(), CancellationToken::new(), ts(NOW))
        .await
        .unwrap();

    assert_eq!(db.events().count_pending().await.unwrap(), 7);
    let pending = db.events().get_pending(100).await.unwrap();
    assert_eq!(pending[0].event.record_id(), "m00000");
    assert_eq!(
        db.checkpoints()
            .get(ACCOUNT, EntityKind::Meetings)
            .await
            .unwrap()
            .last_pulled_at,
        Some(ts(NOW))
    );
}
