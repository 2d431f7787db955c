//! Integration tests for `SqliteStore` against in-memory and temp-file
//! databases.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use scanvault_core::{
  audit::AuditAction,
  config::StoreConfig,
  event::{ChangeEvent, ChangeKind},
  record::{Classification, DAY_MS, EntityType, NewRecord, StorageStats, now_millis},
  store::{IndexKey, QueryIndex, RecordQuery, RecordStore},
};
use scanvault_crypto::KdfParams;
use serde_json::json;

use crate::{Error, KeySource, SqliteStore, StoreState, schema::SCHEMA_VERSION};

async fn store() -> SqliteStore { store_with(StoreConfig::default()).await }

async fn store_with(config: StoreConfig) -> SqliteStore {
  SqliteStore::open_in_memory(config, KeySource::Ephemeral)
    .await
    .expect("in-memory store")
}

fn scan(id: &str, risk: &str) -> NewRecord {
  NewRecord::new(
    EntityType::ScanResult,
    id,
    json!({ "id": id, "threats": [{ "name": "trojan", "severity": risk }] }),
  )
  .classified(Classification::default().risk(risk))
}

fn days_ago(days: i64) -> i64 { now_millis() - days * DAY_MS }

fn collect_events(store: &SqliteStore) -> Arc<Mutex<Vec<ChangeEvent>>> {
  let events = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&events);
  store
    .subscribe(Box::new(move |event: &ChangeEvent| sink.lock().unwrap().push(event.clone())))
    .unwrap();
  events
}

async fn exec(store: &SqliteStore, sql: &'static str) {
  store
    .inner
    .conn
    .call(move |conn| {
      conn.execute_batch(sql)?;
      Ok(())
    })
    .await
    .unwrap();
}

// ─── Writes and reads ────────────────────────────────────────────────────────

#[tokio::test]
async fn put_then_get_roundtrips() {
  let s = store().await;
  let input = scan("r1", "high");
  let payload = input.payload.clone();

  let record = s.put(input).await.unwrap();
  assert!(record.encrypted);
  assert_eq!(record.integrity_hash.len(), 64);
  assert_eq!(record.schema_version, SCHEMA_VERSION);
  assert_eq!(record.retention_expiry, record.timestamp + 30 * DAY_MS);

  let fetched = s.get(EntityType::ScanResult, "r1").await.unwrap().unwrap();
  assert_eq!(fetched.value, payload);
  assert_eq!(fetched.record, record);
}

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  assert!(s.get(EntityType::ScanResult, "nope").await.unwrap().is_none());
  // Ids are scoped by entity type.
  s.put(scan("shared", "low")).await.unwrap();
  assert!(s.get(EntityType::Setting, "shared").await.unwrap().is_none());
}

#[tokio::test]
async fn payload_is_not_stored_in_the_clear() {
  let s = store().await;
  s.put(scan("r1", "high")).await.unwrap();

  let (cipher, plain): (Option<String>, Option<String>) = s
    .inner
    .conn
    .call(|conn| {
      Ok(conn.query_row(
        "SELECT cipher_payload, plain_payload FROM records WHERE id = 'r1'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )?)
    })
    .await
    .unwrap();
  assert!(plain.is_none());
  assert!(!cipher.unwrap().contains("trojan"));
}

#[tokio::test]
async fn rewrite_keeps_creation_time() {
  let s = store().await;
  let created = days_ago(3);
  let first = s.put(scan("r1", "low").at(created)).await.unwrap();

  let second = s
    .put(NewRecord::new(EntityType::ScanResult, "r1", json!({ "rescanned": true })))
    .await
    .unwrap();
  assert_eq!(second.timestamp, created);
  assert_eq!(second.retention_expiry, first.retention_expiry);

  let fetched = s.get(EntityType::ScanResult, "r1").await.unwrap().unwrap();
  assert_eq!(fetched.value, json!({ "rescanned": true }));
  assert_eq!(fetched.record.classification, Classification::default());
  assert_eq!(s.stats().await.unwrap().total_records, 1);
}

#[tokio::test]
async fn generated_ids_are_used_verbatim() {
  let s = store().await;
  let input = NewRecord::with_generated_id(EntityType::Setting, json!({ "theme": "dark" }));
  let id = input.id.clone();
  s.put(input).await.unwrap();
  assert!(s.get(EntityType::Setting, &id).await.unwrap().is_some());
}

#[tokio::test]
async fn plain_records_when_encryption_disabled() {
  let s = store_with(StoreConfig { encryption_enabled: false, ..Default::default() }).await;
  let record = s.put(scan("p1", "medium")).await.unwrap();
  assert!(!record.encrypted);

  let fetched = s.get(EntityType::ScanResult, "p1").await.unwrap().unwrap();
  assert!(!fetched.record.encrypted);
  assert_eq!(fetched.value["threats"][0]["severity"], "medium");

  let encrypted = s
    .query(&RecordQuery::default().by(QueryIndex::Encrypted, Some(IndexKey::Bool(false))))
    .await
    .unwrap();
  assert_eq!(encrypted.len(), 1);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

async fn seeded() -> SqliteStore {
  let s = store().await;
  let regions = ["EU", "US", "EU", "APAC", "EU"];
  for (i, region) in regions.iter().enumerate() {
    let risk = if i % 2 == 0 { "high" } else { "low" };
    let input = scan(&format!("r{i}"), risk)
      .classified(Classification::default().risk(risk).region(*region))
      .at(days_ago(5) + i as i64 * 1_000);
    s.put(input).await.unwrap();
  }
  s.put(NewRecord::new(EntityType::Setting, "theme", json!("dark")))
    .await
    .unwrap();
  s
}

fn ids(records: &[scanvault_core::record::ResolvedRecord]) -> Vec<&str> {
  records.iter().map(|r| r.record.id.as_str()).collect()
}

#[tokio::test]
async fn query_walks_timestamp_order() {
  let s = seeded().await;

  let asc = s.query(&RecordQuery::entity(EntityType::ScanResult)).await.unwrap();
  assert_eq!(ids(&asc), ["r0", "r1", "r2", "r3", "r4"]);

  let desc = s
    .query(&RecordQuery::entity(EntityType::ScanResult).descending())
    .await
    .unwrap();
  assert_eq!(ids(&desc), ["r4", "r3", "r2", "r1", "r0"]);

  let all = s.query(&RecordQuery::default()).await.unwrap();
  assert_eq!(all.len(), 6);
}

#[tokio::test]
async fn query_pages_with_limit_and_offset() {
  let s = seeded().await;
  let page = s
    .query(&RecordQuery::entity(EntityType::ScanResult).offset(1).limit(2))
    .await
    .unwrap();
  assert_eq!(ids(&page), ["r1", "r2"]);

  let empty = s
    .query(&RecordQuery::entity(EntityType::ScanResult).limit(0))
    .await
    .unwrap();
  assert!(empty.is_empty());
}

#[tokio::test]
async fn query_by_index_key() {
  let s = seeded().await;
  let high = s
    .query(
      &RecordQuery::entity(EntityType::ScanResult)
        .by(QueryIndex::RiskLevel, Some(IndexKey::Text("high".into()))),
    )
    .await
    .unwrap();
  assert_eq!(ids(&high), ["r0", "r2", "r4"]);

  let apac = s
    .query(&RecordQuery::default().by(QueryIndex::Region, Some(IndexKey::Text("APAC".into()))))
    .await
    .unwrap();
  assert_eq!(ids(&apac), ["r3"]);
}

#[tokio::test]
async fn filter_runs_before_offset() {
  let s = seeded().await;
  let eu = s
    .query(
      &RecordQuery::entity(EntityType::ScanResult)
        .filter(|c| c.region.as_deref() == Some("EU"))
        .offset(1),
    )
    .await
    .unwrap();
  assert_eq!(ids(&eu), ["r2", "r4"]);
}

#[tokio::test]
async fn query_streams_past_one_page() {
  let s = store().await;
  let base = days_ago(1);
  for i in 0..150 {
    s.put(NewRecord::new(EntityType::Setting, format!("k{i:03}"), json!(i)).at(base + i))
      .await
      .unwrap();
  }
  let all = s.query(&RecordQuery::entity(EntityType::Setting)).await.unwrap();
  assert_eq!(all.len(), 150);
  assert_eq!(all[149].value, json!(149));
}

#[tokio::test]
async fn deletes_between_pages_do_not_hide_live_records() {
  let s = store().await;
  let base = days_ago(1);
  for i in 0..150 {
    s.put(NewRecord::new(EntityType::Setting, format!("k{i:03}"), json!(i)).at(base + i))
      .await
      .unwrap();
  }

  let deleter = s.clone();
  let query = RecordQuery::entity(EntityType::Setting);
  let (found, ()) = tokio::join!(s.query(&query), async move {
    for i in 0..10 {
      deleter.delete(EntityType::Setting, &format!("k{i:03}")).await.unwrap();
      tokio::task::yield_now().await;
    }
  });
  let found = found.unwrap();
  let found_ids = ids(&found);

  for i in 10..150 {
    let id = format!("k{i:03}");
    assert!(found_ids.contains(&id.as_str()), "{id} missing from query");
  }
  let mut unique = found_ids.clone();
  unique.sort_unstable();
  unique.dedup();
  assert_eq!(unique.len(), found_ids.len());
}

#[tokio::test]
async fn nullable_index_pages_without_gaps_or_repeats() {
  let s = store().await;
  let base = days_ago(1);
  for i in 0..100 {
    s.put(NewRecord::new(EntityType::Setting, format!("k{i:03}"), json!(i)).at(base + i))
      .await
      .unwrap();
  }
  for i in 0..30 {
    let risk = if i % 2 == 0 { "high" } else { "low" };
    s.put(scan(&format!("r{i:02}"), risk).at(base + i)).await.unwrap();
  }

  for query in [
    RecordQuery::default().by(QueryIndex::RiskLevel, None),
    RecordQuery::default().by(QueryIndex::RiskLevel, None).descending(),
  ] {
    let all = s.query(&query).await.unwrap();
    let mut seen = ids(&all);
    assert_eq!(seen.len(), 130);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 130);
  }

  let asc = s.query(&RecordQuery::default().by(QueryIndex::RiskLevel, None)).await.unwrap();
  // Unclassified settings sort first, then "high" before "low".
  assert!(asc[..100].iter().all(|r| r.record.entity_type == EntityType::Setting));
  assert_eq!(asc[100].record.classification.risk_level.as_deref(), Some("high"));
  assert_eq!(asc[129].record.classification.risk_level.as_deref(), Some("low"));
}

// ─── Corruption tolerance ────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_record_is_skipped_by_queries() {
  let s = store().await;
  for id in ["a", "b", "c", "d"] {
    s.put(scan(id, "low")).await.unwrap();
  }
  let events = collect_events(&s);

  exec(
    &s,
    "UPDATE records SET cipher_payload = 'AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA' WHERE id = 'c'",
  )
  .await;

  let results = s.query(&RecordQuery::entity(EntityType::ScanResult)).await.unwrap();
  assert_eq!(ids(&results), ["a", "b", "d"]);

  let errors: Vec<_> = events
    .lock()
    .unwrap()
    .iter()
    .filter(|e| e.kind == ChangeKind::Error)
    .cloned()
    .collect();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].entity_type, Some(EntityType::ScanResult));

  // A direct read surfaces the failure instead.
  assert!(matches!(
    s.get(EntityType::ScanResult, "c").await,
    Err(Error::CorruptRecord { .. })
  ));
}

#[tokio::test]
async fn integrity_mismatch_is_skipped() {
  let s = store_with(StoreConfig { encryption_enabled: false, ..Default::default() }).await;
  for id in ["a", "b", "c", "d"] {
    s.put(scan(id, "low")).await.unwrap();
  }
  exec(&s, "UPDATE records SET plain_payload = '{\"forged\":true}' WHERE id = 'a'").await;

  let results = s
    .query(&RecordQuery::entity(EntityType::ScanResult).limit(3))
    .await
    .unwrap();
  // The limit counts only records actually returned.
  assert_eq!(ids(&results), ["b", "c", "d"]);
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_reports_existence() {
  let s = store().await;
  s.put(scan("r1", "low")).await.unwrap();
  let events = collect_events(&s);

  assert!(s.delete(EntityType::ScanResult, "r1").await.unwrap());
  assert!(!s.delete(EntityType::ScanResult, "r1").await.unwrap());
  assert!(s.get(EntityType::ScanResult, "r1").await.unwrap().is_none());

  let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
  assert_eq!(kinds, [ChangeKind::Delete]);
}

#[tokio::test]
async fn clear_is_scoped_by_entity_type() {
  let s = seeded().await;
  assert_eq!(s.clear(EntityType::ScanResult).await.unwrap(), 5);

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_records, 1);
  assert_eq!(stats.scan_results, 0);
  assert_eq!(stats.settings, 1);
}

#[tokio::test]
async fn clear_all_forgets_records_and_audit() {
  let s = seeded().await;
  assert!(!s.recent_audit(10).unwrap().is_empty());

  assert_eq!(s.clear_all().await.unwrap(), 6);
  assert_eq!(s.stats().await.unwrap().total_records, 0);
  assert!(s.recent_audit(10).unwrap().is_empty());
}

// ─── Stats and audit ─────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_reflect_contents() {
  let s = store().await;
  assert_eq!(s.stats().await.unwrap(), StorageStats::default());

  let s = seeded().await;
  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_records, 6);
  assert_eq!(stats.scan_results, 5);
  assert!(stats.estimated_bytes > 0);
  assert!(stats.oldest.unwrap() < stats.newest.unwrap());
}

#[tokio::test]
async fn operations_are_audited() {
  let s = store().await;
  s.put(scan("r1", "low")).await.unwrap();
  s.get(EntityType::ScanResult, "r1").await.unwrap();
  s.delete(EntityType::ScanResult, "r1").await.unwrap();
  s.append_audit(AuditAction::Exported, None, "exported 0 records").unwrap();

  let actions: Vec<_> = s.recent_audit(10).unwrap().into_iter().map(|e| e.action).collect();
  assert_eq!(
    actions,
    [AuditAction::Created, AuditAction::Accessed, AuditAction::Deleted, AuditAction::Exported]
  );
  assert_eq!(s.compliance_audit().unwrap().len(), 4);
}

#[tokio::test]
async fn rewrite_is_audited_as_a_replacement() {
  let s = store().await;
  s.put(scan("r1", "low")).await.unwrap();
  s.put(scan("r1", "high")).await.unwrap();

  let details: Vec<_> = s.recent_audit(10).unwrap().into_iter().map(|e| e.details).collect();
  assert_eq!(details, ["created scan_result record", "replaced scan_result record"]);
}

// ─── Retention ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cleanup_removes_only_expired_records() {
  let s = store().await;
  s.put(scan("old", "low").at(days_ago(40))).await.unwrap();
  s.put(scan("recent", "low").at(days_ago(10))).await.unwrap();

  let status = s.retention_status().await.unwrap();
  assert_eq!(status.expired_records, 1);
  assert!(!status.is_compliant());

  assert_eq!(s.run_cleanup(30).await.unwrap(), 1);
  assert_eq!(s.run_cleanup(30).await.unwrap(), 0);

  assert!(s.get(EntityType::ScanResult, "old").await.unwrap().is_none());
  assert!(s.get(EntityType::ScanResult, "recent").await.unwrap().is_some());
  assert!(s.retention_status().await.unwrap().is_compliant());
}

#[tokio::test]
async fn cleanup_is_bounded_by_batch_size() {
  let s = store_with(StoreConfig { cleanup_batch_size: 3, ..Default::default() }).await;
  for i in 0..5 {
    s.put(scan(&format!("old{i}"), "low").at(days_ago(60) + i)).await.unwrap();
  }
  let events = collect_events(&s);

  assert_eq!(s.run_cleanup(30).await.unwrap(), 3);
  // Oldest first.
  assert!(s.get(EntityType::ScanResult, "old3").await.unwrap().is_some());
  assert!(s.get(EntityType::ScanResult, "old0").await.unwrap().is_none());
  assert_eq!(s.run_cleanup(30).await.unwrap(), 2);

  let counts: Vec<_> = events
    .lock()
    .unwrap()
    .iter()
    .filter(|e| e.kind == ChangeKind::Cleanup)
    .map(|e| e.record_count)
    .collect();
  assert_eq!(counts, [Some(3), Some(2)]);
}

#[tokio::test]
async fn cleanup_rejects_out_of_range_retention() {
  let s = store().await;
  assert!(matches!(s.run_cleanup(0).await, Err(Error::Core(_))));
  assert!(s.run_cleanup(366).await.is_err());
}

#[tokio::test]
async fn overlapping_cleanup_is_a_no_op() {
  let s = store().await;
  s.put(scan("old", "low").at(days_ago(40))).await.unwrap();

  s.inner.cleanup_running.store(true, Ordering::SeqCst);
  assert_eq!(s.run_cleanup(30).await.unwrap(), 0);

  s.inner.cleanup_running.store(false, Ordering::SeqCst);
  assert_eq!(s.run_cleanup(30).await.unwrap(), 1);
}

#[tokio::test]
async fn quota_triggers_cleanup_before_put_returns() {
  let s = store_with(StoreConfig { max_records: Some(5), ..Default::default() }).await;
  let events = collect_events(&s);
  let base = days_ago(1);

  for i in 0..6 {
    s.put(scan(&format!("r{i}"), "low").at(base + i)).await.unwrap();
  }

  let log = events.lock().unwrap().clone();
  let last = log.last().unwrap();
  assert_eq!(last.kind, ChangeKind::Cleanup);
  assert_eq!(last.record_count, Some(1));
  assert_eq!(log.iter().filter(|e| e.kind == ChangeKind::Cleanup).count(), 1);

  assert_eq!(s.stats().await.unwrap().total_records, 5);
  assert!(s.get(EntityType::ScanResult, "r0").await.unwrap().is_none());
}

#[tokio::test]
async fn quota_prefers_expired_records() {
  let s = store_with(StoreConfig { max_records: Some(2), ..Default::default() }).await;
  s.put(scan("fresh1", "low").at(days_ago(2))).await.unwrap();
  s.put(scan("fresh2", "low").at(days_ago(1))).await.unwrap();
  // Writing an expired record pushes the store over quota; the expired
  // record is the one evicted, not the oldest fresh one.
  s.put(scan("stale", "low").at(days_ago(45))).await.unwrap();

  assert!(s.get(EntityType::ScanResult, "stale").await.unwrap().is_none());
  assert!(s.get(EntityType::ScanResult, "fresh1").await.unwrap().is_some());
}

#[tokio::test]
async fn quota_never_evicts_the_record_just_written() {
  let s = store_with(StoreConfig { max_records: Some(2), ..Default::default() }).await;
  s.put(scan("f1", "low").at(days_ago(2))).await.unwrap();
  s.put(scan("f2", "low").at(days_ago(1))).await.unwrap();
  // Backfilled and older than everything else, but still inside retention.
  let backfill = s.put(scan("backfill", "low").at(days_ago(5))).await.unwrap();

  let stored = s.get(EntityType::ScanResult, "backfill").await.unwrap().unwrap();
  assert_eq!(stored.record, backfill);
  assert!(s.get(EntityType::ScanResult, "f1").await.unwrap().is_none());
  assert!(s.get(EntityType::ScanResult, "f2").await.unwrap().is_some());
  assert_eq!(s.stats().await.unwrap().total_records, 2);
}

#[tokio::test]
async fn scheduler_runs_cleanup_periodically() {
  let s = store_with(StoreConfig { cleanup_interval_ms: 50, ..Default::default() }).await;
  s.put(scan("old", "low").at(days_ago(40))).await.unwrap();
  s.put(scan("new", "low")).await.unwrap();

  tokio::time::sleep(Duration::from_millis(400)).await;

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_records, 1);
  assert!(s.get(EntityType::ScanResult, "new").await.unwrap().is_some());
}

// ─── Events ──────────────────────────────────────────────────────────────────

fn panicking_listener(_: &ChangeEvent) { panic!("listener bug") }

#[tokio::test]
async fn panicking_listener_does_not_break_writes() {
  let s = store().await;
  let hits = Arc::new(AtomicUsize::new(0));
  s.subscribe(Box::new(panicking_listener)).unwrap();
  let counter = Arc::clone(&hits);
  s.subscribe(Box::new(move |_: &ChangeEvent| {
    counter.fetch_add(1, Ordering::SeqCst);
  }))
  .unwrap();

  s.put(scan("r1", "low")).await.unwrap();
  s.put(scan("r2", "low")).await.unwrap();
  assert_eq!(hits.load(Ordering::SeqCst), 2);
  assert_eq!(s.stats().await.unwrap().total_records, 2);
}

#[tokio::test]
async fn unsubscribed_listener_stops_receiving() {
  let s = store().await;
  let hits = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&hits);
  let sub = s
    .subscribe(Box::new(move |_: &ChangeEvent| {
      counter.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

  s.put(scan("r1", "low")).await.unwrap();
  assert!(sub.unsubscribe());
  s.put(scan("r2", "low")).await.unwrap();
  assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn disposed_store_rejects_operations() {
  let s = store().await;
  assert_eq!(s.state(), StoreState::Ready);
  let events = collect_events(&s);

  s.dispose().await.unwrap();
  assert_eq!(s.state(), StoreState::Closed);
  s.dispose().await.unwrap();

  assert!(matches!(s.put(scan("r1", "low")).await, Err(Error::NotInitialized)));
  assert!(matches!(
    s.get(EntityType::ScanResult, "r1").await,
    Err(Error::NotInitialized)
  ));
  assert!(matches!(s.query(&RecordQuery::default()).await, Err(Error::NotInitialized)));
  assert!(matches!(s.stats().await, Err(Error::NotInitialized)));
  assert!(matches!(s.run_cleanup(30).await, Err(Error::NotInitialized)));
  assert!(matches!(s.recent_audit(1), Err(Error::NotInitialized)));
  assert!(s.subscribe(Box::new(|_: &ChangeEvent| {})).is_err());

  // Failures are still announced to existing listeners.
  assert!(events.lock().unwrap().iter().any(|e| e.kind == ChangeKind::Error));
}

#[tokio::test]
async fn invalid_config_fails_to_open() {
  let result = SqliteStore::open_in_memory(
    StoreConfig { retention_days: 0, ..Default::default() },
    KeySource::Ephemeral,
  )
  .await;
  assert!(matches!(result, Err(Error::Core(_))));
}

#[tokio::test]
async fn fresh_store_records_migration_history() {
  let s = store().await;
  assert_eq!(s.schema_version().await.unwrap(), SCHEMA_VERSION);
  let history = s.migration_history().await.unwrap();
  assert_eq!(history.iter().map(|r| r.version).collect::<Vec<_>>(), [1, 2, 3]);
  assert!(s.self_test().unwrap());
}

// ─── Persistence ─────────────────────────────────────────────────────────────

fn passphrase(p: &str) -> KeySource {
  KeySource::Passphrase { passphrase: p.into(), kdf: KdfParams::for_testing() }
}

#[tokio::test]
async fn wrapped_key_keeps_records_readable_across_restarts() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("vault.db");

  let first = SqliteStore::open(&path, StoreConfig::default(), passphrase("hunter2"))
    .await
    .unwrap();
  first.put(scan("persisted", "high")).await.unwrap();
  first.dispose().await.unwrap();

  let second = SqliteStore::open(&path, StoreConfig::default(), passphrase("hunter2"))
    .await
    .unwrap();
  let fetched = second
    .get(EntityType::ScanResult, "persisted")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(fetched.value["id"], "persisted");
  // Re-opening does not re-run migrations.
  assert_eq!(second.migration_history().await.unwrap().len(), 3);
  second.dispose().await.unwrap();

  let wrong = SqliteStore::open(&path, StoreConfig::default(), passphrase("guess")).await;
  assert!(matches!(wrong, Err(Error::Initialization(_))));
}

#[tokio::test]
async fn seeded_key_survives_restart() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("seeded.db");
  let seed = || KeySource::Seed(b"device-bound-seed-material".to_vec());

  let first = SqliteStore::open(&path, StoreConfig::default(), seed()).await.unwrap();
  first
    .put(NewRecord::new(EntityType::Setting, "locale", json!("en-GB")))
    .await
    .unwrap();
  first.dispose().await.unwrap();

  let second = SqliteStore::open(&path, StoreConfig::default(), seed()).await.unwrap();
  let fetched = second.get(EntityType::Setting, "locale").await.unwrap().unwrap();
  assert_eq!(fetched.value, json!("en-GB"));
}

#[tokio::test]
async fn wrong_seed_is_refused() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("seeded.db");

  let first = SqliteStore::open(&path, StoreConfig::default(), KeySource::Seed(b"seed-a".to_vec()))
    .await
    .unwrap();
  for i in 0..3 {
    first.put(scan(&format!("r{i}"), "low")).await.unwrap();
  }
  first.dispose().await.unwrap();

  let wrong =
    SqliteStore::open(&path, StoreConfig::default(), KeySource::Seed(b"seed-b".to_vec())).await;
  assert!(matches!(wrong, Err(Error::Initialization(_))));

  let fresh = SqliteStore::open(&path, StoreConfig::default(), KeySource::Ephemeral).await;
  assert!(matches!(fresh, Err(Error::Initialization(_))));

  let right = SqliteStore::open(&path, StoreConfig::default(), KeySource::Seed(b"seed-a".to_vec()))
    .await
    .unwrap();
  assert_eq!(right.query(&RecordQuery::default()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn key_source_kind_must_match() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("vault.db");

  let first = SqliteStore::open(&path, StoreConfig::default(), passphrase("hunter2"))
    .await
    .unwrap();
  first.dispose().await.unwrap();

  let seeded =
    SqliteStore::open(&path, StoreConfig::default(), KeySource::Seed(b"seed".to_vec())).await;
  let Err(Error::Initialization(reason)) = seeded else {
    panic!("expected an initialization error");
  };
  assert!(reason.contains("passphrase"), "{reason}");
}
