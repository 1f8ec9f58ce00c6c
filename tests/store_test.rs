use chrono::{Duration, Utc};
use tempfile::tempdir;

use axwatch::db::repositories::{EventRepository, RegistryRepository};
use axwatch::db::{hash_text, Database, Observation};
use axwatch::privacy::CaptureDecision;
use axwatch::tree::{AccessibleObjectRef, EventKind};

fn text_entry() -> AccessibleObjectRef {
    AccessibleObjectRef::new("gedit", "text", "/org/a11y/atspi/accessible/7")
}

#[tokio::test]
async fn identical_snapshots_insert_once() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();
    let now = Utc::now();

    assert!(db
        .record_snapshot(&object, "Hello", CaptureDecision::Observe, now)
        .await
        .unwrap());
    assert!(!db
        .record_snapshot(&object, "Hello", CaptureDecision::Observe, now)
        .await
        .unwrap());
    assert!(db
        .record_snapshot(&object, "Hello again", CaptureDecision::Observe, now)
        .await
        .unwrap());

    let snapshots = db.snapshots_for_object(&object.object_id()).await.unwrap();
    assert_eq!(snapshots.len(), 2);
}

#[tokio::test]
async fn empty_text_is_recorded_not_skipped() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();

    assert!(db
        .record_snapshot(&object, "", CaptureDecision::Observe, Utc::now())
        .await
        .unwrap());

    let snapshots = db.snapshots_for_object(&object.object_id()).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].text_hash, hash_text(""));
    assert_eq!(snapshots[0].text_content.as_deref(), Some(""));
}

#[tokio::test]
async fn metadata_only_stores_hash_without_body() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();

    assert!(db
        .record_snapshot(&object, "secret value", CaptureDecision::MetadataOnly, Utc::now())
        .await
        .unwrap());

    let snapshots = db.snapshots_for_object(&object.object_id()).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].text_hash, hash_text("secret value"));
    assert!(snapshots[0].text_content.is_none());
}

#[tokio::test]
async fn registry_preserves_first_seen_and_advances_last_seen() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();
    let t1 = Utc::now();
    let t2 = t1 + Duration::seconds(5);

    db.upsert_registry(&object, false, t1).await.unwrap();
    db.upsert_registry(&object, true, t2).await.unwrap();

    let entry = db
        .registry_entry(&object.object_id())
        .await
        .unwrap()
        .expect("registry entry");
    assert_eq!(entry.first_seen, t1);
    assert_eq!(entry.last_seen, t2);
    assert!(entry.text_capable);
}

#[tokio::test]
async fn registry_last_seen_never_goes_backwards() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();
    let t1 = Utc::now();
    let earlier = t1 - Duration::seconds(30);

    db.upsert_registry(&object, true, t1).await.unwrap();
    db.upsert_registry(&object, true, earlier).await.unwrap();

    let entry = db
        .registry_entry(&object.object_id())
        .await
        .unwrap()
        .expect("registry entry");
    assert_eq!(entry.last_seen, t1);
    assert_eq!(entry.first_seen, t1);
}

#[tokio::test]
async fn events_are_append_only_with_generated_ids() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();

    let first = db
        .record_event(EventKind::FocusChanged, &object, Some("gained".into()), Utc::now())
        .await
        .unwrap();
    let second = db
        .record_event(EventKind::FocusChanged, &object, Some("lost".into()), Utc::now())
        .await
        .unwrap();
    assert!(second > first);

    let events = db.events_for_object(&object.object_id()).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "focus-changed");
    assert_eq!(events[0].detail.as_deref(), Some("gained"));
    assert_eq!(events[1].detail.as_deref(), Some("lost"));
}

#[tokio::test]
async fn observation_writes_commit_together() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("axwatch.sqlite3")).unwrap();
    let object = text_entry();

    let observation = Observation {
        object: object.clone(),
        text_capable: true,
        text: Some("Hello".into()),
        store_content: true,
        kind: EventKind::TextChanged,
        detail: None,
        event_always: false,
        observed_at: Utc::now(),
    };

    let outcome = db.record_observation(observation.clone()).await.unwrap();
    assert!(outcome.snapshot_inserted);
    assert!(outcome.event_id.is_some());
    assert!(db
        .registry_entry(&object.object_id())
        .await
        .unwrap()
        .is_some());

    // The identical observation again: dedup suppresses both the snapshot
    // and the synthetic event.
    let outcome = db.record_observation(observation).await.unwrap();
    assert!(!outcome.snapshot_inserted);
    assert!(outcome.event_id.is_none());
    assert_eq!(
        db.events_for_object(&object.object_id()).await.unwrap().len(),
        1
    );
}

/// A failure between the registry upsert and the event insert must leave
/// neither write visible.
#[test]
fn uncommitted_observation_rolls_back_completely() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("axwatch.sqlite3");

    // Bring the schema up, then work on a raw connection.
    Database::new(path.clone()).unwrap().close();

    let mut conn = rusqlite::Connection::open(&path).unwrap();
    let object = text_entry();

    {
        let tx = conn.transaction().unwrap();
        RegistryRepository::new(&tx)
            .upsert(&object, true, Utc::now())
            .unwrap();
        EventRepository::new(&tx)
            .record("text-changed", &object.object_id(), &object.application, None, Utc::now())
            .unwrap();
        // Simulated failure before commit: the transaction is dropped.
    }

    let registry_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM object_registry", [], |row| row.get(0))
        .unwrap();
    let event_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
        .unwrap();
    assert_eq!(registry_rows, 0);
    assert_eq!(event_rows, 0);
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("axwatch.sqlite3");

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
    }

    assert!(Database::new(path).is_err());
}
