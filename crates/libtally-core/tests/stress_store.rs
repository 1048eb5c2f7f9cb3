//! Stress tests for concurrent event recording
//!
//! Hooks fire from many shells at once. These tests open several handles on
//! the same database file and check that nothing is lost or duplicated.

use chrono::Utc;
use libtally_core::store::{EventFilter, EventStore};
use libtally_core::types::{Event, EventSource, EventStatus, RepoId};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn commit_event(repo: &str, commit: String, source: EventSource) -> Event {
    Event::new(
        RepoId::from_remote_url(&format!("https://github.com/user/{}", repo)).unwrap(),
        format!("/work/{}", repo),
        commit,
        "main",
        Utc::now(),
        source,
    )
}

#[test]
fn test_concurrent_handles_record_every_event() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("events.db");
    // Create the schema before the writers race
    drop(EventStore::open(&db_path).expect("Failed to open store"));

    let num_threads = 8;
    let events_per_thread = 40;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();

            thread::spawn(move || {
                let store = EventStore::open(&db_path).expect("Failed to open store");
                barrier.wait();

                let mut success_count = 0;
                for i in 0..events_per_thread {
                    let event = commit_event(
                        &format!("repo{}", thread_id % 3),
                        format!("t{}-c{}", thread_id, i),
                        EventSource::PostCommit,
                    );
                    match store.insert(&event) {
                        Ok(_) => success_count += 1,
                        Err(e) => eprintln!("Thread {} event {} failed: {:?}", thread_id, i, e),
                    }
                }
                success_count
            })
        })
        .collect();

    let total_success: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let expected = num_threads * events_per_thread;
    assert_eq!(total_success, expected);

    let store = EventStore::open(&db_path).unwrap();
    assert_eq!(store.get_pending().unwrap().len(), expected);
    assert_eq!(store.max_id().unwrap(), expected as i64);
}

#[test]
fn test_concurrent_duplicate_observations_collapse() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("events.db");
    drop(EventStore::open(&db_path).unwrap());

    let num_threads = 6;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            thread::spawn(move || {
                let store = EventStore::open(&db_path).unwrap();
                barrier.wait();
                for i in 0..20 {
                    store
                        .insert(&commit_event("shared", format!("c{}", i), EventSource::PostCommit))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = EventStore::open(&db_path).unwrap();
    let events = store.list(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 20);
    assert!(events.iter().all(|e| e.status == EventStatus::Pending));
}

#[test]
fn test_shared_handle_across_threads() {
    let dir = tempdir().unwrap();
    let store = Arc::new(EventStore::open(&dir.path().join("events.db")).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store
                        .insert(&commit_event(
                            "repo",
                            format!("t{}-c{}", thread_id, i),
                            EventSource::Backfill,
                        ))
                        .unwrap();
                }
            })
        })
        .collect();

    // Exporter marks whatever is pending while writers run
    let exporter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mut exported = 0;
            for _ in 0..10 {
                let ids: Vec<i64> = store.get_pending().unwrap().iter().map(|e| e.id).collect();
                exported += store.update_status(&ids, EventStatus::Exported).unwrap();
                thread::yield_now();
            }
            exported
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    let exported = exporter.join().unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.total, 100);
    assert_eq!(stats.exported as usize, exported);
    assert_eq!(stats.pending + stats.exported, 100);
}

#[test]
fn test_concurrent_first_open_serializes_migrations() {
    let num_threads = 8;

    for round in 0..10 {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join(format!("events-{}.db", round));
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let db_path = db_path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    EventStore::open(&db_path).map(|store| store.schema_version())
                })
            })
            .collect();

        for handle in handles {
            let version = handle
                .join()
                .expect("Thread panicked")
                .unwrap_or_else(|e| panic!("round {}: open failed: {:?}", round, e));
            assert_eq!(version, libtally_core::store::SCHEMA_VERSION);
        }

        let store = EventStore::open(&db_path).unwrap();
        assert_eq!(store.stats().unwrap().total, 0);
    }
}
