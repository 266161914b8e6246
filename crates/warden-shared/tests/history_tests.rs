//! History store: retention, aggregates, persistence.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fs;
use std::sync::Arc;
use std::thread;

use warden_shared::history::{HistoryDocument, HistoryOptions, HistoryStore};
use warden_shared::issue_record::REJECTED_ROOT_CAUSE;
use warden_shared::{FrequencyTrend, Occurrence, Severity};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn occ_at(ts: DateTime<Utc>, minutes: f64, success: bool, cause: &str) -> Occurrence {
    Occurrence::new(ts, Severity::High, minutes * 60.0, success, cause, "automated", 0.9)
}

#[test]
fn test_three_successes_average_and_rate() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    for (i, minutes) in [10.0, 12.0, 14.0].into_iter().enumerate() {
        let ts = base() + Duration::hours(i as i64);
        store.record("X", occ_at(ts, minutes, true, "log growth")).unwrap();
    }

    let record = store.get("X").unwrap();
    assert_eq!(record.len(), 3);
    assert!((record.avg_resolution_time() / 60.0 - 12.0).abs() < 1e-9);
    assert_eq!(record.success_rate(), 1.0);
}

#[test]
fn test_fourth_occurrence_evicts_oldest() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    for i in 1..=4 {
        let ts = base() + Duration::hours(i);
        store.record("X", occ_at(ts, i as f64, true, "log growth")).unwrap();
    }

    let record = store.get("X").unwrap();
    let kept: Vec<f64> = record.occurrences().map(|o| o.resolution_time() / 60.0).collect();
    assert_eq!(kept, vec![2.0, 3.0, 4.0]);
}

#[test]
fn test_retention_is_min_of_n_and_total() {
    for retention in [1usize, 3, 5] {
        for k in 0..4usize {
            let store = HistoryStore::in_memory(HistoryOptions {
                retention,
                ..HistoryOptions::default()
            });
            let total = retention + k;
            for i in 0..total {
                let ts = base() + Duration::minutes(i as i64);
                store.record("sig", occ_at(ts, i as f64, true, "c")).unwrap();
            }
            let record = store.get("sig").unwrap();
            assert_eq!(record.len(), retention.min(total));

            // always the most recent
            let newest = record.occurrences().last().unwrap();
            assert_eq!(newest.resolution_time(), (total - 1) as f64 * 60.0);
        }
    }
}

#[test]
fn test_rejection_counts_as_failure() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    store.record("X", occ_at(base(), 5.0, true, "log growth")).unwrap();
    store
        .record(
            "X",
            Occurrence::new(base() + Duration::hours(1), Severity::High, 0.0, false, REJECTED_ROOT_CAUSE, "rejected", 0.9),
        )
        .unwrap();

    let record = store.get("X").unwrap();
    assert_eq!(record.success_rate(), 0.5);
    // average only over the successful one
    assert_eq!(record.avg_resolution_time(), 300.0);
}

#[test]
fn test_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/historical_issues.json");

    {
        let store = HistoryStore::open(&path, HistoryOptions::default());
        store.record("disk_full", occ_at(base(), 10.0, true, "log growth")).unwrap();
        store
            .record("disk_full", occ_at(base() + Duration::days(1), 20.0, false, "Unknown"))
            .unwrap();
        store.record("pod_crash", occ_at(base(), 1.0, true, "oom")).unwrap();
    }

    let reopened = HistoryStore::open(&path, HistoryOptions::default());
    let record = reopened.get("disk_full").unwrap();
    assert_eq!(record.len(), 2);
    assert_eq!(record.success_rate(), 0.5);
    assert_eq!(record.common_causes(), ["log growth".to_string()]);
    assert_eq!(reopened.signatures(), vec!["disk_full".to_string(), "pod_crash".to_string()]);

    let first = record.occurrences().next().unwrap();
    assert_eq!(first.timestamp(), base());
    assert_eq!(first.root_cause(), "log growth");
}

#[test]
fn test_document_recomputes_derived_fields_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("historical_issues.json");
    {
        let store = HistoryStore::open(&path, HistoryOptions::default());
        for i in 0..3 {
            store
                .record("X", occ_at(base() + Duration::hours(i), 1.0, true, "c"))
                .unwrap();
        }
    }

    // Tamper with a stored aggregate
    let mut raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    raw["issue_history"]["X"]["success_rate"] = serde_json::json!(0.0);
    fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

    let reopened = HistoryStore::open(&path, HistoryOptions::default());
    assert_eq!(reopened.get("X").unwrap().success_rate(), 1.0);
}

#[test]
fn test_smaller_retention_trims_loaded_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("historical_issues.json");
    {
        let store = HistoryStore::open(&path, HistoryOptions { retention: 5, ..Default::default() });
        for i in 0..5 {
            store
                .record("X", occ_at(base() + Duration::hours(i), i as f64, true, "c"))
                .unwrap();
        }
    }

    let reopened = HistoryStore::open(&path, HistoryOptions::default());
    let record = reopened.get("X").unwrap();
    assert_eq!(record.len(), 3);
    assert_eq!(record.occurrences().next().unwrap().resolution_time(), 120.0);
}

#[test]
fn test_corrupt_document_is_set_aside() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("historical_issues.json");
    fs::write(&path, r#"{"issue_history": {"X": {"occurrences": "nope"}}}"#).unwrap();

    let store = HistoryStore::open(&path, HistoryOptions::default());
    assert!(store.signatures().is_empty());
    assert!(!path.exists());
    assert!(dir.path().join("historical_issues.json.corrupt").exists());

    // and the store still works
    store.record("X", occ_at(base(), 1.0, true, "c")).unwrap();
    assert!(HistoryDocument::load(&path).unwrap().issue_history.contains_key("X"));
}

#[test]
fn test_trend_classification_through_store() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    store.record("burst", occ_at(base(), 1.0, true, "c")).unwrap();
    assert_eq!(store.get("burst").unwrap().frequency_trend(), FrequencyTrend::InsufficientData);

    store.record("burst", occ_at(base() + Duration::days(9), 1.0, true, "c")).unwrap();
    store.record("burst", occ_at(base() + Duration::days(10), 1.0, true, "c")).unwrap();
    assert_eq!(store.get("burst").unwrap().frequency_trend(), FrequencyTrend::Concerning);
}

#[test]
fn test_steady_recurrence_is_stable() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    for day in 0..5 {
        store.record("steady", occ_at(base() + Duration::days(day), 1.0, true, "c")).unwrap();
        if day >= 1 {
            assert_eq!(store.get("steady").unwrap().frequency_trend(), FrequencyTrend::Stable);
        }
    }
}

#[test]
fn test_predict_root_cause_through_store() {
    let store = HistoryStore::in_memory(HistoryOptions::default());
    assert!(store.predict_root_cause("X").is_empty());

    store.record("X", occ_at(base(), 1.0, true, "log growth")).unwrap();
    store.record("X", occ_at(base() + Duration::hours(1), 1.0, true, "Unknown")).unwrap();
    store.record("X", occ_at(base() + Duration::hours(2), 1.0, true, "rotated logs")).unwrap();

    let ranked = store.predict_root_cause("X");
    // weights: log growth 1, rotated logs 3
    assert_eq!(ranked[0].0, "rotated logs");
    assert!((ranked[0].1 - 0.75).abs() < 1e-9);
    assert!((ranked[1].1 - 0.25).abs() < 1e-9);
    let total: f64 = ranked.iter().map(|(_, c)| c).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn test_concurrent_records_on_distinct_signatures() {
    let store = Arc::new(HistoryStore::in_memory(HistoryOptions::default()));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let ts = base() + Duration::minutes(i);
                    store
                        .record(&format!("sig-{}", t % 4), occ_at(ts, 1.0, true, "c"))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.signatures().len(), 4);
    assert_eq!(store.generation(), 80);
    for sig in store.signatures() {
        assert_eq!(store.get(&sig).unwrap().len(), 3);
    }
}
