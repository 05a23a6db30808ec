//! Match-then-record flow across days, through the public API only.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_core::{
    AttendanceLedger, Embedding, EmbeddingStore, EuclideanMatcher, Matcher, UNKNOWN,
};

const THRESHOLD: f32 = 4.0;

fn at(y: i32, m: u32, d: u32, hh: u32) -> NaiveDateTime {
    NaiveDateTime::new(
        NaiveDate::from_ymd_opt(y, m, d).unwrap(),
        NaiveTime::from_hms_opt(hh, 0, 0).unwrap(),
    )
}

fn alice_store() -> EmbeddingStore {
    EmbeddingStore::from_identities(
        "ArcFace",
        vec![("Alice".to_string(), Embedding::new(vec![0.0, 0.0, 0.0]))],
    )
    .unwrap()
}

#[test]
fn known_face_is_recorded_once_per_day() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attendance_log.csv");
    let store = alice_store();
    let ledger = AttendanceLedger::open(&path).unwrap();

    let probe = Embedding::new(vec![1.0, 1.0, 1.0]);
    let result = EuclideanMatcher.compare(&probe, &store, THRESHOLD).unwrap();
    assert_eq!(result.label(), "Alice");
    assert!((result.distance - 1.732).abs() < 1e-3);

    assert!(ledger.record_at(result.label(), at(2024, 1, 1, 9)).unwrap());
    assert!(!ledger.record_at(result.label(), at(2024, 1, 1, 10)).unwrap());
    assert!(ledger.record_at(result.label(), at(2024, 1, 2, 9)).unwrap());

    let records = ledger.records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
}

#[test]
fn stranger_is_never_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attendance_log.csv");
    let store = alice_store();
    let ledger = AttendanceLedger::open(&path).unwrap();

    let probe = Embedding::new(vec![10.0, 10.0, 10.0]);
    let result = EuclideanMatcher.compare(&probe, &store, THRESHOLD).unwrap();
    assert_eq!(result.label(), UNKNOWN);
    assert!((result.distance - 17.32).abs() < 1e-2);

    assert!(!ledger.record_at(result.label(), at(2024, 1, 1, 9)).unwrap());
    assert!(ledger.records().unwrap().is_empty());
}

#[test]
fn store_survives_save_and_reload_for_matching() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.json");
    alice_store().save(&path).unwrap();

    let store = EmbeddingStore::load(&path).unwrap();
    let result = EuclideanMatcher
        .compare(&Embedding::new(vec![0.5, 0.5, 0.5]), &store, THRESHOLD)
        .unwrap();
    assert!(result.is_match());
}
