use chrono::NaiveDate;
use pitfs::{FeatureStore, FeatureValue, StoreError, UpsertOutcome};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn value(
    entity: &str,
    period: i32,
    feature: &str,
    v: f64,
    from: NaiveDate,
    until: Option<NaiveDate>,
) -> FeatureValue {
    FeatureValue {
        entity_id: entity.to_string(),
        prediction_period: period,
        feature_name: feature.to_string(),
        value: v,
        valid_from: from,
        valid_until: until,
    }
}

#[test]
fn correction_chain_retrieves_each_historical_moment() {
    // V1 knowable 2022-02-01, corrected 2022-06-01; next season's value
    // (a different prediction period) knowable 2023-02-01.
    let mut store = FeatureStore::open_in_memory().unwrap();
    store
        .upsert_version(&value("P1", 2022, "f1", 10.0, date(2022, 2, 1), None))
        .unwrap();
    store
        .upsert_version(&value("P1", 2022, "f1", 15.0, date(2022, 6, 1), None))
        .unwrap();
    store
        .upsert_version(&value("P1", 2023, "f1", 20.0, date(2023, 2, 1), None))
        .unwrap();

    assert_eq!(
        store.read_asof("P1", "f1", 2022, date(2022, 3, 1)).unwrap(),
        Some(10.0)
    );
    assert_eq!(
        store.read_asof("P1", "f1", 2022, date(2022, 7, 1)).unwrap(),
        Some(15.0)
    );
    assert_eq!(
        store.read_asof("P1", "f1", 2023, date(2023, 3, 1)).unwrap(),
        Some(20.0)
    );
    // The 2022 chain's correction stays current for its own period.
    assert_eq!(
        store.read_asof("P1", "f1", 2022, date(2023, 3, 1)).unwrap(),
        Some(15.0)
    );
}

#[test]
fn versions_persist_across_reopen_and_read_only_access() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("feature_store.sqlite");

    {
        let mut store = FeatureStore::open(&path).unwrap();
        store
            .upsert_version(&value(
                "P1",
                2023,
                "yards_lag_1",
                1000.0,
                date(2023, 2, 15),
                Some(date(2024, 2, 15)),
            ))
            .unwrap();
    }

    let reader = FeatureStore::open_read_only(&path).unwrap();
    assert_eq!(reader.value_count().unwrap(), 1);
    assert_eq!(
        reader
            .read_asof("P1", "yards_lag_1", 2023, date(2023, 6, 1))
            .unwrap(),
        Some(1000.0)
    );
}

#[test]
fn superseded_versions_are_kept_never_deleted() {
    let mut store = FeatureStore::open_in_memory().unwrap();
    store
        .upsert_version(&value("P1", 2023, "f", 1.0, date(2023, 2, 1), None))
        .unwrap();
    store
        .upsert_version(&value("P1", 2023, "f", 2.0, date(2023, 4, 1), None))
        .unwrap();
    store
        .upsert_version(&value("P1", 2023, "f", 3.0, date(2023, 6, 1), None))
        .unwrap();

    assert_eq!(store.value_count().unwrap(), 3);

    let mut chain = Vec::new();
    store.scan_all(|row| chain.push(row)).unwrap();
    // Sorted by valid_from: contiguous intervals, single open tail.
    assert_eq!(chain[0].valid_until, Some(date(2023, 4, 1)));
    assert_eq!(chain[1].valid_until, Some(date(2023, 6, 1)));
    assert_eq!(chain[2].valid_until, None);
}

#[test]
fn idempotent_rewrite_then_rejected_regression() {
    let mut store = FeatureStore::open_in_memory().unwrap();
    let current = value(
        "P1",
        2023,
        "f",
        10.0,
        date(2023, 2, 15),
        Some(date(2024, 2, 15)),
    );
    store.upsert_version(&current).unwrap();
    assert_eq!(
        store.upsert_version(&current).unwrap(),
        UpsertOutcome::Unchanged
    );

    // Same valid_from with a different value is out of order, not an update.
    let mut conflicting = current.clone();
    conflicting.value = 99.0;
    assert!(matches!(
        store.upsert_version(&conflicting),
        Err(StoreError::NonMonotonicVersion { .. })
    ));
}
