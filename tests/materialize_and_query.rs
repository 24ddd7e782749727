use std::collections::BTreeMap;

use chrono::NaiveDate;
use pitfs::{
    check, default_feature_definitions, get_historical_matrix, get_matrix, materialize_all,
    BaseRow, BaseTable, FeatureStore, QueryError, SeasonCalendar,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn row(entity: &str, period: i32, cols: &[(&str, f64)]) -> BaseRow {
    BaseRow {
        entity_id: entity.to_string(),
        period,
        columns: cols
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect(),
    }
}

fn sample_base() -> BaseTable {
    BaseTable::new(vec![
        row(
            "QB1",
            2021,
            &[
                ("total_pass_yds", 3800.0),
                ("age", 26.0),
                ("cap_hit_millions", 20.0),
                ("draft_round", 1.0),
            ],
        ),
        row(
            "QB1",
            2022,
            &[
                ("total_pass_yds", 4000.0),
                ("age", 27.0),
                ("cap_hit_millions", 25.0),
                ("draft_round", 1.0),
            ],
        ),
        row(
            "QB1",
            2023,
            &[
                ("total_pass_yds", 4500.0),
                ("age", 28.0),
                ("cap_hit_millions", 30.0),
                ("draft_round", 1.0),
            ],
        ),
        row(
            "QB2",
            2022,
            &[
                ("total_pass_yds", 3000.0),
                ("age", 24.0),
                ("cap_hit_millions", 5.0),
                ("draft_round", 2.0),
            ],
        ),
        row(
            "QB2",
            2023,
            &[
                ("total_pass_yds", 3300.0),
                ("age", 25.0),
                ("cap_hit_millions", 8.0),
                ("draft_round", 2.0),
            ],
        ),
    ])
    .unwrap()
}

fn materialized_store(base: &BaseTable, calendar: &SeasonCalendar) -> FeatureStore {
    let mut store = FeatureStore::open_in_memory().unwrap();
    for definition in default_feature_definitions(base) {
        store.register(&definition).unwrap();
    }
    materialize_all(&mut store, base, calendar).unwrap();
    store
}

#[test]
fn lag_materialization_assigns_knowledge_dated_windows() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    // 2022 stats become public 2023-02-15 and feed the 2023 target.
    assert_eq!(
        store
            .read_asof("QB1", "total_pass_yds_lag_1", 2023, date(2023, 2, 15))
            .unwrap(),
        Some(4000.0)
    );
    // One day earlier they were unknowable.
    assert_eq!(
        store
            .read_asof("QB1", "total_pass_yds_lag_1", 2023, date(2023, 2, 14))
            .unwrap(),
        None
    );
    // The window lapses once the target season's own outcomes go public.
    assert_eq!(
        store
            .read_asof("QB1", "total_pass_yds_lag_1", 2023, date(2024, 2, 15))
            .unwrap(),
        None
    );
    // No 2020 observation exists, so lag_1 for 2021 is absent, not zero.
    assert_eq!(
        store
            .read_asof("QB1", "total_pass_yds_lag_1", 2021, date(2023, 6, 1))
            .unwrap(),
        None
    );
}

#[test]
fn interaction_features_are_knowable_at_roster_window() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    // age x cap hit for 2023: 28 * 30, settled at the 2023 league year.
    assert_eq!(
        store
            .read_asof("QB1", "age_cap_interaction", 2023, date(2023, 3, 15))
            .unwrap(),
        Some(840.0)
    );
    assert_eq!(
        store
            .read_asof("QB1", "age_cap_interaction", 2023, date(2023, 3, 14))
            .unwrap(),
        None
    );
    // Known strictly before the season the value targets: cannot leak.
    assert!(calendar.roster_window_start(2023) < calendar.period_start(2023));
}

#[test]
fn rematerialization_is_idempotent_and_fingerprint_stable() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();

    let mut store = FeatureStore::open_in_memory().unwrap();
    for definition in default_feature_definitions(&base) {
        store.register(&definition).unwrap();
    }

    let first = materialize_all(&mut store, &base, &calendar).unwrap();
    let count_after_first = store.value_count().unwrap();
    let fingerprint_after_first = store.content_fingerprint().unwrap();
    let report_after_first = check(&store, &calendar).unwrap();

    let second = materialize_all(&mut store, &base, &calendar).unwrap();

    assert!(first.values_written > 0);
    assert_eq!(second.values_written, 0);
    assert_eq!(second.values_unchanged, first.values_written);
    assert_eq!(second.values_skipped, 0);
    assert_eq!(store.value_count().unwrap(), count_after_first);
    assert_eq!(store.content_fingerprint().unwrap(), fingerprint_after_first);
    assert_eq!(check(&store, &calendar).unwrap(), report_after_first);
}

#[test]
fn fixed_cutoff_matrix_hides_the_future() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    // At the start of 2023, 2022 outcomes are not public yet: lag_1 for the
    // 2023 target is absent, while the 2022 target (fed by 2021 data made
    // public 2022-02-15) is visible.
    let matrix = get_matrix(&store, date(2023, 1, 1), 2021, 2023).unwrap();
    assert_eq!(matrix.cell("QB1", 2023, "total_pass_yds_lag_1"), None);
    assert_eq!(
        matrix.cell("QB1", 2022, "total_pass_yds_lag_1"),
        Some(3800.0)
    );

    // Mid-2023, the 2023 target's lag is visible.
    let matrix = get_matrix(&store, date(2023, 6, 1), 2021, 2023).unwrap();
    assert_eq!(
        matrix.cell("QB1", 2023, "total_pass_yds_lag_1"),
        Some(4000.0)
    );
    assert_eq!(
        matrix.cell("QB2", 2023, "total_pass_yds_lag_1"),
        Some(3000.0)
    );

    // Every base (entity, period) pair appears even when all cells are absent.
    let early = get_matrix(&store, date(2020, 1, 1), 2021, 2023).unwrap();
    assert_eq!(early.rows.len(), 5);
    assert!(early
        .rows
        .iter()
        .all(|row| row.values.iter().all(Option::is_none)));
}

#[test]
fn diagonal_matrix_matches_per_row_point_queries() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    let matrix = get_historical_matrix(&store, &calendar, 2021, 2023).unwrap();
    assert_eq!(matrix.rows.len(), 5);

    for matrix_row in &matrix.rows {
        let cutoff = calendar.period_start(matrix_row.prediction_period);
        for (idx, feature) in matrix.feature_names.iter().enumerate() {
            let expected = store
                .read_asof(
                    &matrix_row.entity_id,
                    feature,
                    matrix_row.prediction_period,
                    cutoff,
                )
                .unwrap();
            assert_eq!(
                matrix_row.values[idx], expected,
                "diagonal mismatch for {}/{}/{feature}",
                matrix_row.entity_id, matrix_row.prediction_period
            );
        }
    }

    // Spot-check the diagonal semantics directly: at 2023-09-01 the 2023
    // row sees 2022 stats, and the 2022 row still sees 2021 stats even
    // though they were later superseded for newer targets.
    assert_eq!(
        matrix.cell("QB1", 2023, "total_pass_yds_lag_1"),
        Some(4000.0)
    );
    assert_eq!(
        matrix.cell("QB1", 2022, "total_pass_yds_lag_1"),
        Some(3800.0)
    );
    assert_eq!(matrix.cell("QB1", 2023, "experience_risk"), Some(28.0));
    // Deeper lags stay live until their own target's outcomes go public.
    assert_eq!(
        matrix.cell("QB1", 2023, "total_pass_yds_lag_2"),
        Some(3800.0)
    );
}

#[test]
fn diagonal_matrix_is_chunkable_by_period() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    let whole = get_historical_matrix(&store, &calendar, 2021, 2023).unwrap();
    let lo = get_historical_matrix(&store, &calendar, 2021, 2022).unwrap();
    let hi = get_historical_matrix(&store, &calendar, 2023, 2023).unwrap();

    let mut stitched = lo.rows.clone();
    stitched.extend(hi.rows.clone());
    stitched.sort_by(|a, b| {
        (a.entity_id.as_str(), a.prediction_period)
            .cmp(&(b.entity_id.as_str(), b.prediction_period))
    });
    assert_eq!(whole.rows, stitched);
}

#[test]
fn reversed_period_range_is_rejected_by_both_query_modes() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    assert!(matches!(
        get_matrix(&store, date(2023, 6, 1), 2023, 2021),
        Err(QueryError::InvalidPeriodRange { .. })
    ));
    assert!(matches!(
        get_historical_matrix(&store, &calendar, 2023, 2021),
        Err(QueryError::InvalidPeriodRange { .. })
    ));
}

#[test]
fn matrix_fingerprints_are_deterministic_across_runs() {
    let base = sample_base();
    let calendar = SeasonCalendar::default();

    let store_a = materialized_store(&base, &calendar);
    let store_b = materialized_store(&base, &calendar);

    let matrix_a = get_historical_matrix(&store_a, &calendar, 2021, 2023).unwrap();
    let matrix_b = get_historical_matrix(&store_b, &calendar, 2021, 2023).unwrap();
    assert_eq!(matrix_a.fingerprint(), matrix_b.fingerprint());
    assert_eq!(
        store_a.content_fingerprint().unwrap(),
        store_b.content_fingerprint().unwrap()
    );
}

#[test]
fn sparse_columns_produce_absent_cells_only_where_unobserved() {
    // QB3 has no cap hit recorded in 2022: the interaction for 2022 is
    // absent while the pass-yards lag still materializes.
    let base = BaseTable::new(vec![
        row(
            "QB3",
            2021,
            &[("total_pass_yds", 2500.0), ("age", 23.0)],
        ),
        row(
            "QB3",
            2022,
            &[("total_pass_yds", 2800.0), ("age", 24.0)],
        ),
        row(
            "QB3",
            2023,
            &[
                ("total_pass_yds", 2900.0),
                ("age", 25.0),
                ("cap_hit_millions", 4.0),
                ("draft_round", 3.0),
            ],
        ),
    ])
    .unwrap();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    let matrix = get_historical_matrix(&store, &calendar, 2021, 2023).unwrap();
    assert_eq!(matrix.cell("QB3", 2022, "age_cap_interaction"), None);
    assert_eq!(matrix.cell("QB3", 2023, "age_cap_interaction"), Some(100.0));
    assert_eq!(
        matrix.cell("QB3", 2022, "total_pass_yds_lag_1"),
        Some(2500.0)
    );
}

#[test]
fn base_rows_with_no_columns_still_define_prediction_targets() {
    // An entity observed in 2023 with no numeric columns is still a
    // prediction target for lags sourced from earlier periods.
    let mut columns = BTreeMap::new();
    columns.insert("total_pass_yds".to_string(), 3100.0);
    let base = BaseTable::new(vec![
        BaseRow {
            entity_id: "RB1".to_string(),
            period: 2022,
            columns,
        },
        BaseRow {
            entity_id: "RB1".to_string(),
            period: 2023,
            columns: BTreeMap::new(),
        },
    ])
    .unwrap();
    let calendar = SeasonCalendar::default();
    let store = materialized_store(&base, &calendar);

    assert_eq!(
        store
            .read_asof("RB1", "total_pass_yds_lag_1", 2023, date(2023, 6, 1))
            .unwrap(),
        Some(3100.0)
    );
}
