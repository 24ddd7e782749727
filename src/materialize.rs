//! Materialization engine: computes registered features from the base
//! analytic table and writes versioned values into the store.
//!
//! All validity windows come from the injected [`SeasonCalendar`]; no date
//! arithmetic happens at call sites. Per-row write failures are counted and
//! logged, never fatal; referencing an unregistered feature is fatal because
//! it signals a registry/engine mismatch.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::base::BaseTable;
use crate::calendar::SeasonCalendar;
use crate::registry::{FeatureDefinition, FeatureKind, InteractionFormula};
use crate::store::{FeatureStore, FeatureValue, StoreError, UpsertOutcome};

/// Base-table stat and contract columns lagged by default, mirroring the
/// production analytic table.
pub const DEFAULT_LAG_COLUMNS: [&str; 8] = [
    "total_pass_yds",
    "total_rush_yds",
    "total_rec_yds",
    "total_tds",
    "games_played",
    "cap_hit_millions",
    "dead_cap_millions",
    "age",
];

pub const DEFAULT_LAGS: [u32; 3] = [1, 2, 3];

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("unknown feature '{name}': not present in the registry")]
    UnknownFeature { name: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationReport {
    pub features_processed: u64,
    pub values_written: u64,
    pub values_unchanged: u64,
    /// Writes rejected per-row (out-of-order versions); the batch continues.
    pub values_skipped: u64,
    pub first_error: Option<String>,
}

/// The default feature set: lags 1–3 over every standard column present in
/// the base table, plus the standard same-period interactions. Columns the
/// table does not carry are skipped with a warning.
pub fn default_feature_definitions(base: &BaseTable) -> Vec<FeatureDefinition> {
    let mut defs = Vec::new();

    for column in DEFAULT_LAG_COLUMNS {
        if !base.has_column(column) {
            warn!(
                component = "materialize",
                event = "materialize.plan.column_missing",
                column
            );
            continue;
        }
        for lag in DEFAULT_LAGS {
            defs.push(FeatureDefinition::lag(
                &format!("{column}_lag_{lag}"),
                column,
                lag,
                &format!("{column} from {lag} period(s) prior"),
            ));
        }
    }

    let interactions = [
        ("age_cap_interaction", "age", "cap_hit_millions", "age x cap hit"),
        ("experience_risk", "draft_round", "age", "draft round x age risk"),
    ];
    for (name, left, right, description) in interactions {
        if !base.has_column(left) || !base.has_column(right) {
            warn!(
                component = "materialize",
                event = "materialize.plan.column_missing",
                feature = name
            );
            continue;
        }
        defs.push(FeatureDefinition::interaction(
            name,
            InteractionFormula {
                left: left.to_string(),
                right: right.to_string(),
            },
            description,
        ));
    }

    defs
}

/// Materializes every registered feature.
pub fn materialize_all(
    store: &mut FeatureStore,
    base: &BaseTable,
    calendar: &SeasonCalendar,
) -> Result<MaterializationReport, MaterializeError> {
    let names: Vec<String> = store
        .list_features()?
        .into_iter()
        .map(|def| def.name)
        .collect();
    materialize_features(store, base, calendar, &names)
}

/// Materializes an explicit feature plan. Every name must be registered.
pub fn materialize_features(
    store: &mut FeatureStore,
    base: &BaseTable,
    calendar: &SeasonCalendar,
    feature_names: &[String],
) -> Result<MaterializationReport, MaterializeError> {
    info!(
        component = "materialize",
        event = "materialize.start",
        feature_count = feature_names.len()
    );

    // Record the (entity, period) universe queries enumerate against.
    for (entity_id, period) in base.entity_periods() {
        store.record_entity_period(entity_id, period)?;
    }

    let mut report = MaterializationReport::default();
    for name in feature_names {
        let definition = store
            .feature(name)?
            .ok_or_else(|| MaterializeError::UnknownFeature { name: name.clone() })?;
        materialize_one(store, base, calendar, &definition, &mut report)?;
        report.features_processed += 1;
    }

    info!(
        component = "materialize",
        event = "materialize.finish",
        features_processed = report.features_processed,
        values_written = report.values_written,
        values_unchanged = report.values_unchanged,
        values_skipped = report.values_skipped
    );
    Ok(report)
}

fn materialize_one(
    store: &mut FeatureStore,
    base: &BaseTable,
    calendar: &SeasonCalendar,
    definition: &FeatureDefinition,
    report: &mut MaterializationReport,
) -> Result<(), MaterializeError> {
    let targets: Vec<(String, i32)> = base
        .entity_periods()
        .map(|(entity, period)| (entity.to_string(), period))
        .collect();

    match &definition.kind {
        FeatureKind::Raw => {
            let source = require_source(definition)?;
            for (entity_id, period) in &targets {
                let Some(value) = base.value(entity_id, *period, source) else {
                    continue;
                };
                write_value(
                    store,
                    report,
                    FeatureValue {
                        entity_id: entity_id.clone(),
                        prediction_period: *period,
                        feature_name: definition.name.clone(),
                        value,
                        valid_from: calendar.knowledge_date(*period),
                        valid_until: Some(calendar.knowledge_date(*period + 1)),
                    },
                )?;
            }
        }
        FeatureKind::Lag { periods } => {
            let source = require_source(definition)?;
            let lag = *periods as i32;
            for (entity_id, observed) in &targets {
                let Some(value) = base.value(entity_id, *observed, source) else {
                    continue;
                };
                let target = observed + lag;
                // A lag value only exists for targets the base table knows.
                if !base.contains(entity_id, target) {
                    continue;
                }
                // Knowable once the source period's outcomes are public;
                // historical once the target period's own outcomes are.
                write_value(
                    store,
                    report,
                    FeatureValue {
                        entity_id: entity_id.clone(),
                        prediction_period: target,
                        feature_name: definition.name.clone(),
                        value,
                        valid_from: calendar.knowledge_date(*observed),
                        valid_until: Some(calendar.knowledge_date(target)),
                    },
                )?;
            }
        }
        FeatureKind::Interaction { formula } => {
            for (entity_id, period) in &targets {
                let left = base.value(entity_id, *period, &formula.left);
                let right = base.value(entity_id, *period, &formula.right);
                let (Some(left), Some(right)) = (left, right) else {
                    continue;
                };
                write_value(
                    store,
                    report,
                    FeatureValue {
                        entity_id: entity_id.clone(),
                        prediction_period: *period,
                        feature_name: definition.name.clone(),
                        value: left * right,
                        valid_from: calendar.roster_window_start(*period),
                        valid_until: Some(calendar.roster_window_start(*period + 1)),
                    },
                )?;
            }
        }
    }

    Ok(())
}

fn require_source(definition: &FeatureDefinition) -> Result<&str, MaterializeError> {
    definition
        .source_column
        .as_deref()
        .ok_or_else(|| {
            StoreError::InvalidDefinition {
                name: definition.name.clone(),
                reason: "definition has no source column".to_string(),
            }
            .into()
        })
}

fn write_value(
    store: &mut FeatureStore,
    report: &mut MaterializationReport,
    value: FeatureValue,
) -> Result<(), MaterializeError> {
    match store.upsert_version(&value) {
        Ok(UpsertOutcome::Inserted) => report.values_written += 1,
        Ok(UpsertOutcome::Unchanged) => report.values_unchanged += 1,
        Err(err @ StoreError::NonMonotonicVersion { .. }) => {
            warn!(
                component = "materialize",
                event = "materialize.value.skipped",
                entity_id = %value.entity_id,
                feature = %value.feature_name,
                prediction_period = value.prediction_period,
                error = %err
            );
            report.values_skipped += 1;
            if report.first_error.is_none() {
                report.first_error = Some(err.to_string());
            }
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseRow;
    use std::collections::BTreeMap;

    fn row(entity: &str, period: i32, cols: &[(&str, f64)]) -> BaseRow {
        BaseRow {
            entity_id: entity.to_string(),
            period,
            columns: cols
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    #[test]
    fn unknown_feature_in_plan_is_fatal() {
        let mut store = FeatureStore::open_in_memory().unwrap();
        let base = BaseTable::new(vec![row("QB1", 2022, &[("age", 27.0)])]).unwrap();
        let calendar = SeasonCalendar::default();

        let err = materialize_features(
            &mut store,
            &base,
            &calendar,
            &["never_registered".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, MaterializeError::UnknownFeature { .. }));
    }

    #[test]
    fn missing_base_row_yields_absent_not_zero() {
        let mut store = FeatureStore::open_in_memory().unwrap();
        // QB1 observed in 2023 only: no 2022 source for lag_1.
        let base = BaseTable::new(vec![row("QB1", 2023, &[("total_pass_yds", 4500.0)])]).unwrap();
        let calendar = SeasonCalendar::default();

        store
            .register(&FeatureDefinition::lag(
                "total_pass_yds_lag_1",
                "total_pass_yds",
                1,
                "",
            ))
            .unwrap();
        let report = materialize_all(&mut store, &base, &calendar).unwrap();

        assert_eq!(report.values_written, 0);
        assert_eq!(
            store
                .read_asof(
                    "QB1",
                    "total_pass_yds_lag_1",
                    2023,
                    calendar.period_start(2023)
                )
                .unwrap(),
            None
        );
    }

    #[test]
    fn default_plan_skips_columns_the_table_lacks() {
        let base = BaseTable::new(vec![row(
            "QB1",
            2022,
            &[("total_pass_yds", 4000.0), ("age", 27.0)],
        )])
        .unwrap();
        let defs = default_feature_definitions(&base);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();

        assert!(names.contains(&"total_pass_yds_lag_1"));
        assert!(names.contains(&"age_lag_3"));
        // No cap_hit_millions column, so neither its lags nor the interaction.
        assert!(!names.contains(&"cap_hit_millions_lag_1"));
        assert!(!names.contains(&"age_cap_interaction"));
        assert!(!names.contains(&"experience_risk"));
    }
}
