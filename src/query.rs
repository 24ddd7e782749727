//! Point-in-time query engine.
//!
//! Two query shapes, both reducing to the store's `read_asof` semantics:
//! a fixed-cutoff snapshot across a period range, and the diagonal batch
//! where each row is evaluated at its own period's season start.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::calendar::SeasonCalendar;
use crate::store::{FeatureStore, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid period range: {period_lo}..={period_hi}")]
    InvalidPeriodRange { period_lo: i32, period_hi: i32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wide feature table: one column per registered feature, one row per
/// (entity, prediction period) pair in the base-table universe. Cells with
/// no qualifying version are None, never a sentinel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub entity_id: String,
    pub prediction_period: i32,
    pub values: Vec<Option<f64>>,
}

impl FeatureMatrix {
    pub fn cell(&self, entity_id: &str, prediction_period: i32, feature: &str) -> Option<f64> {
        let column = self.feature_names.iter().position(|name| name == feature)?;
        self.rows
            .iter()
            .find(|row| row.entity_id == entity_id && row.prediction_period == prediction_period)
            .and_then(|row| row.values[column])
    }

    /// Deterministic digest of the matrix contents.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for name in &self.feature_names {
            hasher.update(name.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b";");
        for row in &self.rows {
            hasher.update(row.entity_id.as_bytes());
            hasher.update(b"|");
            hasher.update(row.prediction_period.to_le_bytes());
            for value in &row.values {
                match value {
                    Some(v) => hasher.update(v.to_bits().to_le_bytes()),
                    None => hasher.update(b"absent"),
                }
                hasher.update(b",");
            }
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

/// Fixed-cutoff snapshot: what a model trained exactly at `cutoff` would
/// have seen for every (entity, period) pair in the range.
pub fn get_matrix(
    store: &FeatureStore,
    cutoff: NaiveDate,
    period_lo: i32,
    period_hi: i32,
) -> Result<FeatureMatrix, QueryError> {
    validate_range(period_lo, period_hi)?;

    let feature_names = registered_names(store)?;
    let pairs = store.entity_periods_in_range(period_lo, period_hi)?;

    let mut rows = Vec::with_capacity(pairs.len());
    for (entity_id, prediction_period) in pairs {
        let mut values = Vec::with_capacity(feature_names.len());
        for feature in &feature_names {
            values.push(store.read_asof(&entity_id, feature, prediction_period, cutoff)?);
        }
        rows.push(MatrixRow {
            entity_id,
            prediction_period,
            values,
        });
    }

    info!(
        component = "query",
        event = "query.matrix.finish",
        cutoff = %cutoff,
        period_lo,
        period_hi,
        rows = rows.len(),
        columns = feature_names.len()
    );
    Ok(FeatureMatrix {
        feature_names,
        rows,
    })
}

/// Diagonal historical batch: each row's cutoff is its own period's season
/// start, reconstructing the panel as it would have looked at each row's
/// prediction time. The per-row cutoff is evaluated inside SQL rather than
/// issuing one point query per cell.
pub fn get_historical_matrix(
    store: &FeatureStore,
    calendar: &SeasonCalendar,
    period_lo: i32,
    period_hi: i32,
) -> Result<FeatureMatrix, QueryError> {
    validate_range(period_lo, period_hi)?;

    let feature_names = registered_names(store)?;
    let column_index: HashMap<&str, usize> = feature_names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    let pairs = store.entity_periods_in_range(period_lo, period_hi)?;
    let mut row_index: HashMap<(String, i32), usize> = HashMap::with_capacity(pairs.len());
    let mut rows: Vec<MatrixRow> = Vec::with_capacity(pairs.len());
    for (entity_id, prediction_period) in pairs {
        row_index.insert((entity_id.clone(), prediction_period), rows.len());
        rows.push(MatrixRow {
            entity_id,
            prediction_period,
            values: vec![None; feature_names.len()],
        });
    }

    // Chain intervals are disjoint, so at most one version per cell matches
    // its row's diagonal cutoff. Ordering by valid_from keeps the newest
    // qualifying version last should a corrupt chain ever overlap.
    let mut stmt = store
        .conn()
        .prepare(
            "
            SELECT entity_id, prediction_period, feature_name, value
            FROM feature_values
            WHERE prediction_period BETWEEN ?1 AND ?2
              AND valid_from <= printf('%04d-%02d-%02d', prediction_period, ?3, ?4)
              AND (valid_until IS NULL
                   OR valid_until > printf('%04d-%02d-%02d', prediction_period, ?3, ?4))
            ORDER BY valid_from ASC
            ",
        )
        .map_err(StoreError::from)?;
    let season = calendar.season_start;
    let mut results = stmt
        .query(params![
            period_lo,
            period_hi,
            i64::from(season.month),
            i64::from(season.day)
        ])
        .map_err(StoreError::from)?;

    while let Some(result) = results.next().map_err(StoreError::from)? {
        let entity_id: String = result.get(0).map_err(StoreError::from)?;
        let prediction_period: i32 = result.get(1).map_err(StoreError::from)?;
        let feature_name: String = result.get(2).map_err(StoreError::from)?;
        let value: f64 = result.get(3).map_err(StoreError::from)?;

        let Some(row_idx) = row_index.get(&(entity_id, prediction_period)) else {
            // Value rows outside the recorded universe are not part of the panel.
            continue;
        };
        let Some(col_idx) = column_index.get(feature_name.as_str()) else {
            continue;
        };
        rows[*row_idx].values[*col_idx] = Some(value);
    }

    info!(
        component = "query",
        event = "query.historical_matrix.finish",
        period_lo,
        period_hi,
        rows = rows.len(),
        columns = feature_names.len()
    );
    Ok(FeatureMatrix {
        feature_names,
        rows,
    })
}

fn registered_names(store: &FeatureStore) -> Result<Vec<String>, StoreError> {
    Ok(store
        .list_features()?
        .into_iter()
        .map(|def| def.name)
        .collect())
}

fn validate_range(period_lo: i32, period_hi: i32) -> Result<(), QueryError> {
    if period_hi < period_lo {
        return Err(QueryError::InvalidPeriodRange {
            period_lo,
            period_hi,
        });
    }
    Ok(())
}
