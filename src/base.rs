//! Base analytic table input: per-entity, per-period numeric observations.
//!
//! The materialization engine treats this as a read-only collaborator. The
//! CSV loader skips malformed numeric cells instead of failing the run; a
//! missing cell means "unknown", never zero.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BaseTableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("base table has no '{0}' column")]
    MissingKeyColumn(&'static str),
    #[error("duplicate base row for {entity_id}/{period}")]
    DuplicateRow { entity_id: String, period: i32 },
}

/// One observation row: an entity in one observed period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRow {
    pub entity_id: String,
    pub period: i32,
    /// Numeric columns present for this row. Absent keys are unknown.
    pub columns: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLoadReport {
    pub rows_loaded: u64,
    pub rows_skipped: u64,
    pub cells_skipped: u64,
    pub first_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BaseTable {
    rows: BTreeMap<(String, i32), BTreeMap<String, f64>>,
    column_names: BTreeSet<String>,
}

impl BaseTable {
    pub fn new(rows: Vec<BaseRow>) -> Result<Self, BaseTableError> {
        let mut table = Self::default();
        for row in rows {
            table.insert(row)?;
        }
        Ok(table)
    }

    fn insert(&mut self, row: BaseRow) -> Result<(), BaseTableError> {
        let key = (row.entity_id.clone(), row.period);
        if self.rows.contains_key(&key) {
            return Err(BaseTableError::DuplicateRow {
                entity_id: row.entity_id,
                period: row.period,
            });
        }
        for name in row.columns.keys() {
            self.column_names.insert(name.clone());
        }
        self.rows.insert(key, row.columns);
        Ok(())
    }

    /// Loads a base table from CSV with an `entity_id` column, a `period`
    /// column, and any number of numeric columns. Rows with an unparsable
    /// key are skipped and logged; unparsable numeric cells are skipped
    /// individually. Neither aborts the load.
    pub fn from_csv_path(path: &Path) -> Result<(Self, BaseLoadReport), BaseTableError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let entity_idx = headers
            .iter()
            .position(|h| h == "entity_id")
            .ok_or(BaseTableError::MissingKeyColumn("entity_id"))?;
        let period_idx = headers
            .iter()
            .position(|h| h == "period")
            .ok_or(BaseTableError::MissingKeyColumn("period"))?;

        let mut table = Self::default();
        let mut report = BaseLoadReport::default();

        for record in reader.records() {
            let record = record?;
            let entity_id = record.get(entity_idx).unwrap_or_default().trim();
            let period_raw = record.get(period_idx).unwrap_or_default().trim();

            let period = match period_raw.parse::<i32>() {
                Ok(period) if !entity_id.is_empty() => period,
                _ => {
                    warn!(
                        component = "base_table",
                        event = "base.load.row_skipped",
                        entity_id,
                        period = period_raw
                    );
                    report.rows_skipped += 1;
                    if report.first_error.is_none() {
                        report.first_error =
                            Some(format!("unparsable row key '{entity_id}'/'{period_raw}'"));
                    }
                    continue;
                }
            };

            let mut columns = BTreeMap::new();
            for (idx, cell) in record.iter().enumerate() {
                if idx == entity_idx || idx == period_idx {
                    continue;
                }
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                let Some(name) = headers.get(idx) else {
                    continue;
                };
                match cell.parse::<f64>() {
                    Ok(parsed) if parsed.is_finite() => {
                        columns.insert(name.to_string(), parsed);
                    }
                    _ => {
                        warn!(
                            component = "base_table",
                            event = "base.load.cell_skipped",
                            entity_id,
                            period,
                            column = name,
                            cell
                        );
                        report.cells_skipped += 1;
                        if report.first_error.is_none() {
                            report.first_error = Some(format!(
                                "non-numeric cell '{cell}' in {name} for {entity_id}/{period}"
                            ));
                        }
                    }
                }
            }

            match table.insert(BaseRow {
                entity_id: entity_id.to_string(),
                period,
                columns,
            }) {
                Ok(()) => report.rows_loaded += 1,
                Err(BaseTableError::DuplicateRow { entity_id, period }) => {
                    warn!(
                        component = "base_table",
                        event = "base.load.row_skipped",
                        entity_id = %entity_id,
                        period,
                        reason = "duplicate"
                    );
                    report.rows_skipped += 1;
                }
                Err(other) => return Err(other),
            }
        }

        info!(
            component = "base_table",
            event = "base.load.finish",
            path = %path.display(),
            rows_loaded = report.rows_loaded,
            rows_skipped = report.rows_skipped,
            cells_skipped = report.cells_skipped
        );
        Ok((table, report))
    }

    pub fn value(&self, entity_id: &str, period: i32, column: &str) -> Option<f64> {
        self.rows
            .get(&(entity_id.to_string(), period))
            .and_then(|columns| columns.get(column).copied())
    }

    pub fn contains(&self, entity_id: &str, period: i32) -> bool {
        self.rows.contains_key(&(entity_id.to_string(), period))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.contains(column)
    }

    /// All (entity, observed period) pairs in deterministic order.
    pub fn entity_periods(&self) -> impl Iterator<Item = (&str, i32)> {
        self.rows
            .keys()
            .map(|(entity, period)| (entity.as_str(), *period))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
