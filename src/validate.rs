//! Temporal integrity validator: a read-only audit of the value store.
//!
//! The report is advisory. The materialization engine derives every validity
//! window deterministically from the calendar, so a violation here means the
//! calendar or engine has a bug, not that a write should have been rejected.
//! Run it in CI and after every materialization.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::calendar::SeasonCalendar;
use crate::registry::FeatureKindTag;
use crate::store::{FeatureStore, FeatureValue, StoreError};

pub const MAX_REPORTED_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// A lag/interaction value became knowable at or after the start of the
    /// period it is meant to predict.
    LookAhead,
    /// Two versions of one chain have overlapping validity intervals.
    OverlappingVersions,
    /// More than one open version in a single chain.
    DuplicateOpenVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSample {
    pub kind: ViolationKind,
    pub entity_id: String,
    pub prediction_period: i32,
    pub feature_name: String,
    pub valid_from: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub rows_scanned: u64,
    pub violations: u64,
    pub samples: Vec<ViolationSample>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.violations == 0
    }

    fn record(&mut self, kind: ViolationKind, row: &FeatureValue) {
        self.violations += 1;
        if self.samples.len() < MAX_REPORTED_SAMPLES {
            self.samples.push(ViolationSample {
                kind,
                entity_id: row.entity_id.clone(),
                prediction_period: row.prediction_period,
                feature_name: row.feature_name.clone(),
                valid_from: row.valid_from,
            });
        }
    }
}

/// Scans every version chain and asserts the store invariants: no
/// look-ahead for lag/interaction features, disjoint intervals, and at most
/// one open version per chain.
pub fn check(
    store: &FeatureStore,
    calendar: &SeasonCalendar,
) -> Result<IntegrityReport, StoreError> {
    let mut audited: HashSet<String> = HashSet::new();
    for tag in [FeatureKindTag::Lag, FeatureKindTag::Interaction] {
        for definition in store.list_by_kind(tag)? {
            audited.insert(definition.name);
        }
    }

    let mut report = IntegrityReport::default();
    let mut prev: Option<FeatureValue> = None;

    report.rows_scanned = store.scan_all(|row| {
        if audited.contains(&row.feature_name)
            && row.valid_from >= calendar.period_start(row.prediction_period)
        {
            report.record(ViolationKind::LookAhead, &row);
        }

        if let Some(prev_row) = &prev {
            let same_chain = prev_row.entity_id == row.entity_id
                && prev_row.feature_name == row.feature_name
                && prev_row.prediction_period == row.prediction_period;
            if same_chain {
                match prev_row.valid_until {
                    None if row.valid_until.is_none() => {
                        report.record(ViolationKind::DuplicateOpenVersion, &row);
                    }
                    None => {
                        // An open version followed by anything overlaps it.
                        report.record(ViolationKind::OverlappingVersions, &row);
                    }
                    Some(until) if until > row.valid_from => {
                        report.record(ViolationKind::OverlappingVersions, &row);
                    }
                    Some(_) => {}
                }
            }
        }
        prev = Some(row);
    })?;

    if report.passed() {
        info!(
            component = "validate",
            event = "validate.check.passed",
            rows_scanned = report.rows_scanned
        );
    } else {
        error!(
            component = "validate",
            event = "validate.check.failed",
            rows_scanned = report.rows_scanned,
            violations = report.violations,
            samples_reported = report.samples.len()
        );
    }
    Ok(report)
}
