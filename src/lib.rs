//! Point-in-time feature store core crate.
//!
//! Implemented scope:
//! - versioned feature value store with strict point-in-time reads
//! - feature registry with a closed raw/lag/interaction kind model
//! - materialization from a base analytic table via an injected calendar
//! - fixed-cutoff and diagonal batch query modes
//! - read-only temporal integrity audit

mod base;
mod calendar;
mod materialize;
mod observability;
mod query;
mod registry;
mod store;
mod validate;

pub use base::{BaseLoadReport, BaseRow, BaseTable, BaseTableError};
pub use calendar::{CalendarError, MonthDay, SeasonCalendar};
pub use materialize::{
    default_feature_definitions, materialize_all, materialize_features, MaterializationReport,
    MaterializeError, DEFAULT_LAGS, DEFAULT_LAG_COLUMNS,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use query::{get_historical_matrix, get_matrix, FeatureMatrix, MatrixRow, QueryError};
pub use registry::{
    FeatureDefinition, FeatureKind, FeatureKindTag, InteractionFormula,
};
pub use store::{
    FeatureKindStats, FeatureStore, FeatureValue, StoreError, UpsertOutcome,
};
pub use validate::{
    check, IntegrityReport, ViolationKind, ViolationSample, MAX_REPORTED_SAMPLES,
};
