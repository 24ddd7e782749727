use std::path::PathBuf;
use std::process::ExitCode;

use pitfs::{
    check, default_feature_definitions, init_logging, log_app_start, logging_config_from_env,
    materialize_features, BaseTable, MonthDay, SeasonCalendar, FeatureStore,
};

fn main() -> ExitCode {
    let logging = logging_config_from_env();
    if let Err(err) = init_logging(&logging) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let mode = match std::env::args().nth(1) {
        Some(mode) if mode == "materialize-all" || mode == "validate-only" => mode,
        _ => {
            eprintln!("usage: feature_pipeline <materialize-all|validate-only>");
            return ExitCode::FAILURE;
        }
    };
    log_app_start(&logging, &mode);

    let result = match mode.as_str() {
        "materialize-all" => run_materialize_all(),
        _ => run_validate_only(),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("feature_pipeline failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_materialize_all() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store_path = store_path();
    let base_path = std::env::var("PITFS_BASE_TABLE_PATH")
        .map(PathBuf::from)
        .map_err(|_| "PITFS_BASE_TABLE_PATH must point at the base analytic table CSV")?;
    let calendar = calendar_from_env()?;

    let mut store = FeatureStore::open(&store_path)?;
    let (base, load_report) = BaseTable::from_csv_path(&base_path)?;
    if base.is_empty() {
        return Err(format!("base table at {} has no usable rows", base_path.display()).into());
    }

    let definitions = default_feature_definitions(&base);
    for definition in &definitions {
        store.register(definition)?;
    }

    let plan: Vec<String> = match std::env::var("PITFS_FEATURES") {
        Ok(raw) => raw
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        Err(_) => definitions.iter().map(|def| def.name.clone()).collect(),
    };

    let report = materialize_features(&mut store, &base, &calendar, &plan)?;
    let integrity = check(&store, &calendar)?;
    let stats = store.feature_stats()?;

    let summary = serde_json::json!({
        "mode": "materialize-all",
        "store_path": store_path.display().to_string(),
        "base_rows_loaded": load_report.rows_loaded,
        "base_rows_skipped": load_report.rows_skipped,
        "base_cells_skipped": load_report.cells_skipped,
        "features_processed": report.features_processed,
        "values_written": report.values_written,
        "values_unchanged": report.values_unchanged,
        "values_skipped": report.values_skipped,
        "store_value_count": store.value_count()?,
        "store_fingerprint": store.content_fingerprint()?,
        "violations": integrity.violations,
        "stats": stats,
    });
    println!("{summary}");

    // Row-level skips never fail the run; violations do.
    if integrity.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn run_validate_only() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store_path = store_path();
    let calendar = calendar_from_env()?;

    let store = FeatureStore::open_read_only(&store_path)?;
    let integrity = check(&store, &calendar)?;

    let summary = serde_json::json!({
        "mode": "validate-only",
        "store_path": store_path.display().to_string(),
        "rows_scanned": integrity.rows_scanned,
        "violations": integrity.violations,
        "samples": integrity.samples,
    });
    println!("{summary}");

    if integrity.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn store_path() -> PathBuf {
    std::env::var("PITFS_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/feature_store.sqlite"))
}

fn calendar_from_env() -> Result<SeasonCalendar, Box<dyn std::error::Error>> {
    let defaults = SeasonCalendar::default();
    Ok(SeasonCalendar::new(
        month_day_from_env("PITFS_OUTCOMES_MMDD", defaults.outcomes_public)?,
        month_day_from_env("PITFS_ROSTER_MMDD", defaults.roster_window)?,
        month_day_from_env("PITFS_SEASON_START_MMDD", defaults.season_start)?,
    ))
}

fn month_day_from_env(key: &str, default: MonthDay) -> Result<MonthDay, Box<dyn std::error::Error>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(default);
    };
    let (month, day) = raw
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("{key} must be MM-DD, got '{raw}'"))?;
    let month: u32 = month.parse().map_err(|_| format!("{key} month in '{raw}'"))?;
    let day: u32 = day.parse().map_err(|_| format!("{key} day in '{raw}'"))?;
    Ok(MonthDay::new(month, day)?)
}
