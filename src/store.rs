//! Versioned point-in-time feature value store over SQLite.
//!
//! Every value carries the window during which it was actually knowable:
//! `[valid_from, valid_until)`, with a NULL `valid_until` marking the current
//! open version. Values are superseded, never deleted.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid feature definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error(
        "non-monotonic version for {entity_id}/{feature_name}/{prediction_period}: \
         new valid_from {new_valid_from} must be after {latest_valid_from}"
    )]
    NonMonotonicVersion {
        entity_id: String,
        feature_name: String,
        prediction_period: i32,
        latest_valid_from: NaiveDate,
        new_valid_from: NaiveDate,
    },
    #[error("invalid stored date '{0}'")]
    InvalidStoredDate(String),
}

/// One versioned feature value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub entity_id: String,
    /// The period this value is a candidate input for, not the period the
    /// underlying observation came from.
    pub prediction_period: i32,
    pub feature_name: String,
    pub value: f64,
    pub valid_from: NaiveDate,
    /// None marks the current open version.
    pub valid_until: Option<NaiveDate>,
}

impl FeatureValue {
    pub fn entity_key(&self) -> String {
        format!("{}_{}", self.entity_id, self.prediction_period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    /// The latest version already holds an identical value and window.
    Unchanged,
}

/// Per-kind summary used by the CLI report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureKindStats {
    pub kind: String,
    pub feature_count: u64,
    pub value_count: u64,
    pub min_period: Option<i32>,
    pub max_period: Option<i32>,
}

pub struct FeatureStore {
    conn: Connection,
}

impl FeatureStore {
    /// Opens (creating if needed) a store file and ensures the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_schema(&conn)?;

        info!(
            component = "store",
            event = "store.opened",
            path = %path.display()
        );
        Ok(Self { conn })
    }

    /// Opens an existing store read-only. Schema initialization is skipped.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Inserts a new version of a value, superseding the current one.
    ///
    /// Atomic per chain: any still-open (or overlapping) latest version is
    /// closed at the new row's `valid_from` in the same transaction. A call
    /// whose value and window match the latest version exactly is a no-op,
    /// so re-materializing unchanged inputs writes nothing. Versions must
    /// strictly advance in `valid_from`.
    pub fn upsert_version(&mut self, new: &FeatureValue) -> Result<UpsertOutcome, StoreError> {
        let tx = self.conn.transaction()?;

        let latest = tx
            .query_row(
                "
                SELECT value, valid_from, valid_until
                FROM feature_values
                WHERE entity_id = ?1 AND feature_name = ?2 AND prediction_period = ?3
                ORDER BY valid_from DESC
                LIMIT 1
                ",
                params![new.entity_id, new.feature_name, new.prediction_period],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        if let Some((latest_value, latest_from_raw, latest_until_raw)) = latest {
            let latest_from = date_from_text(&latest_from_raw)?;
            let latest_until = latest_until_raw.as_deref().map(date_from_text).transpose()?;

            if latest_from == new.valid_from
                && latest_value.to_bits() == new.value.to_bits()
                && latest_until == new.valid_until
            {
                debug!(
                    component = "store",
                    event = "store.upsert.unchanged",
                    entity_id = %new.entity_id,
                    feature = %new.feature_name,
                    prediction_period = new.prediction_period
                );
                return Ok(UpsertOutcome::Unchanged);
            }

            if new.valid_from <= latest_from {
                return Err(StoreError::NonMonotonicVersion {
                    entity_id: new.entity_id.clone(),
                    feature_name: new.feature_name.clone(),
                    prediction_period: new.prediction_period,
                    latest_valid_from: latest_from,
                    new_valid_from: new.valid_from,
                });
            }

            let overlaps = match latest_until {
                None => true,
                Some(until) => until > new.valid_from,
            };
            if overlaps {
                tx.execute(
                    "
                    UPDATE feature_values
                    SET valid_until = ?1
                    WHERE entity_id = ?2 AND feature_name = ?3
                      AND prediction_period = ?4 AND valid_from = ?5
                    ",
                    params![
                        date_to_text(new.valid_from),
                        new.entity_id,
                        new.feature_name,
                        new.prediction_period,
                        latest_from_raw,
                    ],
                )?;
            }
        }

        tx.execute(
            "
            INSERT INTO feature_values
                (entity_key, entity_id, prediction_period, feature_name,
                 value, valid_from, valid_until)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                new.entity_key(),
                new.entity_id,
                new.prediction_period,
                new.feature_name,
                new.value,
                date_to_text(new.valid_from),
                new.valid_until.map(date_to_text),
            ],
        )?;

        tx.commit()?;
        Ok(UpsertOutcome::Inserted)
    }

    /// The single point-in-time primitive: the value of the unique version
    /// covering `cutoff`, or None when nothing qualifies. The boundary is
    /// inclusive on `valid_from`: as soon as something becomes knowable, it
    /// is knowable.
    pub fn read_asof(
        &self,
        entity_id: &str,
        feature_name: &str,
        prediction_period: i32,
        cutoff: NaiveDate,
    ) -> Result<Option<f64>, StoreError> {
        let value = self
            .conn
            .query_row(
                "
                SELECT value
                FROM feature_values
                WHERE entity_id = ?1 AND feature_name = ?2 AND prediction_period = ?3
                  AND valid_from <= ?4
                  AND (valid_until IS NULL OR valid_until > ?4)
                ORDER BY valid_from DESC
                LIMIT 1
                ",
                params![
                    entity_id,
                    feature_name,
                    prediction_period,
                    date_to_text(cutoff)
                ],
                |row| row.get::<_, f64>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Streams every value row in chain order, calling `visit` per row.
    /// Exposed for the integrity validator; queries go through `read_asof`.
    pub fn scan_all(
        &self,
        mut visit: impl FnMut(FeatureValue),
    ) -> Result<u64, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT entity_id, prediction_period, feature_name, value, valid_from, valid_until
            FROM feature_values
            ORDER BY entity_id ASC, feature_name ASC, prediction_period ASC, valid_from ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        let mut scanned = 0u64;
        while let Some(row) = rows.next()? {
            let valid_from_raw: String = row.get(4)?;
            let valid_until_raw: Option<String> = row.get(5)?;
            visit(FeatureValue {
                entity_id: row.get(0)?,
                prediction_period: row.get(1)?,
                feature_name: row.get(2)?,
                value: row.get(3)?,
                valid_from: date_from_text(&valid_from_raw)?,
                valid_until: valid_until_raw.as_deref().map(date_from_text).transpose()?,
            });
            scanned += 1;
        }
        Ok(scanned)
    }

    /// Records one (entity, period) pair of the base-table universe.
    pub fn record_entity_period(
        &self,
        entity_id: &str,
        prediction_period: i32,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO entity_periods (entity_id, prediction_period)
            VALUES (?1, ?2)
            ON CONFLICT(entity_id, prediction_period) DO NOTHING
            ",
            params![entity_id, prediction_period],
        )?;
        Ok(())
    }

    /// The known (entity, period) pairs inside an inclusive period range,
    /// ordered deterministically.
    pub fn entity_periods_in_range(
        &self,
        period_lo: i32,
        period_hi: i32,
    ) -> Result<Vec<(String, i32)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT entity_id, prediction_period
            FROM entity_periods
            WHERE prediction_period BETWEEN ?1 AND ?2
            ORDER BY entity_id ASC, prediction_period ASC
            ",
        )?;
        let mut rows = stmt.query(params![period_lo, period_hi])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
    }

    pub fn value_count(&self) -> Result<u64, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM feature_values", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Deterministic digest of the full value-store contents. Two stores
    /// built from identical inputs hash identically.
    pub fn content_fingerprint(&self) -> Result<String, StoreError> {
        let mut hasher = Sha256::new();
        self.scan_all(|value| {
            hasher.update(value.entity_id.as_bytes());
            hasher.update(b"|");
            hasher.update(value.prediction_period.to_le_bytes());
            hasher.update(value.feature_name.as_bytes());
            hasher.update(b"|");
            hasher.update(value.value.to_bits().to_le_bytes());
            hasher.update(date_to_text(value.valid_from).as_bytes());
            match value.valid_until {
                Some(until) => hasher.update(date_to_text(until).as_bytes()),
                None => hasher.update(b"open"),
            }
            hasher.update(b";");
        })?;
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn feature_stats(&self) -> Result<Vec<FeatureKindStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT
                fr.kind,
                COUNT(DISTINCT fv.feature_name),
                COUNT(*),
                MIN(fv.prediction_period),
                MAX(fv.prediction_period)
            FROM feature_values fv
            JOIN feature_registry fr ON fv.feature_name = fr.feature_name
            GROUP BY fr.kind
            ORDER BY fr.kind ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(FeatureKindStats {
                kind: row.get(0)?,
                feature_count: row.get::<_, i64>(1)? as u64,
                value_count: row.get::<_, i64>(2)? as u64,
                min_period: row.get(3)?,
                max_period: row.get(4)?,
            });
        }
        Ok(out)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS feature_registry (
            feature_name TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            source_column TEXT,
            lag_periods INTEGER,
            formula TEXT,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feature_values (
            entity_key TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            prediction_period INTEGER NOT NULL,
            feature_name TEXT NOT NULL,
            value REAL NOT NULL,
            valid_from TEXT NOT NULL,
            valid_until TEXT,
            PRIMARY KEY (entity_id, feature_name, prediction_period, valid_from)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_feature_pit
        ON feature_values (feature_name, prediction_period, valid_from);

        CREATE TABLE IF NOT EXISTS entity_periods (
            entity_id TEXT NOT NULL,
            prediction_period INTEGER NOT NULL,
            PRIMARY KEY (entity_id, prediction_period)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}

pub(crate) fn date_to_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn date_from_text(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| StoreError::InvalidStoredDate(raw.to_string()))
}
