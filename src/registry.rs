//! Feature registry: the catalog of registered feature definitions.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::store::{FeatureStore, StoreError};

/// Product of two base-table columns. The only interaction shape the
/// materialization engine computes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionFormula {
    pub left: String,
    pub right: String,
}

impl InteractionFormula {
    pub fn parse(raw: &str) -> Option<Self> {
        let (left, right) = raw.split_once('*')?;
        let left = left.trim();
        let right = right.trim();
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some(Self {
            left: left.to_string(),
            right: right.to_string(),
        })
    }
}

impl fmt::Display for InteractionFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.left, self.right)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Raw,
    Lag { periods: u32 },
    Interaction { formula: InteractionFormula },
}

/// Discriminant used for registry listings and kind-based dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKindTag {
    Raw,
    Lag,
    Interaction,
}

impl FeatureKindTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Lag => "lag",
            Self::Interaction => "interaction",
        }
    }
}

impl FeatureKind {
    pub fn tag(&self) -> FeatureKindTag {
        match self {
            Self::Raw => FeatureKindTag::Raw,
            Self::Lag { .. } => FeatureKindTag::Lag,
            Self::Interaction { .. } => FeatureKindTag::Interaction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    pub kind: FeatureKind,
    /// Base-table column this feature is derived from. Absent for pure
    /// interactions, whose inputs live in the formula.
    pub source_column: Option<String>,
    pub description: String,
}

impl FeatureDefinition {
    pub fn lag(name: &str, source_column: &str, periods: u32, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureKind::Lag { periods },
            source_column: Some(source_column.to_string()),
            description: description.to_string(),
        }
    }

    pub fn interaction(name: &str, formula: InteractionFormula, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureKind::Interaction { formula },
            source_column: None,
            description: description.to_string(),
        }
    }

    pub fn raw(name: &str, source_column: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FeatureKind::Raw,
            source_column: Some(source_column.to_string()),
            description: description.to_string(),
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("feature name must be non-empty"));
        }
        match &self.kind {
            FeatureKind::Raw => {
                if self.source_column.is_none() {
                    return Err(invalid("raw features require a source column"));
                }
            }
            FeatureKind::Lag { periods } => {
                if *periods == 0 {
                    return Err(invalid("lag features require lag_periods > 0"));
                }
                if self.source_column.is_none() {
                    return Err(invalid("lag features require a source column"));
                }
            }
            FeatureKind::Interaction { formula } => {
                if formula.left.trim().is_empty() || formula.right.trim().is_empty() {
                    return Err(invalid("interaction features require a two-column formula"));
                }
            }
        }
        Ok(())
    }
}

impl FeatureStore {
    /// Upserts a definition by name. Metadata only: existing feature values
    /// are never touched by re-registration.
    pub fn register(&self, definition: &FeatureDefinition) -> Result<(), StoreError> {
        definition.validate()?;

        let (lag_periods, formula) = match &definition.kind {
            FeatureKind::Raw => (None, None),
            FeatureKind::Lag { periods } => (Some(*periods as i64), None),
            FeatureKind::Interaction { formula } => (None, Some(formula.to_string())),
        };

        self.conn().execute(
            "
            INSERT INTO feature_registry
                (feature_name, kind, source_column, lag_periods, formula, description)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(feature_name) DO UPDATE SET
                kind = excluded.kind,
                source_column = excluded.source_column,
                lag_periods = excluded.lag_periods,
                formula = excluded.formula,
                description = excluded.description
            ",
            params![
                definition.name,
                definition.kind.tag().as_str(),
                definition.source_column,
                lag_periods,
                formula,
                definition.description,
            ],
        )?;

        info!(
            component = "registry",
            event = "registry.feature.registered",
            feature = %definition.name,
            kind = definition.kind.tag().as_str()
        );
        Ok(())
    }

    pub fn feature(&self, name: &str) -> Result<Option<FeatureDefinition>, StoreError> {
        self.conn()
            .query_row(
                "
                SELECT feature_name, kind, source_column, lag_periods, formula, description
                FROM feature_registry
                WHERE feature_name = ?1
                ",
                params![name],
                definition_from_row,
            )
            .optional()?
            .transpose()
    }

    /// All registered definitions, ordered by name.
    pub fn list_features(&self) -> Result<Vec<FeatureDefinition>, StoreError> {
        let mut stmt = self.conn().prepare(
            "
            SELECT feature_name, kind, source_column, lag_periods, formula, description
            FROM feature_registry
            ORDER BY feature_name ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(definition_from_row(row).map_err(StoreError::from)??);
        }
        Ok(out)
    }

    pub fn list_by_kind(&self, kind: FeatureKindTag) -> Result<Vec<FeatureDefinition>, StoreError> {
        let mut stmt = self.conn().prepare(
            "
            SELECT feature_name, kind, source_column, lag_periods, formula, description
            FROM feature_registry
            WHERE kind = ?1
            ORDER BY feature_name ASC
            ",
        )?;
        let mut rows = stmt.query(params![kind.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(definition_from_row(row).map_err(StoreError::from)??);
        }
        Ok(out)
    }
}

type DefinitionRowResult = Result<FeatureDefinition, StoreError>;

fn definition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DefinitionRowResult> {
    let name: String = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let source_column: Option<String> = row.get(2)?;
    let lag_periods: Option<i64> = row.get(3)?;
    let formula_raw: Option<String> = row.get(4)?;
    let description: String = row.get(5)?;

    let corrupt = |reason: &str| StoreError::InvalidDefinition {
        name: name.clone(),
        reason: reason.to_string(),
    };

    let kind = match kind_raw.as_str() {
        "raw" => Ok(FeatureKind::Raw),
        "lag" => match lag_periods {
            Some(periods) if periods > 0 => Ok(FeatureKind::Lag {
                periods: periods as u32,
            }),
            _ => Err(corrupt("stored lag feature has no positive lag_periods")),
        },
        "interaction" => match formula_raw.as_deref().and_then(InteractionFormula::parse) {
            Some(formula) => Ok(FeatureKind::Interaction { formula }),
            None => Err(corrupt("stored interaction feature has no parsable formula")),
        },
        other => Err(corrupt(&format!("unknown stored kind '{other}'"))),
    };

    Ok(kind.map(|kind| FeatureDefinition {
        name,
        kind,
        source_column,
        description,
    }))
}
