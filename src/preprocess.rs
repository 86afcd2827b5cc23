//! Dataset cleaning: column type inference, missing-value handling, and
//! duplicate removal.
//!
//! Preprocessing is pure — it returns a new [`Dataset`] and leaves the input
//! untouched, so a session can always be reproduced from its original upload.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{CellValue, Dataset};
use crate::error::PipelineError;

/// How many non-null values per column the type inference samples.
const TYPE_SAMPLE_SIZE: usize = 100;

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Boolean,
    Text,
}

/// Per-column inference outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred_type: ColumnType,
    pub null_count: usize,
}

/// Report returned alongside the cleaned dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTypeReport {
    pub profiles: Vec<ColumnProfile>,
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
}

impl ColumnTypeReport {
    pub fn profile(&self, column: &str) -> Option<&ColumnProfile> {
        self.profiles.iter().find(|p| p.name == column)
    }
}

/// Strategy applied to missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum NullStrategy {
    /// Drop every row holding a null in a targeted column.
    DropRows,
    /// Replace nulls with a fixed value.
    FillConstant { value: String },
    /// Replace nulls in numeric columns with the column mean; non-numeric
    /// columns keep the empty-string sentinel.
    FillMean,
    /// Replace nulls with an empty string.
    #[default]
    EmptySentinel,
}

/// Preprocessing options, deserialized from the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub null_strategy: NullStrategy,
    /// Restricts the null strategy to these columns; `None` targets all.
    pub columns: Option<Vec<String>>,
    pub remove_duplicates: bool,
    /// Duplicate definition restricted to a column subset; `None` compares
    /// whole rows.
    pub duplicate_subset: Option<Vec<String>>,
}

/// Cleans `dataset` per `config`, returning the new dataset and a report.
pub fn preprocess(
    dataset: &Dataset,
    config: &PreprocessingConfig,
) -> Result<(Dataset, ColumnTypeReport), PipelineError> {
    let target_columns = resolve_columns(dataset, config.columns.as_deref())?;
    let subset_columns = resolve_columns(dataset, config.duplicate_subset.as_deref())?;

    let profiles = infer_profiles(dataset);
    let rows_in = dataset.row_count();

    let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(rows_in);
    let means = match config.null_strategy {
        NullStrategy::FillMean => column_means(dataset, &profiles),
        _ => vec![None; dataset.column_count()],
    };

    for row in dataset.rows() {
        match apply_null_strategy(row, &target_columns, &config.null_strategy, &means) {
            Some(cleaned) => rows.push(cleaned),
            None => continue,
        }
    }

    let mut duplicates_removed = 0;
    if config.remove_duplicates {
        let before = rows.len();
        rows = dedup_rows(rows, &subset_columns);
        duplicates_removed = before - rows.len();
        debug!(duplicates_removed, "removed duplicate rows");
    }

    let rows_out = rows.len();
    let cleaned = Dataset::new(dataset.columns().to_vec(), rows)?;
    let report = ColumnTypeReport {
        profiles,
        rows_in,
        rows_out,
        duplicates_removed,
    };
    Ok((cleaned, report))
}

/// Maps an optional column-name list onto indices, validating every name.
fn resolve_columns(
    dataset: &Dataset,
    names: Option<&[String]>,
) -> Result<Vec<usize>, PipelineError> {
    match names {
        None => Ok((0..dataset.column_count()).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                dataset.column_index(name).ok_or_else(|| {
                    PipelineError::Validation(format!("unknown column '{name}'"))
                })
            })
            .collect(),
    }
}

/// Infers a [`ColumnProfile`] per column; also used by the semantic chunking
/// strategy to derive row feature vectors.
pub(crate) fn infer_profiles(dataset: &Dataset) -> Vec<ColumnProfile> {
    dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut null_count = 0;
            let mut sampled = 0;
            let mut all_numeric = true;
            let mut all_boolean = true;

            for row in dataset.rows() {
                let cell = &row[idx];
                if cell.is_null() {
                    null_count += 1;
                    continue;
                }
                if sampled < TYPE_SAMPLE_SIZE {
                    sampled += 1;
                    if cell.as_number().is_none() {
                        all_numeric = false;
                    }
                    if cell.as_bool().is_none() {
                        all_boolean = false;
                    }
                }
            }

            // Ambiguity (or an all-null column) defaults to free text.
            let inferred_type = if sampled == 0 {
                ColumnType::Text
            } else if all_boolean {
                ColumnType::Boolean
            } else if all_numeric {
                ColumnType::Numeric
            } else {
                ColumnType::Text
            };

            ColumnProfile {
                name: name.clone(),
                inferred_type,
                null_count,
            }
        })
        .collect()
}

fn column_means(dataset: &Dataset, profiles: &[ColumnProfile]) -> Vec<Option<f64>> {
    profiles
        .iter()
        .enumerate()
        .map(|(idx, profile)| {
            if profile.inferred_type != ColumnType::Numeric {
                return None;
            }
            let values: Vec<f64> = dataset
                .rows()
                .iter()
                .filter_map(|row| row[idx].as_number())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        })
        .collect()
}

/// Returns the cleaned row, or `None` when the strategy drops it.
fn apply_null_strategy(
    row: &[CellValue],
    targets: &[usize],
    strategy: &NullStrategy,
    means: &[Option<f64>],
) -> Option<Vec<CellValue>> {
    if matches!(strategy, NullStrategy::DropRows)
        && targets.iter().any(|&idx| row[idx].is_null())
    {
        return None;
    }

    let mut cleaned = row.to_vec();
    for &idx in targets {
        if !cleaned[idx].is_null() {
            continue;
        }
        cleaned[idx] = match strategy {
            NullStrategy::DropRows => return None,
            NullStrategy::FillConstant { value } => CellValue::Text(value.clone()),
            NullStrategy::FillMean => match means[idx] {
                Some(mean) => CellValue::Number(mean),
                None => CellValue::Text(String::new()),
            },
            NullStrategy::EmptySentinel => CellValue::Text(String::new()),
        };
    }
    Some(cleaned)
}

fn dedup_rows(rows: Vec<Vec<CellValue>>, subset: &[usize]) -> Vec<Vec<CellValue>> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key: Vec<String> = subset
                .iter()
                .map(|&idx| {
                    serde_json::to_string(&row[idx]).unwrap_or_else(|_| row[idx].to_string())
                })
                .collect();
            seen.insert(key.join("\u{1f}"))
        })
        .collect()
}
