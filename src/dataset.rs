//! In-memory tabular dataset model and raw-byte decoding.
//!
//! A [`Dataset`] is the immutable input to a pipeline session: an ordered set
//! of named columns and rows where every row carries exactly one cell per
//! column. Decoding accepts the formats the upstream loader hands over as raw
//! bytes plus a filename: CSV/TSV and JSON (array of objects or JSON lines).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::PipelineError;

/// A single cell value.
///
/// CSV cells decode as [`Text`](CellValue::Text) (empty fields become
/// [`Null`](CellValue::Null)); JSON cells keep their native scalar type.
/// Column-level typing is inferred later by the preprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the cell, parsing text if needed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Bool(_) | CellValue::Null => None,
        }
    }

    /// Boolean view of the cell, accepting common textual spellings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            CellValue::Number(_) | CellValue::Null => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => {
                n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Null)
            }
            serde_json::Value::String(s) => CellValue::Text(s),
            // Nested structures are flattened to their JSON text form.
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// An ordered, immutable table of named columns and rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    /// Builds a dataset, enforcing that every row has one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self, PipelineError> {
        if columns.is_empty() {
            return Err(PipelineError::Validation(
                "dataset must declare at least one column".into(),
            ));
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(PipelineError::Validation(format!(
                    "row {idx} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Decodes a raw byte payload using the filename extension to pick the
    /// format. Supported: `.csv`, `.tsv`, `.json`, `.jsonl`.
    pub fn decode(raw: &[u8], filename: &str) -> Result<Self, PipelineError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Self::from_delimited(raw, b','),
            "tsv" => Self::from_delimited(raw, b'\t'),
            "json" => Self::from_json(raw),
            "jsonl" => Self::from_json_lines(raw),
            other => Err(PipelineError::Validation(format!(
                "unsupported dataset format '.{other}' for file '{filename}'"
            ))),
        }
    }

    fn from_delimited(raw: &[u8], delimiter: u8) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(raw);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|err| PipelineError::Validation(format!("unreadable header row: {err}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|err| {
                PipelineError::Validation(format!("malformed record at line {}: {err}", idx + 2))
            })?;
            let row: Vec<CellValue> = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Null
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Self::new(columns, rows)
    }

    fn from_json(raw: &[u8]) -> Result<Self, PipelineError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|err| PipelineError::Validation(format!("invalid JSON payload: {err}")))?;
        let serde_json::Value::Array(objects) = value else {
            return Err(PipelineError::Validation(
                "JSON dataset must be an array of objects".into(),
            ));
        };
        Self::from_objects(objects)
    }

    fn from_json_lines(raw: &[u8]) -> Result<Self, PipelineError> {
        let text = std::str::from_utf8(raw)
            .map_err(|err| PipelineError::Validation(format!("payload is not UTF-8: {err}")))?;
        let mut objects = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(line).map_err(|err| {
                PipelineError::Validation(format!("invalid JSON on line {}: {err}", idx + 1))
            })?;
            objects.push(value);
        }
        Self::from_objects(objects)
    }

    fn from_objects(objects: Vec<serde_json::Value>) -> Result<Self, PipelineError> {
        // Column order is first-appearance across all records.
        let mut columns: Vec<String> = Vec::new();
        for object in &objects {
            let serde_json::Value::Object(map) = object else {
                return Err(PipelineError::Validation(
                    "every JSON record must be an object".into(),
                ));
            };
            for key in map.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .into_iter()
            .filter_map(|object| match object {
                serde_json::Value::Object(mut map) => Some(
                    columns
                        .iter()
                        .map(|column| {
                            map.remove(column)
                                .map(CellValue::from)
                                .unwrap_or(CellValue::Null)
                        })
                        .collect(),
                ),
                _ => None,
            })
            .collect();

        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Serializes one row as `column: value | column: value`.
    ///
    /// This is the canonical text form chunking strategies build chunk text
    /// from, so it must stay deterministic for a given dataset.
    pub fn row_text(&self, row: usize) -> String {
        let Some(cells) = self.rows.get(row) else {
            return String::new();
        };
        self.columns
            .iter()
            .zip(cells)
            .map(|(name, cell)| format!("{name}: {cell}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
