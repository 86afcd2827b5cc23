//! Document-based partitioning: one group per distinct key-column value.

use crate::dataset::Dataset;
use crate::error::PipelineError;

/// Groups rows sharing the same `key_column` value, in first-appearance
/// order. Rows with a null key pool into a single trailing "unassigned"
/// group. An absent `key_column` is an error (absorbed by the engine's
/// fixed-size fallback).
pub fn partition(dataset: &Dataset, key_column: &str) -> Result<Vec<Vec<usize>>, PipelineError> {
    let column = dataset.column_index(key_column).ok_or_else(|| {
        PipelineError::Validation(format!("key column '{key_column}' does not exist"))
    })?;

    let mut keys: Vec<String> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut unassigned: Vec<usize> = Vec::new();

    for (row, cells) in dataset.rows().iter().enumerate() {
        let cell = &cells[column];
        if cell.is_null() {
            unassigned.push(row);
            continue;
        }
        let key = cell.to_string();
        match keys.iter().position(|existing| *existing == key) {
            Some(idx) => groups[idx].push(row),
            None => {
                keys.push(key);
                groups.push(vec![row]);
            }
        }
    }

    if !unassigned.is_empty() {
        groups.push(unassigned);
    }
    Ok(groups)
}
