//! Recursive partitioning: fixed-size groups halved until each fits a token
//! budget.

use crate::dataset::Dataset;

use super::fixed;

/// Approximate characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Partitions the dataset into fixed groups of `chunk_size`, then recursively
/// halves any group whose serialized text exceeds `token_budget` until every
/// group fits the budget or is a single row.
pub fn partition(dataset: &Dataset, chunk_size: usize, token_budget: usize) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    for group in fixed::partition(dataset.row_count(), chunk_size) {
        split_into(dataset, group, token_budget, &mut groups);
    }
    groups
}

fn split_into(dataset: &Dataset, group: Vec<usize>, budget: usize, out: &mut Vec<Vec<usize>>) {
    if group.len() <= 1 || estimate_tokens(dataset, &group) <= budget {
        out.push(group);
        return;
    }
    let mid = group.len() / 2;
    let (left, right) = group.split_at(mid);
    split_into(dataset, left.to_vec(), budget, out);
    split_into(dataset, right.to_vec(), budget, out);
}

/// Character-length heuristic, ~4 chars per token.
fn estimate_tokens(dataset: &Dataset, rows: &[usize]) -> usize {
    let chars: usize = rows.iter().map(|&row| dataset.row_text(row).len() + 1).sum();
    chars.div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CellValue, Dataset};

    fn dataset_with_text(len: usize, rows: usize) -> Dataset {
        let rows = (0..rows)
            .map(|i| vec![CellValue::Text(format!("{i:-<len$}"))])
            .collect();
        Dataset::new(vec!["body".into()], rows).unwrap()
    }

    #[test]
    fn small_groups_stay_intact() {
        let dataset = dataset_with_text(8, 6);
        let groups = partition(&dataset, 3, 1_000);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0, 1, 2]);
    }

    #[test]
    fn oversized_groups_are_halved() {
        // Each row is ~100 chars (~25 tokens); 4 rows per group blow a
        // 30-token budget and must split down.
        let dataset = dataset_with_text(100, 8);
        let groups = partition(&dataset, 4, 30);
        assert!(groups.len() > 2);
        assert!(groups.iter().all(|g| g.len() <= 2));
    }

    #[test]
    fn single_row_over_budget_is_kept() {
        let dataset = dataset_with_text(400, 2);
        let groups = partition(&dataset, 2, 10);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn order_is_preserved() {
        let dataset = dataset_with_text(60, 10);
        let groups = partition(&dataset, 5, 20);
        let flattened: Vec<usize> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, (0..10).collect::<Vec<_>>());
    }
}
