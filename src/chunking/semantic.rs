//! Semantic partitioning: k-means clustering over per-row feature vectors.
//!
//! Rows are reduced to lightweight numeric features derived from their
//! columns (numeric value, boolean flag, text length and token count), then
//! clustered with a fixed-seed k-means so results are reproducible.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use crate::dataset::Dataset;
use crate::preprocess::{self, ColumnType};

/// Fixed seed for centroid initialization.
const KMEANS_SEED: u64 = 42;
const MAX_ITERATIONS: usize = 25;

/// Clusters rows into at most `n_clusters` groups (clamped to `[1, rows]`)
/// and returns the groups in first-row order plus a cohesion score in
/// `(0, 1]` (higher means tighter clusters).
pub fn partition(dataset: &Dataset, n_clusters: usize) -> (Vec<Vec<usize>>, f64) {
    let rows = dataset.row_count();
    if rows == 0 {
        return (Vec::new(), 0.0);
    }

    let k = n_clusters.clamp(1, rows);
    let features = feature_matrix(dataset);
    let (assignments, mean_distance) = kmeans(&features, k);

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (row, cluster) in assignments.iter().enumerate() {
        groups[*cluster].push(row);
    }
    groups.retain(|group| !group.is_empty());
    // Row order inside a group is already ascending; order the groups by
    // their first row so output is stable.
    groups.sort_by_key(|group| group[0]);

    let cohesion = 1.0 / (1.0 + mean_distance);
    (groups, cohesion)
}

/// Derives a z-normalized feature matrix, one row per dataset row.
///
/// Numeric columns contribute their value, boolean columns a 0/1 flag, and
/// text columns two features: character length and whitespace token count.
fn feature_matrix(dataset: &Dataset) -> Vec<Vec<f64>> {
    let profiles = preprocess::infer_profiles(dataset);

    let mut matrix: Vec<Vec<f64>> = dataset
        .rows()
        .iter()
        .map(|row| {
            let mut features = Vec::with_capacity(dataset.column_count());
            for (idx, profile) in profiles.iter().enumerate() {
                let cell = &row[idx];
                match profile.inferred_type {
                    ColumnType::Numeric => {
                        features.push(cell.as_number().unwrap_or(0.0));
                    }
                    ColumnType::Boolean => {
                        features.push(if cell.as_bool() == Some(true) { 1.0 } else { 0.0 });
                    }
                    ColumnType::Text => {
                        let text = cell.to_string();
                        features.push(text.chars().count() as f64);
                        features.push(text.split_whitespace().count() as f64);
                    }
                }
            }
            features
        })
        .collect();

    normalize(&mut matrix);
    matrix
}

/// Z-scores each feature dimension in place so no column dominates distance.
fn normalize(matrix: &mut [Vec<f64>]) {
    let Some(width) = matrix.first().map(Vec::len) else {
        return;
    };
    let n = matrix.len() as f64;

    for dim in 0..width {
        let mean = matrix.iter().map(|row| row[dim]).sum::<f64>() / n;
        let variance = matrix
            .iter()
            .map(|row| (row[dim] - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt();
        for row in matrix.iter_mut() {
            row[dim] = if std > f64::EPSILON {
                (row[dim] - mean) / std
            } else {
                0.0
            };
        }
    }
}

/// Lloyd's algorithm with seeded initialization. Returns per-row cluster
/// assignments and the mean distance to the assigned centroid.
fn kmeans(features: &[Vec<f64>], k: usize) -> (Vec<usize>, f64) {
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut centroids: Vec<Vec<f64>> = sample(&mut rng, features.len(), k)
        .into_iter()
        .map(|idx| features[idx].clone())
        .collect();

    let mut assignments = vec![0usize; features.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (row, feature) in features.iter().enumerate() {
            let nearest = nearest_centroid(feature, &centroids);
            if assignments[row] != nearest {
                assignments[row] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // Recompute centroids; clusters that lost all members keep theirs.
        let width = features[0].len();
        let mut sums = vec![vec![0.0; width]; k];
        let mut counts = vec![0usize; k];
        for (row, feature) in features.iter().enumerate() {
            let cluster = assignments[row];
            counts[cluster] += 1;
            for (dim, value) in feature.iter().enumerate() {
                sums[cluster][dim] += value;
            }
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                centroids[cluster] = sums[cluster]
                    .iter()
                    .map(|sum| sum / counts[cluster] as f64)
                    .collect();
            }
        }
    }

    let total_distance: f64 = features
        .iter()
        .zip(&assignments)
        .map(|(feature, &cluster)| distance(feature, &centroids[cluster]))
        .sum();
    let mean_distance = total_distance / features.len() as f64;

    (assignments, mean_distance)
}

fn nearest_centroid(feature: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let d = distance(feature, centroid);
        if d < best_distance {
            best_distance = d;
            best = idx;
        }
    }
    best
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CellValue, Dataset};

    /// Two well-separated numeric clusters around 0 and 1000.
    fn bimodal_dataset() -> Dataset {
        let rows = (0..10)
            .map(|i| {
                let value = if i < 5 { i as f64 } else { 1000.0 + i as f64 };
                vec![CellValue::Number(value)]
            })
            .collect();
        Dataset::new(vec!["value".into()], rows).unwrap()
    }

    #[test]
    fn separates_obvious_clusters() {
        let (groups, cohesion) = partition(&bimodal_dataset(), 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0, 1, 2, 3, 4]);
        assert_eq!(groups[1], vec![5, 6, 7, 8, 9]);
        assert!(cohesion > 0.0 && cohesion <= 1.0);
    }

    #[test]
    fn is_deterministic() {
        let dataset = bimodal_dataset();
        let first = partition(&dataset, 3);
        let second = partition(&dataset, 3);
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn cluster_count_clamps_to_row_count() {
        let (groups, _) = partition(&bimodal_dataset(), 50);
        assert!(groups.len() <= 10);
        let covered: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(covered, 10);
    }

    #[test]
    fn zero_clusters_clamps_to_one() {
        let (groups, _) = partition(&bimodal_dataset(), 0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 10);
    }

    #[test]
    fn empty_dataset_is_empty_result() {
        let dataset = Dataset::new(vec!["value".into()], Vec::new()).unwrap();
        let (groups, cohesion) = partition(&dataset, 4);
        assert!(groups.is_empty());
        assert_eq!(cohesion, 0.0);
    }
}
