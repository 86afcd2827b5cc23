//! Fixed-size partitioning: consecutive groups of `chunk_size` rows.

/// Partitions `0..row_count` into consecutive groups of `chunk_size`.
///
/// The final group may be smaller; the group count is always
/// `ceil(row_count / chunk_size)`. `chunk_size` must be at least 1, which the
/// engine validates before dispatching here.
pub fn partition(row_count: usize, chunk_size: usize) -> Vec<Vec<usize>> {
    (0..row_count)
        .collect::<Vec<_>>()
        .chunks(chunk_size)
        .map(|group| group.to_vec())
        .collect()
}
