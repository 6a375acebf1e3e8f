//! Hypothesis tests over conversion-count distributions.
//!
//! Both tests return "no result" (`None` p-values) rather than erroring when
//! the data cannot support a conclusion: too few observations, zero variance,
//! or a degenerate contingency table. Not enough data yet is the common case
//! for a young experiment, not a failure.

use std::collections::BTreeMap;

use crate::constants::MIN_OBSERVATIONS;
use crate::stats::{chisqprob, zprob};

/// Mann-Whitney U test over two compressed samples.
///
/// Each distribution maps an action count to the number of participants that
/// recorded exactly that many actions. Returns `(U, p)` where `U` is the
/// smaller of the two rank statistics and `p` is a one-tailed probability;
/// `p` is `None` when either sample has fewer than [`MIN_OBSERVATIONS`]
/// entries or the tie-corrected variance is zero.
pub fn mann_whitney(
    dist_a: &BTreeMap<u64, u64>,
    dist_b: &BTreeMap<u64, u64>,
    use_continuity: bool,
) -> (f64, Option<f64>) {
    let n_a: u64 = dist_a.values().sum();
    let n_b: u64 = dist_b.values().sum();
    if n_a < MIN_OBSERVATIONS || n_b < MIN_OBSERVATIONS {
        return (0.0, None);
    }

    // Merge-rank the distinct values; every member of a tied block gets the
    // block's average rank.
    let mut values: Vec<u64> = dist_a.keys().chain(dist_b.keys()).copied().collect();
    values.sort_unstable();
    values.dedup();

    let mut rank_sum_a = 0.0;
    let mut rank_sum_b = 0.0;
    let mut tie_correction = 0.0;
    let mut next_rank = 1u64;
    for value in values {
        let freq_a = dist_a.get(&value).copied().unwrap_or(0);
        let freq_b = dist_b.get(&value).copied().unwrap_or(0);
        let tied = freq_a + freq_b;
        let average_rank = next_rank as f64 + (tied as f64 - 1.0) / 2.0;
        rank_sum_a += average_rank * freq_a as f64;
        rank_sum_b += average_rank * freq_b as f64;
        let t = tied as f64;
        tie_correction += t * t * t - t;
        next_rank += tied;
    }

    let n_a = n_a as f64;
    let n_b = n_b as f64;
    let u_a = rank_sum_a - n_a * (n_a + 1.0) / 2.0;
    let u_b = rank_sum_b - n_b * (n_b + 1.0) / 2.0;
    let small_u = u_a.min(u_b);
    let big_u = u_a.max(u_b);

    let total = n_a + n_b;
    let sd = (n_a * n_b / (total * (total - 1.0))).sqrt()
        * ((total * total * total - total - tie_correction) / 12.0).sqrt();
    if sd == 0.0 {
        return (small_u, None);
    }

    let u_mean = n_a * n_b / 2.0;
    let z = if use_continuity {
        (big_u - u_mean - 0.5).abs() / sd
    } else {
        (big_u - u_mean).abs() / sd
    };
    (small_u, Some(1.0 - zprob(z)))
}

/// Pearson chi-squared test over a square contingency table.
///
/// Returns `(statistic, p)`. Both are `None` when the matrix is empty,
/// ragged, non-square, or any expected cell value is non-positive.
pub fn chi_square_p_value(matrix: &[Vec<f64>]) -> (Option<f64>, Option<f64>) {
    let num_rows = matrix.len();
    if num_rows == 0 {
        return (None, None);
    }
    let num_columns = matrix[0].len();
    if num_rows != num_columns || matrix.iter().any(|row| row.len() != num_columns) {
        return (None, None);
    }

    let row_sums: Vec<f64> = matrix.iter().map(|row| row.iter().sum()).collect();
    let column_sums: Vec<f64> = (0..num_columns)
        .map(|j| matrix.iter().map(|row| row[j]).sum())
        .collect();
    let grand_total: f64 = row_sums.iter().sum();
    if grand_total <= 0.0 {
        return (None, None);
    }

    let mut statistic = 0.0;
    for (i, row) in matrix.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_sums[i] * column_sums[j] / grand_total;
            if expected <= 0.0 {
                return (None, None);
            }
            let delta = observed - expected;
            statistic += delta * delta / expected;
        }
    }

    let degrees_freedom = ((num_rows - 1) * (num_columns - 1)) as u64;
    (
        Some(statistic),
        Some(chisqprob(statistic, degrees_freedom)),
    )
}
