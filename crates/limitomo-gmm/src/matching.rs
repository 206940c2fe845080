//! Component correspondence between two mixtures.
//!
//! Every component of the smaller mixture is paired with a distinct
//! component of the larger one, minimizing the summed (mean, sd) Euclidean
//! distance. Small problems get an exact assignment solve; larger ones fall
//! back to index-ordered greedy association.

use limitomo_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

use crate::model::{GaussianComponent, Gmm};

/// Largest mixture size (of the bigger side) solved exactly.
pub const HUNGARIAN_SIZE_LIMIT: usize = 16;

/// What an incomplete match means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Leftover components of the larger mixture are reported, not an error.
    #[default]
    Partial,
    /// Any leftover component is an error.
    Full,
}

/// One matched component pair, indices into the original `a` and `b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    /// Index into the first mixture.
    pub a_index: usize,
    /// Index into the second mixture.
    pub b_index: usize,
    /// Euclidean (mean, sd) distance of the pair.
    pub cost: f64,
}

/// Result of [`match_components`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMatch {
    /// Matched pairs, ordered by the smaller mixture's component index.
    pub pairs: Vec<MatchedPair>,
    /// Indices of larger-mixture components left without a partner.
    pub unmatched: Vec<usize>,
    /// True when `a` was the larger mixture and the sides were swapped
    /// internally. Pair indices always refer to the original arguments.
    pub swapped: bool,
}

impl ComponentMatch {
    /// Sum of pair costs.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.pairs.iter().map(|p| p.cost).sum()
    }

    /// True when every component found a partner.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Euclidean distance in the (mean, sd) plane. Weights do not participate.
#[must_use]
pub fn component_distance(a: &GaussianComponent, b: &GaussianComponent) -> f64 {
    let dm = a.mean - b.mean;
    let ds = a.sd - b.sd;
    (dm * dm + ds * ds).sqrt()
}

/// Pairs components of `a` and `b` at minimal total distance.
///
/// With [`MatchPolicy::Full`], unequal component counts produce a
/// `MatchingError`. With [`MatchPolicy::Partial`], surplus components of the
/// larger mixture are listed in `unmatched`.
pub fn match_components(a: &Gmm, b: &Gmm, policy: MatchPolicy) -> CoreResult<ComponentMatch> {
    let swapped = a.len() > b.len();
    let (small, large) = if swapped { (b, a) } else { (a, b) };
    let n = small.len();
    let m = large.len();

    let mut result = ComponentMatch {
        pairs: Vec::with_capacity(n),
        unmatched: Vec::new(),
        swapped,
    };

    if n == 0 {
        result.unmatched = (0..m).collect();
    } else {
        let cost: Vec<Vec<f64>> = small
            .components()
            .iter()
            .map(|s| {
                large
                    .components()
                    .iter()
                    .map(|l| component_distance(s, l))
                    .collect()
            })
            .collect();

        let assignment = if m <= HUNGARIAN_SIZE_LIMIT {
            hungarian(&cost)
        } else {
            greedy(&cost)
        };

        let mut taken = vec![false; m];
        for (row, &col) in assignment.iter().enumerate() {
            taken[col] = true;
            let (a_index, b_index) = if swapped { (col, row) } else { (row, col) };
            result.pairs.push(MatchedPair {
                a_index,
                b_index,
                cost: cost[row][col],
            });
        }
        result.unmatched = (0..m).filter(|&j| !taken[j]).collect();
    }

    if policy == MatchPolicy::Full && !result.is_complete() {
        return Err(CoreError::matching(format!(
            "full match requires equal component counts, got {} vs {} ({} unmatched)",
            a.len(),
            b.len(),
            result.unmatched.len()
        )));
    }
    Ok(result)
}

/// Exact rectangular assignment by the potentials method. `cost` must have
/// no more rows than columns; returns the matched column per row.
fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    let m = cost[0].len();
    debug_assert!(n <= m);

    // 1-based arrays with a sentinel column 0.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut matched_row = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        matched_row[0] = i;
        let mut j0 = 0usize;
        let mut min_slack = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = matched_row[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let slack = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if slack < min_slack[j] {
                    min_slack[j] = slack;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[matched_row[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }
            j0 = j1;
            if matched_row[j0] == 0 {
                break;
            }
        }

        // Walk the augmenting path back to the sentinel.
        loop {
            let j1 = way[j0];
            matched_row[j0] = matched_row[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=m {
        if matched_row[j] != 0 {
            assignment[matched_row[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Index-ordered greedy association for oversized problems: each row takes
/// the cheapest still-free column.
fn greedy(cost: &[Vec<f64>]) -> Vec<usize> {
    let m = cost[0].len();
    let mut taken = vec![false; m];
    let mut assignment = Vec::with_capacity(cost.len());
    for row in cost {
        let mut best = 0usize;
        let mut best_cost = f64::INFINITY;
        for (j, &c) in row.iter().enumerate() {
            if !taken[j] && c < best_cost {
                best_cost = c;
                best = j;
            }
        }
        taken[best] = true;
        assignment.push(best);
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn component(mean: f64, sd: f64) -> GaussianComponent {
        GaussianComponent::new(1.0, mean, sd).unwrap()
    }

    fn mixture(specs: &[(f64, f64)]) -> Gmm {
        Gmm::from_components(specs.iter().map(|&(m, s)| component(m, s)).collect())
    }

    #[test]
    fn test_component_distance_is_euclidean() {
        let a = component(0.0, 1.0);
        let b = component(3.0, 5.0);
        assert_relative_eq!(component_distance(&a, &b), 5.0);
    }

    #[test]
    fn test_match_equal_singletons() {
        let a = mixture(&[(1.0, 2.0)]);
        let b = mixture(&[(1.5, 2.0)]);
        let m = match_components(&a, &b, MatchPolicy::Full).unwrap();
        assert_eq!(m.pairs.len(), 1);
        assert!(m.unmatched.is_empty());
        assert!(!m.swapped);
        assert_relative_eq!(m.pairs[0].cost, 0.5);
    }

    #[test]
    fn test_match_finds_global_optimum_not_greedy() {
        // Row-ordered greedy pairs a0 with b0 (cost 1.0) and leaves a1 the
        // expensive b1 (sqrt(5.21)), total ~3.28. The optimum crosses over:
        // a0-b1 (1.1) plus a1-b0 (1.0), total 2.1.
        let a = mixture(&[(0.0, 1.0), (2.0, 1.0)]);
        let b = mixture(&[(1.0, 1.0), (0.0, 2.1)]);
        let m = match_components(&a, &b, MatchPolicy::Full).unwrap();
        assert_relative_eq!(m.total_cost(), 2.1, epsilon = 1e-12);
        let mut pairs: Vec<(usize, usize)> =
            m.pairs.iter().map(|p| (p.a_index, p.b_index)).collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_partial_match_reports_surplus() {
        let a = mixture(&[(0.0, 1.0), (10.0, 1.0)]);
        let b = mixture(&[(0.1, 1.0), (5.0, 1.0), (9.9, 1.0)]);
        let m = match_components(&a, &b, MatchPolicy::Partial).unwrap();
        assert_eq!(m.pairs.len(), 2);
        assert_eq!(m.unmatched, vec![1]);
        assert!(!m.is_complete());

        // Matched b-indices are distinct.
        let mut b_indices: Vec<usize> = m.pairs.iter().map(|p| p.b_index).collect();
        b_indices.sort_unstable();
        b_indices.dedup();
        assert_eq!(b_indices.len(), 2);
    }

    #[test]
    fn test_swapped_sides_keep_original_indices() {
        let a = mixture(&[(0.1, 1.0), (5.0, 1.0), (9.9, 1.0)]);
        let b = mixture(&[(0.0, 1.0), (10.0, 1.0)]);
        let m = match_components(&a, &b, MatchPolicy::Partial).unwrap();
        assert!(m.swapped);
        assert_eq!(m.pairs.len(), 2);
        // Unmatched indices refer to the larger mixture, here `a`.
        assert_eq!(m.unmatched, vec![1]);
        for p in &m.pairs {
            assert!(p.a_index < a.len());
            assert!(p.b_index < b.len());
        }
    }

    #[test]
    fn test_full_policy_rejects_count_mismatch() {
        let a = mixture(&[(0.0, 1.0)]);
        let b = mixture(&[(0.0, 1.0), (1.0, 1.0)]);
        let err = match_components(&a, &b, MatchPolicy::Full).unwrap_err();
        assert!(matches!(err, limitomo_core::CoreError::Matching { .. }));
    }

    #[test]
    fn test_empty_side_matches_nothing() {
        let a = Gmm::new();
        let b = mixture(&[(0.0, 1.0), (1.0, 1.0)]);
        let m = match_components(&a, &b, MatchPolicy::Partial).unwrap();
        assert!(m.pairs.is_empty());
        assert_eq!(m.unmatched, vec![0, 1]);
        assert!(match_components(&a, &b, MatchPolicy::Full).is_err());
    }

    #[test]
    fn test_large_problem_uses_greedy_and_stays_distinct() {
        let specs_a: Vec<(f64, f64)> = (0..17).map(|i| (f64::from(i), 1.0)).collect();
        let specs_b: Vec<(f64, f64)> = (0..17).map(|i| (f64::from(i) + 0.25, 1.0)).collect();
        let a = mixture(&specs_a);
        let b = mixture(&specs_b);
        let m = match_components(&a, &b, MatchPolicy::Full).unwrap();
        assert_eq!(m.pairs.len(), 17);

        let mut b_indices: Vec<usize> = m.pairs.iter().map(|p| p.b_index).collect();
        b_indices.sort_unstable();
        b_indices.dedup();
        assert_eq!(b_indices.len(), 17);
    }

    #[test]
    fn test_hungarian_identity_on_diagonal_costs() {
        let a = mixture(&[(0.0, 1.0), (5.0, 1.0), (10.0, 1.0)]);
        let b = mixture(&[(0.2, 1.0), (5.2, 1.0), (10.2, 1.0)]);
        let m = match_components(&a, &b, MatchPolicy::Full).unwrap();
        for p in &m.pairs {
            assert_eq!(p.a_index, p.b_index);
            assert_relative_eq!(p.cost, 0.2, epsilon = 1e-12);
        }
    }
}
