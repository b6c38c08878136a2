//! Krippendorff's alpha on the ordinal scale.
//!
//! Coincidences are counted over every pair of present values inside a unit,
//! weighted by `1 / (m_u - 1)`. The ordinal distance between ranks `c < k` is
//! `(sum_{g=c..=k} n_g - (n_c + n_k) / 2)^2` with `n_g` the marginal
//! coincidence totals, which makes only the order of ranks matter.

use std::fmt;

use super::matrix::ReliabilityMatrix;

/// Number of ordinal ranks on the rating scale.
pub const SCALE_LEVELS: usize = 3;

/// Why alpha could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaUndefined {
    /// No unit has two or more present values.
    NoPairableUnits,
}

impl fmt::Display for AlphaUndefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlphaUndefined::NoPairableUnits => {
                f.write_str("no item was rated by two or more annotators")
            }
        }
    }
}

/// Coincidence matrix and marginals for ranks `1..=levels`.
#[derive(Debug, Clone)]
pub struct Coincidences {
    levels: usize,
    o: Vec<Vec<f64>>,
    marginals: Vec<f64>,
    total: f64,
}

impl Coincidences {
    pub fn from_matrix(matrix: &ReliabilityMatrix, levels: usize) -> Self {
        let mut o = vec![vec![0.0; levels]; levels];

        for unit in 0..matrix.units().len() {
            let mut counts = vec![0usize; levels];
            let mut m = 0usize;
            for v in matrix.column(unit) {
                let idx = v as usize;
                if (1..=levels).contains(&idx) {
                    counts[idx - 1] += 1;
                    m += 1;
                }
            }
            if m < 2 {
                continue;
            }
            let w = 1.0 / (m - 1) as f64;
            for c in 0..levels {
                if counts[c] == 0 {
                    continue;
                }
                for k in 0..levels {
                    let pairs = if c == k {
                        counts[c] * counts[c].saturating_sub(1)
                    } else {
                        counts[c] * counts[k]
                    };
                    o[c][k] += pairs as f64 * w;
                }
            }
        }

        let marginals: Vec<f64> = o.iter().map(|row| row.iter().sum()).collect();
        let total = marginals.iter().sum();

        Self {
            levels,
            o,
            marginals,
            total,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn marginals(&self) -> &[f64] {
        &self.marginals
    }

    /// Squared ordinal distance between 0-based rank indices.
    pub fn ordinal_distance(&self, c: usize, k: usize) -> f64 {
        if c == k {
            return 0.0;
        }
        let (lo, hi) = if c < k { (c, k) } else { (k, c) };
        let span: f64 = self.marginals[lo..=hi].iter().sum();
        let d = span - (self.marginals[lo] + self.marginals[hi]) / 2.0;
        d * d
    }

    pub fn observed_disagreement(&self) -> f64 {
        let mut sum = 0.0;
        for c in 0..self.levels {
            for k in 0..self.levels {
                sum += self.o[c][k] * self.ordinal_distance(c, k);
            }
        }
        sum
    }

    pub fn expected_disagreement(&self) -> f64 {
        if self.total <= 1.0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for c in 0..self.levels {
            for k in 0..self.levels {
                sum += self.marginals[c] * self.marginals[k] * self.ordinal_distance(c, k);
            }
        }
        sum / (self.total - 1.0)
    }
}

/// Ordinal alpha over ranks `1..=levels`.
///
/// Perfect observed agreement yields 1.0, including when every present value
/// is the same rank.
pub fn ordinal_alpha_with_levels(
    matrix: &ReliabilityMatrix,
    levels: usize,
) -> Result<f64, AlphaUndefined> {
    let co = Coincidences::from_matrix(matrix, levels);
    if co.total() == 0.0 {
        return Err(AlphaUndefined::NoPairableUnits);
    }
    let observed = co.observed_disagreement();
    if observed == 0.0 {
        return Ok(1.0);
    }
    let expected = co.expected_disagreement();
    Ok(1.0 - observed / expected)
}

/// Ordinal alpha on the three-level rating scale.
pub fn ordinal_alpha(matrix: &ReliabilityMatrix) -> Result<f64, AlphaUndefined> {
    ordinal_alpha_with_levels(matrix, SCALE_LEVELS)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[Option<u8>]]) -> ReliabilityMatrix {
        let units = (0..rows[0].len()).map(|i| i.to_string()).collect();
        let annotators = (0..rows.len()).map(|i| format!("r{i}")).collect();
        let cells = rows.iter().map(|r| r.to_vec()).collect();
        ReliabilityMatrix::from_rows(annotators, units, cells).unwrap()
    }

    #[test]
    fn hand_computed_example() {
        // o11 = 2, o22 = 2, o23 = o32 = 1; n = (2, 3, 1)
        // d(2,3) = 4, d(1,2) = 6.25, d(1,3) = 20.25
        // Do = 8, De = 2 * (37.5 + 40.5 + 12) / 5 = 36
        let m = matrix(&[
            &[Some(1), Some(2), Some(3)],
            &[Some(1), Some(2), Some(2)],
        ]);
        let alpha = ordinal_alpha(&m).unwrap();
        assert!((alpha - 7.0 / 9.0).abs() < 1e-12, "alpha = {alpha}");
    }

    #[test]
    fn perfect_agreement_is_one() {
        let m = matrix(&[
            &[Some(1), Some(2), Some(3), None],
            &[Some(1), Some(2), Some(3), Some(2)],
            &[None, Some(2), Some(3), Some(2)],
        ]);
        assert_eq!(ordinal_alpha(&m), Ok(1.0));

        let constant = matrix(&[&[Some(3), Some(3)], &[Some(3), Some(3)]]);
        assert_eq!(ordinal_alpha(&constant), Ok(1.0));
    }

    #[test]
    fn systematic_disagreement_is_negative() {
        let m = matrix(&[
            &[Some(1), Some(3), Some(1), Some(3)],
            &[Some(3), Some(1), Some(3), Some(1)],
        ]);
        assert!(ordinal_alpha(&m).unwrap() < 0.0);
    }

    #[test]
    fn undefined_without_overlap() {
        let m = matrix(&[&[Some(1), None], &[None, Some(2)]]);
        assert_eq!(ordinal_alpha(&m), Err(AlphaUndefined::NoPairableUnits));

        let single = matrix(&[&[Some(1), Some(2)]]);
        assert_eq!(ordinal_alpha(&single), Err(AlphaUndefined::NoPairableUnits));
    }
}
