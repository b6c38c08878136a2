//! Offline reliability suite.
//!
//! Generates annotator populations with known properties from a seeded RNG
//! and runs them through the full agreement path (derivation, matrices,
//! alpha), so regressions show up as alphas outside the expected band.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::agreement::{AgreementEngine, MemoryRatingSource};
use crate::ratings::{AnnotatorConfig, PromptVariant, RatingRecord, Score, Verdict};
use crate::store::IngestError;
use crate::taxonomy::{ExclusionSet, Taxonomy};

// =============================================================================
// Synthetic case definitions
// =============================================================================

#[derive(Debug, Clone)]
pub struct SyntheticCase {
    pub name: &'static str,
    pub items: usize,
    pub annotators: usize,
    /// Probability a cell ignores the true score and is drawn uniformly.
    pub noise_rate: f64,
    /// Probability a cell is left unrated.
    pub missing_rate: f64,
    /// Probability a cell is `?`.
    pub cannot_judge_rate: f64,
    pub seed: u64,
    /// Accepted band for the pooled alpha; `None` expects it to be undefined.
    pub expected: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationMetrics {
    pub across_dimensions: Option<f64>,
    pub mean_dimension_alpha: Option<f64>,
    pub min_dimension_alpha: Option<f64>,
    pub undefined_dimensions: usize,
    pub records: usize,
    pub within_expected: bool,
    pub latency_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub case_name: String,
    pub metrics: EvaluationMetrics,
}

// =============================================================================
// Public API
// =============================================================================

pub fn synthetic_cases() -> Vec<SyntheticCase> {
    vec![
        SyntheticCase {
            name: "perfect_agreement_40",
            items: 40,
            annotators: 3,
            noise_rate: 0.0,
            missing_rate: 0.0,
            cannot_judge_rate: 0.0,
            seed: 42,
            expected: Some((1.0, 1.0)),
        },
        SyntheticCase {
            name: "uniform_random_400",
            items: 400,
            annotators: 3,
            noise_rate: 1.0,
            missing_rate: 0.0,
            cannot_judge_rate: 0.0,
            seed: 43,
            expected: Some((-0.1, 0.1)),
        },
        SyntheticCase {
            name: "noisy_consensus_100",
            items: 100,
            annotators: 3,
            noise_rate: 0.3,
            missing_rate: 0.0,
            cannot_judge_rate: 0.05,
            seed: 44,
            expected: Some((0.3, 0.9)),
        },
        SyntheticCase {
            name: "sparse_overlap_60",
            items: 60,
            annotators: 4,
            noise_rate: 0.1,
            missing_rate: 0.6,
            cannot_judge_rate: 0.0,
            seed: 45,
            expected: Some((0.5, 1.0)),
        },
        SyntheticCase {
            name: "single_annotator_20",
            items: 20,
            annotators: 1,
            noise_rate: 0.0,
            missing_rate: 0.0,
            cannot_judge_rate: 0.0,
            seed: 46,
            expected: None,
        },
    ]
}

/// Run every case whose name contains `filter`.
pub fn run_synthetic_suite(filter: Option<&str>) -> Result<Vec<EvaluationResult>, IngestError> {
    synthetic_cases()
        .iter()
        .filter(|c| filter.map_or(true, |f| c.name.contains(f)))
        .map(run_synthetic_case)
        .collect()
}

pub fn run_synthetic_case(case: &SyntheticCase) -> Result<EvaluationResult, IngestError> {
    let start = Instant::now();
    let taxonomy = Taxonomy::argument_quality();
    let replicates = simulate_replicates(case, &taxonomy);
    let records = replicates.iter().map(Vec::len).sum();

    let config = AnnotatorConfig::new("synthetic", PromptVariant::Expert);
    let mut source = MemoryRatingSource::new();
    source.insert(&config, replicates);

    let engine = AgreementEngine::new(taxonomy, ExclusionSet::empty()).replicates(case.annotators);
    let report = engine.alphas(&source, &[config])?;

    let defined: Vec<f64> = report.per_dimension.values().flatten().copied().collect();
    let mean = (!defined.is_empty()).then(|| defined.iter().sum::<f64>() / defined.len() as f64);
    let min = defined.iter().copied().reduce(f64::min);

    let within_expected = match (case.expected, report.across_dimensions) {
        (None, None) => true,
        (Some((lo, hi)), Some(a)) => a >= lo - 1e-9 && a <= hi + 1e-9,
        _ => false,
    };

    Ok(EvaluationResult {
        case_name: case.name.to_string(),
        metrics: EvaluationMetrics {
            across_dimensions: report.across_dimensions,
            mean_dimension_alpha: mean,
            min_dimension_alpha: min,
            undefined_dimensions: report.per_dimension.len() - defined.len(),
            records,
            within_expected,
            latency_ms: start.elapsed().as_millis(),
        },
    })
}

// =============================================================================
// Simulation
// =============================================================================

fn random_score(rng: &mut StdRng) -> Score {
    Score::ALL[rng.gen_range(0..Score::ALL.len())]
}

/// Base-dimension records per replicate; derived dimensions are left to the
/// engine.
fn simulate_replicates(case: &SyntheticCase, taxonomy: &Taxonomy) -> Vec<Vec<RatingRecord>> {
    let mut rng = StdRng::seed_from_u64(case.seed);
    let base: Vec<&str> = taxonomy.base_dimensions().map(|d| d.name.as_str()).collect();

    let truth: Vec<Vec<Score>> = (0..case.items)
        .map(|_| base.iter().map(|_| random_score(&mut rng)).collect())
        .collect();

    (0..case.annotators)
        .map(|_| {
            let mut records = Vec::new();
            for (item, scores) in truth.iter().enumerate() {
                for (dim, true_score) in base.iter().zip(scores) {
                    if rng.gen_bool(case.missing_rate) {
                        continue;
                    }
                    let verdict = if rng.gen_bool(case.cannot_judge_rate) {
                        Verdict::CannotJudge
                    } else if rng.gen_bool(case.noise_rate) {
                        Verdict::Score(random_score(&mut rng))
                    } else {
                        Verdict::Score(*true_score)
                    };
                    records.push(RatingRecord::new(format!("item{item}"), *dim, Some(verdict)));
                }
            }
            records
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_case_scores_one() {
        let results = run_synthetic_suite(Some("perfect")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metrics.across_dimensions, Some(1.0));
        assert!(results[0].metrics.within_expected);
    }

    #[test]
    fn single_annotator_is_undefined() {
        let results = run_synthetic_suite(Some("single_annotator")).unwrap();
        assert_eq!(results[0].metrics.across_dimensions, None);
        assert_eq!(results[0].metrics.undefined_dimensions, 15);
        assert!(results[0].metrics.within_expected);
    }
}
