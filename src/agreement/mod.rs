//! Agreement engine.
//!
//! Loads annotator populations through a [`RatingSource`], expands derived
//! dimensions, optionally collapses replicates into a majority annotator, and
//! computes ordinal alpha per dimension plus one pooled value.

pub mod alpha;
pub mod distribution;
pub mod matrix;
pub mod perfect;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consensus;
use crate::derived::{derive_table, RoundingMode};
use crate::ratings::{Aggregation, AnnotatorConfig, AnnotatorTable, PromptVariant, RatingRecord};
use crate::store::IngestError;
use crate::taxonomy::{ExclusionSet, Taxonomy, ACROSS_DIMENSIONS};

pub use alpha::{ordinal_alpha, AlphaUndefined};
pub use matrix::ReliabilityMatrix;

// =============================================================================
// Rating sources
// =============================================================================

/// Supplies the replicate record sets of one annotator population.
pub trait RatingSource {
    /// Up to `limit` replicates, in replicate order.
    fn replicates(
        &self,
        config: &AnnotatorConfig,
        limit: usize,
    ) -> Result<Vec<Vec<RatingRecord>>, IngestError>;
}

/// In-memory source keyed by population label (see [`AnnotatorConfig::label`]).
#[derive(Debug, Clone, Default)]
pub struct MemoryRatingSource {
    populations: BTreeMap<String, Vec<Vec<RatingRecord>>>,
}

impl MemoryRatingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: &AnnotatorConfig, replicates: Vec<Vec<RatingRecord>>) {
        self.populations.insert(config.label(), replicates);
    }
}

impl RatingSource for MemoryRatingSource {
    fn replicates(
        &self,
        config: &AnnotatorConfig,
        limit: usize,
    ) -> Result<Vec<Vec<RatingRecord>>, IngestError> {
        Ok(self
            .populations
            .get(&config.label())
            .map(|reps| reps.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Shared inputs for every agreement computation.
#[derive(Debug, Clone)]
pub struct AgreementEngine {
    taxonomy: Taxonomy,
    exclusions: ExclusionSet,
    rounding: RoundingMode,
    replicates: usize,
}

impl AgreementEngine {
    pub fn new(taxonomy: Taxonomy, exclusions: ExclusionSet) -> Self {
        Self {
            taxonomy,
            exclusions,
            rounding: RoundingMode::default(),
            replicates: 3,
        }
    }

    pub fn rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn replicates(mut self, k: usize) -> Self {
        self.replicates = k;
        self
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Replicate tables of one population with exclusions removed and derived
    /// dimensions filled.
    pub fn replicate_tables(
        &self,
        source: &dyn RatingSource,
        config: &AnnotatorConfig,
    ) -> Result<Vec<AnnotatorTable>, IngestError> {
        let replicates = source.replicates(config, self.replicates)?;
        debug!(population = %config, replicates = replicates.len(), "loaded replicates");
        Ok(replicates
            .iter()
            .enumerate()
            .map(|(i, records)| {
                let mut table =
                    AnnotatorTable::from_records(config.replicate_name(i + 1), records, &self.exclusions);
                derive_table(&mut table, &self.taxonomy, self.rounding);
                table
            })
            .collect())
    }

    /// Annotator rows contributed by one population.
    pub fn population(
        &self,
        source: &dyn RatingSource,
        config: &AnnotatorConfig,
    ) -> Result<Vec<AnnotatorTable>, IngestError> {
        let tables = self.replicate_tables(source, config)?;
        Ok(match config.aggregation {
            Aggregation::None => tables,
            Aggregation::Majority if tables.is_empty() => tables,
            Aggregation::Majority => {
                vec![consensus::majority(&tables, config.majority_name(), &self.taxonomy)]
            }
        })
    }

    /// Concatenate the rows of every configured population.
    pub fn assemble(
        &self,
        source: &dyn RatingSource,
        configs: &[AnnotatorConfig],
    ) -> Result<Vec<AnnotatorTable>, IngestError> {
        let mut rows = Vec::new();
        for config in configs {
            rows.extend(self.population(source, config)?);
        }
        Ok(rows)
    }

    /// Per-dimension and pooled alpha over already assembled rows.
    pub fn report(&self, tables: &[AnnotatorTable]) -> AgreementReport {
        let dims: Vec<&str> = self.taxonomy.names().collect();

        // Dimensions are independent; compute them side by side.
        let per_dimension: BTreeMap<String, Option<f64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = dims
                .iter()
                .map(|dim| {
                    scope.spawn(move || {
                        let m = ReliabilityMatrix::for_dimension(tables, dim, &self.exclusions);
                        (dim.to_string(), ordinal_alpha(&m).ok())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(pair) => pair,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let pooled = ReliabilityMatrix::pooled(tables, dims.iter().copied(), &self.exclusions);
        let across_dimensions = ordinal_alpha(&pooled).ok();

        AgreementReport {
            annotators: tables.iter().map(|t| t.annotator.clone()).collect(),
            per_dimension,
            across_dimensions,
        }
    }

    /// Assemble the given populations and report their agreement.
    pub fn alphas(
        &self,
        source: &dyn RatingSource,
        configs: &[AnnotatorConfig],
    ) -> Result<AgreementReport, IngestError> {
        let tables = self.assemble(source, configs)?;
        let report = self.report(&tables);
        info!(
            annotators = report.annotators.len(),
            across_dimensions = ?report.across_dimensions,
            "computed agreement"
        );
        Ok(report)
    }

    /// Agreement for every unordered pair of `configs`.
    pub fn sweep(
        &self,
        source: &dyn RatingSource,
        configs: &[AnnotatorConfig],
    ) -> Result<Vec<PairwiseAgreement>, IngestError> {
        let mut out = Vec::new();
        for (i, a) in configs.iter().enumerate() {
            for b in &configs[i + 1..] {
                info!(left = %a, right = %b, "pairwise agreement");
                let report = self.alphas(source, &[a.clone(), b.clone()])?;
                out.push(PairwiseAgreement {
                    annotators: [a.clone(), b.clone()],
                    alphas: report.alpha_map(),
                });
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Alpha per dimension plus the pooled value. `None` means undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    pub annotators: Vec<String>,
    pub per_dimension: BTreeMap<String, Option<f64>>,
    pub across_dimensions: Option<f64>,
}

impl AgreementReport {
    pub fn alpha(&self, dimension: &str) -> Option<f64> {
        if dimension == ACROSS_DIMENSIONS {
            return self.across_dimensions;
        }
        self.per_dimension.get(dimension).copied().flatten()
    }

    /// Flat `dimension -> alpha` map including `Across Dimensions`.
    pub fn alpha_map(&self) -> BTreeMap<String, Option<f64>> {
        let mut map = self.per_dimension.clone();
        map.insert(ACROSS_DIMENSIONS.to_string(), self.across_dimensions);
        map
    }
}

/// One line of a configuration sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseAgreement {
    pub annotators: [AnnotatorConfig; 2],
    pub alphas: BTreeMap<String, Option<f64>>,
}

/// Cross product of sources × variants × aggregation × reasoning.
///
/// Human annotators never get a reasoning variant.
pub fn sweep_configs(sources: &[String], variants: &[PromptVariant]) -> Vec<AnnotatorConfig> {
    let mut configs = Vec::new();
    for source in sources {
        for &variant in variants {
            for aggregation in [Aggregation::Majority, Aggregation::None] {
                let reasoning_options: &[bool] = if source == "human" {
                    &[false]
                } else {
                    &[false, true]
                };
                for &reasoning in reasoning_options {
                    configs.push(AnnotatorConfig {
                        source: source.clone(),
                        prompt_variant: variant,
                        reasoning,
                        aggregation,
                    });
                }
            }
        }
    }
    configs
}

// =============================================================================
// TESTS
// =============================================================================
