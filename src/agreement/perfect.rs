//! Agreement against the items on which human replicates agree perfectly.
//!
//! Per dimension, the perfect subset holds the items where at least two
//! human replicates gave a score and every given score is identical. A model
//! population's majority is then compared against that agreed value.
//!
//! Only present scores count toward the two: a replicate that left the cell
//! absent or `?` does not make a lone score "agreed".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ratings::{AnnotatorTable, Score, Verdict};
use crate::taxonomy::ExclusionSet;

use super::alpha::ordinal_alpha;
use super::matrix::ReliabilityMatrix;

/// Annotator name of the agreed human value.
pub const HUMAN_CONSENSUS: &str = "human";

/// Items with perfect replicate agreement on one dimension.
pub fn perfect_subset(replicates: &[AnnotatorTable], dimension: &str) -> BTreeMap<String, Score> {
    let mut scores: BTreeMap<&str, Vec<Score>> = BTreeMap::new();
    for table in replicates {
        for item in table.item_ids() {
            if let Some(s) = table.score(item, dimension) {
                scores.entry(item).or_default().push(s);
            }
        }
    }

    scores
        .into_iter()
        .filter(|(_, s)| s.len() >= 2 && s.iter().all(|v| *v == s[0]))
        .map(|(item, s)| (item.to_string(), s[0]))
        .collect()
}

/// Per-dimension selection size and alpha against the model majority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfectAgreement {
    pub dimension: String,
    pub items: usize,
    pub alpha: Option<f64>,
}

/// Compare `model` (usually a majority table) against the perfect human
/// subset of each dimension.
pub fn perfect_agreement<'a, I>(
    humans: &[AnnotatorTable],
    model: &AnnotatorTable,
    dimensions: I,
) -> Vec<PerfectAgreement>
where
    I: IntoIterator<Item = &'a str>,
{
    dimensions
        .into_iter()
        .map(|dim| {
            let subset = perfect_subset(humans, dim);

            let mut human = AnnotatorTable::new(HUMAN_CONSENSUS);
            let mut restricted = AnnotatorTable::new(model.annotator.clone());
            for (item, score) in &subset {
                human.insert(item, dim, Some(Verdict::Score(*score)));
                if let Some(s) = model.score(item, dim) {
                    restricted.insert(item, dim, Some(Verdict::Score(s)));
                }
            }

            let matrix =
                ReliabilityMatrix::for_dimension(&[human, restricted], dim, &ExclusionSet::empty());
            PerfectAgreement {
                dimension: dim.to_string(),
                items: subset.len(),
                alpha: ordinal_alpha(&matrix).ok(),
            }
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
