//! Majority-vote consensus across replicate annotators.

use std::collections::BTreeSet;

use crate::ratings::{AnnotatorTable, Score, Verdict};
use crate::taxonomy::Taxonomy;

/// Most frequent score; ties go to the smallest tied score.
///
/// Returns `None` for an empty slice.
pub fn mode(scores: &[Score]) -> Option<Score> {
    let mut counts = [0usize; 3];
    for s in scores {
        counts[(s.rank() - 1) as usize] += 1;
    }
    let best = *counts.iter().max()?;
    if best == 0 {
        return None;
    }
    // Score::ALL is ascending, so the first hit is the smallest tied score.
    Score::ALL
        .into_iter()
        .find(|s| counts[(s.rank() - 1) as usize] == best)
}

/// Collapse replicate tables into one synthetic annotator named `name`.
///
/// Every item rated by any replicate appears in the output. For each taxonomy
/// dimension the value is the mode of the replicates' present scores; if no
/// replicate has a score the dimension is absent for that item.
pub fn majority(replicates: &[AnnotatorTable], name: impl Into<String>, taxonomy: &Taxonomy) -> AnnotatorTable {
    let mut out = AnnotatorTable::new(name);

    let items: BTreeSet<&str> = replicates.iter().flat_map(|t| t.item_ids()).collect();

    for item in items {
        out.items.entry(item.to_string()).or_default();
        for dim in taxonomy.names() {
            let scores: Vec<Score> = replicates
                .iter()
                .filter_map(|t| t.score(item, dim))
                .collect();
            if let Some(m) = mode(&scores) {
                out.insert(item, dim, Some(Verdict::Score(m)));
            }
        }
    }

    out
}

// =============================================================================
// TESTS
// =============================================================================
