//! Rating value histograms per annotator population.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ratings::{AnnotatorTable, Score};

/// Counts of `0` (cannot judge / unparseable / missing), `1`, `2` and `3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingHistogram {
    pub no_judgement: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl RatingHistogram {
    pub fn add(&mut self, score: Option<Score>) {
        match score {
            Some(Score::Low) => self.low += 1,
            Some(Score::Medium) => self.medium += 1,
            Some(Score::High) => self.high += 1,
            None => self.no_judgement += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.no_judgement + self.low + self.medium + self.high
    }
}

/// Histogram per population label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDistribution {
    pub populations: BTreeMap<String, RatingHistogram>,
}

impl RatingDistribution {
    /// Count one cell per replicate × item × dimension.
    ///
    /// `replicates` should come from
    /// [`AgreementEngine::replicate_tables`](super::AgreementEngine::replicate_tables)
    /// so excluded items are already gone and derived dimensions filled.
    /// Items are the union over the population; a replicate that never
    /// rated one counts it as `0`.
    pub fn add_population<'a, I>(
        &mut self,
        label: impl Into<String>,
        replicates: &[AnnotatorTable],
        dimensions: I,
    ) where
        I: IntoIterator<Item = &'a str>,
    {
        let dimensions: Vec<&str> = dimensions.into_iter().collect();
        let items: BTreeSet<&str> = replicates.iter().flat_map(|t| t.item_ids()).collect();
        let hist = self.populations.entry(label.into()).or_default();
        for table in replicates {
            for item in &items {
                for dim in &dimensions {
                    hist.add(table.score(item, dim));
                }
            }
        }
    }
}
