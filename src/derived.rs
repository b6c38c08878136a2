//! Derived dimension calculator.
//!
//! Composite dimensions are the rounded mean of their present children,
//! evaluated in dependency order so `Overall Quality` sees freshly derived
//! `Cogency`, `Reasonableness` and `Effectiveness`.

use serde::{Deserialize, Serialize};

use crate::ratings::{AnnotatorTable, ItemRatings, Score, Verdict};
use crate::taxonomy::Taxonomy;

/// Tie rule for means that fall exactly between two scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// 1.5 -> 2, 2.5 -> 3.
    #[default]
    HalfAwayFromZero,
    /// 1.5 -> 2, 2.5 -> 2 (numpy's convention).
    HalfEven,
}

impl RoundingMode {
    pub fn round(self, x: f64) -> f64 {
        match self {
            RoundingMode::HalfAwayFromZero => x.round(),
            RoundingMode::HalfEven => {
                let r = x.round();
                if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
                    r - x.signum()
                } else {
                    r
                }
            }
        }
    }
}

/// Rounded mean of the present scores, or `None` when nothing is present.
pub fn rounded_mean(scores: &[Score], rounding: RoundingMode) -> Option<Score> {
    if scores.is_empty() {
        return None;
    }
    let sum: f64 = scores.iter().map(|s| s.rank() as f64).sum();
    let mean = sum / scores.len() as f64;
    Score::from_rank(rounding.round(mean) as u8)
}

/// Fill derived dimensions of one item in place.
///
/// When any child is present the value is recomputed from children. When all
/// children are absent a supplied value is kept; otherwise the derived value
/// is absent.
pub fn derive_item(item: &mut ItemRatings, taxonomy: &Taxonomy, rounding: RoundingMode) {
    for node in taxonomy.derivation_order() {
        let present: Vec<Score> = node
            .children
            .iter()
            .filter_map(|child| item.get(child).copied().flatten().and_then(Verdict::score))
            .collect();

        match rounded_mean(&present, rounding) {
            Some(score) => {
                item.insert(node.name.clone(), Some(Verdict::Score(score)));
            }
            None => {
                let supplied = item
                    .get(&node.name)
                    .copied()
                    .flatten()
                    .and_then(Verdict::score);
                if supplied.is_none() {
                    item.remove(&node.name);
                }
            }
        }
    }
}

/// Fill derived dimensions for every item of an annotator.
pub fn derive_table(table: &mut AnnotatorTable, taxonomy: &Taxonomy, rounding: RoundingMode) {
    for item in table.items.values_mut() {
        derive_item(item, taxonomy, rounding);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::*;

    fn s(rank: u8) -> Option<Verdict> {
        Some(Verdict::Score(Score::from_rank(rank).unwrap()))
    }

    fn score_of(item: &ItemRatings, dim: &str) -> Option<Score> {
        item.get(dim).copied().flatten().and_then(Verdict::score)
    }

    #[test]
    fn cogency_from_three_children() {
        let t = Taxonomy::argument_quality();
        let mut item = ItemRatings::new();
        item.insert(LOCAL_ACCEPTABILITY.into(), s(3));
        item.insert(LOCAL_RELEVANCE.into(), s(2));
        item.insert(LOCAL_SUFFICIENCY.into(), s(1));
        derive_item(&mut item, &t, RoundingMode::default());
        assert_eq!(score_of(&item, COGENCY), Some(Score::Medium));
    }

    #[test]
    fn absent_child_does_not_drag_mean() {
        let t = Taxonomy::argument_quality();
        let mut item = ItemRatings::new();
        item.insert(LOCAL_ACCEPTABILITY.into(), s(3));
        item.insert(LOCAL_RELEVANCE.into(), s(3));
        item.insert(LOCAL_SUFFICIENCY.into(), Some(Verdict::CannotJudge));
        derive_item(&mut item, &t, RoundingMode::default());
        assert_eq!(score_of(&item, COGENCY), Some(Score::High));
    }

    #[test]
    fn all_children_absent_propagates_upward() {
        let t = Taxonomy::argument_quality();
        let mut item = ItemRatings::new();
        item.insert(LOCAL_ACCEPTABILITY.into(), None);
        derive_item(&mut item, &t, RoundingMode::default());
        assert!(!item.contains_key(COGENCY));
        assert!(!item.contains_key(OVERALL_QUALITY));
    }

    #[test]
    fn supplied_value_kept_without_children() {
        let t = Taxonomy::argument_quality();
        let mut item = ItemRatings::new();
        item.insert(COGENCY.into(), s(1));
        item.insert(REASONABLENESS.into(), s(3));
        derive_item(&mut item, &t, RoundingMode::default());
        assert_eq!(score_of(&item, COGENCY), Some(Score::Low));
        // mean(1, 3) = 2
        assert_eq!(score_of(&item, OVERALL_QUALITY), Some(Score::Medium));
    }

    #[test]
    fn idempotent() {
        let t = Taxonomy::argument_quality();
        let mut item = ItemRatings::new();
        item.insert(CLARITY.into(), s(2));
        item.insert(ARRANGEMENT.into(), s(3));
        item.insert(GLOBAL_RELEVANCE.into(), s(1));
        derive_item(&mut item, &t, RoundingMode::default());
        let once = item.clone();
        derive_item(&mut item, &t, RoundingMode::default());
        assert_eq!(once, item);
    }

    #[test]
    fn rounding_ties_are_pinned() {
        let away = RoundingMode::HalfAwayFromZero;
        let even = RoundingMode::HalfEven;
        assert_eq!(rounded_mean(&[Score::Low, Score::Medium], away), Some(Score::Medium));
        assert_eq!(rounded_mean(&[Score::Medium, Score::High], away), Some(Score::High));
        assert_eq!(rounded_mean(&[Score::Low, Score::Medium], even), Some(Score::Medium));
        assert_eq!(rounded_mean(&[Score::Medium, Score::High], even), Some(Score::Medium));
        assert_eq!(rounded_mean(&[], away), None);
    }
}
