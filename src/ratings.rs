//! Rating records, annotator populations and per-annotator rating tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::taxonomy::ExclusionSet;

// =============================================================================
// Scores and verdicts
// =============================================================================

/// Ordinal quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Score {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Score {
    pub const ALL: [Score; 3] = [Score::Low, Score::Medium, Score::High];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Score::Low),
            2 => Some(Score::Medium),
            3 => Some(Score::High),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Score::Low => "Low",
            Score::Medium => "Medium",
            Score::High => "High",
        }
    }
}

/// One of the bounded answer options: a score or `?` (cannot judge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Score(Score),
    CannotJudge,
}

impl Verdict {
    /// Parse the option character (`1`, `2`, `3` or `?`).
    pub fn from_option(token: &str) -> Option<Self> {
        match token.trim() {
            "?" => Some(Verdict::CannotJudge),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Score::from_rank)
                .map(Verdict::Score),
        }
    }

    pub fn score(self) -> Option<Score> {
        match self {
            Verdict::Score(s) => Some(s),
            Verdict::CannotJudge => None,
        }
    }

    /// Numeric coding used only while ingesting; `0` means no judgement.
    pub fn numeric(self) -> u8 {
        match self {
            Verdict::Score(s) => s.rank(),
            Verdict::CannotJudge => 0,
        }
    }

    pub fn option(self) -> &'static str {
        match self {
            Verdict::Score(Score::Low) => "1",
            Verdict::Score(Score::Medium) => "2",
            Verdict::Score(Score::High) => "3",
            Verdict::CannotJudge => "?",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.option())
    }
}

// =============================================================================
// Rating records
// =============================================================================

/// One rating as stored on disk: `{"id", "dimension", "rating"}`.
///
/// `rating` must be present; `null` marks an unparseable response. The
/// annotator is usually implied by the replicate file and is optional here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub id: String,
    pub dimension: String,
    #[serde(
        alias = "value",
        serialize_with = "serialize_rating",
        deserialize_with = "deserialize_rating"
    )]
    pub rating: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator: Option<String>,
    /// Raw model text the rating was parsed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl RatingRecord {
    pub fn new(id: impl Into<String>, dimension: impl Into<String>, rating: Option<Verdict>) -> Self {
        Self {
            id: id.into(),
            dimension: dimension.into(),
            rating,
            annotator: None,
            response: None,
        }
    }

    pub fn with_annotator(mut self, annotator: impl Into<String>) -> Self {
        self.annotator = Some(annotator.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

fn serialize_rating<S: Serializer>(value: &Option<Verdict>, ser: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => ser.serialize_str(v.option()),
        None => ser.serialize_none(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRating {
    Text(String),
    Number(f64),
}

fn deserialize_rating<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Verdict>, D::Error> {
    let raw: Option<RawRating> = Option::deserialize(de)?;
    Ok(match raw {
        None => None,
        Some(RawRating::Text(s)) => Verdict::from_option(&s).or_else(|| {
            // Spreadsheet exports write "2.0"
            s.trim()
                .parse::<f64>()
                .ok()
                .and_then(numeric_verdict)
        }),
        Some(RawRating::Number(n)) => numeric_verdict(n),
    })
}

pub(crate) fn numeric_verdict(n: f64) -> Option<Verdict> {
    if !n.is_finite() {
        return None;
    }
    match n.trunc() as i64 {
        0 => Some(Verdict::CannotJudge),
        r @ 1..=3 => Score::from_rank(r as u8).map(Verdict::Score),
        _ => None,
    }
}

// =============================================================================
// Annotator populations
// =============================================================================

/// Which prompt family a rater saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVariant {
    Expert,
    Novice,
}

impl PromptVariant {
    pub const ALL: [PromptVariant; 2] = [PromptVariant::Expert, PromptVariant::Novice];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptVariant::Expert => "expert",
            PromptVariant::Novice => "novice",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How replicate annotators of one configuration enter the agreement matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Every replicate is its own annotator row.
    #[default]
    None,
    /// Replicates collapse into one majority annotator.
    Majority,
}

/// A logical rater population: source, prompt variant, reasoning flag and
/// how its replicates are aggregated.
///
/// The replicate index is not a field. A population covers all its
/// replicates, and each one is identified by the annotator name from
/// [`replicate_name`](Self::replicate_name) (replicate order on disk).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    /// Model name or `human`.
    #[serde(alias = "annotator")]
    pub source: String,
    #[serde(alias = "prompt_type")]
    pub prompt_variant: PromptVariant,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default, deserialize_with = "deserialize_aggregation")]
    pub aggregation: Aggregation,
}

fn deserialize_aggregation<'de, D: Deserializer<'de>>(de: D) -> Result<Aggregation, D::Error> {
    Ok(Option::<Aggregation>::deserialize(de)?.unwrap_or_default())
}

impl AnnotatorConfig {
    pub fn new(source: impl Into<String>, prompt_variant: PromptVariant) -> Self {
        Self {
            source: source.into(),
            prompt_variant,
            reasoning: false,
            aggregation: Aggregation::None,
        }
    }

    pub fn reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn majority(mut self) -> Self {
        self.aggregation = Aggregation::Majority;
        self
    }

    fn reasoning_suffix(&self) -> &'static str {
        if self.reasoning {
            "_reasoning"
        } else {
            ""
        }
    }

    /// Name of replicate `index` (1-based), e.g. `GPT3_2_expert_reasoning`.
    pub fn replicate_name(&self, index: usize) -> String {
        format!(
            "{}_{}_{}{}",
            self.source,
            index,
            self.prompt_variant,
            self.reasoning_suffix()
        )
    }

    /// Name of the synthetic majority annotator, e.g. `GPT3_majority_novice`.
    pub fn majority_name(&self) -> String {
        format!(
            "{}_majority_{}{}",
            self.source,
            self.prompt_variant,
            self.reasoning_suffix()
        )
    }

    /// Short population label, e.g. `palm2_novice_reasoning`.
    pub fn label(&self) -> String {
        format!(
            "{}_{}{}",
            self.source,
            self.prompt_variant,
            self.reasoning_suffix()
        )
    }
}

impl fmt::Display for AnnotatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())?;
        if self.aggregation == Aggregation::Majority {
            f.write_str(" (majority)")?;
        }
        Ok(())
    }
}

// =============================================================================
// Annotator tables
// =============================================================================

/// Ratings of one annotator on one item, keyed by dimension.
///
/// A key mapped to `None` is an unparseable rating; a missing key was never
/// rated. Both count as absent for statistics.
pub type ItemRatings = BTreeMap<String, Option<Verdict>>;

/// All ratings of one annotator, keyed by item id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotatorTable {
    pub annotator: String,
    pub items: BTreeMap<String, ItemRatings>,
}

impl AnnotatorTable {
    pub fn new(annotator: impl Into<String>) -> Self {
        Self {
            annotator: annotator.into(),
            items: BTreeMap::new(),
        }
    }

    /// Pivot records into a table, dropping excluded items.
    ///
    /// A later record for the same (item, dimension) replaces an earlier one.
    pub fn from_records<'a, I>(annotator: impl Into<String>, records: I, exclusions: &ExclusionSet) -> Self
    where
        I: IntoIterator<Item = &'a RatingRecord>,
    {
        let mut table = Self::new(annotator);
        for record in records {
            if exclusions.contains(&record.id) {
                continue;
            }
            table.insert(&record.id, &record.dimension, record.rating);
        }
        table
    }

    pub fn insert(&mut self, item: &str, dimension: &str, value: Option<Verdict>) {
        self.items
            .entry(item.to_string())
            .or_default()
            .insert(dimension.to_string(), value);
    }

    /// Present score, treating `?`, unparseable and missing alike.
    pub fn score(&self, item: &str, dimension: &str) -> Option<Score> {
        self.items
            .get(item)
            .and_then(|dims| dims.get(dimension))
            .copied()
            .flatten()
            .and_then(Verdict::score)
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Flatten back into records carrying this annotator's name.
    pub fn to_records(&self) -> Vec<RatingRecord> {
        self.items
            .iter()
            .flat_map(|(id, dims)| {
                dims.iter().map(move |(dim, value)| {
                    RatingRecord::new(id.clone(), dim.clone(), *value)
                        .with_annotator(self.annotator.clone())
                })
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_parses_strings_numbers_and_null() {
        let r: RatingRecord =
            serde_json::from_str(r#"{"id":"a","dimension":"Clarity","rating":"3"}"#).unwrap();
        assert_eq!(r.rating, Some(Verdict::Score(Score::High)));

        let r: RatingRecord =
            serde_json::from_str(r#"{"id":"a","dimension":"Clarity","rating":"?"}"#).unwrap();
        assert_eq!(r.rating, Some(Verdict::CannotJudge));

        let r: RatingRecord =
            serde_json::from_str(r#"{"id":"a","dimension":"Clarity","rating":2}"#).unwrap();
        assert_eq!(r.rating, Some(Verdict::Score(Score::Medium)));

        let r: RatingRecord =
            serde_json::from_str(r#"{"id":"a","dimension":"Clarity","rating":null}"#).unwrap();
        assert_eq!(r.rating, None);
    }

    #[test]
    fn record_requires_rating_field() {
        let err = serde_json::from_str::<RatingRecord>(r#"{"id":"a","dimension":"Clarity"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn record_round_trips_option_character() {
        let r = RatingRecord::new("a", "Clarity", Some(Verdict::CannotJudge));
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"id":"a","dimension":"Clarity","rating":"?"}"#);
    }

    #[test]
    fn annotator_names() {
        let cfg = AnnotatorConfig::new("GPT3", PromptVariant::Expert).reasoning(true);
        assert_eq!(cfg.replicate_name(2), "GPT3_2_expert_reasoning");
        assert_eq!(cfg.majority_name(), "GPT3_majority_expert_reasoning");
        let human = AnnotatorConfig::new("human", PromptVariant::Novice);
        assert_eq!(human.majority_name(), "human_majority_novice");
    }

    #[test]
    fn config_accepts_legacy_field_names() {
        let cfg: AnnotatorConfig = serde_json::from_str(
            r#"{"annotator":"palm2","prompt_type":"novice","reasoning":true,"aggregation":null}"#,
        )
        .unwrap();
        assert_eq!(cfg.source, "palm2");
        assert_eq!(cfg.aggregation, Aggregation::None);
    }

    #[test]
    fn table_drops_excluded_items() {
        let records = vec![
            RatingRecord::new("keep", "Clarity", Some(Verdict::Score(Score::Low))),
            RatingRecord::new("804", "Clarity", Some(Verdict::Score(Score::Low))),
        ];
        let table = AnnotatorTable::from_records("a", &records, &ExclusionSet::reference());
        assert_eq!(table.item_ids().collect::<Vec<_>>(), vec!["keep"]);
        assert_eq!(table.score("keep", "Clarity"), Some(Score::Low));
    }
}
