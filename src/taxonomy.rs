//! Argument quality taxonomy.
//!
//! Fifteen dimensions: eleven are annotated directly, four are derived as the
//! rounded mean of their children. The derivation graph is a DAG with
//! `Overall Quality` as its root. The taxonomy and the exclusion set are plain
//! values handed to each component, so tests can swap in smaller graphs.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

// =============================================================================
// Dimension names
// =============================================================================

pub const COGENCY: &str = "Cogency";
pub const LOCAL_ACCEPTABILITY: &str = "Local Acceptability";
pub const LOCAL_RELEVANCE: &str = "Local Relevance";
pub const LOCAL_SUFFICIENCY: &str = "Local Sufficiency";
pub const EFFECTIVENESS: &str = "Effectiveness";
pub const CREDIBILITY: &str = "Credibility";
pub const EMOTIONAL_APPEAL: &str = "Emotional Appeal";
pub const CLARITY: &str = "Clarity";
pub const APPROPRIATENESS: &str = "Appropriateness";
pub const ARRANGEMENT: &str = "Arrangement";
pub const REASONABLENESS: &str = "Reasonableness";
pub const GLOBAL_ACCEPTABILITY: &str = "Global Acceptability";
pub const GLOBAL_RELEVANCE: &str = "Global Relevance";
pub const GLOBAL_SUFFICIENCY: &str = "Global Sufficiency";
pub const OVERALL_QUALITY: &str = "Overall Quality";

/// Key used for the pooled alpha in agreement reports.
pub const ACROSS_DIMENSIONS: &str = "Across Dimensions";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("duplicate dimension '{0}'")]
    Duplicate(String),
    #[error("dimension '{parent}' depends on unknown dimension '{child}'")]
    UnknownChild { parent: String, child: String },
    #[error("derivation cycle through '{0}'")]
    Cycle(String),
}

// =============================================================================
// Taxonomy
// =============================================================================

/// One node of the taxonomy. Empty `children` means the dimension is annotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionNode {
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

impl DimensionNode {
    pub fn base(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn derived(name: impl Into<String>, children: &[&str]) -> Self {
        Self {
            name: name.into(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn is_derived(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Validated set of quality dimensions plus their derivation graph.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    dimensions: Vec<DimensionNode>,
    derivation_order: Vec<usize>,
}

impl Taxonomy {
    /// Build a taxonomy, rejecting duplicates, dangling children and cycles.
    pub fn new(dimensions: Vec<DimensionNode>) -> Result<Self, TaxonomyError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, dim) in dimensions.iter().enumerate() {
            if index.insert(dim.name.as_str(), i).is_some() {
                return Err(TaxonomyError::Duplicate(dim.name.clone()));
            }
        }
        for dim in &dimensions {
            for child in &dim.children {
                if !index.contains_key(child.as_str()) {
                    return Err(TaxonomyError::UnknownChild {
                        parent: dim.name.clone(),
                        child: child.clone(),
                    });
                }
            }
        }

        // Depth-first topological sort; children land before their parents.
        let mut order = Vec::new();
        let mut done: HashSet<usize> = HashSet::new();
        let mut visiting: HashSet<usize> = HashSet::new();

        fn visit(
            i: usize,
            dims: &[DimensionNode],
            index: &HashMap<&str, usize>,
            done: &mut HashSet<usize>,
            visiting: &mut HashSet<usize>,
            order: &mut Vec<usize>,
        ) -> Result<(), TaxonomyError> {
            if done.contains(&i) {
                return Ok(());
            }
            if !visiting.insert(i) {
                return Err(TaxonomyError::Cycle(dims[i].name.clone()));
            }
            for child in &dims[i].children {
                visit(index[child.as_str()], dims, index, done, visiting, order)?;
            }
            visiting.remove(&i);
            done.insert(i);
            if dims[i].is_derived() {
                order.push(i);
            }
            Ok(())
        }

        for i in 0..dimensions.len() {
            visit(i, &dimensions, &index, &mut done, &mut visiting, &mut order)?;
        }

        Ok(Self {
            dimensions,
            derivation_order: order,
        })
    }

    /// The argument quality taxonomy used throughout the study.
    pub fn argument_quality() -> Self {
        let dims = vec![
            DimensionNode::derived(
                COGENCY,
                &[LOCAL_ACCEPTABILITY, LOCAL_RELEVANCE, LOCAL_SUFFICIENCY],
            ),
            DimensionNode::base(LOCAL_ACCEPTABILITY),
            DimensionNode::base(LOCAL_RELEVANCE),
            DimensionNode::base(LOCAL_SUFFICIENCY),
            DimensionNode::derived(
                EFFECTIVENESS,
                &[
                    CREDIBILITY,
                    EMOTIONAL_APPEAL,
                    CLARITY,
                    APPROPRIATENESS,
                    ARRANGEMENT,
                ],
            ),
            DimensionNode::base(CREDIBILITY),
            DimensionNode::base(EMOTIONAL_APPEAL),
            DimensionNode::base(CLARITY),
            DimensionNode::base(APPROPRIATENESS),
            DimensionNode::base(ARRANGEMENT),
            DimensionNode::derived(
                REASONABLENESS,
                &[GLOBAL_ACCEPTABILITY, GLOBAL_RELEVANCE, GLOBAL_SUFFICIENCY],
            ),
            DimensionNode::base(GLOBAL_ACCEPTABILITY),
            DimensionNode::base(GLOBAL_RELEVANCE),
            DimensionNode::base(GLOBAL_SUFFICIENCY),
            DimensionNode::derived(OVERALL_QUALITY, &[COGENCY, REASONABLENESS, EFFECTIVENESS]),
        ];
        Self::new(dims).expect("built-in taxonomy is a valid DAG")
    }

    /// All dimensions in declaration order.
    pub fn dimensions(&self) -> &[DimensionNode] {
        &self.dimensions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&DimensionNode> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn base_dimensions(&self) -> impl Iterator<Item = &DimensionNode> {
        self.dimensions.iter().filter(|d| !d.is_derived())
    }

    /// Derived dimensions, every one after all of its derived children.
    pub fn derivation_order(&self) -> impl Iterator<Item = &DimensionNode> {
        self.derivation_order.iter().map(|&i| &self.dimensions[i])
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::argument_quality()
    }
}

// =============================================================================
// Dimension definitions (prompt material)
// =============================================================================

/// Definition text for one dimension, as shown to expert and novice raters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityDimension {
    #[serde(alias = "name")]
    pub dimension: String,
    pub definition: String,
    pub question: String,
    pub definition_novice: String,
    pub question_novice: String,
}

// =============================================================================
// Exclusion set
// =============================================================================

/// Item ids removed from every computation before any aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    ids: BTreeSet<String>,
}

/// Items excluded from the published agreement analysis.
const REFERENCE_EXCLUSIONS: &[&str] = &[
    "44125",
    "541",
    "68938",
    "70818",
    "71467",
    "804",
    "arg155750",
    "arg219210",
    "arg219232",
    "arg219242",
    "arg219292",
    "arg230311",
    "arg234318",
    "arg236317",
    "arg236641",
    "arg317490",
];

impl ExclusionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn reference() -> Self {
        Self::from_ids(REFERENCE_EXCLUSIONS.iter().copied())
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_quality_shape() {
        let t = Taxonomy::argument_quality();
        assert_eq!(t.len(), 15);
        assert_eq!(t.base_dimensions().count(), 11);
        let order: Vec<&str> = t.derivation_order().map(|d| d.name.as_str()).collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order.last(), Some(&OVERALL_QUALITY));
    }

    #[test]
    fn rejects_cycles_and_dangling_children() {
        let cyclic = vec![
            DimensionNode::derived("a", &["b"]),
            DimensionNode::derived("b", &["a"]),
        ];
        assert!(matches!(Taxonomy::new(cyclic), Err(TaxonomyError::Cycle(_))));

        let dangling = vec![DimensionNode::derived("a", &["missing"])];
        assert!(matches!(
            Taxonomy::new(dangling),
            Err(TaxonomyError::UnknownChild { .. })
        ));
    }

    #[test]
    fn reference_exclusions() {
        let ex = ExclusionSet::reference();
        assert_eq!(ex.len(), 16);
        assert!(ex.contains("arg317490"));
        assert!(!ex.contains("arg1"));
    }
}
