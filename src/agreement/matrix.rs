//! Reliability matrices: annotators × units, cells hold ordinal ranks.

use std::collections::BTreeSet;

use crate::ratings::AnnotatorTable;
use crate::taxonomy::ExclusionSet;

/// Transient annotator × unit matrix consumed by the alpha computation.
///
/// Units are item ids for a per-dimension matrix and `(dimension, item)`
/// pairs for the pooled matrix. Absent cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityMatrix {
    annotators: Vec<String>,
    units: Vec<String>,
    cells: Vec<Vec<Option<u8>>>,
}

impl ReliabilityMatrix {
    /// Build from explicit rows. Every row must have one cell per unit.
    pub fn from_rows(
        annotators: Vec<String>,
        units: Vec<String>,
        cells: Vec<Vec<Option<u8>>>,
    ) -> Option<Self> {
        if annotators.len() != cells.len() || cells.iter().any(|row| row.len() != units.len()) {
            return None;
        }
        Some(Self {
            annotators,
            units,
            cells,
        })
    }

    /// One row per annotator, one column per item in the union of all
    /// annotators' items (minus exclusions).
    pub fn for_dimension(
        tables: &[AnnotatorTable],
        dimension: &str,
        exclusions: &ExclusionSet,
    ) -> Self {
        let items = item_union(tables, exclusions);
        let cells = tables
            .iter()
            .map(|t| {
                items
                    .iter()
                    .map(|item| t.score(item, dimension).map(|s| s.rank()))
                    .collect()
            })
            .collect();
        Self {
            annotators: tables.iter().map(|t| t.annotator.clone()).collect(),
            units: items,
            cells,
        }
    }

    /// Stack all dimensions side by side so each `(dimension, item)` pair is
    /// one unit.
    pub fn pooled<'a, I>(tables: &[AnnotatorTable], dimensions: I, exclusions: &ExclusionSet) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let items = item_union(tables, exclusions);
        let dims: Vec<&str> = dimensions.into_iter().collect();

        let mut units = Vec::with_capacity(items.len() * dims.len());
        for dim in &dims {
            for item in &items {
                units.push(format!("{dim}::{item}"));
            }
        }

        let cells = tables
            .iter()
            .map(|t| {
                dims.iter()
                    .flat_map(|dim| {
                        items
                            .iter()
                            .map(move |item| t.score(item, dim).map(|s| s.rank()))
                    })
                    .collect()
            })
            .collect();

        Self {
            annotators: tables.iter().map(|t| t.annotator.clone()).collect(),
            units,
            cells,
        }
    }

    pub fn annotators(&self) -> &[String] {
        &self.annotators
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn cell(&self, annotator: usize, unit: usize) -> Option<u8> {
        self.cells.get(annotator)?.get(unit).copied().flatten()
    }

    /// Present values in one unit column.
    pub fn column(&self, unit: usize) -> impl Iterator<Item = u8> + '_ {
        self.cells.iter().filter_map(move |row| row[unit])
    }

    /// Number of units with at least two present values.
    pub fn pairable_units(&self) -> usize {
        (0..self.units.len())
            .filter(|&u| self.column(u).count() >= 2)
            .count()
    }
}

fn item_union(tables: &[AnnotatorTable], exclusions: &ExclusionSet) -> Vec<String> {
    let items: BTreeSet<&str> = tables
        .iter()
        .flat_map(|t| t.item_ids())
        .filter(|id| !exclusions.contains(id))
        .collect();
    items.into_iter().map(str::to_string).collect()
}

// =============================================================================
// TESTS
// =============================================================================
