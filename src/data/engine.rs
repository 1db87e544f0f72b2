use super::filter::Predicate;
use super::model::{Dataset, Row};

// ---------------------------------------------------------------------------
// Filtered row set
// ---------------------------------------------------------------------------

/// Rows of a dataset that passed a predicate, in their original order.
#[derive(Debug, Clone)]
pub struct FilteredSet<'a> {
    dataset: &'a Dataset,
    rows: Vec<usize>,
}

impl<'a> FilteredSet<'a> {
    /// Every row of `dataset`, unfiltered.
    pub fn all(dataset: &'a Dataset) -> Self {
        Self {
            dataset,
            rows: (0..dataset.len()).collect(),
        }
    }

    /// Rebuild a set from previously computed row positions.
    pub(crate) fn from_indices(dataset: &'a Dataset, rows: Vec<usize>) -> Self {
        Self { dataset, rows }
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Positions of the surviving rows in the source dataset.
    pub fn indices(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'a>> + '_ {
        self.rows.iter().filter_map(|&i| self.dataset.row(i))
    }

    /// Keep only the rows of this set that also satisfy `predicate`.
    pub fn refine(&self, predicate: &Predicate) -> FilteredSet<'a> {
        let rows = self
            .rows
            .iter()
            .copied()
            .filter(|&i| self.dataset.row(i).is_some_and(|row| predicate.matches(row)))
            .collect();
        FilteredSet {
            dataset: self.dataset,
            rows,
        }
    }

    /// Copy the surviving rows into a standalone dataset.
    pub fn materialize(&self) -> Dataset {
        self.dataset.take(&self.rows)
    }
}

/// Return the rows of `dataset` that satisfy `predicate`.
///
/// Row order is preserved and no row appears twice. The result depends only
/// on the two inputs.
pub fn apply<'a>(dataset: &'a Dataset, predicate: &Predicate) -> FilteredSet<'a> {
    let rows: Vec<usize> = (0..dataset.len())
        .filter_map(|i| dataset.row(i))
        .filter(|row| predicate.matches(*row))
        .map(|row| row.index())
        .collect();
    log::info!("{} of {} rows pass the filters", rows.len(), dataset.len());
    FilteredSet { dataset, rows }
}
