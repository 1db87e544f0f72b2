use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::{ExplorerError, ExplorerResult};

// ---------------------------------------------------------------------------
// CellValue – a single cell of a column
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value. `Null` is the missing-value marker.
/// Using `BTreeSet` downstream so `CellValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Timestamp without zone; zoned inputs are normalised to UTC.
    Datetime(NaiveDateTime),
}

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Datetime(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Datetime(a), Datetime(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Datetime(dt) => dt.hash(state),
            CellValue::Null => {}
        }
    }
}

/// Text rendering used for CSV cells and substring matching.
/// Missing values render as the empty string.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            CellValue::Null => Ok(()),
        }
    }
}

impl CellValue {
    /// Try to interpret the value as an `f64` for range comparisons.
    /// `NaN` counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) if !v.is_nan() => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Datetime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Missing cell: `Null` or a float `NaN`.
    pub fn is_missing(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Float(v) => v.is_nan(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Column – one named sequence of cells
// ---------------------------------------------------------------------------

/// How a column's non-missing cells are physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Only integers and floats.
    Numeric,
    /// Only booleans.
    Boolean,
    /// Only timestamps.
    Datetime,
    /// Strings, mixed cells, or no non-missing cells at all.
    Generic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Derive the storage class from the non-missing cells.
    pub fn storage(&self) -> Storage {
        let mut present = self.values.iter().filter(|v| !v.is_missing()).peekable();
        let Some(first) = present.peek() else {
            return Storage::Generic;
        };
        let candidate = match first {
            CellValue::Integer(_) | CellValue::Float(_) => Storage::Numeric,
            CellValue::Bool(_) => Storage::Boolean,
            CellValue::Datetime(_) => Storage::Datetime,
            _ => return Storage::Generic,
        };
        let uniform = present.all(|v| {
            matches!(
                (candidate, v),
                (Storage::Numeric, CellValue::Integer(_) | CellValue::Float(_))
                    | (Storage::Boolean, CellValue::Bool(_))
                    | (Storage::Datetime, CellValue::Datetime(_))
            )
        });
        if uniform {
            candidate
        } else {
            Storage::Generic
        }
    }

    /// Sorted set of distinct non-missing values.
    pub fn distinct_values(&self) -> BTreeSet<CellValue> {
        self.values
            .iter()
            .filter(|v| !v.is_missing())
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded table
// ---------------------------------------------------------------------------

/// An ordered set of equally long, uniquely named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    /// Build a dataset, checking that every column has the same length and
    /// that names are unique.
    pub fn new(columns: Vec<Column>) -> ExplorerResult<Self> {
        let row_count = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = BTreeSet::new();
        for col in &columns {
            if col.len() != row_count {
                return Err(ExplorerError::InvalidDataset(format!(
                    "column '{}' has {} rows, expected {row_count}",
                    col.name,
                    col.len()
                )));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(ExplorerError::InvalidDataset(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        Ok(Self { columns, row_count })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.row_count
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Mutable access used by type inference to coerce cells in place.
    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Borrowed view of one row. Returns `None` past the end.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.row_count).then_some(Row {
            dataset: self,
            index,
        })
    }

    /// Copy the given rows, in the given order, into a new dataset.
    pub fn take(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|col| Column {
                name: col.name.clone(),
                values: rows.iter().map(|&r| col.values[r].clone()).collect(),
            })
            .collect();
        Self {
            columns,
            row_count: rows.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Row – borrowed view of one record
// ---------------------------------------------------------------------------

static MISSING: CellValue = CellValue::Null;

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> Row<'a> {
    /// Position of this row in its dataset.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cell at the given column position; out-of-range positions read as missing.
    pub fn value(&self, column: usize) -> &'a CellValue {
        self.dataset
            .columns
            .get(column)
            .and_then(|c| c.values.get(self.index))
            .unwrap_or(&MISSING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(vals: &[i64]) -> Vec<CellValue> {
        vals.iter().map(|&v| CellValue::Integer(v)).collect()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Dataset::new(vec![
            Column::new("a", ints(&[1, 2, 3])),
            Column::new("b", ints(&[1, 2])),
        ])
        .unwrap_err();
        assert!(matches!(err, ExplorerError::InvalidDataset(_)));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Dataset::new(vec![
            Column::new("a", ints(&[1])),
            Column::new("a", ints(&[2])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn storage_ignores_missing_cells() {
        let col = Column::new(
            "x",
            vec![
                CellValue::Null,
                CellValue::Integer(1),
                CellValue::Float(f64::NAN),
                CellValue::Float(2.5),
            ],
        );
        assert_eq!(col.storage(), Storage::Numeric);

        let mixed = Column::new("y", vec![CellValue::Integer(1), CellValue::String("a".into())]);
        assert_eq!(mixed.storage(), Storage::Generic);

        let empty = Column::new("z", vec![CellValue::Null, CellValue::Null]);
        assert_eq!(empty.storage(), Storage::Generic);
    }

    #[test]
    fn take_preserves_requested_order() {
        let ds = Dataset::new(vec![Column::new("a", ints(&[10, 20, 30, 40]))]).unwrap();
        let sub = ds.take(&[1, 3]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.columns()[0].values, ints(&[20, 40]));
    }

    #[test]
    fn row_out_of_range_reads_missing() {
        let ds = Dataset::new(vec![Column::new("a", ints(&[1]))]).unwrap();
        let row = ds.row(0).unwrap();
        assert_eq!(row.value(0), &CellValue::Integer(1));
        assert_eq!(row.value(7), &CellValue::Null);
        assert!(ds.row(1).is_none());
    }

    #[test]
    fn display_renders_missing_as_empty() {
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::Float(2.5).to_string(), "2.5");
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(CellValue::Datetime(dt).to_string(), "2024-01-02 03:04:05");
    }
}
