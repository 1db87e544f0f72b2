use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::model::{CellValue, Column, Dataset, Storage};

// ---------------------------------------------------------------------------
// Classification thresholds
// ---------------------------------------------------------------------------

/// Minimum share of non-missing cells that must parse as timestamps before a
/// generic column is treated as datetime.
pub const DATETIME_PARSE_RATIO: f64 = 0.80;

/// A non-numeric column with at most this many distinct non-missing values
/// is categorical; anything above is free text.
pub const CATEGORICAL_MAX_DISTINCT: usize = 100;

/// Name of the column pre-selected for the required time window.
pub const DEFAULT_TIME_COLUMN: &str = "time";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y"];

// ---------------------------------------------------------------------------
// Column profiles
// ---------------------------------------------------------------------------

/// Semantic kind of a column together with its kind-specific summary.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Datetime {
        min: Option<NaiveDateTime>,
        max: Option<NaiveDateTime>,
    },
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
    },
    Categorical {
        values: BTreeSet<CellValue>,
    },
    Text,
}

impl ColumnKind {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnKind::Datetime { .. } => "datetime",
            ColumnKind::Numeric { .. } => "numeric",
            ColumnKind::Categorical { .. } => "categorical",
            ColumnKind::Text => "text",
        }
    }

    pub fn is_datetime(&self) -> bool {
        matches!(self, ColumnKind::Datetime { .. })
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Datetime {
                min: Some(min),
                max: Some(max),
            } => write!(f, "datetime [{min} .. {max}]"),
            ColumnKind::Numeric {
                min: Some(min),
                max: Some(max),
            } => write!(f, "numeric [{min} .. {max}]"),
            ColumnKind::Categorical { values } => {
                write!(f, "categorical ({} values)", values.len())
            }
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Per-column metadata derived once from a loaded dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    /// Position of the column in the dataset it was profiled from.
    pub index: usize,
    pub kind: ColumnKind,
}

/// Column name → profile.
pub type Profiles = BTreeMap<String, ColumnProfile>;

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Classify every column of `dataset`.
///
/// Generic columns whose non-missing cells mostly parse as timestamps are
/// coerced in place: parsed cells become [`CellValue::Datetime`], the rest
/// become missing. Every other column keeps its cells untouched.
pub fn infer(dataset: &mut Dataset) -> Profiles {
    let mut profiles = Profiles::new();

    for (index, column) in dataset.columns_mut().iter_mut().enumerate() {
        let kind = classify(column);
        log::debug!("column '{}' inferred as {}", column.name, kind.label());
        profiles.insert(
            column.name.clone(),
            ColumnProfile {
                name: column.name.clone(),
                index,
                kind,
            },
        );
    }

    log::info!(
        "profiled {} columns ({} datetime)",
        profiles.len(),
        profiles.values().filter(|p| p.kind.is_datetime()).count()
    );
    profiles
}

fn classify(column: &mut Column) -> ColumnKind {
    match column.storage() {
        Storage::Datetime => datetime_summary(column),
        Storage::Numeric => numeric_summary(column),
        Storage::Generic => {
            if let Some(parsed) = parse_datetime_column(column) {
                column.values = parsed;
                datetime_summary(column)
            } else {
                cardinality_kind(column)
            }
        }
        Storage::Boolean => cardinality_kind(column),
    }
}

/// Parse a generic column as timestamps. Returns the coerced cells when the
/// parse rate over non-missing cells reaches [`DATETIME_PARSE_RATIO`].
fn parse_datetime_column(column: &Column) -> Option<Vec<CellValue>> {
    let mut present = 0usize;
    let mut parsed_ok = 0usize;

    let parsed: Vec<CellValue> = column
        .values
        .iter()
        .map(|cell| match cell {
            CellValue::String(s) if s.trim().is_empty() => CellValue::Null,
            c if c.is_missing() => CellValue::Null,
            CellValue::String(s) => {
                present += 1;
                match parse_datetime(s) {
                    Some(dt) => {
                        parsed_ok += 1;
                        CellValue::Datetime(dt)
                    }
                    None => CellValue::Null,
                }
            }
            _ => {
                present += 1;
                CellValue::Null
            }
        })
        .collect();

    if present == 0 {
        return None;
    }
    let ratio = parsed_ok as f64 / present as f64;
    log::debug!(
        "column '{}': {parsed_ok}/{present} cells parse as datetime",
        column.name
    );
    (ratio >= DATETIME_PARSE_RATIO).then_some(parsed)
}

fn cardinality_kind(column: &Column) -> ColumnKind {
    let values = column.distinct_values();
    if values.len() <= CATEGORICAL_MAX_DISTINCT {
        ColumnKind::Categorical { values }
    } else {
        ColumnKind::Text
    }
}

fn numeric_summary(column: &Column) -> ColumnKind {
    let mut nums = column.values.iter().filter_map(CellValue::as_f64);
    let first = nums.next();
    let (min, max) = match first {
        Some(v) => {
            let (lo, hi) = nums.fold((v, v), |(lo, hi), x| (lo.min(x), hi.max(x)));
            (Some(lo), Some(hi))
        }
        None => (None, None),
    };
    ColumnKind::Numeric { min, max }
}

fn datetime_summary(column: &Column) -> ColumnKind {
    let stamps = column.values.iter().filter_map(CellValue::as_datetime);
    ColumnKind::Datetime {
        min: stamps.clone().min(),
        max: stamps.max(),
    }
}

/// Parse one text cell as a timestamp. Zoned inputs keep their local wall
/// clock time with the offset dropped, so `2024-01-01T23:30:00-05:00` stays
/// on 2024-01-01 for window comparisons. Bare dates become midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_local());
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Column pre-selected for the time window: `time` when it was profiled as
/// datetime, otherwise the first datetime column in dataset order.
pub fn default_time_column(profiles: &Profiles) -> Option<String> {
    if profiles
        .get(DEFAULT_TIME_COLUMN)
        .is_some_and(|p| p.kind.is_datetime())
    {
        return Some(DEFAULT_TIME_COLUMN.to_string());
    }
    profiles
        .values()
        .filter(|p| p.kind.is_datetime())
        .min_by_key(|p| p.index)
        .map(|p| p.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(vals: &[&str]) -> Vec<CellValue> {
        vals.iter()
            .map(|s| {
                if s.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::String(s.to_string())
                }
            })
            .collect()
    }

    /// `good` parseable dates followed by unparseable labels, `total` cells.
    fn mostly_dates(good: usize, total: usize) -> Vec<CellValue> {
        (0..total)
            .map(|i| {
                if i < good {
                    CellValue::String(format!("2024-01-{:02}", i % 28 + 1))
                } else {
                    CellValue::String(format!("label-{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn eighty_five_percent_dates_is_datetime() {
        let mut ds = Dataset::new(vec![Column::new("when", mostly_dates(85, 100))]).unwrap();
        let profiles = infer(&mut ds);
        assert!(profiles["when"].kind.is_datetime());

        let col = &ds.columns()[0];
        assert!(matches!(col.values[0], CellValue::Datetime(_)));
        // unparseable cells become missing
        assert_eq!(col.values[99], CellValue::Null);
    }

    #[test]
    fn exactly_eighty_percent_dates_is_datetime() {
        let mut ds = Dataset::new(vec![Column::new("when", mostly_dates(80, 100))]).unwrap();
        let profiles = infer(&mut ds);
        assert!(profiles["when"].kind.is_datetime());

        let mut ds = Dataset::new(vec![Column::new("when", mostly_dates(79, 100))]).unwrap();
        let profiles = infer(&mut ds);
        assert!(!profiles["when"].kind.is_datetime());
    }

    #[test]
    fn sixty_percent_dates_stays_non_datetime() {
        let mut ds = Dataset::new(vec![Column::new("when", mostly_dates(60, 100))]).unwrap();
        let profiles = infer(&mut ds);
        // 28 distinct dates + 40 distinct labels
        assert_eq!(profiles["when"].kind.label(), "categorical");
        assert_eq!(
            ds.columns()[0].values[0],
            CellValue::String("2024-01-01".into())
        );
    }

    #[test]
    fn missing_cells_are_excluded_from_the_ratio() {
        let mut vals = mostly_dates(8, 8);
        vals.extend(strings(&["", "", "", "", "", "", "", "", "", "n/a"]));
        // 8 of 9 present cells parse
        let mut ds = Dataset::new(vec![Column::new("d", vals)]).unwrap();
        let profiles = infer(&mut ds);
        assert!(profiles["d"].kind.is_datetime());
    }

    #[test]
    fn all_missing_column_is_never_datetime() {
        let mut ds = Dataset::new(vec![Column::new("empty", strings(&["", "", ""]))]).unwrap();
        let profiles = infer(&mut ds);
        assert!(!profiles["empty"].kind.is_datetime());
    }

    #[test]
    fn numeric_storage_is_numeric_with_range() {
        let vals = vec![
            CellValue::Integer(3),
            CellValue::Null,
            CellValue::Float(-1.5),
            CellValue::Integer(10),
        ];
        let mut ds = Dataset::new(vec![Column::new("n", vals)]).unwrap();
        let profiles = infer(&mut ds);
        assert_eq!(
            profiles["n"].kind,
            ColumnKind::Numeric {
                min: Some(-1.5),
                max: Some(10.0)
            }
        );
    }

    #[test]
    fn high_cardinality_text_is_text() {
        let vals = (0..=CATEGORICAL_MAX_DISTINCT)
            .map(|i| CellValue::String(format!("msg {i}")))
            .collect();
        let mut ds = Dataset::new(vec![Column::new("message", vals)]).unwrap();
        let profiles = infer(&mut ds);
        assert_eq!(profiles["message"].kind, ColumnKind::Text);
    }

    #[test]
    fn low_cardinality_text_is_categorical() {
        let mut ds = Dataset::new(vec![Column::new(
            "sensor",
            strings(&["a", "b", "a", "", "c"]),
        )])
        .unwrap();
        let profiles = infer(&mut ds);
        match &profiles["sensor"].kind {
            ColumnKind::Categorical { values } => assert_eq!(values.len(), 3),
            other => panic!("expected categorical, got {other:?}"),
        }
    }

    #[test]
    fn parses_common_layouts() {
        assert!(parse_datetime("2024-03-01T12:30:00Z").is_some());
        assert!(parse_datetime("2024-03-01 12:30:00.250").is_some());
        assert!(parse_datetime("2024-03-01 12:30:00+02:00").is_some());
        assert!(parse_datetime("2024/03/01").is_some());
        assert!(parse_datetime("03/01/2024").is_some());
        assert!(parse_datetime("hello").is_none());
        assert!(parse_datetime("42").is_none());
    }

    #[test]
    fn zoned_timestamps_keep_local_date() {
        let dt = parse_datetime("2024-01-01T23:30:00-05:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 23:30:00");
        let dt = parse_datetime("2024-03-01 02:00:00+02:00").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn default_time_column_prefers_time() {
        let mut ds = Dataset::new(vec![
            Column::new("created", strings(&["2024-01-01", "2024-01-02"])),
            Column::new("time", strings(&["2024-01-03", "2024-01-04"])),
        ])
        .unwrap();
        let profiles = infer(&mut ds);
        assert_eq!(default_time_column(&profiles).as_deref(), Some("time"));
    }

    #[test]
    fn default_time_column_falls_back_to_first_datetime() {
        let mut ds = Dataset::new(vec![
            Column::new("time", strings(&["x", "y"])),
            Column::new("zeta", strings(&["2024-01-01", "2024-01-02"])),
            Column::new("alpha", strings(&["2024-01-03", "2024-01-04"])),
        ])
        .unwrap();
        let profiles = infer(&mut ds);
        assert_eq!(default_time_column(&profiles).as_deref(), Some("zeta"));
    }
}
