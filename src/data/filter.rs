use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{ExplorerError, ExplorerResult};
use super::infer::{ColumnKind, Profiles};
use super::model::{CellValue, Row};

/// Longest allowed time window, measured as `end - start` in days.
pub const MAX_WINDOW_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Filter specification: plain data coming from the front end
// ---------------------------------------------------------------------------

/// The required time window: inclusive calendar dates on a datetime column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub column: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(column: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            column: column.into(),
            start,
            end,
        }
    }

    /// Length of the window in days (`end - start`).
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// One optional per-column constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnFilter {
    /// Inclusive `[low, high]` on a numeric column.
    Range { column: String, low: f64, high: f64 },
    /// Inclusive calendar dates on a datetime column other than the time window.
    DateRange {
        column: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Membership in a set of allowed values. Include `null` to keep missing cells.
    OneOf {
        column: String,
        allowed: BTreeSet<CellValue>,
    },
    /// Case-insensitive substring search.
    Contains { column: String, query: String },
}

impl ColumnFilter {
    pub fn column(&self) -> &str {
        match self {
            ColumnFilter::Range { column, .. }
            | ColumnFilter::DateRange { column, .. }
            | ColumnFilter::OneOf { column, .. }
            | ColumnFilter::Contains { column, .. } => column,
        }
    }

    /// Evaluation rank: cheap comparisons first, string search last.
    fn cost_rank(&self) -> u8 {
        match self {
            ColumnFilter::Range { .. } => 0,
            ColumnFilter::DateRange { .. } => 1,
            ColumnFilter::OneOf { .. } => 2,
            ColumnFilter::Contains { .. } => 3,
        }
    }
}

/// Everything the user has chosen to narrow the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub filters: Vec<ColumnFilter>,
}

impl FilterSpec {
    pub fn with_time_window(window: TimeWindow) -> Self {
        Self {
            time_window: Some(window),
            filters: Vec::new(),
        }
    }

    pub fn push(&mut self, filter: ColumnFilter) -> &mut Self {
        self.filters.push(filter);
        self
    }
}

// ---------------------------------------------------------------------------
// Compiled predicate
// ---------------------------------------------------------------------------

/// A single check bound to a column position.
#[derive(Debug, Clone, PartialEq)]
enum Clause {
    DateWindow {
        column: usize,
        start: NaiveDate,
        end: NaiveDate,
    },
    Range {
        column: usize,
        low: f64,
        high: f64,
    },
    OneOf {
        column: usize,
        allowed: BTreeSet<CellValue>,
    },
    Contains {
        column: usize,
        /// Already lower-cased.
        needle: String,
    },
}

impl Clause {
    fn matches(&self, row: Row<'_>) -> bool {
        match self {
            Clause::DateWindow { column, start, end } => row
                .value(*column)
                .as_datetime()
                .is_some_and(|dt| (*start..=*end).contains(&dt.date())),
            Clause::Range { column, low, high } => row
                .value(*column)
                .as_f64()
                .is_some_and(|v| *low <= v && v <= *high),
            Clause::OneOf { column, allowed } => {
                let value = row.value(*column);
                if value.is_missing() {
                    allowed.contains(&CellValue::Null)
                } else {
                    allowed.contains(value)
                }
            }
            Clause::Contains { column, needle } => {
                let value = row.value(*column);
                !value.is_missing() && value.to_string().to_lowercase().contains(needle.as_str())
            }
        }
    }
}

/// Conjunction of clauses, evaluated in order with short-circuit.
///
/// Order: the time window, then numeric ranges, date ranges, set membership
/// and finally substring search. Filters of the same kind keep the order in
/// which they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn matches(&self, row: Row<'_>) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Validation + compilation
// ---------------------------------------------------------------------------

/// Check the time window on its own, so callers can keep export disabled
/// until it is valid.
pub fn validate_time_window(
    window: Option<&TimeWindow>,
    profiles: &Profiles,
) -> ExplorerResult<usize> {
    let window = window.ok_or_else(|| {
        ExplorerError::InvalidFilter("a time window is required before export".into())
    })?;
    let profile = profiles.get(&window.column).ok_or_else(|| {
        ExplorerError::InvalidFilter(format!("time column '{}' does not exist", window.column))
    })?;
    if !profile.kind.is_datetime() {
        return Err(ExplorerError::InvalidFilter(format!(
            "time column '{}' is {}, not datetime",
            window.column,
            profile.kind.label()
        )));
    }
    if window.start > window.end {
        return Err(ExplorerError::InvalidFilter(format!(
            "time window starts {} after it ends {}",
            window.start, window.end
        )));
    }
    let span = window.span_days();
    if span > MAX_WINDOW_DAYS {
        return Err(ExplorerError::InvalidFilter(format!(
            "time window spans {span} days, at most {MAX_WINDOW_DAYS} allowed"
        )));
    }
    Ok(profile.index)
}

/// Validate `spec` against `profiles` and build the row predicate.
/// No row is looked at here.
pub fn compile(spec: &FilterSpec, profiles: &Profiles) -> ExplorerResult<Predicate> {
    let time_column = validate_time_window(spec.time_window.as_ref(), profiles)?;

    let mut ordered: Vec<&ColumnFilter> = spec.filters.iter().collect();
    ordered.sort_by_key(|f| f.cost_rank());

    let mut clauses = Vec::with_capacity(ordered.len() + 1);
    if let Some(window) = &spec.time_window {
        clauses.push(Clause::DateWindow {
            column: time_column,
            start: window.start,
            end: window.end,
        });
    }
    for filter in ordered {
        clauses.extend(compile_filter(filter, profiles)?);
    }

    log::debug!("compiled predicate with {} clauses", clauses.len());
    Ok(Predicate { clauses })
}

/// `None` for a filter that constrains nothing, such as an empty substring.
fn compile_filter(filter: &ColumnFilter, profiles: &Profiles) -> ExplorerResult<Option<Clause>> {
    let name = filter.column();
    let profile = profiles
        .get(name)
        .ok_or_else(|| ExplorerError::UnknownColumn(name.to_string()))?;
    let column = profile.index;
    let mismatch = |wanted: &str| {
        ExplorerError::InvalidFilter(format!(
            "{wanted} filter on '{name}', which is {}",
            profile.kind.label()
        ))
    };

    match filter {
        ColumnFilter::Range { low, high, .. } => {
            if !matches!(profile.kind, ColumnKind::Numeric { .. }) {
                return Err(mismatch("range"));
            }
            if low.is_nan() || high.is_nan() || low > high {
                return Err(ExplorerError::InvalidFilter(format!(
                    "range on '{name}' has bounds [{low}, {high}]"
                )));
            }
            Ok(Some(Clause::Range {
                column,
                low: *low,
                high: *high,
            }))
        }
        ColumnFilter::DateRange { start, end, .. } => {
            if !profile.kind.is_datetime() {
                return Err(mismatch("date range"));
            }
            if start > end {
                return Err(ExplorerError::InvalidFilter(format!(
                    "date range on '{name}' starts {start} after it ends {end}"
                )));
            }
            Ok(Some(Clause::DateWindow {
                column,
                start: *start,
                end: *end,
            }))
        }
        ColumnFilter::OneOf { allowed, .. } => {
            if !matches!(profile.kind, ColumnKind::Categorical { .. }) {
                return Err(mismatch("membership"));
            }
            Ok(Some(Clause::OneOf {
                column,
                allowed: allowed.clone(),
            }))
        }
        ColumnFilter::Contains { query, .. } => {
            if !matches!(
                profile.kind,
                ColumnKind::Text | ColumnKind::Categorical { .. }
            ) {
                return Err(mismatch("substring"));
            }
            if query.is_empty() {
                return Ok(None);
            }
            Ok(Some(Clause::Contains {
                column,
                needle: query.to_lowercase(),
            }))
        }
    }
}
