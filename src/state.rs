use chrono::Duration;

use crate::data::engine::{apply, FilteredSet};
use crate::data::export::{Export, ExportFormat, ExportPlanner, ExportRequest};
use crate::data::filter::{compile, validate_time_window, ColumnFilter, FilterSpec, TimeWindow};
use crate::data::infer::{default_time_column, infer, ColumnKind, Profiles};
use crate::data::model::Dataset;
use crate::data::{ExplorerError, ExplorerResult};

/// Days covered by the pre-filled time window, ending on the latest date.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Everything one user session holds, independent of any front end.
#[derive(Debug, Default)]
pub struct Session {
    /// Loaded dataset (None until a file is loaded).
    pub dataset: Option<Dataset>,

    /// Column profiles of the loaded dataset.
    pub profiles: Profiles,

    /// Current filter selections.
    pub spec: FilterSpec,

    /// Columns to export, in export order.
    pub selected_columns: Vec<String>,

    /// Rows passing the last applied filters (cleared on any edit).
    pub applied_rows: Option<Vec<usize>>,

    /// Row threshold for splitting exports.
    pub planner: ExportPlanner,

    /// Status / error message for the user.
    pub status_message: Option<String>,
}

impl Session {
    pub fn with_planner(planner: ExportPlanner) -> Self {
        Self {
            planner,
            ..Self::default()
        }
    }

    /// Ingest a newly loaded dataset: profile it and pre-fill the time
    /// window and column selection.
    pub fn set_dataset(&mut self, mut dataset: Dataset) {
        self.profiles = infer(&mut dataset);
        self.selected_columns = dataset.column_names();
        self.spec = FilterSpec {
            time_window: self.default_time_window(),
            filters: Vec::new(),
        };
        self.applied_rows = None;
        self.status_message = if self.spec.time_window.is_none() {
            Some("No datetime columns found. A time column is required for export.".to_string())
        } else {
            None
        };
        self.dataset = Some(dataset);
    }

    /// Default window on the default time column: the last
    /// [`DEFAULT_WINDOW_DAYS`] days of data, clipped to the first date.
    fn default_time_window(&self) -> Option<TimeWindow> {
        let column = default_time_column(&self.profiles)?;
        let ColumnKind::Datetime {
            min: Some(min),
            max: Some(max),
        } = self.profiles.get(&column)?.kind
        else {
            return None;
        };
        let end = max.date();
        let start = (end - Duration::days(DEFAULT_WINDOW_DAYS)).max(min.date());
        Some(TimeWindow::new(column, start, end))
    }

    pub fn set_time_window(&mut self, window: TimeWindow) {
        self.spec.time_window = Some(window);
        self.applied_rows = None;
    }

    pub fn add_filter(&mut self, filter: ColumnFilter) {
        self.spec.filters.push(filter);
        self.applied_rows = None;
    }

    /// Drop every optional filter on `column`.
    pub fn clear_filters_on(&mut self, column: &str) {
        self.spec.filters.retain(|f| f.column() != column);
        self.applied_rows = None;
    }

    pub fn select_columns(&mut self, columns: Vec<String>) {
        self.selected_columns = columns;
    }

    /// Recompile the filters and recompute the surviving rows.
    pub fn apply(&mut self) -> ExplorerResult<usize> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| ExplorerError::InvalidFilter("no dataset loaded".into()))?;
        let predicate = match compile(&self.spec, &self.profiles) {
            Ok(p) => p,
            Err(e) => {
                self.applied_rows = None;
                self.status_message = Some(e.to_string());
                return Err(e);
            }
        };
        let rows = apply(dataset, &predicate).indices().to_vec();
        let count = rows.len();
        self.applied_rows = Some(rows);
        self.status_message = None;
        Ok(count)
    }

    /// Rows from the last successful [`Session::apply`].
    pub fn filtered(&self) -> Option<FilteredSet<'_>> {
        let dataset = self.dataset.as_ref()?;
        let rows = self.applied_rows.clone()?;
        Some(FilteredSet::from_indices(dataset, rows))
    }

    /// Export is enabled once the filters were applied with a valid window.
    pub fn export_enabled(&self) -> bool {
        self.applied_rows.is_some()
            && validate_time_window(self.spec.time_window.as_ref(), &self.profiles).is_ok()
    }

    /// Serialize the applied rows and selected columns in `format`.
    pub fn export(&self, format: ExportFormat) -> ExplorerResult<Export> {
        validate_time_window(self.spec.time_window.as_ref(), &self.profiles)?;
        let rows = self.filtered().ok_or_else(|| {
            ExplorerError::InvalidFilter("apply the filters before exporting".into())
        })?;
        log::info!(
            "export {format}: {} rows x {} columns",
            rows.len(),
            self.selected_columns.len()
        );
        self.planner.plan(&ExportRequest {
            rows: &rows,
            columns: &self.selected_columns,
            format,
        })
    }
}
