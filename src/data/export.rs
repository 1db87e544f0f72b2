use std::fmt;
use std::io::{Cursor, Write};
use std::ops::Range;
use std::str::FromStr;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::engine::FilteredSet;
use super::error::{ExplorerError, ExplorerResult};
use super::model::Dataset;

/// Largest number of rows written into a single artifact.
pub const DEFAULT_PART_ROWS: usize = 500_000;

const BASE_NAME: &str = "filtered";

// ---------------------------------------------------------------------------
// Formats and capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Parquet,
}

/// Whether a format's serializer is built into this binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Csv, ExportFormat::Parquet];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Parquet => "application/octet-stream",
        }
    }

    pub fn availability(self) -> Availability {
        match self {
            ExportFormat::Csv => Availability::Available,
            ExportFormat::Parquet if cfg!(feature = "parquet") => Availability::Available,
            ExportFormat::Parquet => Availability::Unavailable(
                "built without the `parquet` feature".to_string(),
            ),
        }
    }

    pub fn is_available(self) -> bool {
        self.availability() == Availability::Available
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "parquet" | "pq" => Ok(ExportFormat::Parquet),
            other => Err(format!("unknown export format '{other}' (expected csv or parquet)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and artifacts
// ---------------------------------------------------------------------------

/// One export action: which rows, which columns, which format.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'r, 'd> {
    pub rows: &'r FilteredSet<'d>,
    pub columns: &'r [String],
    pub format: ExportFormat,
}

/// A single output file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// One serialized slice of the filtered rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSummary {
    pub file_name: String,
    pub rows: usize,
}

/// Result of an export: the downloadable artifact plus what went into it.
#[derive(Debug, Clone)]
pub struct Export {
    pub artifact: Artifact,
    pub parts: Vec<PartSummary>,
    pub rows: usize,
    pub columns: usize,
}

impl Export {
    pub fn is_archive(&self) -> bool {
        self.parts.len() > 1
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Decides between a single artifact and a ZIP of row-bounded parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportPlanner {
    part_rows: usize,
}

impl Default for ExportPlanner {
    fn default() -> Self {
        Self {
            part_rows: DEFAULT_PART_ROWS,
        }
    }
}

impl ExportPlanner {
    /// Planner with a custom part size (at least one row).
    pub fn with_part_rows(part_rows: usize) -> Self {
        Self {
            part_rows: part_rows.max(1),
        }
    }

    pub fn part_rows(&self) -> usize {
        self.part_rows
    }

    pub fn plan(&self, request: &ExportRequest<'_, '_>) -> ExplorerResult<Export> {
        let format = request.format;
        if let Availability::Unavailable(reason) = format.availability() {
            return Err(ExplorerError::CapabilityUnavailable {
                format: format.to_string(),
                reason,
            });
        }

        let dataset = request.rows.dataset();
        let columns = resolve_columns(dataset, request.columns)?;
        let rows = request.rows.indices();
        let ranges = partition(rows.len(), self.part_rows);

        if let [only] = ranges.as_slice() {
            let file_name = format!("{BASE_NAME}.{}", format.extension());
            let bytes = serialize(format, dataset, &rows[only.clone()], &columns)?;
            log::info!("exported {} rows to {file_name} ({} bytes)", rows.len(), bytes.len());
            return Ok(Export {
                parts: vec![PartSummary {
                    file_name: file_name.clone(),
                    rows: rows.len(),
                }],
                artifact: Artifact {
                    file_name,
                    mime: format.mime(),
                    bytes,
                },
                rows: rows.len(),
                columns: columns.len(),
            });
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        // fixed timestamp keeps archives reproducible
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        let mut parts = Vec::with_capacity(ranges.len());
        for (n, range) in ranges.into_iter().enumerate() {
            let file_name = format!("{BASE_NAME}_part_{}.{}", n + 1, format.extension());
            let bytes = serialize(format, dataset, &rows[range.clone()], &columns)?;
            zip.start_file(file_name.as_str(), options)?;
            zip.write_all(&bytes)?;
            log::debug!("wrote {file_name}: {} rows", range.len());
            parts.push(PartSummary {
                file_name,
                rows: range.len(),
            });
        }
        let bytes = zip.finish()?.into_inner();
        log::info!(
            "exported {} rows in {} parts ({} bytes)",
            rows.len(),
            parts.len(),
            bytes.len()
        );

        Ok(Export {
            artifact: Artifact {
                file_name: format!("{BASE_NAME}_parts.zip"),
                mime: "application/zip",
                bytes,
            },
            parts,
            rows: rows.len(),
            columns: columns.len(),
        })
    }
}

/// Split `row_count` rows into contiguous ranges of at most `part_rows`.
/// At or below the threshold this is a single range, even when empty.
pub fn partition(row_count: usize, part_rows: usize) -> Vec<Range<usize>> {
    let part_rows = part_rows.max(1);
    if row_count <= part_rows {
        return vec![0..row_count];
    }
    (0..row_count)
        .step_by(part_rows)
        .map(|start| start..(start + part_rows).min(row_count))
        .collect()
}

fn resolve_columns(dataset: &Dataset, selected: &[String]) -> ExplorerResult<Vec<usize>> {
    if selected.is_empty() {
        return Err(ExplorerError::EmptySelection);
    }
    selected
        .iter()
        .map(|name| {
            dataset
                .column_index(name)
                .ok_or_else(|| ExplorerError::UnknownColumn(name.clone()))
        })
        .collect()
}

fn serialize(
    format: ExportFormat,
    dataset: &Dataset,
    rows: &[usize],
    columns: &[usize],
) -> ExplorerResult<Vec<u8>> {
    match format {
        ExportFormat::Csv => write_csv(dataset, rows, columns),
        ExportFormat::Parquet => write_parquet(dataset, rows, columns),
    }
}

// ---------------------------------------------------------------------------
// CSV writer
// ---------------------------------------------------------------------------

fn write_csv(dataset: &Dataset, rows: &[usize], columns: &[usize]) -> ExplorerResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns.iter().map(|&c| dataset.columns()[c].name.as_str()))?;
    for row in rows.iter().filter_map(|&r| dataset.row(r)) {
        writer.write_record(columns.iter().map(|&c| row.value(c).to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExplorerError::Io(e.into_error()))
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

#[cfg(feature = "parquet")]
fn write_parquet(dataset: &Dataset, rows: &[usize], columns: &[usize]) -> ExplorerResult<Vec<u8>> {
    use std::sync::Arc;

    use arrow::array::{
        ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
    };
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    use super::model::{CellValue, Storage};

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

    for &c in columns {
        let column = &dataset.columns()[c];
        let cells = rows.iter().map(|&r| &column.values[r]);

        // Schema comes from the whole column so every part agrees.
        let (data_type, array): (DataType, ArrayRef) = match column.storage() {
            Storage::Numeric
                if column
                    .values
                    .iter()
                    .all(|v| v.is_missing() || matches!(v, CellValue::Integer(_))) =>
            {
                let values: Vec<Option<i64>> = cells
                    .map(|v| match v {
                        CellValue::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                (DataType::Int64, Arc::new(Int64Array::from(values)))
            }
            Storage::Numeric => {
                let values: Vec<Option<f64>> = cells.map(CellValue::as_f64).collect();
                (DataType::Float64, Arc::new(Float64Array::from(values)))
            }
            Storage::Boolean => {
                let values: Vec<Option<bool>> = cells
                    .map(|v| match v {
                        CellValue::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                (DataType::Boolean, Arc::new(BooleanArray::from(values)))
            }
            Storage::Datetime => {
                let values: Vec<Option<i64>> = cells
                    .map(|v| v.as_datetime().map(|dt| dt.and_utc().timestamp_micros()))
                    .collect();
                (
                    DataType::Timestamp(TimeUnit::Microsecond, None),
                    Arc::new(TimestampMicrosecondArray::from(values)),
                )
            }
            Storage::Generic => {
                let values: Vec<Option<String>> = cells
                    .map(|v| (!v.is_missing()).then(|| v.to_string()))
                    .collect();
                (DataType::Utf8, Arc::new(StringArray::from(values)))
            }
        };
        fields.push(Field::new(column.name.as_str(), data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_created_by(concat!("data-explorer ", env!("CARGO_PKG_VERSION")).to_string())
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
    writer.write(&batch)?;
    Ok(writer.into_inner()?)
}

#[cfg(not(feature = "parquet"))]
fn write_parquet(_: &Dataset, _: &[usize], _: &[usize]) -> ExplorerResult<Vec<u8>> {
    Err(ExplorerError::CapabilityUnavailable {
        format: ExportFormat::Parquet.to_string(),
        reason: "built without the `parquet` feature".to_string(),
    })
}
