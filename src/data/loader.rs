use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value as JsonValue;

use super::model::{CellValue, Column, Dataset};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a tabular dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – any flat schema (requires the `parquet` feature)
/// * `.csv`     – header row, one record per line, typed per column
/// * `.json`    – `[{ "col": value, ... }, ...]`, falling back to JSON Lines
/// * `.jsonl`   – one JSON object per line
pub fn load_file(path: &Path) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "csv" => {
            let file = std::fs::File::open(path).context("opening CSV file")?;
            read_csv(file)
        }
        "json" => {
            let text = std::fs::read_to_string(path).context("reading JSON file")?;
            read_json(&text)
        }
        "jsonl" | "ndjson" => {
            let text = std::fs::read_to_string(path).context("reading JSONL file")?;
            read_json_lines(&text)
        }
        other => bail!("Unsupported file extension: .{other} (expected parquet, csv, json or jsonl)"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "loaded {} rows x {} columns from {}",
        dataset.len(),
        dataset.columns().len(),
        path.display()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Column assembly
// ---------------------------------------------------------------------------

/// Collects cells record by record; columns appear in first-seen order and a
/// record that lacks a column gets a missing cell there.
#[derive(Default)]
struct ColumnsBuilder {
    names: Vec<String>,
    positions: HashMap<String, usize>,
    values: Vec<Vec<CellValue>>,
    rows: usize,
}

impl ColumnsBuilder {
    #[cfg_attr(not(feature = "parquet"), allow(dead_code))]
    fn with_names(names: Vec<String>) -> Self {
        let mut builder = Self::default();
        for name in names {
            builder.position(&name);
        }
        builder
    }

    fn position(&mut self, name: &str) -> usize {
        if let Some(&pos) = self.positions.get(name) {
            return pos;
        }
        let pos = self.names.len();
        self.names.push(name.to_string());
        self.positions.insert(name.to_string(), pos);
        self.values.push(vec![CellValue::Null; self.rows]);
        pos
    }

    fn push_record<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (String, CellValue)>,
    {
        for (name, value) in cells {
            let pos = self.position(&name);
            // a repeated key keeps its last value
            if self.values[pos].len() > self.rows {
                self.values[pos].pop();
            }
            self.values[pos].push(value);
        }
        self.rows += 1;
        for col in &mut self.values {
            col.resize(self.rows, CellValue::Null);
        }
    }

    fn finish(self) -> Result<Dataset> {
        let columns = self
            .names
            .into_iter()
            .zip(self.values)
            .map(|(name, values)| Column::new(name, values))
            .collect();
        Ok(Dataset::new(columns)?)
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "time": "2024-01-01T00:00:00", "sensor": "a", "reading": 1.5 },
///   ...
/// ]
/// ```
///
/// Anything that is not a top-level array is retried as JSON Lines.
pub fn read_json(text: &str) -> Result<Dataset> {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Array(records)) => {
            let mut builder = ColumnsBuilder::default();
            for (i, rec) in records.into_iter().enumerate() {
                push_json_record(&mut builder, rec)
                    .with_context(|| format!("JSON record {i}"))?;
            }
            builder.finish()
        }
        _ => read_json_lines(text).context("input is neither a JSON array nor JSON Lines"),
    }
}

/// One JSON object per non-blank line.
pub fn read_json_lines(text: &str) -> Result<Dataset> {
    let mut builder = ColumnsBuilder::default();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: JsonValue = serde_json::from_str(line)
            .with_context(|| format!("parsing JSON on line {}", line_no + 1))?;
        push_json_record(&mut builder, rec).with_context(|| format!("line {}", line_no + 1))?;
    }
    builder.finish()
}

fn push_json_record(builder: &mut ColumnsBuilder, rec: JsonValue) -> Result<()> {
    let JsonValue::Object(obj) = rec else {
        bail!("record is not a JSON object");
    };
    builder.push_record(obj.into_iter().map(|(k, v)| (k, json_to_cell(v))));
    Ok(())
}

fn json_to_cell(val: JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => CellValue::String(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(b),
        JsonValue::Null => CellValue::Null,
        // nested arrays and objects are kept as their JSON text
        other => CellValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Text fields read as missing, on top of the empty string.
pub const MISSING_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "NaT", "None", "n/a", "nan", "null",
];

pub fn is_missing_token(s: &str) -> bool {
    s.is_empty() || MISSING_TOKENS.contains(&s)
}

/// CSV layout: header row with column names, then one record per row.
///
/// Each column is typed as a whole: integers, floats or booleans only when
/// every non-missing field parses, otherwise the fields stay text exactly as
/// written.
pub fn read_csv<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        bail!("CSV has no header row");
    }

    let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {}", row_no + 1))?;
        for (col, field) in raw.iter_mut().zip(record.iter()) {
            col.push((!is_missing_token(field)).then(|| field.to_string()));
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, fields)| {
            let kind = csv_column_kind(&fields);
            log::debug!("CSV column '{name}' read as {kind:?}");
            let values = fields.into_iter().map(|f| csv_cell(f, kind)).collect();
            Column::new(name, values)
        })
        .collect();
    Ok(Dataset::new(columns)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvKind {
    Integer,
    Float,
    Bool,
    Text,
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn csv_column_kind(fields: &[Option<String>]) -> CsvKind {
    let all = |accepts: fn(&str) -> bool| fields.iter().flatten().all(|f| accepts(f));
    if all(|f| f.parse::<i64>().is_ok()) {
        CsvKind::Integer
    } else if all(|f| f.parse::<f64>().is_ok()) {
        CsvKind::Float
    } else if all(|f| parse_bool(f).is_some()) {
        CsvKind::Bool
    } else {
        CsvKind::Text
    }
}

fn csv_cell(field: Option<String>, kind: CsvKind) -> CellValue {
    let Some(f) = field else {
        return CellValue::Null;
    };
    match kind {
        CsvKind::Integer => match f.parse() {
            Ok(i) => CellValue::Integer(i),
            Err(_) => CellValue::String(f),
        },
        CsvKind::Float => match f.parse() {
            Ok(v) => CellValue::Float(v),
            Err(_) => CellValue::String(f),
        },
        CsvKind::Bool => parse_bool(&f).map_or(CellValue::String(f), CellValue::Bool),
        CsvKind::Text => CellValue::String(f),
    }
}

/// Guess the cell kind of one standalone text value, such as a filter
/// argument. Missing tokens read as missing.
pub fn guess_cell_type(s: &str) -> CellValue {
    if is_missing_token(s) {
        return CellValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return CellValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return CellValue::Float(f);
    }
    if let Some(b) = parse_bool(s) {
        return CellValue::Bool(b);
    }
    CellValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a flat Parquet file. Integer, float, boolean, string and
/// timestamp/date columns map onto the matching cell kinds; anything else is
/// read as text.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
#[cfg(feature = "parquet")]
fn load_parquet(path: &Path) -> Result<Dataset> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let names = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut columns = ColumnsBuilder::with_names(names);
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (pos, col) in batch.columns().iter().enumerate() {
            let cells = arrow_cells(col)
                .with_context(|| format!("column '{}'", columns.names[pos]))?;
            columns.values[pos].extend(cells);
        }
        columns.rows += batch.num_rows();
    }
    columns.finish()
}

#[cfg(not(feature = "parquet"))]
fn load_parquet(_path: &Path) -> Result<Dataset> {
    bail!("Parquet input needs the `parquet` feature")
}

// -- Arrow helpers --

/// Convert one Arrow column into cells, nulls becoming missing.
#[cfg(feature = "parquet")]
fn arrow_cells(col: &arrow::array::ArrayRef) -> Result<Vec<CellValue>> {
    use arrow::array::{Array, AsArray};
    use arrow::compute::cast;
    use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit};

    let len = col.len();
    let cells = match col.data_type() {
        DataType::Null => vec![CellValue::Null; len],
        DataType::Boolean => {
            let arr = col.as_boolean();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Bool(arr.value(i))
                    }
                })
                .collect()
        }
        dt if dt.is_integer() => {
            let casted = cast(col, &DataType::Int64).context("casting to Int64")?;
            let arr = casted.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Integer(arr.value(i))
                    }
                })
                .collect()
        }
        dt if dt.is_floating() => {
            let casted = cast(col, &DataType::Float64).context("casting to Float64")?;
            let arr = casted.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Float(arr.value(i))
                    }
                })
                .collect()
        }
        DataType::Timestamp(_, tz) => {
            let target = DataType::Timestamp(TimeUnit::Microsecond, tz.clone());
            micros_to_cells(&cast(col, &target).context("casting timestamps")?)
        }
        DataType::Date32 | DataType::Date64 => {
            let target = DataType::Timestamp(TimeUnit::Microsecond, None);
            micros_to_cells(&cast(col, &target).context("casting dates")?)
        }
        other => {
            let casted = cast(col, &DataType::Utf8)
                .with_context(|| format!("unsupported column type {other:?}"))?;
            let arr = casted.as_string::<i32>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::String(arr.value(i).to_string())
                    }
                })
                .collect()
        }
    };

    Ok(cells)
}

/// Zoned Arrow timestamps hold UTC instants and are read as UTC.
#[cfg(feature = "parquet")]
fn micros_to_cells(col: &arrow::array::ArrayRef) -> Vec<CellValue> {
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::TimestampMicrosecondType;

    let arr = col.as_primitive::<TimestampMicrosecondType>();
    (0..arr.len())
        .map(|i| {
            if arr.is_null(i) {
                return CellValue::Null;
            }
            chrono::DateTime::from_timestamp_micros(arr.value(i))
                .map(|dt| CellValue::Datetime(dt.naive_utc()))
                .unwrap_or(CellValue::Null)
        })
        .collect()
}
