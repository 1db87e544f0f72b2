use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use data_explorer::data::export::{Availability, ExportFormat, ExportPlanner, DEFAULT_PART_ROWS};
use data_explorer::data::filter::{ColumnFilter, FilterSpec, TimeWindow, MAX_WINDOW_DAYS};
use data_explorer::data::loader::{guess_cell_type, load_file};
use data_explorer::data::model::CellValue;
use data_explorer::state::Session;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Filter a Parquet, CSV, JSON or JSONL dataset by a time window and
/// per-column constraints, then export the subset.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the inferred kind and summary of every column
    Profile {
        /// Dataset to load
        file: PathBuf,
    },
    /// Apply filters and write the export artifact
    Export(ExportArgs),
    /// List export formats and whether they are available
    Formats,
}

#[derive(clap::Args)]
pub struct ExportArgs {
    /// Dataset to load
    pub file: PathBuf,

    /// JSON file holding a filter specification
    #[arg(long, value_name = "FILE")]
    pub filters: Option<PathBuf>,

    /// Datetime column for the required time window
    #[arg(long)]
    pub time_column: Option<String>,

    /// First day of the time window (YYYY-MM-DD, inclusive)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last day of the time window (YYYY-MM-DD, inclusive)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Numeric range, e.g. `reading=0.5..10`
    #[arg(long = "range", value_name = "COL=LOW..HIGH", value_parser = parse_range)]
    pub ranges: Vec<ColumnFilter>,

    /// Date range on another datetime column, e.g. `created=2024-01-01..2024-03-01`
    #[arg(long = "date-range", value_name = "COL=START..END", value_parser = parse_date_range)]
    pub date_ranges: Vec<ColumnFilter>,

    /// Allowed values, e.g. `sensor=a,b,null`
    #[arg(long = "one-of", value_name = "COL=V1,V2", value_parser = parse_one_of)]
    pub one_of: Vec<ColumnFilter>,

    /// Case-insensitive substring, e.g. `message=timeout`
    #[arg(long = "contains", value_name = "COL=TEXT", value_parser = parse_contains)]
    pub contains: Vec<ColumnFilter>,

    /// Columns to export, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Export format: csv or parquet
    #[arg(long, default_value = "csv")]
    pub format: ExportFormat,

    /// Maximum rows per artifact before the export is split into a ZIP
    #[arg(long, default_value_t = DEFAULT_PART_ROWS)]
    pub part_rows: usize,

    /// Directory the artifact is written to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Profile { file } => profile(&file),
            Command::Export(args) => export(args),
            Command::Formats => {
                for format in ExportFormat::ALL {
                    match format.availability() {
                        Availability::Available => println!("{format}: available"),
                        Availability::Unavailable(reason) => {
                            println!("{format}: unavailable ({reason})")
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn load_session(file: &Path, planner: ExportPlanner) -> Result<Session> {
    let dataset = load_file(file)?;
    let mut session = Session::with_planner(planner);
    session.set_dataset(dataset);
    Ok(session)
}

fn profile(file: &Path) -> Result<()> {
    let session = load_session(file, ExportPlanner::default())?;
    let rows = session.dataset.as_ref().map(|d| d.len()).unwrap_or(0);
    println!("{rows} rows");

    let mut profiles: Vec<_> = session.profiles.values().collect();
    profiles.sort_by_key(|p| p.index);
    for p in profiles {
        println!("  {:<24} {}", p.name, p.kind);
    }
    match &session.spec.time_window {
        Some(w) => println!("default time window: {} {} .. {}", w.column, w.start, w.end),
        None => println!("no datetime column: export is disabled"),
    }
    Ok(())
}

fn export(args: ExportArgs) -> Result<()> {
    if let Availability::Unavailable(reason) = args.format.availability() {
        bail!("{} export is unavailable: {reason}", args.format);
    }

    let mut session = load_session(&args.file, ExportPlanner::with_part_rows(args.part_rows))?;

    if let Some(path) = &args.filters {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading filters from {}", path.display()))?;
        let spec: FilterSpec = serde_json::from_str(&text)
            .with_context(|| format!("parsing filters in {}", path.display()))?;
        if let Some(window) = spec.time_window {
            session.set_time_window(window);
        }
        for filter in spec.filters {
            session.add_filter(filter);
        }
    }

    if args.time_column.is_some() || args.start.is_some() || args.end.is_some() {
        let current = session.spec.time_window.clone();
        let column = args
            .time_column
            .or_else(|| current.as_ref().map(|w| w.column.clone()))
            .context("no datetime column found; pass --time-column")?;
        let start = args.start.or_else(|| current.as_ref().map(|w| w.start));
        let end = args.end.or_else(|| current.as_ref().map(|w| w.end));
        let (Some(start), Some(end)) = (start, end) else {
            bail!("both --start and --end are required (at most {MAX_WINDOW_DAYS} days apart)");
        };
        session.set_time_window(TimeWindow::new(column, start, end));
    }

    for filter in args
        .ranges
        .into_iter()
        .chain(args.date_ranges)
        .chain(args.one_of)
        .chain(args.contains)
    {
        session.add_filter(filter);
    }

    if !args.columns.is_empty() {
        session.select_columns(args.columns);
    }

    if let Some(w) = &session.spec.time_window {
        log::info!("time window on '{}': {} .. {}", w.column, w.start, w.end);
    }
    session.apply().context("applying filters")?;

    let export = session.export(args.format).context("exporting")?;
    println!(
        "Filtered rows: {} x {} columns",
        export.rows, export.columns
    );

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let target = args.output.join(&export.artifact.file_name);
    std::fs::write(&target, &export.artifact.bytes)
        .with_context(|| format!("writing {}", target.display()))?;

    if export.is_archive() {
        println!(
            "Wrote {} ({} parts of at most {} rows)",
            target.display(),
            export.parts.len(),
            session.planner.part_rows()
        );
    } else {
        println!("Wrote {}", target.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Flag parsers
// ---------------------------------------------------------------------------

fn split_column(s: &str) -> Result<(String, &str), String> {
    let (column, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected COLUMN=VALUE, got '{s}'"))?;
    if column.trim().is_empty() {
        return Err(format!("missing column name in '{s}'"));
    }
    Ok((column.trim().to_string(), rest))
}

fn split_bounds(s: &str) -> Result<(&str, &str), String> {
    s.split_once("..")
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| format!("expected LOW..HIGH, got '{s}'"))
}

fn parse_range(s: &str) -> Result<ColumnFilter, String> {
    let (column, rest) = split_column(s)?;
    let (low, high) = split_bounds(rest)?;
    let low = low.parse::<f64>().map_err(|e| format!("low bound '{low}': {e}"))?;
    let high = high
        .parse::<f64>()
        .map_err(|e| format!("high bound '{high}': {e}"))?;
    Ok(ColumnFilter::Range { column, low, high })
}

fn parse_date_range(s: &str) -> Result<ColumnFilter, String> {
    let (column, rest) = split_column(s)?;
    let (start, end) = split_bounds(rest)?;
    let parse = |d: &str| {
        NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|e| format!("date '{d}': {e}"))
    };
    Ok(ColumnFilter::DateRange {
        column,
        start: parse(start)?,
        end: parse(end)?,
    })
}

fn parse_one_of(s: &str) -> Result<ColumnFilter, String> {
    let (column, rest) = split_column(s)?;
    let allowed = rest
        .split(',')
        .map(|v| match v.trim() {
            "null" => CellValue::Null,
            other => guess_cell_type(other),
        })
        .collect();
    Ok(ColumnFilter::OneOf { column, allowed })
}

fn parse_contains(s: &str) -> Result<ColumnFilter, String> {
    let (column, query) = split_column(s)?;
    Ok(ColumnFilter::Contains {
        column,
        query: query.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_flag_parses() {
        assert_eq!(
            parse_range("reading=0.5..10").unwrap(),
            ColumnFilter::Range {
                column: "reading".into(),
                low: 0.5,
                high: 10.0
            }
        );
        assert!(parse_range("reading=0.5").is_err());
        assert!(parse_range("=1..2").is_err());
    }

    #[test]
    fn one_of_flag_maps_null() {
        let ColumnFilter::OneOf { column, allowed } = parse_one_of("sensor=a, null").unwrap() else {
            panic!("expected one_of");
        };
        assert_eq!(column, "sensor");
        assert!(allowed.contains(&CellValue::Null));
        assert!(allowed.contains(&CellValue::String("a".into())));
    }

    #[test]
    fn cli_accepts_export_flags() {
        let cli = Cli::try_parse_from([
            "data-explorer",
            "export",
            "events.csv",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
            "--contains",
            "message=alp",
            "--columns",
            "time,message",
            "--format",
            "parquet",
        ])
        .unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.columns, vec!["time", "message"]);
        assert_eq!(args.format, ExportFormat::Parquet);
        assert_eq!(args.part_rows, DEFAULT_PART_ROWS);
        assert_eq!(args.contains.len(), 1);
    }
}
