use std::path::PathBuf;

use chrono::{Duration, NaiveDate};

use data_explorer::data::engine::FilteredSet;
use data_explorer::data::export::{ExportFormat, ExportPlanner, ExportRequest};
use data_explorer::data::model::{CellValue, Column, Dataset};

const SENSORS: [&str; 6] = ["north", "south", "east", "west", "roof", "basement"];
const LEVELS: [&str; 3] = ["info", "warn", "error"];

/// SplitMix64: a one-word generator, plenty for reproducible sample data.
struct EventRng(u64);

impl EventRng {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in [0, 1).
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[(self.next_u64() % items.len() as u64) as usize]
    }

    /// Normal sample around `mean`.
    fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        let radius = (-2.0 * (1.0 - self.unit()).ln()).sqrt();
        let angle = std::f64::consts::TAU * self.unit();
        mean + sd * radius * angle.sin()
    }
}

/// Usage: `generate_sample [ROWS] [OUTPUT_DIR]`
///
/// Writes `sample_events.csv` (timestamps as text) and, when Parquet support
/// is built in, `sample_events.parquet` (native timestamps).
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let rows: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 20_000,
    };
    let output_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));

    let mut rng = EventRng(42);
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow::anyhow!("invalid start timestamp"))?;

    let mut time = Vec::with_capacity(rows);
    let mut sensor = Vec::with_capacity(rows);
    let mut level = Vec::with_capacity(rows);
    let mut reading = Vec::with_capacity(rows);
    let mut status = Vec::with_capacity(rows);
    let mut message = Vec::with_capacity(rows);

    for i in 0..rows {
        // one event every ~5 minutes, spread over roughly 70 days at 20k rows
        time.push(CellValue::Datetime(start + Duration::seconds(i as i64 * 300)));
        let s = rng.pick(&SENSORS);
        sensor.push(CellValue::String(s.to_string()));
        let lvl = rng.pick(&LEVELS);
        level.push(CellValue::String(lvl.to_string()));

        let value = rng.normal(20.0, 4.0);
        // a few dropped readings
        reading.push(if rng.unit() < 0.02 {
            CellValue::Null
        } else {
            CellValue::Float((value * 100.0).round() / 100.0)
        });
        status.push(CellValue::Integer(200 + (rng.next_u64() % 4) as i64 * 100));
        message.push(CellValue::String(format!(
            "{lvl}: {s} reported {value:.2} (event {i})"
        )));
    }

    let dataset = Dataset::new(vec![
        Column::new("time", time),
        Column::new("sensor", sensor),
        Column::new("level", level),
        Column::new("reading", reading),
        Column::new("status", status),
        Column::new("message", message),
    ])?;

    std::fs::create_dir_all(&output_dir)?;
    let rows_set = FilteredSet::all(&dataset);
    let columns = dataset.column_names();
    let planner = ExportPlanner::with_part_rows(rows.max(1));

    for format in ExportFormat::ALL {
        if !format.is_available() {
            println!("Skipping {format}: not built in");
            continue;
        }
        let export = planner.plan(&ExportRequest {
            rows: &rows_set,
            columns: &columns,
            format,
        })?;
        let path = output_dir.join(format!("sample_events.{}", format.extension()));
        std::fs::write(&path, &export.artifact.bytes)?;
        println!("Wrote {rows} events to {}", path.display());
    }
    Ok(())
}
