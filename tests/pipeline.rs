//! End-to-end tests: load a file, profile it, filter it and export it.

use std::io::{Cursor, Read, Write};

use chrono::NaiveDate;
use tempfile::TempDir;

use data_explorer::data::export::{ExportFormat, ExportPlanner};
use data_explorer::data::filter::{ColumnFilter, TimeWindow};
use data_explorer::data::loader::{load_file, read_csv};
use data_explorer::data::model::Dataset;
use data_explorer::data::ExplorerError;
use data_explorer::state::Session;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 60 events, one every 12 hours from 2024-01-01, with a few gaps.
fn events_csv() -> String {
    let mut text = String::from("time,sensor,reading,note\n");
    for i in 0..60 {
        let at = date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap() + chrono::Duration::hours(12 * i);
        let sensor = ["north", "south", "east"][i as usize % 3];
        let reading = if i % 7 == 0 {
            String::new()
        } else {
            format!("{:.1}", i as f64 * 0.5)
        };
        let note = if i % 5 == 0 { "Alpha event" } else { "routine" };
        text.push_str(&format!(
            "{},{sensor},{reading},{note} {i}\n",
            at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    text
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

fn session_for(dataset: Dataset, planner: ExportPlanner) -> Session {
    let mut session = Session::with_planner(planner);
    session.set_dataset(dataset);
    session
}

fn cells_as_text(ds: &Dataset) -> Vec<Vec<String>> {
    (0..ds.len())
        .map(|r| {
            let row = ds.row(r).unwrap();
            (0..ds.columns().len()).map(|c| row.value(c).to_string()).collect()
        })
        .collect()
}

#[test]
fn csv_export_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "events.csv", &events_csv());

    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::default());
    session.set_time_window(TimeWindow::new("time", date(2024, 1, 5), date(2024, 1, 20)));
    session.add_filter(ColumnFilter::Range {
        column: "reading".into(),
        low: 5.0,
        high: 20.0,
    });
    let kept = session.apply().unwrap();
    assert!(kept > 0);

    let export = session.export(ExportFormat::Csv).unwrap();
    assert_eq!(export.artifact.file_name, "filtered.csv");

    let reparsed = read_csv(export.artifact.bytes.as_slice()).unwrap();
    let expected = session.filtered().unwrap().materialize();
    assert_eq!(reparsed.len(), kept);
    assert_eq!(reparsed.column_names(), expected.column_names());
    assert_eq!(cells_as_text(&reparsed), cells_as_text(&expected));
}

#[test]
fn csv_codes_and_missing_tokens_survive_export() {
    let dir = TempDir::new().unwrap();
    let text = "time,code,reading\n\
                2024-03-01 08:00:00,007,1.5\n\
                2024-03-02 08:00:00,A12,NA\n\
                2024-03-03 08:00:00,1.50,3.0\n";
    let path = write_file(&dir, "codes.csv", text);

    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::default());
    assert_eq!(session.profiles["reading"].kind.label(), "numeric");
    session.set_time_window(TimeWindow::new("time", date(2024, 3, 1), date(2024, 3, 3)));
    session.select_columns(vec!["code".into()]);
    assert_eq!(session.apply().unwrap(), 3);
    let export = session.export(ExportFormat::Csv).unwrap();
    assert_eq!(
        String::from_utf8(export.artifact.bytes).unwrap(),
        "code\n007\nA12\n1.50\n"
    );

    session.add_filter(ColumnFilter::Range {
        column: "reading".into(),
        low: 1.0,
        high: 3.0,
    });
    assert_eq!(session.apply().unwrap(), 2);
    assert_eq!(session.filtered().unwrap().indices(), &[0, 2]);
}

#[test]
fn substring_filter_on_jsonl_is_case_insensitive() {
    let dir = TempDir::new().unwrap();
    let lines = [
        r#"{"time": "2024-05-01T10:00:00Z", "label": "Alpha"}"#,
        r#"{"time": "2024-05-02T10:00:00Z", "label": "beta"}"#,
        r#"{"time": "2024-05-03T10:00:00Z", "label": null}"#,
    ];
    let path = write_file(&dir, "events.jsonl", &lines.join("\n"));

    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::default());
    assert_eq!(session.spec.time_window.as_ref().unwrap().column, "time");
    session.add_filter(ColumnFilter::Contains {
        column: "label".into(),
        query: "alp".into(),
    });
    assert_eq!(session.apply().unwrap(), 1);
    assert_eq!(session.filtered().unwrap().indices(), &[0]);
}

#[test]
fn unknown_filter_column_is_reported_before_filtering() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "events.csv", &events_csv());
    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::default());
    session.add_filter(ColumnFilter::Contains {
        column: "ghost".into(),
        query: "x".into(),
    });
    assert!(matches!(
        session.apply(),
        Err(ExplorerError::UnknownColumn(name)) if name == "ghost"
    ));
    assert!(session.filtered().is_none());
}

#[test]
fn large_export_is_split_into_zip_parts() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "events.csv", &events_csv());

    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::with_part_rows(10));
    session.set_time_window(TimeWindow::new("time", date(2024, 1, 1), date(2024, 1, 31)));
    session.select_columns(vec!["note".into(), "sensor".into()]);
    let kept = session.apply().unwrap();
    assert_eq!(kept, 60);

    let export = session.export(ExportFormat::Csv).unwrap();
    assert!(export.is_archive());
    assert_eq!(export.artifact.mime, "application/zip");
    assert_eq!(export.parts.len(), 6);

    let mut archive = zip::ZipArchive::new(Cursor::new(export.artifact.bytes)).unwrap();
    let mut total = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        assert_eq!(file.name(), format!("filtered_part_{}.csv", i + 1));
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        let part = read_csv(text.as_bytes()).unwrap();
        assert_eq!(part.column_names(), vec!["note", "sensor"]);
        total += part.len();
    }
    assert_eq!(total, kept);
}

#[cfg(feature = "parquet")]
#[test]
fn parquet_export_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "events.csv", &events_csv());

    let mut session = session_for(load_file(&path).unwrap(), ExportPlanner::default());
    session.set_time_window(TimeWindow::new("time", date(2024, 1, 10), date(2024, 1, 25)));
    let kept = session.apply().unwrap();

    let export = session.export(ExportFormat::Parquet).unwrap();
    let out = dir.path().join(&export.artifact.file_name);
    std::fs::write(&out, &export.artifact.bytes).unwrap();

    let reloaded = session_for(load_file(&out).unwrap(), ExportPlanner::default());
    assert_eq!(reloaded.dataset.as_ref().unwrap().len(), kept);
    assert!(reloaded.profiles["time"].kind.is_datetime());
    assert_eq!(
        cells_as_text(reloaded.dataset.as_ref().unwrap()),
        cells_as_text(&session.filtered().unwrap().materialize())
    );
}
