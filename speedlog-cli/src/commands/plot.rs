use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use speedlog_engine::store::{DataStore, MeasurementRecord, TIMESTAMP_FORMAT};
use tabled::{Table, Tabled, settings::Style};

use crate::error::Result;

const LOG_FILE_PREFIX: &str = "internet-speed-log-";
const LOG_FILE_SUFFIX: &str = ".txt";

/// Bits per megabit as shown in tables.
const BITS_PER_MEGABIT: f64 = 1024.0 * 1024.0;

#[derive(Serialize)]
struct LogDump<'a> {
    path: &'a Path,
    records: &'a [MeasurementRecord],
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Ping (ms)")]
    ping: String,
    #[tabled(rename = "Download (Mb/s)")]
    download: String,
    #[tabled(rename = "Upload (Mb/s)")]
    upload: String,
    #[tabled(rename = "Server")]
    server: String,
}

impl From<&MeasurementRecord> for Row {
    fn from(record: &MeasurementRecord) -> Self {
        Self {
            timestamp: record.timestamp().format(TIMESTAMP_FORMAT).to_string(),
            ping: format!("{:.2}", record.ping()),
            download: format!("{:.2}", to_megabits(record.download())),
            upload: format!("{:.2}", to_megabits(record.upload())),
            server: record.server_id().to_string(),
        }
    }
}

pub fn run(files: &[PathBuf], dir: &Path, json: bool) -> Result<()> {
    let files = if files.is_empty() {
        find_log_files(dir)?
    } else {
        files.to_vec()
    };

    if files.is_empty() {
        println!("No log files found in {}", dir.display());
        return Ok(());
    }

    let mut stores = Vec::with_capacity(files.len());
    for path in files {
        let mut store = DataStore::open(path)?;
        store.load()?;
        stores.push(store);
    }

    if json {
        let dumps: Vec<LogDump<'_>> = stores
            .iter()
            .map(|store| LogDump {
                path: store.path(),
                records: store.records(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&dumps)?);
        return Ok(());
    }

    for store in &stores {
        println!("{} ({} records)", store.path().display(), store.len());
        println!("{}", render_table(store.records()));
        println!();
    }
    Ok(())
}

fn to_megabits(bits_per_second: f64) -> f64 {
    bits_per_second / BITS_PER_MEGABIT
}

fn render_table(records: &[MeasurementRecord]) -> String {
    Table::new(records.iter().map(Row::from))
        .with(Style::modern())
        .to_string()
}

/// Log files in `dir`, sorted by name. Backups (`.txt.old`) are skipped.
fn find_log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(LOG_FILE_PREFIX)
            && name.ends_with(LOG_FILE_SUFFIX)
            && entry.file_type()?.is_file()
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
