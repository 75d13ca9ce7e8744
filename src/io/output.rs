//! Output writing with automatic archiving.
//!
//! Every table is written to its stable "current" path and to a timestamped
//! copy under `_archive/`, so history is append-only and a run never
//! overwrites evidence of the previous one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::error::Result;

pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        fs::create_dir_all(output_dir.join("_archive"))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Write a CSV table to `<name>.csv` plus an archive copy.
    pub fn save_csv(&self, name: &str, headers: &[&str], rows: &[Vec<String>]) -> Result<PathBuf> {
        let current = self.output_dir.join(format!("{}.csv", name));
        write_csv(&current, headers, rows)?;
        let archived = self.archive_path(name, "csv");
        write_csv(&archived, headers, rows)?;
        info!(output = %current.display(), rows = rows.len(), "wrote output table");
        Ok(current)
    }

    /// Write a JSON document (the audit report) plus an archive copy.
    pub fn save_json(&self, name: &str, value: &serde_json::Value) -> Result<PathBuf> {
        let current = self.output_dir.join(format!("{}.json", name));
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&current, &body)?;
        fs::write(self.archive_path(name, "json"), &body)?;
        info!(output = %current.display(), "wrote audit report");
        Ok(current)
    }

    fn archive_path(&self, name: &str, ext: &str) -> PathBuf {
        let today = Local::now().date_naive();
        self.output_dir
            .join("_archive")
            .join(format!("{}_{}.{}", name, today, ext))
    }
}

fn write_csv(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
