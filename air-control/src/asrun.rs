//! As-run writer: the authoritative, append-only record of what actually
//! aired. Two files per `(channel_id, broadcast_date)`: a fixed-width
//! `.asrun` text table (`TIME | DUR | TYPE | EVENT_ID | TITLE/ASSET`) a
//! human or legacy traffic system can read directly, and a `.jsonl`
//! sidecar carrying the full structured record. Midnight UTC rolls both
//! files over to a new `broadcast_date`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::ControlError;

/// Outcome enum mirrored onto the `STATUS` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AsRunStatus {
    Aired,
    Truncated,
    Short,
    Skipped,
    Substituted,
    Error,
}

impl AsRunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Aired => "AIRED",
            Self::Truncated => "TRUNCATED",
            Self::Short => "SHORT",
            Self::Skipped => "SKIPPED",
            Self::Substituted => "SUBSTITUTED",
            Self::Error => "ERROR",
        }
    }
}

/// One row the as-run writer appends. `event_id` doubles as the JSONL
/// sidecar's idempotency key and the fixed-width table's `EVENT_ID` column.
#[derive(Debug, Clone, Serialize)]
pub struct AsRunEntry {
    pub event_id: String,
    pub block_id: String,
    pub title: String,
    pub actual_start_utc_ms: i64,
    pub actual_duration_ms: i64,
    pub status: AsRunStatus,
    pub reason: Option<String>,
    pub swap_tick: Option<i64>,
    pub fence_tick: Option<i64>,
}

/// Owns the currently open file pair for one channel, rotating at
/// local-midnight-UTC-date boundaries. A fresh `AsRunWriter` opens nothing
/// until the first `record` call, so a channel that never airs anything
/// never creates an empty file.
pub struct AsRunWriter {
    directory: PathBuf,
    channel_id: String,
    current_date: Option<NaiveDate>,
    fixed_width: Option<File>,
    jsonl: Option<File>,
}

impl AsRunWriter {
    pub fn new(directory: impl Into<PathBuf>, channel_id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            channel_id: channel_id.into(),
            current_date: None,
            fixed_width: None,
            jsonl: None,
        }
    }

    /// Appends one row, rotating to a fresh file pair first if the entry's
    /// UTC date differs from the currently open pair's date.
    pub fn record(&mut self, entry: &AsRunEntry) -> Result<(), ControlError> {
        let date = DateTime::from_timestamp_millis(entry.actual_start_utc_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();

        if self.current_date != Some(date) {
            self.rotate(date)?;
        }

        if let Some(file) = &mut self.fixed_width {
            let line = format!(
                "{:<24} | {:>10} | {:<11} | {:<20} | {}\n",
                DateTime::from_timestamp_millis(entry.actual_start_utc_ms)
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
                entry.actual_duration_ms,
                entry.status.as_str(),
                entry.event_id,
                entry.title,
            );
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }

        if let Some(file) = &mut self.jsonl {
            let mut line = serde_json::to_vec(entry)?;
            line.push(b'\n');
            file.write_all(&line)?;
            file.flush()?;
        }

        Ok(())
    }

    fn rotate(&mut self, date: NaiveDate) -> Result<(), ControlError> {
        std::fs::create_dir_all(&self.directory)?;
        let stem = format!("{}_{}", self.channel_id, date.format("%Y-%m-%d"));
        self.fixed_width = Some(self.open_append(&self.directory.join(format!("{stem}.asrun")))?);
        self.jsonl = Some(self.open_append(&self.directory.join(format!("{stem}.jsonl")))?);
        self.current_date = Some(date);
        Ok(())
    }

    fn open_append(&self, path: &Path) -> Result<File, ControlError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start_ms: i64) -> AsRunEntry {
        AsRunEntry {
            event_id: "evt-1".into(),
            block_id: "b1".into(),
            title: "Segment One".into(),
            actual_start_utc_ms: start_ms,
            actual_duration_ms: 30_000,
            status: AsRunStatus::Aired,
            reason: None,
            swap_tick: Some(900),
            fence_tick: Some(900),
        }
    }

    #[test]
    fn record_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AsRunWriter::new(dir.path(), "ch1");
        writer.record(&entry(0)).unwrap();

        let stem = format!("ch1_{}", DateTime::from_timestamp_millis(0).unwrap().date_naive().format("%Y-%m-%d"));
        assert!(dir.path().join(format!("{stem}.asrun")).exists());
        assert!(dir.path().join(format!("{stem}.jsonl")).exists());
    }

    #[test]
    fn crossing_midnight_rotates_to_a_new_file_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AsRunWriter::new(dir.path(), "ch1");

        let day_one_ms = 0;
        let day_two_ms = 2 * 24 * 60 * 60 * 1000;
        writer.record(&entry(day_one_ms)).unwrap();
        writer.record(&entry(day_two_ms)).unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 4); // two dates * (.asrun + .jsonl)
    }

    #[test]
    fn jsonl_sidecar_has_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AsRunWriter::new(dir.path(), "ch1");
        writer.record(&entry(0)).unwrap();
        writer.record(&entry(1000)).unwrap();

        let stem = format!("ch1_{}", DateTime::from_timestamp_millis(0).unwrap().date_naive().format("%Y-%m-%d"));
        let contents = std::fs::read_to_string(dir.path().join(format!("{stem}.jsonl"))).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
