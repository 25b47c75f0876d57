//! JSON Lines writer for append-only journals such as paper orders.
//!
//! One JSON object per line, so a torn write damages at most the last
//! record. Files roll over per UTC day and are only ever appended to.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Open handle for the current day's file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// JSON Lines writer for records of type `T`.
///
/// Files are named `<prefix>_<YYYY-MM-DD>.jsonl` under `base_dir`.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    prefix: String,
    buffer: Vec<T>,
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
    _record: PhantomData<fn(T)>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    /// Create a writer. `max_buffer_size` of 1 writes through on every record.
    pub fn new(base_dir: impl Into<PathBuf>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create directory");
        }

        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
            _record: PhantomData,
        }
    }

    /// Path of today's file.
    pub fn current_path(&self) -> PathBuf {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.path_for(&today)
    }

    fn path_for(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{}.jsonl", self.prefix, date))
    }

    /// Add a record to the buffer, flushing when full.
    pub fn add_record(&mut self, record: T) -> PersistenceResult<()> {
        self.buffer.push(record);

        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Journal flush failed while closing");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Journal file closed"
            );
        }
    }

    fn open_writer(&self, date: &str) -> PersistenceResult<ActiveWriter> {
        let filename = self.path_for(date);
        debug!(filename = %filename.display(), "Opening JSON Lines writer (append mode)");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filename)?;

        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        })
    }

    /// Flush buffered records to today's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();

        let needs_rotation = self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != today);
        if needs_rotation {
            self.close_active_writer();
        }

        let mut active = match self.active_writer.take() {
            Some(active) => active,
            None => self.open_writer(&today)?,
        };

        let record_count = self.buffer.len();
        let result = (|| -> PersistenceResult<()> {
            for record in &self.buffer {
                let json = serde_json::to_string(record)?;
                writeln!(active.writer, "{}", json)?;
            }
            active.writer.flush()?;
            Ok(())
        })();
        self.active_writer = Some(active);
        result?;

        if let Some(active) = self.active_writer.as_mut() {
            active.records_written += record_count;
        }
        debug!(date = %today, records = record_count, "Flushed records to JSON Lines");
        self.buffer.clear();

        Ok(())
    }

    /// Flush pending records and release the file handle.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Pending journal records lost on drop");
        }
        self.close_active_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        seq: u32,
        symbol: String,
    }

    fn record(seq: u32) -> Record {
        Record {
            seq,
            symbol: "SPY".to_string(),
        }
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "paper_orders", 100);
        for i in 0..3 {
            writer.add_record(record(i)).unwrap();
        }
        writer.close().unwrap();

        let file = File::open(writer.current_path()).unwrap();
        let lines: Vec<Record> = BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(lines, vec![record(0), record(1), record(2)]);
    }

    #[test]
    fn test_buffer_size_one_writes_through() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "orders", 1);
        writer.add_record(record(7)).unwrap();

        let content = std::fs::read_to_string(writer.current_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_append_mode_preserves_existing() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = JsonLinesWriter::new(dir.path(), "orders", 1);
            writer.add_record(record(1)).unwrap();
            writer.close().unwrap();
        }
        let mut writer = JsonLinesWriter::new(dir.path(), "orders", 1);
        writer.add_record(record(2)).unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(writer.current_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
