//! JSON-lines history file

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use party_core::{HistoryRecord, HistorySink};
use tracing::warn;

/// Appends one JSON object per history record
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn append(&mut self, record: &HistoryRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl HistorySink for JsonLinesSink {
    fn write(&mut self, record: HistoryRecord) {
        if let Err(e) = self.append(&record) {
            warn!("Failed to write history record: {}", e);
        }
    }
}
