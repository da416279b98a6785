use crate::infra::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    Insert,
}

/// One logged mutation. Deletions are inserts of the tombstone sentinel, so
/// `insert` is the only operation the log ever carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: WalOp,
    pub key: String,
    pub value: String,
}

/// Append-only log of newline-delimited JSON records. The writer is held
/// open for the lifetime of the owning tree and flushed after every append.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Wal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes the buffer before returning.
    pub fn append(&mut self, key: &str, value: &str) -> Result<()> {
        let record = WalRecord {
            op: WalOp::Insert,
            key: key.to_string(),
            value: value.to_string(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        debug!("WAL appended: key={key}");
        Ok(())
    }

    /// Reads every record from the start of the log. An unparseable line is
    /// treated as a truncated tail: replay stops there with a warning.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "stopping WAL replay of {} at unparseable line {}: {e}",
                        self.path.display(),
                        records.len() + 1
                    );
                    break;
                }
            }
        }

        debug!("WAL replay: {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Truncates the log on disk and restarts the writer in append mode.
    pub fn clear(&mut self) -> Result<()> {
        self.writer.flush()?;

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
