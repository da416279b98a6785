use crate::core::value::Value;
use crate::infra::error::{Result, StoreError};
use crate::storage::bloom::BloomFilter;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One sparse index entry is kept for every `SPARSE_INDEX_STRIDE` records,
/// starting at record 0.
pub const SPARSE_INDEX_STRIDE: usize = 10;

/// An immutable sorted segment on disk: newline-delimited single-pair JSON
/// records in `N.sst`, a sparse `(key, byte offset)` index in `N.index` and
/// a bloom filter snapshot in `N.bf`.
///
/// Data and sidecar files are opened on demand for each read; only the
/// sparse index and the filter stay in memory.
pub struct SsTable {
    pub(crate) path: PathBuf,
    pub(crate) index_path: PathBuf,
    pub(crate) bloom_path: PathBuf,
    pub(crate) sparse_index: Vec<(String, u64)>,
    pub(crate) bloom: Option<BloomFilter>,
}

/// Encodes one record line: a JSON object with exactly one field whose name
/// is the key.
pub(crate) fn encode_record(key: &str, stored: &str) -> Result<String> {
    let mut object = serde_json::Map::new();
    object.insert(
        key.to_string(),
        serde_json::Value::String(stored.to_string()),
    );
    Ok(serde_json::to_string(&serde_json::Value::Object(object))?)
}

fn decode_record(line: &str, path: &Path) -> Result<(String, Value)> {
    let malformed = || StoreError::MalformedRecord(path.display().to_string());

    let parsed: serde_json::Value = serde_json::from_str(line)?;
    let object = parsed.as_object().ok_or_else(malformed)?;
    if object.len() != 1 {
        return Err(malformed());
    }
    let (key, raw) = object.iter().next().ok_or_else(malformed)?;
    let raw = raw.as_str().ok_or_else(malformed)?;
    Ok((key.clone(), Value::from_stored(raw)))
}

impl SsTable {
    /// Builds a segment (data file plus both sidecars) from a set of
    /// records. Entries are sorted by key before writing; byte offsets in
    /// the sparse index are the exact line-start positions in the data file.
    pub fn create(path: impl Into<PathBuf>, mut entries: Vec<(String, String)>) -> Result<Self> {
        let path = path.into();
        let index_path = path.with_extension("index");
        let bloom_path = path.with_extension("bf");

        let mut bloom = BloomFilter::with_capacity(entries.len());
        for (key, _) in &entries {
            bloom.add(key);
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sparse_index: Vec<(String, u64)> = Vec::new();
        let mut writer = BufWriter::new(File::create(&path)?);
        let mut offset: u64 = 0;
        for (i, (key, stored)) in entries.iter().enumerate() {
            if i % SPARSE_INDEX_STRIDE == 0 {
                sparse_index.push((key.clone(), offset));
            }
            let line = encode_record(key, stored)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            offset += line.len() as u64 + 1;
        }
        writer.flush()?;

        fs::write(&index_path, serde_json::to_string(&sparse_index)?)?;
        fs::write(&bloom_path, serde_json::to_string(&bloom)?)?;

        info!(
            "segment created: {} ({} records, {} index entries)",
            path.display(),
            entries.len(),
            sparse_index.len()
        );

        Ok(Self {
            path,
            index_path,
            bloom_path,
            sparse_index,
            bloom: Some(bloom),
        })
    }

    /// Opens an existing segment, loading its sidecars. A missing filter
    /// only disables the negative-lookup short circuit; a missing index is
    /// rebuilt from the data file and persisted.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index_path = path.with_extension("index");
        let bloom_path = path.with_extension("bf");

        let bloom = if bloom_path.exists() {
            Some(serde_json::from_str(&fs::read_to_string(&bloom_path)?)?)
        } else {
            warn!(
                "no bloom filter sidecar for {}; serving reads without short-circuit",
                path.display()
            );
            None
        };

        let mut table = Self {
            path,
            index_path,
            bloom_path,
            sparse_index: Vec::new(),
            bloom,
        };

        if table.index_path.exists() {
            table.sparse_index = serde_json::from_str(&fs::read_to_string(&table.index_path)?)?;
            debug!("sparse index loaded from {}", table.index_path.display());
        } else {
            table.rebuild_sparse_index()?;
        }

        Ok(table)
    }

    fn rebuild_sparse_index(&mut self) -> Result<()> {
        let mut index = Vec::new();
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut offset: u64 = 0;
        let mut i = 0usize;

        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if i % SPARSE_INDEX_STRIDE == 0 {
                let (key, _) = decode_record(line.trim_end_matches('\n'), &self.path)?;
                index.push((key, offset));
            }
            offset += read as u64;
            i += 1;
        }

        self.sparse_index = index;
        fs::write(&self.index_path, serde_json::to_string(&self.sparse_index)?)?;
        info!(
            "sparse index rebuilt for {} ({} entries)",
            self.path.display(),
            self.sparse_index.len()
        );
        Ok(())
    }

    /// Point lookup. Tombstones come back as [`Value::Dead`], distinct from
    /// a key that is absent from this segment; collapsing the two here would
    /// let older segments resurrect deleted keys.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(bloom) = &self.bloom {
            if !bloom.contains(key) {
                debug!("bloom negative: key={key} segment={}", self.path.display());
                return Ok(None);
            }
        }
        if self.sparse_index.is_empty() {
            return Ok(None);
        }

        // Greatest indexed key <= target starts the scan; the next indexed
        // offset bounds it.
        let idx = self.sparse_index.partition_point(|(k, _)| k.as_str() <= key);
        let start = if idx == 0 { 0 } else { self.sparse_index[idx - 1].1 };
        let block_end = self.sparse_index.get(idx).map(|(_, offset)| *offset);

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(start))?;
        let mut position = start;

        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                return Ok(None);
            }
            position += read as u64;

            let (record_key, value) = decode_record(line.trim_end_matches('\n'), &self.path)?;
            if record_key == key {
                return Ok(Some(value));
            }
            if record_key.as_str() > key {
                // Sorted file: no later match possible.
                return Ok(None);
            }
            if let Some(end) = block_end {
                if position >= end {
                    return Ok(None);
                }
            }
        }
    }

    /// Streams every record in stored (ascending key) order.
    pub fn iter(&self) -> Result<SsTableIter> {
        Ok(SsTableIter {
            reader: BufReader::new(File::open(&self.path)?),
            path: self.path.clone(),
        })
    }

    /// Deletes the data file and any sidecars. Used when compaction retires
    /// a segment.
    pub(crate) fn remove_files(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        if self.index_path.exists() {
            fs::remove_file(&self.index_path)?;
        }
        if self.bloom_path.exists() {
            fs::remove_file(&self.bloom_path)?;
        }
        Ok(())
    }
}

pub struct SsTableIter {
    reader: BufReader<File>,
    path: PathBuf,
}

impl Iterator for SsTableIter {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(decode_record(line.trim_end_matches('\n'), &self.path)),
            Err(e) => Some(Err(e.into())),
        }
    }
}
