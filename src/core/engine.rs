use crate::core::btree::BTree;
use crate::core::heap::MinHeap;
use crate::core::levenshtein;
use crate::core::value::Value;
use crate::infra::config::LsmConfig;
use crate::infra::error::Result;
use crate::storage::bloom::BloomFilter;
use crate::storage::sstable::{self, SsTable};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Log-structured merge-tree engine: a B-Tree memtable in front of a list
/// of immutable sorted segments, oldest first. Writes land in the memtable
/// and spill into a new segment once `memtable_threshold` records
/// accumulate; reads check the memtable and then walk the segments newest
/// to oldest. Compaction is explicit.
///
/// The engine is single-threaded and owns its directory exclusively.
pub struct LsmTree {
    directory: PathBuf,
    memtable: BTree,
    memtable_threshold: usize,
    segments: Vec<SsTable>,
    segment_counter: u64,
}

/// Frontier element for the k-way merge. Ordered by key, then by segment
/// index, so entries for the same key pop oldest segment first and the last
/// assignment (the newest segment) wins.
struct MergeEntry {
    key: String,
    segment: usize,
    value: Value,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.segment == other.segment
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.segment.cmp(&other.segment))
    }
}

impl LsmTree {
    /// Opens (or creates) an engine over a directory, loading existing
    /// segments and recovering the memtable from its WAL.
    pub fn open(config: LsmConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir_path)?;

        let mut segment_paths: Vec<PathBuf> = fs::read_dir(&config.dir_path)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "sst"))
            .collect();
        segment_paths.sort();

        let mut segments = Vec::new();
        let mut segment_counter = 0;
        for path in segment_paths {
            // Numeric basenames drive the counter; an orphan left behind by
            // an interrupted compaction is still served but never collides
            // with future segment names.
            if let Some(n) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                segment_counter = segment_counter.max(n + 1);
            }
            match SsTable::open(&path) {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!("failed to open segment {}: {e}", path.display()),
            }
        }

        let memtable = BTree::open(config.btree_degree, config.dir_path.join("btree.wal"))?;

        info!(
            "LSM engine opened: {} segments, memtable={} records, next segment {:05}",
            segments.len(),
            memtable.len(),
            segment_counter
        );

        Ok(Self {
            directory: config.dir_path,
            memtable,
            memtable_threshold: config.memtable_threshold,
            segments,
            segment_counter,
        })
    }

    /// Stores a pair, overwriting any existing value. Writing the tombstone
    /// sentinel is a delete.
    pub fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.write(key, Value::from_stored(value))
    }

    /// Deletes a key by writing a tombstone over it.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.write(key, Value::Dead)
    }

    fn write(&mut self, key: &str, value: Value) -> Result<()> {
        self.memtable.insert(key, value)?;
        if self.memtable.len() >= self.memtable_threshold {
            info!(
                "memtable threshold reached ({}), flushing",
                self.memtable_threshold
            );
            self.flush()?;
        }
        Ok(())
    }

    /// Returns the current value for a key, or `None` for a key that was
    /// never written or was deleted.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.memtable.search(key) {
            debug!("key={key} found in memtable");
            return Ok(value.clone().into_live());
        }

        for segment in self.segments.iter().rev() {
            if let Some(value) = segment.get(key)? {
                debug!("key={key} found in segment {}", segment.path.display());
                // A tombstone here shadows anything older.
                return Ok(value.into_live());
            }
        }

        debug!("key={key} not found in any segment");
        Ok(None)
    }

    /// Serializes the memtable into a new segment and starts a fresh one.
    /// A no-op when the memtable is empty.
    fn flush(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            debug!("memtable empty, nothing to flush");
            return Ok(());
        }

        let path = self.segment_path(self.segment_counter);
        let entries: Vec<(String, String)> = self
            .memtable
            .items()
            .into_iter()
            .map(|(key, value)| (key, value.into_stored()))
            .collect();
        let record_count = entries.len();

        let segment = SsTable::create(&path, entries)?;
        self.segments.push(segment);
        self.segment_counter += 1;

        // The records are durable in the segment; only now is the WAL
        // dropped along with the old memtable.
        self.memtable.reset()?;

        info!("memtable flushed: {record_count} records to {}", path.display());
        Ok(())
    }

    /// Merges all segments into one, keeping the newest value for each key
    /// and dropping tombstoned keys. A no-op below two segments.
    ///
    /// Old segment files are deleted only after the merged segment is in
    /// place under its final name, so a crash mid-compaction loses nothing.
    pub fn compact(&mut self) -> Result<()> {
        if self.segments.len() < 2 {
            debug!("compaction skipped: {} segment(s)", self.segments.len());
            return Ok(());
        }
        info!("compacting {} segments", self.segments.len());

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let temp_path = self.directory.join(format!("temp_compacted_{stamp}.sst"));

        let mut iters = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            iters.push(segment.iter()?);
        }

        let mut frontier: MinHeap<MergeEntry> = MinHeap::new();
        for (segment, iter) in iters.iter_mut().enumerate() {
            if let Some(first) = iter.next() {
                let (key, value) = first?;
                frontier.push(MergeEntry { key, segment, value });
            }
        }

        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let mut merged_keys: Vec<String> = Vec::new();
        let mut current: Option<(String, Value)> = None;

        while !frontier.is_empty() {
            let entry = frontier.pop()?;
            if let Some(next) = iters[entry.segment].next() {
                let (key, value) = next?;
                frontier.push(MergeEntry {
                    key,
                    segment: entry.segment,
                    value,
                });
            }

            match &mut current {
                Some((key, value)) if *key == entry.key => {
                    // Same key from a newer segment: newer wins.
                    *value = entry.value;
                }
                _ => {
                    if let Some((key, value)) = current.take() {
                        Self::emit(&mut writer, &mut merged_keys, key, value)?;
                    }
                    current = Some((entry.key, entry.value));
                }
            }
        }
        if let Some((key, value)) = current {
            Self::emit(&mut writer, &mut merged_keys, key, value)?;
        }
        writer.flush()?;

        let target = self.segment_path(self.segment_counter);
        let mut bloom = BloomFilter::with_capacity(merged_keys.len());
        for key in &merged_keys {
            bloom.add(key);
        }
        fs::write(target.with_extension("bf"), serde_json::to_string(&bloom)?)?;
        fs::rename(&temp_path, &target)?;

        for segment in &self.segments {
            segment.remove_files()?;
        }

        // Opening the merged segment rebuilds and persists its sparse index.
        self.segments = vec![SsTable::open(&target)?];
        self.segment_counter += 1;

        info!(
            "compaction complete: {} live records in {}",
            merged_keys.len(),
            target.display()
        );
        Ok(())
    }

    fn emit(
        writer: &mut BufWriter<File>,
        merged_keys: &mut Vec<String>,
        key: String,
        value: Value,
    ) -> Result<()> {
        if value.is_dead() {
            return Ok(());
        }
        let line = sstable::encode_record(&key, value.as_stored())?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        merged_keys.push(key);
        Ok(())
    }

    /// Returns every live record whose key is within `max_distance` edits
    /// of `search_key`. Each key is considered once; its first occurrence
    /// (memtable, then segments newest to oldest) decides its value.
    pub fn fuzzy_get(&self, search_key: &str, max_distance: usize) -> Result<Vec<(String, String)>> {
        let mut results = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (key, value) in self.memtable.items() {
            Self::consider(search_key, max_distance, key, value, &mut seen, &mut results);
        }
        for segment in self.segments.iter().rev() {
            for record in segment.iter()? {
                let (key, value) = record?;
                Self::consider(search_key, max_distance, key, value, &mut seen, &mut results);
            }
        }

        Ok(results)
    }

    fn consider(
        search_key: &str,
        max_distance: usize,
        key: String,
        value: Value,
        seen: &mut HashSet<String>,
        results: &mut Vec<(String, String)>,
    ) {
        if seen.contains(&key) {
            return;
        }
        if levenshtein::distance(search_key, &key) <= max_distance {
            if let Value::Live(v) = value {
                results.push((key.clone(), v));
            }
        }
        seen.insert(key);
    }

    /// Flushes the live memtable so nothing is left only in the WAL.
    pub fn close(&mut self) -> Result<()> {
        self.flush()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn segment_path(&self, counter: u64) -> PathBuf {
        self.directory.join(format!("{counter:05}.sst"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &Path, threshold: usize) -> LsmTree {
        LsmTree::open(
            LsmConfig::builder()
                .dir_path(dir)
                .memtable_threshold(threshold)
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        lsm.put("name", "Adrien").unwrap();
        assert_eq!(lsm.get("name").unwrap().as_deref(), Some("Adrien"));
    }

    #[test]
    fn test_overwrite() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        lsm.put("name", "Adrien").unwrap();
        lsm.put("name", "Adrien Schuler").unwrap();
        assert_eq!(lsm.get("name").unwrap().as_deref(), Some("Adrien Schuler"));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        lsm.put("city", "Paris").unwrap();
        lsm.delete("city").unwrap();
        assert_eq!(lsm.get("city").unwrap(), None);
    }

    #[test]
    fn test_put_of_sentinel_acts_as_delete() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        lsm.put("city", "Paris").unwrap();
        lsm.put("city", crate::core::value::TOMBSTONE).unwrap();
        assert_eq!(lsm.get("city").unwrap(), None);
    }

    #[test]
    fn test_threshold_flush_creates_segments() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        for i in 0..150 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }

        assert!(lsm.segment_count() >= 1);
        assert_eq!(lsm.get("key75").unwrap().as_deref(), Some("value75"));
        assert_eq!(lsm.get("key0").unwrap().as_deref(), Some("value0"));
        assert_eq!(lsm.get("key149").unwrap().as_deref(), Some("value149"));

        // Segment files carry zero-padded increasing basenames.
        assert!(dir.path().join("00000.sst").exists());
        assert!(dir.path().join("00000.index").exists());
        assert!(dir.path().join("00000.bf").exists());
    }

    #[test]
    fn test_delete_shadows_flushed_value() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 5);
        for i in 0..5 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        assert_eq!(lsm.segment_count(), 1);

        // The tombstone lives in the memtable, the value in a segment.
        lsm.delete("key3").unwrap();
        assert_eq!(lsm.get("key3").unwrap(), None);

        // Push the tombstone into its own segment as well.
        for i in 10..14 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        assert!(lsm.segment_count() >= 2);
        assert_eq!(lsm.get("key3").unwrap(), None);
    }

    #[test]
    fn test_compaction_converges_to_one_segment() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);

        lsm.put("name", "Adrien").unwrap();
        lsm.put("city", "Paris").unwrap();
        lsm.put("name", "Adrien Schuler").unwrap();
        lsm.delete("city").unwrap();
        for i in 0..150 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        lsm.delete("key10").unwrap();
        // Make sure the tombstones reach a segment before merging.
        lsm.close().unwrap();

        lsm.compact().unwrap();

        assert_eq!(lsm.segment_count(), 1);
        assert_eq!(lsm.get("name").unwrap().as_deref(), Some("Adrien Schuler"));
        assert_eq!(lsm.get("city").unwrap(), None);
        assert_eq!(lsm.get("key75").unwrap().as_deref(), Some("value75"));
        assert_eq!(lsm.get("key10").unwrap(), None);
        assert_eq!(lsm.get("key100").unwrap().as_deref(), Some("value100"));
    }

    #[test]
    fn test_compaction_drops_tombstoned_keys_from_disk() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 4);
        for i in 0..4 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        lsm.delete("key1").unwrap();
        lsm.close().unwrap();
        assert!(lsm.segment_count() >= 2);

        lsm.compact().unwrap();

        assert_eq!(lsm.segment_count(), 1);
        let records: Vec<String> = lsm.segments[0]
            .iter()
            .unwrap()
            .map(|record| record.unwrap().0)
            .collect();
        assert!(!records.contains(&"key1".to_string()));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_compaction_newest_segment_wins() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 2);
        lsm.put("color", "red").unwrap();
        lsm.put("pad0", "x").unwrap(); // flush #1
        lsm.put("color", "green").unwrap();
        lsm.put("pad1", "x").unwrap(); // flush #2
        lsm.put("color", "blue").unwrap();
        lsm.put("pad2", "x").unwrap(); // flush #3
        assert_eq!(lsm.segment_count(), 3);

        lsm.compact().unwrap();
        assert_eq!(lsm.get("color").unwrap().as_deref(), Some("blue"));
    }

    #[test]
    fn test_compaction_below_two_segments_is_noop() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 5);
        for i in 0..5 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        assert_eq!(lsm.segment_count(), 1);

        lsm.compact().unwrap();
        assert_eq!(lsm.segment_count(), 1);
        assert!(dir.path().join("00000.sst").exists());
    }

    #[test]
    fn test_counter_continues_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut lsm = engine(dir.path(), 3);
            for i in 0..9 {
                lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
            }
            assert_eq!(lsm.segment_count(), 3);
        }

        let mut lsm = engine(dir.path(), 3);
        for i in 10..13 {
            lsm.put(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        assert!(dir.path().join("00003.sst").exists());
    }

    #[test]
    fn test_orphan_compaction_temp_is_served_and_ignored_by_counter() {
        let dir = tempdir().unwrap();
        {
            let mut lsm = engine(dir.path(), 2);
            lsm.put("key1", "value1").unwrap();
            lsm.put("key2", "value2").unwrap();
        }

        // Simulate a crash after the merged file was written but before the
        // old segments were removed.
        let orphan = dir.path().join("temp_compacted_99.sst");
        std::fs::write(&orphan, "{\"zkey\":\"zvalue\"}\n").unwrap();

        let mut lsm = engine(dir.path(), 2);
        assert_eq!(lsm.segment_count(), 2);
        assert_eq!(lsm.get("zkey").unwrap().as_deref(), Some("zvalue"));

        // New segments still use the numeric counter.
        lsm.put("key3", "value3").unwrap();
        lsm.put("key4", "value4").unwrap();
        assert!(dir.path().join("00001.sst").exists());
    }

    #[test]
    fn test_fuzzy_get() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 50);
        lsm.put("apple", "red fruit").unwrap();
        lsm.put("apply", "to request something").unwrap();
        lsm.put("apples", "plural of apple").unwrap();
        lsm.put("banana", "yellow fruit").unwrap();

        let results = lsm.fuzzy_get("apple", 1).unwrap();
        assert!(results.contains(&("apple".to_string(), "red fruit".to_string())));
        assert!(results.contains(&("apply".to_string(), "to request something".to_string())));
        assert!(results.contains(&("apples".to_string(), "plural of apple".to_string())));
        assert!(!results.iter().any(|(key, _)| key == "banana"));

        let results = lsm.fuzzy_get("aple", 1).unwrap();
        assert!(results.contains(&("apple".to_string(), "red fruit".to_string())));

        assert!(lsm.fuzzy_get("xyz", 1).unwrap().is_empty());
    }

    #[test]
    fn test_fuzzy_get_skips_deleted_and_prefers_newest() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 2);
        lsm.put("apple", "old").unwrap();
        lsm.put("apply", "kept").unwrap(); // flushed together with apple
        lsm.put("apple", "new").unwrap();
        lsm.put("angle", "dropped").unwrap(); // flushed together with apple=new
        lsm.delete("apply").unwrap();

        let results = lsm.fuzzy_get("apple", 1).unwrap();
        assert!(results.contains(&("apple".to_string(), "new".to_string())));
        assert!(!results.iter().any(|(key, _)| key == "apply"));
    }

    #[test]
    fn test_close_flushes_memtable() {
        let dir = tempdir().unwrap();
        let mut lsm = engine(dir.path(), 100);
        lsm.put("country", "France").unwrap();
        lsm.close().unwrap();

        assert_eq!(lsm.segment_count(), 1);
        // The WAL was truncated along with the flush.
        assert_eq!(
            std::fs::metadata(dir.path().join("btree.wal")).unwrap().len(),
            0
        );
    }
}
