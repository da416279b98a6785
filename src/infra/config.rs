use crate::infra::error::{Result, StoreError};
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_MEMTABLE_THRESHOLD: usize = 100;
pub const DEFAULT_BTREE_DEGREE: usize = 5;

#[derive(Debug, Clone)]
pub struct LsmConfig {
    pub dir_path: PathBuf,
    /// Memtable record count that triggers a flush to a new segment.
    pub memtable_threshold: usize,
    /// Minimum degree of the memtable B-Tree.
    pub btree_degree: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./.strata_data"),
            memtable_threshold: DEFAULT_MEMTABLE_THRESHOLD,
            btree_degree: DEFAULT_BTREE_DEGREE,
        }
    }
}

impl LsmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> LsmConfigBuilder {
        LsmConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.memtable_threshold == 0 {
            return Err(StoreError::InvalidThreshold(
                "memtable threshold cannot be 0".to_string(),
            ));
        }

        if self.memtable_threshold > 1_000_000 {
            warn!(
                "very large memtable threshold ({}), flushes will be rare and recovery slow",
                self.memtable_threshold
            );
        }

        if self.btree_degree < 2 {
            return Err(StoreError::InvalidDegree(
                "minimum degree must be at least 2".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct LsmConfigBuilder {
    dir_path: Option<PathBuf>,
    memtable_threshold: Option<usize>,
    btree_degree: Option<usize>,
}

impl LsmConfigBuilder {
    pub fn dir_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.dir_path = Some(path.into());
        self
    }

    pub fn memtable_threshold(mut self, threshold: usize) -> Self {
        self.memtable_threshold = Some(threshold);
        self
    }

    pub fn btree_degree(mut self, degree: usize) -> Self {
        self.btree_degree = Some(degree);
        self
    }

    pub fn build(self) -> Result<LsmConfig> {
        let defaults = LsmConfig::default();

        let config = LsmConfig {
            dir_path: self.dir_path.unwrap_or(defaults.dir_path),
            memtable_threshold: self
                .memtable_threshold
                .unwrap_or(defaults.memtable_threshold),
            btree_degree: self.btree_degree.unwrap_or(defaults.btree_degree),
        };

        config.validate()?;
        Ok(config)
    }
}
