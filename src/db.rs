use crate::core::btree::BTree;
use crate::core::engine::LsmTree;
use crate::core::value::Value;
use crate::infra::config::{LsmConfig, DEFAULT_BTREE_DEGREE};
use crate::infra::error::{Result, StoreError};
use std::path::Path;
use tracing::info;

/// The two interchangeable storage engines behind [`Db`].
pub enum Engine {
    BTree(BTree),
    Lsm(LsmTree),
}

/// Thin wrapper that selects a storage engine by name and forwards the
/// common put/get/delete/close contract. Fuzzy lookup is only available on
/// the LSM engine and surfaces a typed error elsewhere.
pub struct Db {
    engine: Engine,
}

impl Db {
    /// Opens a database in `directory` using the named engine, `"btree"`
    /// or `"lsmtree"`.
    pub fn open(engine: &str, directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let engine = match engine {
            "btree" => Engine::BTree(BTree::open(
                DEFAULT_BTREE_DEGREE,
                directory.join("btree.wal"),
            )?),
            "lsmtree" => Engine::Lsm(LsmTree::open(
                LsmConfig::builder().dir_path(directory).build()?,
            )?),
            other => return Err(StoreError::UnknownEngine(other.to_string())),
        };
        info!("database opened in {}", directory.display());
        Ok(Self { engine })
    }

    pub fn put(&mut self, key: &str, value: &str) -> Result<()> {
        match &mut self.engine {
            Engine::BTree(tree) => tree.put(key, value),
            Engine::Lsm(lsm) => lsm.put(key, value),
        }
    }

    /// Tombstones resolve to absent for both engines.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match &self.engine {
            Engine::BTree(tree) => Ok(tree.get(key).cloned().and_then(Value::into_live)),
            Engine::Lsm(lsm) => lsm.get(key),
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        match &mut self.engine {
            Engine::BTree(tree) => tree.delete(key),
            Engine::Lsm(lsm) => lsm.delete(key),
        }
    }

    /// Finds keys within `max_distance` edits of `search_key`.
    pub fn fuzzy_get(&self, search_key: &str, max_distance: usize) -> Result<Vec<(String, String)>> {
        match &self.engine {
            Engine::BTree(_) => Err(StoreError::FuzzyUnsupported("btree")),
            Engine::Lsm(lsm) => lsm.fuzzy_get(search_key, max_distance),
        }
    }

    /// Releases resources, flushing pending in-memory state where the
    /// engine has any.
    pub fn close(&mut self) -> Result<()> {
        match &mut self.engine {
            Engine::BTree(tree) => tree.close(),
            Engine::Lsm(lsm) => lsm.close(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}
