use crate::core::value::Value;
use crate::infra::error::{Result, StoreError};
use crate::storage::wal::{Wal, WalOp};
use std::path::PathBuf;
use tracing::{debug, info};

/// A node in the tree. Keys and values are parallel vectors; `children`
/// holds arena indices and is empty for leaves.
#[derive(Debug)]
struct Node {
    leaf: bool,
    keys: Vec<String>,
    values: Vec<Value>,
    children: Vec<usize>,
}

impl Node {
    fn new(leaf: bool) -> Self {
        Self {
            leaf,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// B-Tree of minimum degree `t`: every non-root node holds between `t-1`
/// and `2t-1` keys and a node is full at `2t-1`.
///
/// The tree is an ordered key-value map used in two roles: as a standalone
/// storage engine and as the LSM memtable. Every logged insert reaches the
/// WAL before the in-memory structure, and opening a tree replays its WAL,
/// so the map survives restarts.
///
/// There is no structural deletion; a delete inserts [`Value::Dead`], which
/// standalone callers observe through [`BTree::search`] and the LSM engine
/// resolves to absent.
pub struct BTree {
    nodes: Vec<Node>,
    root: usize,
    degree: usize,
    key_count: usize,
    wal: Wal,
}

impl BTree {
    /// Opens a tree against a WAL path, replaying any existing log.
    pub fn open(degree: usize, wal_path: impl Into<PathBuf>) -> Result<Self> {
        if degree < 2 {
            return Err(StoreError::InvalidDegree(
                "minimum degree must be at least 2".to_string(),
            ));
        }

        let wal = Wal::open(wal_path)?;
        let mut tree = Self {
            nodes: vec![Node::new(true)],
            root: 0,
            degree,
            key_count: 0,
            wal,
        };

        let records = tree.wal.replay()?;
        for record in records {
            match record.op {
                WalOp::Insert => tree.apply_insert(&record.key, Value::from_stored(record.value)),
            }
        }

        info!(
            "B-Tree opened: degree={degree}, {} keys recovered from {}",
            tree.key_count,
            tree.wal.path().display()
        );
        Ok(tree)
    }

    pub fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.insert(key, Value::from_stored(value))
    }

    /// Engine-contract lookup. Tombstones are returned as [`Value::Dead`];
    /// interpreting them is the caller's concern.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.search(key)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.insert(key, Value::Dead)
    }

    pub fn close(&mut self) -> Result<()> {
        self.wal.flush()
    }

    /// Inserts a pair, logging it to the WAL first. An existing key has its
    /// value overwritten in place with no structural change.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<()> {
        debug!("B-Tree insert: key={key}");
        self.wal.append(key, value.as_stored())?;
        self.apply_insert(key, value);
        Ok(())
    }

    /// Non-logging insert used by WAL replay, so recovery is idempotent.
    fn apply_insert(&mut self, key: &str, value: Value) {
        if let Some(existing) = self.search_mut(key) {
            *existing = value;
            return;
        }

        let root = self.root;
        if self.nodes[root].keys.len() == self.max_keys() {
            let new_root = self.alloc(Node::new(false));
            self.nodes[new_root].children.push(root);
            self.root = new_root;
            self.split_child(new_root, 0);
            self.insert_non_full(new_root, key, value);
        } else {
            self.insert_non_full(root, key, value);
        }
        self.key_count += 1;
    }

    pub fn search(&self, key: &str) -> Option<&Value> {
        let mut x = self.root;
        loop {
            let node = &self.nodes[x];
            let i = node.keys.partition_point(|k| k.as_str() < key);
            if i < node.keys.len() && node.keys[i] == key {
                return Some(&node.values[i]);
            }
            if node.leaf {
                return None;
            }
            x = node.children[i];
        }
    }

    fn search_mut(&mut self, key: &str) -> Option<&mut Value> {
        let mut x = self.root;
        loop {
            let i = self.nodes[x].keys.partition_point(|k| k.as_str() < key);
            if i < self.nodes[x].keys.len() && self.nodes[x].keys[i] == key {
                return Some(&mut self.nodes[x].values[i]);
            }
            if self.nodes[x].leaf {
                return None;
            }
            x = self.nodes[x].children[i];
        }
    }

    /// Descends to a leaf, pre-splitting any full child on the way, and
    /// places the key in sorted position. `x` must not be full.
    fn insert_non_full(&mut self, x: usize, key: &str, value: Value) {
        let mut x = x;
        loop {
            if self.nodes[x].leaf {
                let node = &mut self.nodes[x];
                let pos = node.keys.partition_point(|k| k.as_str() < key);
                node.keys.insert(pos, key.to_string());
                node.values.insert(pos, value);
                return;
            }

            let mut i = self.nodes[x].keys.partition_point(|k| k.as_str() < key);
            let child = self.nodes[x].children[i];
            if self.nodes[child].keys.len() == self.max_keys() {
                self.split_child(x, i);
                if key > self.nodes[x].keys[i].as_str() {
                    i += 1;
                }
            }
            x = self.nodes[x].children[i];
        }
    }

    /// Splits the full child at `children[i]` of node `x`, promoting the
    /// median pair into `x`.
    fn split_child(&mut self, x: usize, i: usize) {
        let t = self.degree;
        let y = self.nodes[x].children[i];
        let y_leaf = self.nodes[y].leaf;

        // keys[t-1] is the median; keys[t..] move to the new right sibling.
        let mut upper_keys = self.nodes[y].keys.split_off(t - 1);
        let mut upper_values = self.nodes[y].values.split_off(t - 1);
        let median_key = upper_keys.remove(0);
        let median_value = upper_values.remove(0);
        let upper_children = if y_leaf {
            Vec::new()
        } else {
            self.nodes[y].children.split_off(t)
        };

        let z = self.alloc(Node {
            leaf: y_leaf,
            keys: upper_keys,
            values: upper_values,
            children: upper_children,
        });

        self.nodes[x].keys.insert(i, median_key);
        self.nodes[x].values.insert(i, median_value);
        self.nodes[x].children.insert(i + 1, z);
    }

    /// All pairs in ascending key order.
    pub fn items(&self) -> Vec<(String, Value)> {
        let mut out = Vec::with_capacity(self.key_count);
        self.collect_in_order(self.root, &mut out);
        out
    }

    fn collect_in_order(&self, x: usize, out: &mut Vec<(String, Value)>) {
        let node = &self.nodes[x];
        if node.leaf {
            out.extend(node.keys.iter().cloned().zip(node.values.iter().cloned()));
            return;
        }
        for i in 0..node.keys.len() {
            self.collect_in_order(node.children[i], out);
            out.push((node.keys[i].clone(), node.values[i].clone()));
        }
        self.collect_in_order(node.children[node.keys.len()], out);
    }

    pub fn len(&self) -> usize {
        self.key_count
    }

    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// Clears the tree and truncates its WAL. The LSM engine calls this once
    /// a flush has made the logged records durable in a segment.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.nodes = vec![Node::new(true)];
        self.root = 0;
        self.key_count = 0;
        self.wal.clear()
    }

    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    fn alloc(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}
