use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hash count used for segment sidecar filters.
pub const BLOOM_HASH_COUNT: usize = 5;

/// Probabilistic set membership over stringified keys. False positives are
/// possible, false negatives are not.
///
/// The bit indices are derived as `md5(item || i) mod size` for each hash
/// `i`. This family is part of the on-disk `.bf` format and must not change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BloomFilter {
    pub size: usize,
    pub hash_count: usize,
    pub bit_array: Vec<u8>,
}

impl BloomFilter {
    pub fn new(size: usize, hash_count: usize) -> Self {
        debug!("initializing bloom filter: size={size}, hash_count={hash_count}");
        Self {
            size,
            hash_count,
            bit_array: vec![0; size],
        }
    }

    /// Geometry used for segment filters: ten bits per key with a floor of
    /// one hundred, five hashes.
    pub fn with_capacity(items: usize) -> Self {
        Self::new((items * 10).max(100), BLOOM_HASH_COUNT)
    }

    pub fn add(&mut self, item: &str) {
        for i in 0..self.hash_count {
            let index = Self::bit_index(item, i, self.size);
            self.bit_array[index] = 1;
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        (0..self.hash_count).all(|i| self.bit_array[Self::bit_index(item, i, self.size)] == 1)
    }

    // An MD5 digest is exactly 128 bits, so interpreting it as a big-endian
    // u128 matches reducing the full hexadecimal digest modulo `size`.
    fn bit_index(item: &str, i: usize, size: usize) -> usize {
        let digest = md5::compute(format!("{item}{i}"));
        (u128::from_be_bytes(digest.0) % size as u128) as usize
    }
}
