pub mod bloom;
pub mod sstable;
pub mod wal;
