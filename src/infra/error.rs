use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed record in {0}")]
    MalformedRecord(String),

    #[error("unknown engine type: {0}")]
    UnknownEngine(String),

    #[error("fuzzy search is not supported by the {0} engine")]
    FuzzyUnsupported(&'static str),

    #[error("pop from an empty heap")]
    EmptyHeap,

    #[error("invalid memtable threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid B-Tree degree: {0}")]
    InvalidDegree(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
