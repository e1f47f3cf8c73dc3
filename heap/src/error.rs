use bot::{OffsetTableError, VerifyError};
use thiserror::Error;

use crate::RegionKind;

#[derive(Error, Debug)]
pub enum HeapError {
    #[error("invalid heap settings: {0}")]
    InvalidSettings(&'static str),

    #[error("failed to map {size} bytes of heap memory")]
    MapFailed { size: usize },

    #[error("out of memory allocating {words} words")]
    OutOfMemory { words: usize },

    #[error("block of {words} words does not fit a header")]
    TooLarge { words: usize },

    #[error("region {index} is {kind:?}, expected {expected:?}")]
    RegionState {
        index: usize,
        kind: RegionKind,
        expected: RegionKind,
    },

    #[error(transparent)]
    Table(#[from] OffsetTableError),

    #[error("region {region}: {source}")]
    Verify {
        region: usize,
        #[source]
        source: VerifyError,
    },
}

pub type Result<T> = std::result::Result<T, HeapError>;
