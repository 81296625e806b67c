//! fabric errors
//!
//! these cover misuse of the fabric itself; bus-level outcomes of an
//! access are reported through [`Response`](crate::Response) instead

use thiserror::Error;

use fabric_range::Range;

use crate::Response;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transaction at {address:#x} entered the fabric with response `{response}`")]
    StaleResponse { address: u64, response: Response },
    #[error("transaction at {0:#x} carries no data")]
    EmptyTransaction(u64),
    #[error("new mapping {0} conflicts with mapping {1}")]
    MapConflict(Range, Range),
    #[error("nothing mapped at {0}")]
    NotMapped(Range),
    #[error("{size} bytes at offset {offset:#x} exceed memory of {capacity} bytes")]
    OutOfBounds { offset: u64, size: usize, capacity: usize },
    #[error("clock frequency must be non-zero")]
    ZeroFrequency,
    #[error(transparent)]
    Range(#[from] fabric_range::Error),
}
