//! Chunk reconstruction from a candidate signature offset.

use thiserror::Error;

use crate::evidence::{EvidenceError, EvidenceSource};
use crate::evtx::{CHUNK_SIZE, Chunk, EvtxError};

#[derive(Debug, Error)]
pub enum CarveError {
    #[error("short read at 0x{offset:x}: {got} of {CHUNK_SIZE} bytes available")]
    ShortRead { offset: u64, got: usize },
    #[error("evidence error: {0}")]
    Evidence(#[from] EvidenceError),
    #[error("invalid chunk at 0x{offset:x}: {source}")]
    Invalid {
        offset: u64,
        #[source]
        source: EvtxError,
    },
}

/// Read `CHUNK_SIZE` bytes at `offset` and run the full chunk parse on them.
/// Any failure means the candidate is not a usable chunk.
pub fn fetch_chunk(source: &dyn EvidenceSource, offset: u64) -> Result<Chunk, CarveError> {
    let mut data = vec![0u8; CHUNK_SIZE];
    match source.read_exact_at(offset, &mut data) {
        Ok(()) => {}
        Err(EvidenceError::ShortRead { got, .. }) => {
            return Err(CarveError::ShortRead { offset, got });
        }
        Err(err) => return Err(err.into()),
    }
    Chunk::parse(offset, data).map_err(|source| CarveError::Invalid { offset, source })
}
