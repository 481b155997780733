//! Chunk signature scanning.
//!
//! The scanner runs on its own thread and feeds candidate offsets through a
//! bounded channel, so at most `capacity` offsets are ever queued ahead of
//! the consumer.

pub mod offsets;

use std::io::{Read, Seek};
use std::thread;

use crossbeam_channel::{Receiver, bounded};
use tracing::{debug, warn};

use crate::evtx::CHUNK_MAGIC;

pub use offsets::{ChunkOffsetScanner, window_base};

/// Start scanning `reader` from its current position. The thread returns the
/// number of offsets it delivered.
pub fn spawn_offset_scanner<R>(
    reader: R,
    capacity: usize,
) -> std::io::Result<(Receiver<u64>, thread::JoinHandle<u64>)>
where
    R: Read + Seek + Send + 'static,
{
    let (tx, rx) = bounded(capacity.max(1));
    let handle = thread::Builder::new()
        .name("chunk-scan".to_string())
        .spawn(move || {
            let mut delivered = 0u64;
            for item in ChunkOffsetScanner::new(reader, CHUNK_MAGIC) {
                match item {
                    Ok(offset) => {
                        if tx.send(offset).is_err() {
                            debug!(offset, "consumer hung up, stopping scan");
                            break;
                        }
                        delivered += 1;
                    }
                    Err(err) => {
                        warn!("chunk scan stopped: {err}");
                        break;
                    }
                }
            }
            delivered
        })?;
    Ok((rx, handle))
}
