//! # EVTX format
//!
//! Decoder for the Windows XML event log container: the file header, the
//! fixed-size chunks, their string and template tables, the record offset
//! table and the BinXML payload of every record.
//!
//! Chunks are self-contained, which is what makes carving possible: a chunk
//! found anywhere in a raw image can be parsed without the file header.

pub mod binxml;
pub mod chunk;
pub mod cursor;
pub mod file;
pub mod header;
pub mod record;
pub mod value;

#[cfg(test)]
#[path = "../../tests/common/builder.rs"]
pub(crate) mod test_builder;

use thiserror::Error;

pub use chunk::{Chunk, ChunkRecords};
pub use file::{EvtxFile, FileHeader};
pub use header::ChunkHeader;
pub use record::EvtxRecord;

/// Size of every chunk, header included.
pub const CHUNK_SIZE: usize = 0x10000;
/// Signature at offset 0 of every chunk.
pub const CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\0";
/// Signature at offset 0 of the file header.
pub const FILE_MAGIC: &[u8; 8] = b"ElfFile\0";
/// Signature of every event record.
pub const RECORD_MAGIC: &[u8; 4] = b"**\0\0";
/// Declared size of the chunk header proper.
pub const CHUNK_HEADER_SIZE: u32 = 0x80;
/// Records start after the header and the string/template offset arrays.
pub const CHUNK_RECORDS_START: usize = 0x200;
/// The file header occupies one block in front of the first chunk.
pub const FILE_HEADER_BLOCK_SIZE: usize = 0x1000;
/// Magic, size, record id and FILETIME.
pub const RECORD_HEADER_SIZE: usize = 24;
/// Header plus the trailing size copy.
pub const MIN_RECORD_SIZE: u32 = 28;

pub const STRING_BUCKETS: usize = 64;
pub const TEMPLATE_BUCKETS: usize = 32;

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Source(#[from] crate::evidence::EvidenceError),
    #[error("read of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds { offset: usize, len: usize },
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("string table: {0}")]
    StringTable(String),
    #[error("template table: {0}")]
    TemplateTable(String),
    #[error("record offsets: {0}")]
    RecordOffsets(String),
    #[error("record at 0x{offset:x}: {reason}")]
    Record { offset: usize, reason: String },
    #[error("binxml at 0x{offset:x}: {reason}")]
    BinXml { offset: usize, reason: String },
}

impl EvtxError {
    pub(crate) fn binxml(offset: usize, reason: impl Into<String>) -> Self {
        EvtxError::BinXml {
            offset,
            reason: reason.into(),
        }
    }
}
