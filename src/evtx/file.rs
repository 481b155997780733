//! Indexed access: the file header block followed by consecutive chunks.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use crate::evidence::{self, EvidenceSource};
use crate::evtx::chunk::Chunk;
use crate::evtx::cursor::{le_u16, le_u32, le_u64};
use crate::evtx::{CHUNK_MAGIC, CHUNK_SIZE, EvtxError, FILE_HEADER_BLOCK_SIZE, FILE_MAGIC};

const FILE_HEADER_SIZE: usize = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileHeader {
    pub magic: [u8; 8],
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: u32,
    pub checksum: u32,
}

impl FileHeader {
    pub fn parse(data: &[u8]) -> Result<Self, EvtxError> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(EvtxError::InvalidHeader(format!(
                "file header needs {FILE_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[..8]);
        Ok(Self {
            magic,
            first_chunk_number: le_u64(data, 0x08),
            last_chunk_number: le_u64(data, 0x10),
            next_record_id: le_u64(data, 0x18),
            header_size: le_u32(data, 0x20),
            minor_version: le_u16(data, 0x24),
            major_version: le_u16(data, 0x26),
            header_block_size: le_u16(data, 0x28),
            chunk_count: le_u16(data, 0x2A),
            flags: le_u32(data, 0x78),
            checksum: le_u32(data, 0x7C),
        })
    }

    pub fn validate(&self) -> Result<(), EvtxError> {
        if &self.magic != FILE_MAGIC {
            return Err(EvtxError::InvalidHeader(format!(
                "bad file magic {:?}",
                String::from_utf8_lossy(&self.magic)
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Magic: {}",
            String::from_utf8_lossy(&self.magic).trim_end_matches('\0')
        )?;
        writeln!(f, "First chunk number: {}", self.first_chunk_number)?;
        writeln!(f, "Last chunk number: {}", self.last_chunk_number)?;
        writeln!(f, "Next record id: {}", self.next_record_id)?;
        writeln!(f, "Header size: {}", self.header_size)?;
        writeln!(f, "Version: {}.{}", self.major_version, self.minor_version)?;
        writeln!(f, "Header block size: {}", self.header_block_size)?;
        writeln!(f, "Chunk count: {}", self.chunk_count)?;
        writeln!(f, "Flags: 0x{:08x}", self.flags)?;
        write!(f, "Checksum: 0x{:08x}", self.checksum)
    }
}

/// A log file opened without trusting its header: chunks are enumerated by
/// position until the end of the data, whatever the header claims.
pub struct EvtxFile {
    source: Box<dyn EvidenceSource>,
    header: FileHeader,
}

impl EvtxFile {
    pub fn open_dirty(path: &Path) -> Result<Self, EvtxError> {
        Self::from_source(evidence::open_source(path)?)
    }

    pub fn from_source(source: Box<dyn EvidenceSource>) -> Result<Self, EvtxError> {
        let mut block = vec![0u8; FILE_HEADER_SIZE];
        source.read_exact_at(0, &mut block)?;
        let header = FileHeader::parse(&block)?;
        if let Err(err) = header.validate() {
            warn!("{err}; reading chunks anyway");
        }
        Ok(Self { source, header })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn chunks(&self) -> FileChunks<'_> {
        FileChunks {
            file: self,
            index: 0,
            done: false,
        }
    }
}

/// Yields every valid chunk. Blocks without the chunk signature are skipped
/// silently, invalid chunks with a warning; a read error ends iteration.
pub struct FileChunks<'f> {
    file: &'f EvtxFile,
    index: u64,
    done: bool,
}

impl Iterator for FileChunks<'_> {
    type Item = Result<Chunk, EvtxError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let offset = FILE_HEADER_BLOCK_SIZE as u64 + self.index * CHUNK_SIZE as u64;
            self.index += 1;
            let len = self.file.source.len();
            if offset + CHUNK_SIZE as u64 > len {
                if offset < len {
                    debug!(offset, "ignoring {} trailing bytes", len - offset);
                }
                self.done = true;
                return None;
            }
            let mut data = vec![0u8; CHUNK_SIZE];
            if let Err(err) = self.file.source.read_exact_at(offset, &mut data) {
                self.done = true;
                return Some(Err(err.into()));
            }
            if &data[..8] != CHUNK_MAGIC {
                debug!(offset, "no chunk signature, skipping block");
                continue;
            }
            match Chunk::parse(offset, data) {
                Ok(chunk) => return Some(Ok(chunk)),
                Err(err) => warn!(offset, "skipping invalid chunk: {err}"),
            }
        }
        None
    }
}
