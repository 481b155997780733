use crate::evtx::cursor::{le_u32, le_u64};
use crate::evtx::{
    CHUNK_HEADER_SIZE, CHUNK_MAGIC, CHUNK_RECORDS_START, CHUNK_SIZE, EvtxError, STRING_BUCKETS,
    TEMPLATE_BUCKETS,
};

/// Fixed part of a chunk: the 128-byte header followed by the common string
/// and template offset arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub magic: [u8; 8],
    pub first_record_number: u64,
    pub last_record_number: u64,
    pub first_record_id: u64,
    pub last_record_id: u64,
    pub header_size: u32,
    pub last_record_offset: u32,
    pub free_space_offset: u32,
    pub records_checksum: u32,
    pub flags: u32,
    pub header_checksum: u32,
    pub string_offsets: [u32; STRING_BUCKETS],
    pub template_offsets: [u32; TEMPLATE_BUCKETS],
}

impl Default for ChunkHeader {
    fn default() -> Self {
        Self {
            magic: [0u8; 8],
            first_record_number: 0,
            last_record_number: 0,
            first_record_id: 0,
            last_record_id: 0,
            header_size: 0,
            last_record_offset: 0,
            free_space_offset: 0,
            records_checksum: 0,
            flags: 0,
            header_checksum: 0,
            string_offsets: [0u32; STRING_BUCKETS],
            template_offsets: [0u32; TEMPLATE_BUCKETS],
        }
    }
}

impl ChunkHeader {
    /// Decode the header fields. Does not judge them; see [`ChunkHeader::validate`].
    pub fn parse(data: &[u8]) -> Result<Self, EvtxError> {
        if data.len() < CHUNK_RECORDS_START {
            return Err(EvtxError::InvalidHeader(format!(
                "need {} bytes, got {}",
                CHUNK_RECORDS_START,
                data.len()
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[..8]);

        let mut string_offsets = [0u32; STRING_BUCKETS];
        for (i, slot) in string_offsets.iter_mut().enumerate() {
            *slot = le_u32(data, 0x80 + i * 4);
        }
        let mut template_offsets = [0u32; TEMPLATE_BUCKETS];
        for (i, slot) in template_offsets.iter_mut().enumerate() {
            *slot = le_u32(data, 0x180 + i * 4);
        }

        Ok(Self {
            magic,
            first_record_number: le_u64(data, 0x08),
            last_record_number: le_u64(data, 0x10),
            first_record_id: le_u64(data, 0x18),
            last_record_id: le_u64(data, 0x20),
            header_size: le_u32(data, 0x28),
            last_record_offset: le_u32(data, 0x2C),
            free_space_offset: le_u32(data, 0x30),
            records_checksum: le_u32(data, 0x34),
            flags: le_u32(data, 0x78),
            header_checksum: le_u32(data, 0x7C),
            string_offsets,
            template_offsets,
        })
    }

    /// Signature and declared sizes must match the format constants and be
    /// consistent with each other.
    pub fn validate(&self) -> Result<(), EvtxError> {
        if &self.magic != CHUNK_MAGIC {
            return Err(EvtxError::InvalidHeader(format!(
                "bad chunk magic {:?}",
                String::from_utf8_lossy(&self.magic)
            )));
        }
        if self.header_size != CHUNK_HEADER_SIZE {
            return Err(EvtxError::InvalidHeader(format!(
                "bad header size {}",
                self.header_size
            )));
        }
        let last = self.last_record_offset as usize;
        if last < CHUNK_RECORDS_START || last >= CHUNK_SIZE {
            return Err(EvtxError::InvalidHeader(format!(
                "last record offset 0x{last:x} outside chunk"
            )));
        }
        let free = self.free_space_offset as usize;
        if free <= last || free > CHUNK_SIZE {
            return Err(EvtxError::InvalidHeader(format!(
                "free space offset 0x{free:x} inconsistent with last record offset 0x{last:x}"
            )));
        }
        if self.first_record_number > self.last_record_number {
            return Err(EvtxError::InvalidHeader(format!(
                "first record number {} after last {}",
                self.first_record_number, self.last_record_number
            )));
        }
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.last_record_number
            .saturating_sub(self.first_record_number)
            .saturating_add(1)
    }
}
