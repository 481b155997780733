use std::collections::{HashMap, HashSet};

use crate::evtx::binxml::{BinXmlParser, TemplateCache, read_name_node};
use crate::evtx::cursor::{le_u32, le_u64};
use crate::evtx::header::ChunkHeader;
use crate::evtx::record::{EvtxRecord, nodes_to_json};
use crate::evtx::{
    CHUNK_RECORDS_START, CHUNK_SIZE, EvtxError, MIN_RECORD_SIZE, RECORD_HEADER_SIZE, RECORD_MAGIC,
};

/// Template definition header as found through the template table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefinition {
    pub offset: u32,
    pub guid: [u8; 16],
    pub data_offset: u32,
    pub data_size: u32,
}

/// A fully validated 64 KiB chunk. Construction runs every table parse, so a
/// `Chunk` value never represents a half-parsed buffer.
#[derive(Debug, Clone)]
pub struct Chunk {
    offset: u64,
    data: Vec<u8>,
    header: ChunkHeader,
    strings: HashMap<u32, String>,
    templates: HashMap<u32, TemplateDefinition>,
    record_offsets: Vec<u32>,
}

impl Chunk {
    /// Parse `data` found at absolute `offset` of its source.
    pub fn parse(offset: u64, data: Vec<u8>) -> Result<Self, EvtxError> {
        if data.len() != CHUNK_SIZE {
            return Err(EvtxError::InvalidHeader(format!(
                "chunk buffer is {} bytes, expected {CHUNK_SIZE}",
                data.len()
            )));
        }
        let header = Self::parse_header(&data)?;
        let strings = Self::parse_string_table(&data, &header)?;
        let templates = Self::parse_template_table(&data, &header)?;
        let record_offsets = Self::parse_record_offsets(&data, &header)?;
        Ok(Self {
            offset,
            data,
            header,
            strings,
            templates,
            record_offsets,
        })
    }

    pub fn parse_header(data: &[u8]) -> Result<ChunkHeader, EvtxError> {
        let header = ChunkHeader::parse(data)?;
        header.validate()?;
        Ok(header)
    }

    /// Common strings reachable from the 64 hash buckets.
    pub fn parse_string_table(
        data: &[u8],
        header: &ChunkHeader,
    ) -> Result<HashMap<u32, String>, EvtxError> {
        let mut strings = HashMap::new();
        for bucket in header.string_offsets {
            let mut next = bucket;
            let mut seen = HashSet::new();
            while next != 0 {
                if !seen.insert(next) {
                    return Err(EvtxError::StringTable(format!("cycle at 0x{next:x}")));
                }
                let offset = next as usize;
                if offset < CHUNK_RECORDS_START || offset + 8 > data.len() {
                    return Err(EvtxError::StringTable(format!(
                        "entry 0x{offset:x} outside chunk"
                    )));
                }
                let (name, _) = read_name_node(data, offset)
                    .map_err(|err| EvtxError::StringTable(err.to_string()))?;
                strings.insert(next, name);
                next = le_u32(data, offset);
            }
        }
        Ok(strings)
    }

    pub fn parse_template_table(
        data: &[u8],
        header: &ChunkHeader,
    ) -> Result<HashMap<u32, TemplateDefinition>, EvtxError> {
        let mut templates = HashMap::new();
        for bucket in header.template_offsets {
            let mut next = bucket;
            let mut seen = HashSet::new();
            while next != 0 {
                if !seen.insert(next) {
                    return Err(EvtxError::TemplateTable(format!("cycle at 0x{next:x}")));
                }
                let offset = next as usize;
                if offset < CHUNK_RECORDS_START || offset + 24 > data.len() {
                    return Err(EvtxError::TemplateTable(format!(
                        "definition 0x{offset:x} outside chunk"
                    )));
                }
                let mut guid = [0u8; 16];
                guid.copy_from_slice(&data[offset + 4..offset + 20]);
                let data_size = le_u32(data, offset + 20);
                let data_offset = offset + 24;
                if data_offset + data_size as usize > data.len() {
                    return Err(EvtxError::TemplateTable(format!(
                        "body of definition 0x{offset:x} ({data_size} bytes) runs past the chunk"
                    )));
                }
                templates.insert(
                    next,
                    TemplateDefinition {
                        offset: next,
                        guid,
                        data_offset: data_offset as u32,
                        data_size,
                    },
                );
                next = le_u32(data, offset);
            }
        }
        Ok(templates)
    }

    /// Walk record headers from the start of the record area up to the last
    /// record offset declared in the header.
    pub fn parse_record_offsets(
        data: &[u8],
        header: &ChunkHeader,
    ) -> Result<Vec<u32>, EvtxError> {
        let last = header.last_record_offset as usize;
        let free = header.free_space_offset as usize;
        let mut offsets = Vec::new();
        let mut pos = CHUNK_RECORDS_START;
        while pos <= last {
            if pos + RECORD_HEADER_SIZE > free {
                return Err(EvtxError::RecordOffsets(format!(
                    "record header at 0x{pos:x} crosses free space 0x{free:x}"
                )));
            }
            if &data[pos..pos + 4] != RECORD_MAGIC {
                return Err(EvtxError::RecordOffsets(format!("bad record magic at 0x{pos:x}")));
            }
            let size = le_u32(data, pos + 4);
            if size < MIN_RECORD_SIZE {
                return Err(EvtxError::RecordOffsets(format!(
                    "record at 0x{pos:x} has size {size}"
                )));
            }
            let end = pos + size as usize;
            if end > free {
                return Err(EvtxError::RecordOffsets(format!(
                    "record at 0x{pos:x} of {size} bytes crosses free space 0x{free:x}"
                )));
            }
            let copy = le_u32(data, end - 4);
            if copy != size {
                return Err(EvtxError::RecordOffsets(format!(
                    "record at 0x{pos:x}: trailing size {copy} != {size}"
                )));
            }
            offsets.push(pos as u32);
            pos = end;
        }
        if offsets.last().map(|o| *o as usize) != Some(last) {
            return Err(EvtxError::RecordOffsets(format!(
                "walk did not land on last record offset 0x{last:x}"
            )));
        }
        Ok(offsets)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn strings(&self) -> &HashMap<u32, String> {
        &self.strings
    }

    pub fn templates(&self) -> &HashMap<u32, TemplateDefinition> {
        &self.templates
    }

    pub fn record_offsets(&self) -> &[u32] {
        &self.record_offsets
    }

    pub fn record_count(&self) -> usize {
        self.record_offsets.len()
    }

    /// Lazily decode records in storage order.
    pub fn records(&self) -> ChunkRecords<'_> {
        ChunkRecords {
            chunk: self,
            next: 0,
            templates: TemplateCache::new(),
        }
    }

    fn decode_record(
        &self,
        offset: usize,
        templates: &mut TemplateCache,
    ) -> Result<EvtxRecord, EvtxError> {
        let size = le_u32(&self.data, offset + 4) as usize;
        let record_id = le_u64(&self.data, offset + 8);
        let written = le_u64(&self.data, offset + 16);
        let mut parser = BinXmlParser::new(&self.data, templates);
        let nodes = parser
            .parse_record(offset + RECORD_HEADER_SIZE, offset + size - 4)
            .map_err(|err| EvtxError::Record {
                offset,
                reason: err.to_string(),
            })?;
        Ok(EvtxRecord {
            record_id,
            written,
            chunk_offset: self.offset,
            value: nodes_to_json(&nodes),
        })
    }
}

pub struct ChunkRecords<'c> {
    chunk: &'c Chunk,
    next: usize,
    templates: TemplateCache,
}

impl Iterator for ChunkRecords<'_> {
    type Item = Result<EvtxRecord, EvtxError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = *self.chunk.record_offsets.get(self.next)? as usize;
        self.next += 1;
        Some(self.chunk.decode_record(offset, &mut self.templates))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.chunk.record_offsets.len() - self.next;
        (left, Some(left))
    }
}
