//! Little-endian reader over a chunk buffer.
//!
//! Positions are absolute offsets into the slice handed to [`ByteCursor::at`],
//! which for BinXML is always the whole chunk: inline names and inline
//! template definitions are detected by comparing a referenced offset with the
//! current position.

use crate::evtx::EvtxError;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor over `data[..end]` starting at `pos`.
    pub fn at(data: &'a [u8], pos: usize, end: usize) -> Result<Self, EvtxError> {
        let end = end.min(data.len());
        if pos > end {
            return Err(EvtxError::OutOfBounds { offset: pos, len: 0 });
        }
        Ok(Self {
            data: &data[..end],
            pos,
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn end(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), EvtxError> {
        if pos > self.data.len() {
            return Err(EvtxError::OutOfBounds { offset: pos, len: 0 });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<(), EvtxError> {
        self.bytes(len).map(|_| ())
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], EvtxError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(EvtxError::OutOfBounds {
                offset: self.pos,
                len,
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn peek_u8(&self) -> Result<u8, EvtxError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(EvtxError::OutOfBounds {
                offset: self.pos,
                len: 1,
            })
    }

    pub fn u8(&mut self) -> Result<u8, EvtxError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, EvtxError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, EvtxError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, EvtxError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// UTF-16LE string of `chars` code units.
    pub fn utf16(&mut self, chars: usize) -> Result<String, EvtxError> {
        let raw = self.bytes(chars.saturating_mul(2))?;
        Ok(decode_utf16(raw))
    }

    /// UTF-16LE string prefixed by a `u16` code unit count.
    pub fn len_prefixed_utf16(&mut self) -> Result<String, EvtxError> {
        let chars = self.u16()? as usize;
        self.utf16(chars)
    }
}

/// Decode UTF-16LE bytes, dropping trailing NULs and replacing invalid units.
pub fn decode_utf16(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let trimmed = match units.iter().rposition(|unit| *unit != 0) {
        Some(last) => &units[..=last],
        None => &[],
    };
    String::from_utf16_lossy(trimmed)
}

pub fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

pub fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub fn le_u64(data: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
