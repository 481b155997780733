use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Seek};

use memchr::memmem::Finder;

use crate::constants::SCAN_BUFFER_SIZE;

/// Logical offset of the first byte of a freshly filled read window: the
/// underlying stream is already `buffered` bytes past it.
pub fn window_base(seek_position: u64, buffered: usize) -> u64 {
    seek_position.saturating_sub(buffered as u64)
}

/// Single pass over a seekable stream yielding the absolute offset of every
/// occurrence of a signature, in increasing order.
pub struct ChunkOffsetScanner<R> {
    reader: BufReader<R>,
    finder: Finder<'static>,
    sig_len: usize,
    window: Vec<u8>,
    /// Last `sig_len - 1` bytes of the previous window.
    carry: Vec<u8>,
    pending: VecDeque<u64>,
    done: bool,
}

impl<R: Read + Seek> ChunkOffsetScanner<R> {
    pub fn new(reader: R, signature: &[u8]) -> Self {
        Self::with_capacity(reader, signature, SCAN_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, signature: &[u8], capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity.max(1), reader),
            finder: Finder::new(signature).into_owned(),
            sig_len: signature.len(),
            window: Vec::new(),
            carry: Vec::new(),
            pending: VecDeque::new(),
            done: signature.is_empty(),
        }
    }

    /// Read one window and queue its matches. Returns false at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let filled = self.reader.fill_buf()?;
        if filled.is_empty() {
            return Ok(false);
        }
        self.window.clear();
        self.window.extend_from_slice(&self.carry);
        self.window.extend_from_slice(filled);
        let fresh = filled.len();
        let buffered = self.reader.buffer().len();
        let seek_position = self.reader.get_mut().stream_position()?;
        self.reader.consume(fresh);

        let start = window_base(seek_position, buffered) - self.carry.len() as u64;
        for idx in self.finder.find_iter(&self.window) {
            self.pending.push_back(start + idx as u64);
        }

        let keep = self.sig_len.saturating_sub(1).min(self.window.len());
        self.carry.clear();
        self.carry
            .extend_from_slice(&self.window[self.window.len() - keep..]);
        Ok(true)
    }
}

impl<R: Read + Seek> Iterator for ChunkOffsetScanner<R> {
    type Item = io::Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(offset) = self.pending.pop_front() {
                return Some(Ok(offset));
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
