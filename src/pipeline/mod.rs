//! # Pipeline Module
//!
//! Drives one input at a time through either carving (signature scan over a
//! raw image) or indexed access (chunk by chunk after the file header), and
//! hands every decoded record to a [`RecordDispatcher`].

pub mod dispatch;

use std::io::{Read, Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::carve::fetch_chunk;
use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::evidence::{EvidenceSource, open_scan_cursor, open_source};
use crate::evtx::{Chunk, EvtxFile};
use crate::scanner::spawn_offset_scanner;

pub use dispatch::{DispatchCounters, DispatchMode, RecordDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarveOptions {
    pub offset: u64,
    /// Stop after this many successfully parsed chunks. Zero means no limit.
    pub limit: Option<u64>,
    pub queue_capacity: usize,
}

impl Default for CarveOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarveSummary {
    pub candidates: u64,
    pub chunks_parsed: u64,
    pub chunks_rejected: u64,
    pub records_decoded: u64,
    pub record_errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub chunks: u64,
    pub records_decoded: u64,
    pub record_errors: u64,
}

/// Carve the file at `path` starting at `opts.offset`.
pub fn carve_file<W: Write>(
    path: &Path,
    opts: &CarveOptions,
    dispatcher: &mut RecordDispatcher<W>,
) -> Result<CarveSummary> {
    let scan = open_scan_cursor(path, opts.offset)
        .with_context(|| format!("opening {} for scanning", path.display()))?;
    let source =
        open_source(path).with_context(|| format!("opening {}", path.display()))?;
    info!(path = %path.display(), offset = opts.offset, "carving");
    carve_source(scan, source.as_ref(), opts, dispatcher)
}

/// Scan `scan` for chunk signatures on a separate thread and rebuild each
/// candidate from `source`. `scan` must already be positioned at the start
/// offset; reported offsets are absolute.
pub fn carve_source<R, W>(
    scan: R,
    source: &dyn EvidenceSource,
    opts: &CarveOptions,
    dispatcher: &mut RecordDispatcher<W>,
) -> Result<CarveSummary>
where
    R: Read + Seek + Send + 'static,
    W: Write,
{
    let mut summary = CarveSummary::default();
    let limit = opts.limit.filter(|&limit| limit > 0);
    let (rx, scanner) =
        spawn_offset_scanner(scan, opts.queue_capacity).context("starting chunk scanner")?;

    let mut limit_reached = false;
    for offset in rx.iter() {
        summary.candidates += 1;
        debug!(offset, "chunk signature found");
        let chunk = match fetch_chunk(source, offset) {
            Ok(chunk) => chunk,
            Err(err) => {
                summary.chunks_rejected += 1;
                warn!(offset, "discarding candidate: {err}");
                continue;
            }
        };
        summary.chunks_parsed += 1;
        let (decoded, failed) = dispatch_chunk(&chunk, dispatcher)?;
        summary.records_decoded += decoded;
        summary.record_errors += failed;

        if limit.is_some_and(|limit| summary.chunks_parsed >= limit) {
            limit_reached = true;
            break;
        }
    }

    if limit_reached {
        // The scanner exits on its next send into the closed channel.
        drop(rx);
        debug!(chunks = summary.chunks_parsed, "chunk limit reached");
    } else {
        match scanner.join() {
            Ok(delivered) => debug!(delivered, "scanner finished"),
            Err(_) => warn!("chunk scanner thread panicked"),
        }
    }
    info!(
        candidates = summary.candidates,
        parsed = summary.chunks_parsed,
        rejected = summary.chunks_rejected,
        records = summary.records_decoded,
        "carve complete"
    );
    Ok(summary)
}

/// Read `path` as a regular log file, ignoring what its header claims.
pub fn dump_file<W: Write>(
    path: &Path,
    dispatcher: &mut RecordDispatcher<W>,
) -> Result<DumpSummary> {
    let file = EvtxFile::open_dirty(path).with_context(|| format!("opening {}", path.display()))?;
    dump_evtx(&file, dispatcher)
}

pub fn dump_evtx<W: Write>(
    file: &EvtxFile,
    dispatcher: &mut RecordDispatcher<W>,
) -> Result<DumpSummary> {
    let mut summary = DumpSummary::default();
    for chunk in file.chunks() {
        let chunk = chunk.context("reading chunk")?;
        summary.chunks += 1;
        let (decoded, failed) = dispatch_chunk(&chunk, dispatcher)?;
        summary.records_decoded += decoded;
        summary.record_errors += failed;
    }
    Ok(summary)
}

/// Write the header block of `path` in human readable form.
pub fn print_header<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let file = EvtxFile::open_dirty(path).with_context(|| format!("opening {}", path.display()))?;
    write!(out, "\nFile Header: {}\n\n{}\n", path.display(), file.header())
        .context("writing header")?;
    Ok(())
}

fn dispatch_chunk<W: Write>(
    chunk: &Chunk,
    dispatcher: &mut RecordDispatcher<W>,
) -> Result<(u64, u64)> {
    let (mut decoded, mut failed) = (0u64, 0u64);
    for record in chunk.records() {
        match record {
            Ok(record) => {
                decoded += 1;
                dispatcher.dispatch(record)?;
            }
            Err(err) => {
                failed += 1;
                warn!(chunk = chunk.offset(), "cannot decode record: {err}");
            }
        }
    }
    Ok((decoded, failed))
}
