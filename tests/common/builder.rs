//! Synthetic EVTX writer.
//!
//! Produces chunks and files in the on-disk layout the decoder reads:
//! names and the template definition are written inline on first use and
//! referenced by chunk offset afterwards, exactly like the Windows writer.
//! Shared by the unit tests (mounted with `#[path]`), the integration tests
//! and the benches.

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

pub const CHUNK_SIZE: usize = 0x10000;
pub const FILE_HEADER_BLOCK: usize = 0x1000;
const RECORDS_START: usize = 0x200;
const STRING_BUCKETS: usize = 64;
const TEMPLATE_BUCKETS: usize = 32;
const FILETIME_EPOCH_DELTA_SECS: i64 = 11_644_473_600;
/// 2017-01-01T00:00:00Z
pub const BASE_UNIX_SECS: i64 = 1_483_228_800;

const TEMPLATE_GUID: [u8; 16] = [
    0x3d, 0x1b, 0x9a, 0x5e, 0x52, 0x11, 0x4c, 0x47, 0x8e, 0x55, 0x1e, 0x2b, 0x5c, 0x0d, 0x7a, 0x31,
];
const FANOUT_TEMPLATE_ID: u32 = 0x4141;
const EVENT_NS: &str = "http://schemas.microsoft.com/win/2004/08/events/event";

const T_STRING: u8 = 0x01;
const T_UINT16: u8 = 0x06;
const T_UINT64: u8 = 0x0A;
const T_FILETIME: u8 = 0x11;
const T_SID: u8 = 0x13;
const T_BINXML: u8 = 0x21;
const T_NULL: u8 = 0x00;

#[derive(Debug, Clone)]
pub struct EventSpec {
    pub record_id: u64,
    pub event_id: u16,
    pub channel: String,
    pub computer: String,
    pub provider: String,
    pub user: Option<String>,
    pub system_time: u64,
    pub data: Vec<(String, String)>,
}

impl EventSpec {
    /// Event timestamped `record_id` seconds after [`BASE_UNIX_SECS`].
    pub fn new(record_id: u64, event_id: u16, channel: &str) -> Self {
        Self {
            record_id,
            event_id,
            channel: channel.to_string(),
            computer: "WKS01.corp.local".to_string(),
            provider: "Microsoft-Windows-Security-Auditing".to_string(),
            user: Some("S-1-5-18".to_string()),
            system_time: unix_to_filetime(BASE_UNIX_SECS + record_id as i64),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, name: &str, value: &str) -> Self {
        self.data.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_user(mut self, sid: &str) -> Self {
        self.user = Some(sid.to_string());
        self
    }

    pub fn without_user(mut self) -> Self {
        self.user = None;
        self
    }

    pub fn at_unix(mut self, secs: i64) -> Self {
        self.system_time = unix_to_filetime(secs);
        self
    }

    pub fn unix_secs(&self) -> i64 {
        (self.system_time / 10_000_000) as i64 - FILETIME_EPOCH_DELTA_SECS
    }
}

pub fn unix_to_filetime(secs: i64) -> u64 {
    ((secs + FILETIME_EPOCH_DELTA_SECS) as u64) * 10_000_000
}

fn filetime_rfc3339(ticks: u64) -> String {
    let secs = (ticks / 10_000_000) as i64 - FILETIME_EPOCH_DELTA_SECS;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_default()
}

fn sid_bytes(sid: &str) -> Vec<u8> {
    let parts: Vec<u64> = sid
        .trim_start_matches("S-")
        .split('-')
        .filter_map(|part| part.parse().ok())
        .collect();
    let revision = parts.first().copied().unwrap_or(1) as u8;
    let authority = parts.get(1).copied().unwrap_or(0);
    let subs = parts.get(2..).unwrap_or(&[]);
    let mut out = vec![revision, subs.len() as u8];
    out.extend_from_slice(&authority.to_be_bytes()[2..8]);
    for sub in subs {
        out.extend_from_slice(&(*sub as u32).to_le_bytes());
    }
    out
}

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn name_hash(name: &str) -> u16 {
    name.encode_utf16()
        .fold(0u32, |acc, unit| acc.wrapping_mul(65599).wrapping_add(unit as u32)) as u16
}

/// Writes one chunk. Records are templated unless [`ChunkBuilder::plain`]
/// is used, in which case every value is an inline string.
pub struct ChunkBuilder {
    buf: Vec<u8>,
    names: HashMap<String, u32>,
    string_buckets: [u32; STRING_BUCKETS],
    template_buckets: [u32; TEMPLATE_BUCKETS],
    template_offset: Option<u32>,
    plain: bool,
    first_record_number: u64,
    record_count: u64,
    first_record_id: u64,
    last_record_id: u64,
    last_record_offset: u32,
}

impl ChunkBuilder {
    pub fn new(first_record_number: u64) -> Self {
        Self {
            buf: vec![0u8; RECORDS_START],
            names: HashMap::new(),
            string_buckets: [0u32; STRING_BUCKETS],
            template_buckets: [0u32; TEMPLATE_BUCKETS],
            template_offset: None,
            plain: false,
            first_record_number,
            record_count: 0,
            first_record_id: 0,
            last_record_id: 0,
            last_record_offset: 0,
        }
    }

    pub fn plain(mut self) -> Self {
        self.plain = true;
        self
    }

    pub fn push_event(&mut self, spec: &EventSpec) {
        let plain = self.plain;
        self.push_record(spec.record_id, spec.system_time, |b| {
            if plain {
                b.plain_payload(spec);
            } else {
                b.templated_payload(spec);
            }
        });
    }

    /// A record whose template `<A>` references substitution 0 `fanout`
    /// times. Value 0 instantiates the same template again, `levels` deep,
    /// so a naive expansion does `fanout ^ levels` work.
    pub fn push_fanout_record(&mut self, record_id: u64, fanout: u16, levels: usize) {
        let system_time = unix_to_filetime(BASE_UNIX_SECS + record_id as i64);
        self.push_record(record_id, system_time, |b| {
            b.fragment_header();
            b.u8(0x0C);
            b.u8(0x01);
            b.u32(FANOUT_TEMPLATE_ID);
            let def_offset = (b.buf.len() + 4) as u32;
            b.u32(def_offset);
            b.u32(0);
            b.buf.extend_from_slice(&[0xAA; 16]);
            let size_pos = b.buf.len();
            b.u32(0);
            let body_start = b.buf.len();
            b.fragment_header();
            b.open_element("A", false, true);
            b.u8(0x02);
            for _ in 0..fanout {
                b.substitution(0, T_BINXML, false);
            }
            b.u8(0x04);
            b.u8(0x00);
            let body_len = (b.buf.len() - body_start) as u32;
            b.patch_u32(size_pos, body_len);
            b.fanout_values(def_offset, levels.saturating_sub(1));
            b.u8(0x00);
        });
    }

    /// Substitution array holding one BinXML value that instantiates the
    /// template at `def_offset` again, or a bare `<A/>` once `levels` is 0.
    fn fanout_values(&mut self, def_offset: u32, levels: usize) {
        self.u32(1);
        let desc_pos = self.buf.len();
        self.u32(0);
        let value_start = self.buf.len();
        self.fragment_header();
        if levels == 0 {
            self.open_element("A", false, false);
            self.u8(0x03);
        } else {
            self.u8(0x0C);
            self.u8(0x01);
            self.u32(FANOUT_TEMPLATE_ID);
            self.u32(def_offset);
            self.fanout_values(def_offset, levels - 1);
        }
        self.u8(0x00);
        let size = (self.buf.len() - value_start) as u16;
        self.buf[desc_pos..desc_pos + 2].copy_from_slice(&size.to_le_bytes());
        self.buf[desc_pos + 2] = T_BINXML;
    }

    fn push_record(&mut self, record_id: u64, system_time: u64, payload: impl FnOnce(&mut Self)) {
        let start = self.buf.len();
        self.buf.extend_from_slice(b"**\0\0");
        self.u32(0);
        self.u64(record_id);
        self.u64(system_time);
        payload(self);
        let size = (self.buf.len() + 4 - start) as u32;
        self.patch_u32(start + 4, size);
        self.u32(size);
        assert!(self.buf.len() <= CHUNK_SIZE, "chunk overflow");

        if self.record_count == 0 {
            self.first_record_id = record_id;
        }
        self.last_record_id = record_id;
        self.record_count += 1;
        self.last_record_offset = start as u32;
    }

    pub fn finish(mut self) -> Vec<u8> {
        let free_space = self.buf.len() as u32;
        let last_record_number = self.first_record_number + self.record_count.saturating_sub(1);
        self.buf[0..8].copy_from_slice(b"ElfChnk\0");
        self.patch_u64(0x08, self.first_record_number);
        self.patch_u64(0x10, last_record_number);
        self.patch_u64(0x18, self.first_record_id);
        self.patch_u64(0x20, self.last_record_id);
        self.patch_u32(0x28, 0x80);
        self.patch_u32(0x2C, self.last_record_offset);
        self.patch_u32(0x30, free_space);
        for (i, offset) in self.string_buckets.into_iter().enumerate() {
            self.patch_u32(0x80 + i * 4, offset);
        }
        for (i, offset) in self.template_buckets.into_iter().enumerate() {
            self.patch_u32(0x180 + i * 4, offset);
        }
        self.buf.resize(CHUNK_SIZE, 0);
        self.buf
    }

    fn templated_payload(&mut self, spec: &EventSpec) {
        self.fragment_header();
        self.u8(0x0C);
        self.u8(0x01);
        self.u32(u32::from_le_bytes([
            TEMPLATE_GUID[0],
            TEMPLATE_GUID[1],
            TEMPLATE_GUID[2],
            TEMPLATE_GUID[3],
        ]));
        match self.template_offset {
            Some(offset) => self.u32(offset),
            None => {
                let def_offset = (self.buf.len() + 4) as u32;
                self.u32(def_offset);
                self.u32(0);
                self.buf.extend_from_slice(&TEMPLATE_GUID);
                let size_pos = self.buf.len();
                self.u32(0);
                let body_start = self.buf.len();
                self.template_body();
                let body_len = (self.buf.len() - body_start) as u32;
                self.patch_u32(size_pos, body_len);
                self.template_offset = Some(def_offset);
                self.template_buckets[TEMPLATE_GUID[0] as usize % TEMPLATE_BUCKETS] = def_offset;
            }
        }

        const COUNT: usize = 8;
        self.u32(COUNT as u32);
        let desc_pos = self.buf.len();
        self.buf.extend_from_slice(&[0u8; COUNT * 4]);
        for index in 0..COUNT {
            let value_start = self.buf.len();
            let value_type = self.substitution_value(index, spec);
            let size = (self.buf.len() - value_start) as u16;
            let at = desc_pos + index * 4;
            self.buf[at..at + 2].copy_from_slice(&size.to_le_bytes());
            self.buf[at + 2] = value_type;
            self.buf[at + 3] = 0;
        }
        self.u8(0x00);
    }

    fn substitution_value(&mut self, index: usize, spec: &EventSpec) -> u8 {
        match index {
            0 => {
                self.buf.extend_from_slice(&spec.event_id.to_le_bytes());
                T_UINT16
            }
            1 => {
                self.u64(spec.system_time);
                T_FILETIME
            }
            2 => {
                self.u64(spec.record_id);
                T_UINT64
            }
            3 => {
                self.buf.extend_from_slice(&utf16(&spec.channel));
                T_STRING
            }
            4 => {
                self.buf.extend_from_slice(&utf16(&spec.computer));
                T_STRING
            }
            5 => match &spec.user {
                Some(sid) => {
                    self.buf.extend_from_slice(&sid_bytes(sid));
                    T_SID
                }
                None => T_NULL,
            },
            6 => {
                self.buf.extend_from_slice(&utf16(&spec.provider));
                T_STRING
            }
            _ => {
                if spec.data.is_empty() {
                    return T_NULL;
                }
                self.fragment_header();
                self.event_data(&spec.data, false);
                self.u8(0x00);
                T_BINXML
            }
        }
    }

    fn template_body(&mut self) {
        self.fragment_header();
        self.open_element("Event", true, true);
        self.attribute("xmlns", false);
        self.text(EVENT_NS);
        self.u8(0x02);

        self.open_element("System", false, true);
        self.u8(0x02);

        self.open_element("Provider", true, true);
        self.attribute("Name", false);
        self.substitution(6, T_STRING, false);
        self.u8(0x03);

        self.simple_substitution("EventID", 0, T_UINT16);

        self.open_element("TimeCreated", true, true);
        self.attribute("SystemTime", false);
        self.substitution(1, T_FILETIME, false);
        self.u8(0x03);

        self.simple_substitution("EventRecordID", 2, T_UINT64);
        self.simple_substitution("Channel", 3, T_STRING);
        self.simple_substitution("Computer", 4, T_STRING);

        self.open_element("Security", true, true);
        self.attribute("UserID", false);
        self.substitution(5, T_SID, true);
        self.u8(0x03);

        self.u8(0x04);
        self.substitution(7, T_BINXML, true);
        self.u8(0x04);
        self.u8(0x00);
    }

    fn plain_payload(&mut self, spec: &EventSpec) {
        self.fragment_header();
        self.open_element("Event", true, true);
        self.attribute("xmlns", false);
        self.text(EVENT_NS);
        self.u8(0x02);

        self.open_element("System", false, true);
        self.u8(0x02);

        self.open_element("Provider", true, true);
        self.attribute("Name", false);
        self.text(&spec.provider);
        self.u8(0x03);

        self.simple_text("EventID", &spec.event_id.to_string());

        self.open_element("TimeCreated", true, true);
        self.attribute("SystemTime", false);
        self.text(&filetime_rfc3339(spec.system_time));
        self.u8(0x03);

        self.simple_text("EventRecordID", &spec.record_id.to_string());
        self.simple_text("Channel", &spec.channel);
        self.simple_text("Computer", &spec.computer);

        match &spec.user {
            Some(sid) => {
                self.open_element("Security", true, true);
                self.attribute("UserID", false);
                self.text(sid);
            }
            None => self.open_element("Security", false, true),
        }
        self.u8(0x03);
        self.u8(0x04);

        if !spec.data.is_empty() {
            self.event_data(&spec.data, true);
        }
        self.u8(0x04);
        self.u8(0x00);
    }

    fn event_data(&mut self, data: &[(String, String)], with_dependency: bool) {
        self.open_element("EventData", false, with_dependency);
        self.u8(0x02);
        for (name, value) in data {
            self.open_element("Data", true, with_dependency);
            self.attribute("Name", false);
            self.text(name);
            self.u8(0x02);
            self.text(value);
            self.u8(0x04);
        }
        self.u8(0x04);
    }

    fn simple_substitution(&mut self, name: &str, index: u16, value_type: u8) {
        self.open_element(name, false, true);
        self.u8(0x02);
        self.substitution(index, value_type, false);
        self.u8(0x04);
    }

    fn simple_text(&mut self, name: &str, text: &str) {
        self.open_element(name, false, true);
        self.u8(0x02);
        self.text(text);
        self.u8(0x04);
    }

    fn fragment_header(&mut self) {
        self.buf.extend_from_slice(&[0x0F, 0x01, 0x01, 0x00]);
    }

    fn open_element(&mut self, name: &str, has_attributes: bool, with_dependency: bool) {
        self.u8(if has_attributes { 0x41 } else { 0x01 });
        if with_dependency {
            self.buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
        }
        self.u32(0);
        self.name(name);
        if has_attributes {
            self.u32(0);
        }
    }

    fn attribute(&mut self, name: &str, more: bool) {
        self.u8(if more { 0x46 } else { 0x06 });
        self.name(name);
    }

    fn text(&mut self, text: &str) {
        self.u8(0x05);
        self.u8(T_STRING);
        let units = utf16(text);
        self.buf
            .extend_from_slice(&((units.len() / 2) as u16).to_le_bytes());
        self.buf.extend_from_slice(&units);
    }

    fn substitution(&mut self, index: u16, value_type: u8, optional: bool) {
        self.u8(if optional { 0x0E } else { 0x0D });
        self.buf.extend_from_slice(&index.to_le_bytes());
        self.u8(value_type);
    }

    fn name(&mut self, name: &str) {
        if let Some(offset) = self.names.get(name) {
            let offset = *offset;
            self.u32(offset);
            return;
        }
        let offset = (self.buf.len() + 4) as u32;
        self.u32(offset);
        let hash = name_hash(name);
        let units = utf16(name);
        self.u32(0);
        self.buf.extend_from_slice(&hash.to_le_bytes());
        self.buf
            .extend_from_slice(&((units.len() / 2) as u16).to_le_bytes());
        self.buf.extend_from_slice(&units);
        self.buf.extend_from_slice(&[0, 0]);
        self.names.insert(name.to_string(), offset);
        let bucket = hash as usize % STRING_BUCKETS;
        if self.string_buckets[bucket] == 0 {
            self.string_buckets[bucket] = offset;
        }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn patch_u64(&mut self, at: usize, value: u64) {
        self.buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }
}

/// One chunk holding `specs`, first record number taken from the first spec.
pub fn chunk_with(specs: &[EventSpec]) -> Vec<u8> {
    let first = specs.first().map(|spec| spec.record_id).unwrap_or(1);
    let mut builder = ChunkBuilder::new(first);
    for spec in specs {
        builder.push_event(spec);
    }
    builder.finish()
}

/// `count` Security events with consecutive record ids starting at `first_id`.
pub fn simple_chunk(first_id: u64, count: u64) -> Vec<u8> {
    let specs: Vec<EventSpec> = (first_id..first_id + count)
        .map(|id| EventSpec::new(id, 4624, "Security"))
        .collect();
    chunk_with(&specs)
}

/// File header block followed by `chunks`.
pub fn file_with(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; FILE_HEADER_BLOCK];
    out[0..8].copy_from_slice(b"ElfFile\0");
    out[0x08..0x10].copy_from_slice(&0u64.to_le_bytes());
    let last_chunk = chunks.len().saturating_sub(1) as u64;
    out[0x10..0x18].copy_from_slice(&last_chunk.to_le_bytes());
    out[0x18..0x20].copy_from_slice(&1000u64.to_le_bytes());
    out[0x20..0x24].copy_from_slice(&0x80u32.to_le_bytes());
    out[0x24..0x26].copy_from_slice(&1u16.to_le_bytes());
    out[0x26..0x28].copy_from_slice(&3u16.to_le_bytes());
    out[0x28..0x2A].copy_from_slice(&(FILE_HEADER_BLOCK as u16).to_le_bytes());
    out[0x2A..0x2C].copy_from_slice(&(chunks.len() as u16).to_le_bytes());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Deterministic filler that never contains the chunk signature.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let byte = (state >> 33) as u8;
            if byte == b'E' { b'F' } else { byte }
        })
        .collect()
}
