//! Typed BinXML values and their JSON rendering.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Number, Value as Json};

use crate::evtx::EvtxError;
use crate::evtx::cursor::{decode_utf16, le_u16, le_u32, le_u64};

pub const TYPE_NULL: u8 = 0x00;
pub const TYPE_STRING: u8 = 0x01;
pub const TYPE_ANSI_STRING: u8 = 0x02;
pub const TYPE_INT8: u8 = 0x03;
pub const TYPE_UINT8: u8 = 0x04;
pub const TYPE_INT16: u8 = 0x05;
pub const TYPE_UINT16: u8 = 0x06;
pub const TYPE_INT32: u8 = 0x07;
pub const TYPE_UINT32: u8 = 0x08;
pub const TYPE_INT64: u8 = 0x09;
pub const TYPE_UINT64: u8 = 0x0A;
pub const TYPE_REAL32: u8 = 0x0B;
pub const TYPE_REAL64: u8 = 0x0C;
pub const TYPE_BOOL: u8 = 0x0D;
pub const TYPE_BINARY: u8 = 0x0E;
pub const TYPE_GUID: u8 = 0x0F;
pub const TYPE_SIZE_T: u8 = 0x10;
pub const TYPE_FILETIME: u8 = 0x11;
pub const TYPE_SYSTIME: u8 = 0x12;
pub const TYPE_SID: u8 = 0x13;
pub const TYPE_HEX_INT32: u8 = 0x14;
pub const TYPE_HEX_INT64: u8 = 0x15;
pub const TYPE_BINXML: u8 = 0x21;
pub const TYPE_ARRAY_FLAG: u8 = 0x80;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_DELTA_SECS: i64 = 11_644_473_600;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    UInt(u64),
    Real(f64),
    Bool(bool),
    Binary(Vec<u8>),
    Guid(String),
    DateTime(DateTime<Utc>),
    Sid(String),
    HexInt32(u32),
    HexInt64(u64),
    Array(Vec<Value>),
}

impl Value {
    /// Decode a substitution value of `value_type` from exactly `raw`.
    pub fn decode(value_type: u8, raw: &[u8]) -> Result<Value, EvtxError> {
        if value_type & TYPE_ARRAY_FLAG != 0 {
            return decode_array(value_type & !TYPE_ARRAY_FLAG, raw);
        }
        let value = match value_type {
            TYPE_NULL => Value::Null,
            TYPE_STRING => Value::String(decode_utf16(raw)),
            TYPE_ANSI_STRING => {
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                Value::String(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            TYPE_INT8 => Value::Int(fixed::<1>(value_type, raw)?[0] as i8 as i64),
            TYPE_UINT8 => Value::UInt(fixed::<1>(value_type, raw)?[0] as u64),
            TYPE_INT16 => Value::Int(i16::from_le_bytes(fixed::<2>(value_type, raw)?) as i64),
            TYPE_UINT16 => Value::UInt(u16::from_le_bytes(fixed::<2>(value_type, raw)?) as u64),
            TYPE_INT32 => Value::Int(i32::from_le_bytes(fixed::<4>(value_type, raw)?) as i64),
            TYPE_UINT32 => Value::UInt(u32::from_le_bytes(fixed::<4>(value_type, raw)?) as u64),
            TYPE_INT64 => Value::Int(i64::from_le_bytes(fixed::<8>(value_type, raw)?)),
            TYPE_UINT64 => Value::UInt(u64::from_le_bytes(fixed::<8>(value_type, raw)?)),
            TYPE_REAL32 => Value::Real(f32::from_le_bytes(fixed::<4>(value_type, raw)?) as f64),
            TYPE_REAL64 => Value::Real(f64::from_le_bytes(fixed::<8>(value_type, raw)?)),
            TYPE_BOOL => Value::Bool(match raw.len() {
                1 => raw[0] != 0,
                2 => le_u16(raw, 0) != 0,
                _ => u32::from_le_bytes(fixed::<4>(value_type, raw)?) != 0,
            }),
            TYPE_BINARY => Value::Binary(raw.to_vec()),
            TYPE_GUID => Value::Guid(format_guid(&fixed::<16>(value_type, raw)?)),
            TYPE_SIZE_T => match raw.len() {
                4 => Value::HexInt32(le_u32(raw, 0)),
                8 => Value::HexInt64(le_u64(raw, 0)),
                other => return Err(size_error(value_type, other)),
            },
            TYPE_FILETIME => {
                Value::DateTime(filetime_to_datetime(u64::from_le_bytes(fixed::<8>(
                    value_type, raw,
                )?))?)
            }
            TYPE_SYSTIME => Value::DateTime(systemtime_to_datetime(&fixed::<16>(value_type, raw)?)?),
            TYPE_SID => Value::Sid(format_sid(raw)?),
            TYPE_HEX_INT32 => Value::HexInt32(u32::from_le_bytes(fixed::<4>(value_type, raw)?)),
            TYPE_HEX_INT64 => Value::HexInt64(u64::from_le_bytes(fixed::<8>(value_type, raw)?)),
            _ => Value::Binary(raw.to_vec()),
        };
        Ok(value)
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::String(s) | Value::Guid(s) | Value::Sid(s) => Json::String(s.clone()),
            Value::Int(v) => Json::from(*v),
            Value::UInt(v) => Json::from(*v),
            Value::Real(v) => Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
            Value::Bool(v) => Json::Bool(*v),
            Value::Binary(bytes) => Json::String(hex::encode_upper(bytes)),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::HexInt32(v) => Json::String(format!("0x{v:08x}")),
            Value::HexInt64(v) => Json::String(format!("0x{v:016x}")),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Plain text form, used when several values share one element.
    pub fn to_text(&self) -> String {
        match self.to_json() {
            Json::String(s) => s,
            Json::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn fixed<const N: usize>(value_type: u8, raw: &[u8]) -> Result<[u8; N], EvtxError> {
    if raw.len() < N {
        return Err(size_error(value_type, raw.len()));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[..N]);
    Ok(out)
}

fn size_error(value_type: u8, len: usize) -> EvtxError {
    EvtxError::binxml(0, format!("value type 0x{value_type:02x} with size {len}"))
}

fn decode_array(item_type: u8, raw: &[u8]) -> Result<Value, EvtxError> {
    match item_type {
        TYPE_STRING => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let mut items: Vec<Value> = units
                .split(|unit| *unit == 0)
                .map(|part| Value::String(String::from_utf16_lossy(part)))
                .collect();
            // A trailing terminator leaves one empty element behind.
            if matches!(items.last(), Some(Value::String(s)) if s.is_empty()) {
                items.pop();
            }
            Ok(Value::Array(items))
        }
        TYPE_ANSI_STRING => Ok(Value::Array(
            raw.split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(String::from_utf8_lossy(part).into_owned()))
                .collect(),
        )),
        _ => {
            let width = match item_type {
                TYPE_INT8 | TYPE_UINT8 => 1,
                TYPE_INT16 | TYPE_UINT16 => 2,
                TYPE_INT32 | TYPE_UINT32 | TYPE_REAL32 | TYPE_BOOL | TYPE_HEX_INT32 => 4,
                TYPE_INT64 | TYPE_UINT64 | TYPE_REAL64 | TYPE_FILETIME | TYPE_HEX_INT64 => 8,
                TYPE_GUID | TYPE_SYSTIME => 16,
                _ => return Ok(Value::Binary(raw.to_vec())),
            };
            let items = raw
                .chunks_exact(width)
                .map(|item| Value::decode(item_type, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
    }
}

/// Convert a Windows FILETIME (100ns ticks since 1601) to UTC.
pub fn filetime_to_datetime(ticks: u64) -> Result<DateTime<Utc>, EvtxError> {
    let secs = (ticks / 10_000_000) as i64 - FILETIME_EPOCH_DELTA_SECS;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| EvtxError::binxml(0, format!("filetime {ticks} out of range")))
}

/// Inverse of [`filetime_to_datetime`].
pub fn datetime_to_filetime(dt: &DateTime<Utc>) -> u64 {
    let secs = (dt.timestamp() + FILETIME_EPOCH_DELTA_SECS).max(0) as u64;
    secs * 10_000_000 + (dt.timestamp_subsec_nanos() / 100) as u64
}

fn systemtime_to_datetime(raw: &[u8; 16]) -> Result<DateTime<Utc>, EvtxError> {
    let field = |idx: usize| le_u16(raw, idx * 2) as u32;
    let (year, month, day) = (field(0) as i32, field(1), field(3));
    let (hour, minute, second, millis) = (field(4), field(5), field(6), field(7));
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, millis))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EvtxError::binxml(0, "invalid systemtime"))
}

fn format_guid(raw: &[u8; 16]) -> String {
    format!(
        "{{{:08X}-{:04X}-{:04X}-{}-{}}}",
        le_u32(raw, 0),
        le_u16(raw, 4),
        le_u16(raw, 6),
        hex::encode_upper(&raw[8..10]),
        hex::encode_upper(&raw[10..16])
    )
}

fn format_sid(raw: &[u8]) -> Result<String, EvtxError> {
    if raw.len() < 8 {
        return Err(size_error(TYPE_SID, raw.len()));
    }
    let revision = raw[0];
    let count = raw[1] as usize;
    if raw.len() < 8 + count * 4 {
        return Err(size_error(TYPE_SID, raw.len()));
    }
    let authority = raw[2..8]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
    let mut sid = format!("S-{revision}-{authority}");
    for i in 0..count {
        sid.push_str(&format!("-{}", le_u32(raw, 8 + i * 4)));
    }
    Ok(sid)
}
