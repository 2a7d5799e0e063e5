//! Window property reads and writes.
//!
//! Properties are variable-length and the server hands them out in
//! segments: the first read requests a fixed window of 32-bit words, and as
//! long as the server reports bytes remaining we re-read at the advanced
//! offset. The concatenated bytes are decoded according to the element
//! format the server reported.

use anyhow::Result;
use thiserror::Error;
use x11rb::protocol::xproto::{Atom, Window};

use crate::display::DisplayConn;

/// Words requested by the first segment read.
const FIRST_SEGMENT_WORDS: u32 = 50;

/// Protocol-level faults that are fatal for the operation that hit them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported property format {0}")]
    UnsupportedFormat(u8),
    #[error("invalid property write format {0}, must be 8, 16 or 32")]
    InvalidFormat(u8),
}

/// Decoded property value, by element format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Format 8: UTF-8 text. A single entry unless read with `split`.
    Text(Vec<String>),
    /// Format 16: unsigned shorts.
    Card16(Vec<u16>),
    /// Format 32: unsigned words (atoms, windows, cardinals).
    Card32(Vec<u32>),
}

impl PropertyValue {
    /// First 32-bit element, if this is a format-32 value with one.
    pub fn first_card32(&self) -> Option<u32> {
        match self {
            PropertyValue::Card32(values) => values.first().copied(),
            _ => None,
        }
    }

    /// All 32-bit elements, or an empty slice for other formats.
    pub fn card32s(&self) -> &[u32] {
        match self {
            PropertyValue::Card32(values) => values,
            _ => &[],
        }
    }
}

/// Read a property of unbounded length.
///
/// `type_` of 0 means any type. Returns `Ok(None)` when the property is
/// absent (the server reports format 0). With `split`, a format-8 value is
/// split on NULs into a list (the `WM_CLASS` convention); otherwise the
/// trailing NUL is stripped and the whole buffer is one string.
pub fn read_property(
    conn: &impl DisplayConn,
    window: Window,
    property: Atom,
    type_: Atom,
    split: bool,
) -> Result<Option<PropertyValue>> {
    let mut raw: Vec<u8> = Vec::new();
    let mut offset = 0u32;
    let mut length = FIRST_SEGMENT_WORDS;
    let mut format;

    loop {
        let segment = conn.get_property(window, property, type_, offset, length)?;
        format = segment.format;
        match format {
            0 => return Ok(None),
            8 | 16 | 32 => raw.extend_from_slice(&segment.value),
            other => return Err(ProtocolError::UnsupportedFormat(other).into()),
        }
        if segment.bytes_after == 0 {
            break;
        }
        offset = (raw.len() / 4) as u32;
        length = segment.bytes_after / 4 + 1;
    }

    let value = match format {
        8 => {
            if split {
                PropertyValue::Text(
                    raw.split(|&b| b == 0)
                        .filter(|part| !part.is_empty())
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect(),
                )
            } else {
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                PropertyValue::Text(vec![String::from_utf8_lossy(&raw[..end]).into_owned()])
            }
        }
        16 => PropertyValue::Card16(
            raw.chunks_exact(2)
                .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                .collect(),
        ),
        32 => PropertyValue::Card32(
            raw.chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        other => return Err(ProtocolError::UnsupportedFormat(other).into()),
    };
    Ok(Some(value))
}

/// Replace a property. The value's variant dictates the wire format; a
/// mismatch between `format` and the variant is rejected before any request
/// is sent.
pub fn write_property(
    conn: &impl DisplayConn,
    window: Window,
    property: Atom,
    type_: Atom,
    format: u8,
    value: &PropertyValue,
) -> Result<()> {
    let (data, n_items) = match (format, value) {
        (8, PropertyValue::Text(strings)) => {
            let mut bytes = Vec::new();
            for (i, s) in strings.iter().enumerate() {
                if i > 0 {
                    bytes.push(0);
                }
                bytes.extend_from_slice(s.as_bytes());
            }
            let n = bytes.len() as u32;
            (bytes, n)
        }
        (16, PropertyValue::Card16(values)) => {
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
            (bytes, values.len() as u32)
        }
        (32, PropertyValue::Card32(values)) => {
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
            (bytes, values.len() as u32)
        }
        (8 | 16 | 32, _) => anyhow::bail!("property value does not match format {}", format),
        (other, _) => return Err(ProtocolError::InvalidFormat(other).into()),
    };
    conn.change_property(window, property, type_, format, n_items, &data)
}
