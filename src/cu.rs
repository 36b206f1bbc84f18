//! Compilation unit header parsing.

use crate::error::IndexError;
use crate::reader::Cursor;

/// Parsed `.debug_info` compilation unit header, plus the byte range of its
/// DIE tree (immediately after the header, up to the next CU or end of
/// section).
#[derive(Debug, Clone, Copy)]
pub(crate) struct CuHeader {
    /// Offset of this CU's header within `.debug_info`.
    pub(crate) offset: usize,
    /// Offset one past the end of this CU (start of the next CU, or the
    /// section length).
    pub(crate) end: usize,
    /// Offset of the first DIE, immediately following the header.
    pub(crate) die_start: usize,
    /// Offset into `.debug_abbrev` of this CU's abbreviation table.
    pub(crate) abbrev_offset: usize,
    pub(crate) address_size: u8,
    /// 4 for DWARF32, 8 for DWARF64.
    pub(crate) offset_size: u32,
    pub(crate) version: u16,
}

/// Parses one CU header at `pos` in `.debug_info`. `pos` must point at the
/// start of the unit's initial length field.
pub(crate) fn parse_header(debug_info: &[u8], pos: usize) -> Result<CuHeader, IndexError> {
    let mut cursor = Cursor::at(debug_info, pos);

    let first_len = cursor.read_u32()?;
    let (unit_length, offset_size) = if first_len == 0xffff_ffff {
        (cursor.read_u64()?, 8u32)
    } else if first_len >= 0xffff_fff0 {
        return Err(IndexError::unsupported(format!(
            "reserved initial-length value {first_len:#x} at offset {pos:#x}"
        )));
    } else {
        (first_len as u64, 4u32)
    };

    let after_length = cursor.pos();
    let end = after_length
        .checked_add(unit_length as usize)
        .ok_or(IndexError::Overflow { offset: pos })?;

    let version = cursor.read_u16()?;
    if !(2..=4).contains(&version) {
        return Err(IndexError::unsupported(format!(
            "DWARF version {version} at offset {pos:#x} (only DWARF2-4 are supported)"
        )));
    }

    let abbrev_offset = if offset_size == 8 {
        cursor.read_u64()? as usize
    } else {
        cursor.read_u32()? as usize
    };
    let address_size = cursor.read_u8()?;

    let die_start = cursor.pos();
    if die_start > end {
        return Err(IndexError::dwarf(format!(
            "CU header at offset {pos:#x} claims a unit length shorter than its own header"
        )));
    }

    Ok(CuHeader {
        offset: pos,
        end,
        die_start,
        abbrev_offset,
        address_size,
        offset_size,
        version,
    })
}

/// Walks `.debug_info`, parsing every CU header in sequence.
pub(crate) fn parse_all(debug_info: &[u8]) -> Result<Vec<CuHeader>, IndexError> {
    let mut headers = Vec::new();
    let mut pos = 0usize;
    while pos < debug_info.len() {
        let header = parse_header(debug_info, pos)?;
        pos = header.end;
        headers.push(header);
    }
    Ok(headers)
}
