//! Per-CU DIE tree traversal.
//!
//! Walks every DIE of a compilation unit once, interpreting each DIE's
//! attribute list through its abbreviation's compiled bytecode program
//! (see [`crate::abbrev`]) rather than generic form dispatch. Three depths
//! matter: depth 0 is the CU's own root DIE (only consulted for
//! `DW_AT_stmt_list`, to locate the unit's line-number file table); depth 1
//! holds the indexable top-level types, globals and enums; depth 2 holds
//! enumerators, which are indexed individually when their parent at depth 1
//! is `DW_TAG_enumeration_type`.

use crate::abbrev::{Abbrev, AbbrevTable, Op};
use crate::consts::*;
use crate::cu::CuHeader;
use crate::error::IndexError;
use crate::filetable::FileTable;
use crate::namehash::{DieLocation, NameHash};
use crate::reader::Cursor;

#[derive(Default)]
struct ScratchDie<'d> {
    name: Option<&'d [u8]>,
    stmt_list: Option<u64>,
    decl_file: Option<u64>,
    declaration: bool,
    specification: Option<u64>,
    sibling: Option<u64>,
}

fn read_fixed(cursor: &mut Cursor<'_>, width: u32) -> Result<u64, IndexError> {
    Ok(match width {
        0 => 0,
        1 => cursor.read_u8()? as u64,
        2 => cursor.read_u16()? as u64,
        4 => cursor.read_u32()? as u64,
        8 => cursor.read_u64()?,
        other => {
            return Err(IndexError::dwarf(format!(
                "unsupported fixed-width extraction of {other} bytes"
            )))
        }
    })
}

fn read_cstr_at(data: &[u8], offset: usize) -> Result<&[u8], IndexError> {
    let mut c = Cursor::at(data, offset);
    c.read_cstr()
}

/// Decodes one DIE's attribute list starting at `cursor`, consuming exactly
/// the bytes the abbreviation describes and leaving `cursor` positioned at
/// the next sibling or child.
fn decode_die<'d>(
    cursor: &mut Cursor<'d>,
    abbrev: &Abbrev,
    debug_str: &'d [u8],
) -> Result<ScratchDie<'d>, IndexError> {
    let mut scratch = ScratchDie::default();

    for op in &abbrev.ops {
        match *op {
            Op::SkipFixed(n) => cursor.skip(n as usize)?,
            Op::SkipLeb128 => cursor.skip_leb128()?,
            Op::SkipBlockUleb => {
                let len = cursor.read_uleb128()?;
                cursor.skip(len as usize)?;
            }
            Op::SkipBlock1 => {
                let len = cursor.read_u8()? as usize;
                cursor.skip(len)?;
            }
            Op::SkipBlock2 => {
                let len = cursor.read_u16()? as usize;
                cursor.skip(len)?;
            }
            Op::SkipBlock4 => {
                let len = cursor.read_u32()? as usize;
                cursor.skip(len)?;
            }
            Op::SkipString => {
                cursor.read_cstr()?;
            }
            Op::ExtractNameInline => {
                scratch.name = Some(cursor.read_cstr()?);
            }
            Op::ExtractNameStrp(width) => {
                let off = read_fixed(cursor, width)? as usize;
                scratch.name = Some(read_cstr_at(debug_str, off)?);
            }
            Op::ExtractStmtList(w) => scratch.stmt_list = Some(read_fixed(cursor, w)?),
            Op::ExtractDeclFile(w) => scratch.decl_file = Some(read_fixed(cursor, w)?),
            Op::ExtractDeclFileLeb => scratch.decl_file = Some(cursor.read_uleb128()?),
            Op::ExtractDeclarationFlagPresent => scratch.declaration = true,
            Op::ExtractDeclarationFlag => scratch.declaration = cursor.read_u8()? != 0,
            Op::ExtractSpecification(w) => scratch.specification = Some(read_fixed(cursor, w)?),
            Op::ExtractSpecificationLeb => scratch.specification = Some(cursor.read_uleb128()?),
            Op::ExtractSibling(w) => scratch.sibling = Some(read_fixed(cursor, w)?),
            Op::ExtractSiblingLeb => scratch.sibling = Some(cursor.read_uleb128()?),
            Op::Indirect => {
                return Err(IndexError::unsupported(
                    "DW_FORM_indirect is not supported",
                ))
            }
        }
    }

    Ok(scratch)
}

/// Resolves a CU-relative offset into an already-decoded DIE at that
/// location, used for `DW_AT_specification` fallback. Returns `None` when
/// the offset falls outside the CU's own range (see DESIGN.md's decision
/// on cross-CU references) or the abbreviation code there can't be parsed.
fn decode_die_at<'d>(
    debug_info: &'d [u8],
    debug_str: &'d [u8],
    cu: &CuHeader,
    table: &AbbrevTable,
    cu_relative_offset: u64,
) -> Option<ScratchDie<'d>> {
    let absolute = cu.offset.checked_add(cu_relative_offset as usize)?;
    if absolute < cu.die_start || absolute >= cu.end {
        return None;
    }
    let mut cursor = Cursor::at(debug_info, absolute);
    let code = cursor.read_uleb128().ok()?;
    if code == 0 {
        return None;
    }
    let abbrev = table.get(code)?;
    decode_die(&mut cursor, abbrev, debug_str).ok()
}

struct StackEntry {
    tag: u64,
    /// This DIE's own offset within `.debug_info`, needed so an
    /// `enumeration_type`'s `enumerator` children can redirect their
    /// insertion to point at their enclosing enum instead of themselves.
    die_offset: u32,
}

/// Resolves a `DW_AT_decl_file` index against `file_table`, producing the
/// fingerprint to store in the name hash (0/"empty" for index 0, meaning
/// the CU's own compilation file). Fails with `DWARF_FORMAT` if the index
/// is out of range for the table — or, per spec.md §4.6, if the CU never
/// built a file table at all but a non-zero index was still supplied.
fn resolve_file_fp(
    file_table: Option<&FileTable>,
    decl_file: Option<u64>,
    cu_offset: usize,
) -> Result<u64, IndexError> {
    let decl_file = match decl_file {
        None | Some(0) => return Ok(0),
        Some(n) => n,
    };
    let table = file_table.ok_or_else(|| {
        IndexError::dwarf(format!(
            "DW_AT_decl_file {decl_file} in CU at offset {cu_offset:#x}, but the CU has no file table"
        ))
    })?;
    if decl_file as usize > table.len() {
        return Err(IndexError::dwarf(format!(
            "DW_AT_decl_file {decl_file} in CU at offset {cu_offset:#x} exceeds the {} entries in its file table",
            table.len()
        )));
    }
    Ok(table.get(decl_file).map(|e| e.fingerprint).unwrap_or(0))
}

/// Walks every DIE of `cu`, inserting indexable names into `names`.
/// `file_index`/`cu_index` identify this CU for the [`DieLocation`] records
/// produced. Returns the parsed file table when the CU's root DIE carries a
/// `DW_AT_stmt_list`.
pub(crate) fn walk(
    debug_info: &[u8],
    debug_str: &[u8],
    debug_line: &[u8],
    cu: &CuHeader,
    table: &AbbrevTable,
    names: &NameHash,
    file_index: u32,
    cu_index: u32,
) -> Result<Option<FileTable>, IndexError> {
    let mut cursor = Cursor::at(debug_info, cu.die_start);
    let mut stack: Vec<StackEntry> = Vec::new();
    let mut file_table: Option<FileTable> = None;

    while cursor.pos() < cu.end {
        let die_offset = cursor.pos();
        let code = cursor.read_uleb128()?;
        if code == 0 {
            if stack.pop().is_none() {
                return Err(IndexError::dwarf(format!(
                    "unbalanced DIE tree in CU at offset {:#x}",
                    cu.offset
                )));
            }
            continue;
        }

        let abbrev = table.get(code).ok_or_else(|| {
            IndexError::dwarf(format!(
                "unknown abbreviation code {code} at offset {die_offset:#x}"
            ))
        })?;

        let depth = stack.len();
        let parent = stack.last();

        let mut scratch = decode_die(&mut cursor, abbrev, debug_str)?;

        if depth == 0 {
            if abbrev.tag == DW_TAG_COMPILE_UNIT {
                if let Some(off) = scratch.stmt_list {
                    file_table = Some(crate::filetable::parse(debug_line, off as usize)?);
                }
            }
        } else if depth == 1 && crate::consts::is_indexed_tag(abbrev.tag) {
            if (scratch.name.is_none() || scratch.decl_file.is_none()) && !scratch.declaration {
                if let Some(spec_off) = scratch.specification {
                    if let Some(spec) = decode_die_at(debug_info, debug_str, cu, table, spec_off) {
                        if scratch.name.is_none() {
                            scratch.name = spec.name;
                        }
                        if scratch.decl_file.is_none() {
                            scratch.decl_file = spec.decl_file;
                        }
                    }
                }
            }
            if !scratch.declaration {
                if let Some(name) = scratch.name {
                    let file_fp = resolve_file_fp(file_table.as_ref(), scratch.decl_file, cu.offset)?;
                    names.insert(
                        name,
                        DieLocation {
                            file_index,
                            cu_index,
                            die_offset: die_offset as u32,
                            tag: abbrev.tag as u8,
                            file_fp,
                        },
                    )?;
                }
            }
        } else if depth == 2
            && abbrev.tag == DW_TAG_ENUMERATOR
            && parent.map(|p| p.tag) == Some(DW_TAG_ENUMERATION_TYPE)
        {
            if let Some(name) = scratch.name {
                let file_fp = resolve_file_fp(file_table.as_ref(), scratch.decl_file, cu.offset)?;
                // Redirect to the enclosing enumeration_type DIE: looking up
                // an enumerator resolves to its enum, not to itself.
                let enum_die_offset = parent.expect("checked above").die_offset;
                names.insert(
                    name,
                    DieLocation {
                        file_index,
                        cu_index,
                        die_offset: enum_die_offset,
                        tag: DW_TAG_ENUMERATOR as u8,
                        file_fp,
                    },
                )?;
            }
        }

        if abbrev.has_children {
            // If this subtree holds nothing of interest to us (not an
            // enumeration_type whose enumerators we need at depth+1, and not
            // the CU root) and a sibling offset is available, jump straight
            // past it instead of walking every nested byte.
            let needs_descend = depth == 0
                || (depth == 1 && abbrev.tag == DW_TAG_ENUMERATION_TYPE);
            if !needs_descend {
                if let Some(sibling_off) = scratch.sibling {
                    if let Some(target) = cu.offset.checked_add(sibling_off as usize) {
                        if target > die_offset && target <= cu.end {
                            cursor.seek(target);
                            continue;
                        }
                    }
                }
            }
            stack.push(StackEntry {
                tag: abbrev.tag,
                die_offset: die_offset as u32,
            });
        }
    }

    Ok(file_table)
}
