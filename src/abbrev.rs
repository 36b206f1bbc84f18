//! Compiles a DWARF abbreviation table into a compact bytecode program.
//!
//! Each abbreviation code becomes a sequence of opcodes describing how to
//! walk its attribute list: fixed-width skips are coalesced into a single
//! "skip N bytes" opcode, variable-width forms each get a dedicated opcode,
//! and the handful of attributes the index actually cares about
//! (`DW_AT_name`, `DW_AT_stmt_list`, `DW_AT_decl_file`, `DW_AT_declaration`,
//! `DW_AT_specification`, `DW_AT_sibling`) get "extract" opcodes that also
//! record which field of the DIE scratch record to populate.
//!
//! The opcode namespace fits in a single byte: there are at most a few dozen
//! distinct (form, attribute-of-interest) combinations in practice, far
//! under the 256 values available.

use crate::consts::*;
use crate::error::IndexError;
use crate::reader::Cursor;

/// One decoded step of a compiled abbreviation program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    /// Skip a fixed number of bytes without interpreting them.
    SkipFixed(u32),
    /// Skip a single ULEB128/SLEB128-encoded value.
    SkipLeb128,
    /// Skip a `DW_FORM_block`-shaped value: ULEB128 length, then that many
    /// bytes.
    SkipBlockUleb,
    /// Skip a `DW_FORM_block1`-shaped value: 1-byte length, then that many
    /// bytes.
    SkipBlock1,
    /// Skip a `DW_FORM_block2`-shaped value: 2-byte length, then that many
    /// bytes.
    SkipBlock2,
    /// Skip a `DW_FORM_block4`-shaped value: 4-byte length, then that many
    /// bytes.
    SkipBlock4,
    /// Skip a NUL-terminated inline string.
    SkipString,
    /// Extract a NUL-terminated inline string into `DW_AT_name`.
    ExtractNameInline,
    /// Extract a `.debug_str` offset (width depends on DWARF32/64) into
    /// `DW_AT_name`.
    ExtractNameStrp(u32),
    /// Extract a fixed-width unsigned value into `DW_AT_stmt_list`.
    ExtractStmtList(u32),
    /// Extract a fixed-width unsigned value into `DW_AT_decl_file`.
    ExtractDeclFile(u32),
    /// Extract a ULEB128 value into `DW_AT_decl_file`.
    ExtractDeclFileLeb,
    /// Extract a `DW_FORM_flag_present` (zero-width, value is always true)
    /// into `DW_AT_declaration`.
    ExtractDeclarationFlagPresent,
    /// Extract a 1-byte flag into `DW_AT_declaration`.
    ExtractDeclarationFlag,
    /// Extract a fixed-width CU-relative offset into `DW_AT_specification`.
    ExtractSpecification(u32),
    /// Extract a ULEB128 CU-relative offset into `DW_AT_specification`.
    ExtractSpecificationLeb,
    /// Extract a fixed-width CU-relative offset into `DW_AT_sibling`.
    ExtractSibling(u32),
    /// Extract a ULEB128 CU-relative offset into `DW_AT_sibling`.
    ExtractSiblingLeb,
    /// `DW_FORM_indirect`: the form itself is read at traversal time.
    Indirect,
}

/// A fully compiled abbreviation: whether DIEs of this code have children,
/// plus the ops needed to read/skip its attribute list in order.
#[derive(Debug, Clone)]
pub(crate) struct Abbrev {
    pub(crate) tag: u64,
    pub(crate) has_children: bool,
    pub(crate) ops: Vec<Op>,
}

/// The compiled table for one compilation unit's abbreviation set, indexed
/// by abbreviation code.
#[derive(Debug, Default)]
pub(crate) struct AbbrevTable {
    by_code: Vec<Option<Abbrev>>,
}

impl AbbrevTable {
    pub(crate) fn get(&self, code: u64) -> Option<&Abbrev> {
        self.by_code.get(code as usize).and_then(|o| o.as_ref())
    }
}

/// Returns the fixed width in bytes of `form`, or `None` if it is
/// variable-width or requires a `offset_size`-dependent width.
fn fixed_form_width(form: u64, offset_size: u32) -> Option<u32> {
    match form {
        DW_FORM_FLAG | DW_FORM_DATA1 | DW_FORM_REF1 => Some(1),
        DW_FORM_DATA2 | DW_FORM_REF2 => Some(2),
        DW_FORM_DATA4 | DW_FORM_REF4 => Some(4),
        DW_FORM_DATA8 | DW_FORM_REF8 | DW_FORM_REF_SIG8 => Some(8),
        DW_FORM_ADDR => Some(8), // Non-goals: 32-bit targets; address_size is always 8.
        DW_FORM_STRP | DW_FORM_SEC_OFFSET | DW_FORM_REF_ADDR => Some(offset_size),
        DW_FORM_FLAG_PRESENT => Some(0),
        _ => None,
    }
}

/// Compiles the abbreviation declarations starting at `pos` in `.debug_abbrev`,
/// stopping at the table terminator (a zero abbreviation code).
pub(crate) fn compile(data: &[u8], pos: usize, offset_size: u32) -> Result<AbbrevTable, IndexError> {
    let mut cursor = Cursor::at(data, pos);
    let mut by_code: Vec<Option<Abbrev>> = Vec::new();
    let mut prev_code: u64 = 0;

    loop {
        let code = cursor.read_uleb128()?;
        if code == 0 {
            break;
        }
        if code != prev_code + 1 {
            return Err(IndexError::unsupported("non-sequential abbrev codes"));
        }
        prev_code = code;
        let tag = cursor.read_uleb128()?;
        let has_children = cursor.read_u8()? != 0;

        let mut ops = Vec::new();
        let mut run: u32 = 0;

        loop {
            let attr = cursor.read_uleb128()?;
            let form = cursor.read_uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }

            // Selection rules (spec.md §4.3): whether an attribute is worth
            // a dedicated extract opcode depends not just on which
            // attribute it is, but on the DIE tag it's attached to — which
            // we already know, since `tag` was read before this attribute
            // list.
            let interesting = match attr {
                DW_AT_SIBLING => tag != DW_TAG_ENUMERATION_TYPE,
                DW_AT_NAME => crate::consts::is_indexed_tag(tag) && tag != DW_TAG_COMPILE_UNIT,
                DW_AT_STMT_LIST => tag == DW_TAG_COMPILE_UNIT,
                DW_AT_DECL_FILE | DW_AT_SPECIFICATION => {
                    crate::consts::is_indexed_tag(tag) && tag != DW_TAG_COMPILE_UNIT
                }
                DW_AT_DECLARATION => true,
                _ => false,
            } || form == DW_FORM_INDIRECT;

            if !interesting {
                if let Some(width) = fixed_form_width(form, offset_size) {
                    run += width;
                    continue;
                }
            }

            if run > 0 {
                ops.push(Op::SkipFixed(run));
                run = 0;
            }

            if !interesting {
                ops.push(variable_skip_op(form)?);
                continue;
            }

            match attr {
                DW_AT_NAME => match form {
                    DW_FORM_STRING => ops.push(Op::ExtractNameInline),
                    DW_FORM_STRP => ops.push(Op::ExtractNameStrp(offset_size)),
                    _ => ops.push(skip_for_unexpected_form(form)?),
                },
                DW_AT_STMT_LIST => match fixed_form_width(form, offset_size) {
                    Some(w) => ops.push(Op::ExtractStmtList(w)),
                    None => ops.push(skip_for_unexpected_form(form)?),
                },
                DW_AT_DECL_FILE => {
                    if form == DW_FORM_UDATA {
                        ops.push(Op::ExtractDeclFileLeb);
                    } else if let Some(w) = fixed_form_width(form, offset_size) {
                        ops.push(Op::ExtractDeclFile(w));
                    } else {
                        ops.push(skip_for_unexpected_form(form)?);
                    }
                }
                DW_AT_DECLARATION => {
                    if form == DW_FORM_FLAG_PRESENT {
                        ops.push(Op::ExtractDeclarationFlagPresent);
                    } else if form == DW_FORM_FLAG || form == DW_FORM_DATA1 {
                        ops.push(Op::ExtractDeclarationFlag);
                    } else {
                        ops.push(skip_for_unexpected_form(form)?);
                    }
                }
                DW_AT_SPECIFICATION => {
                    if form == DW_FORM_REF_UDATA {
                        ops.push(Op::ExtractSpecificationLeb);
                    } else if let Some(w) = fixed_form_width(form, offset_size) {
                        ops.push(Op::ExtractSpecification(w));
                    } else {
                        ops.push(skip_for_unexpected_form(form)?);
                    }
                }
                DW_AT_SIBLING => {
                    if form == DW_FORM_REF_UDATA {
                        ops.push(Op::ExtractSiblingLeb);
                    } else if let Some(w) = fixed_form_width(form, offset_size) {
                        ops.push(Op::ExtractSibling(w));
                    } else {
                        ops.push(skip_for_unexpected_form(form)?);
                    }
                }
                _ if form == DW_FORM_INDIRECT => ops.push(Op::Indirect),
                _ => unreachable!("interesting attribute without a handler"),
            }
        }

        if run > 0 {
            ops.push(Op::SkipFixed(run));
        }

        let idx = code as usize;
        if by_code.len() <= idx {
            by_code.resize(idx + 1, None);
        }
        by_code[idx] = Some(Abbrev {
            tag,
            has_children,
            ops,
        });
    }

    Ok(AbbrevTable { by_code })
}

fn variable_skip_op(form: u64) -> Result<Op, IndexError> {
    Ok(match form {
        DW_FORM_STRING => Op::SkipString,
        DW_FORM_BLOCK => Op::SkipBlockUleb,
        DW_FORM_BLOCK1 => Op::SkipBlock1,
        DW_FORM_BLOCK2 => Op::SkipBlock2,
        DW_FORM_BLOCK4 => Op::SkipBlock4,
        DW_FORM_SDATA | DW_FORM_UDATA | DW_FORM_REF_UDATA => Op::SkipLeb128,
        DW_FORM_EXPRLOC => Op::SkipBlockUleb,
        DW_FORM_INDIRECT => Op::Indirect,
        other => {
            return Err(IndexError::unsupported(format!(
                "DW_FORM {other:#x} is not a recognized variable-width form"
            )))
        }
    })
}

/// An "interesting" attribute showed up with a form we didn't expect for it
/// (e.g. `DW_AT_name` with `DW_FORM_udata`). We still have to consume the
/// bytes correctly; we just can't extract the value, so we fall back to a
/// plain skip op for whatever the form's actual shape is.
fn skip_for_unexpected_form(form: u64) -> Result<Op, IndexError> {
    variable_skip_op(form)
}
