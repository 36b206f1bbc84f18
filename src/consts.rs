//! DWARF and ELF wire-format constants.
//!
//! Only the subset this crate actually reads or branches on is named here;
//! everything else collapses to the generic "skip" path in [`crate::abbrev`].

#![allow(dead_code)]

// DW_TAG_*
pub(crate) const DW_TAG_CLASS_TYPE: u64 = 0x02;
pub(crate) const DW_TAG_ENUMERATION_TYPE: u64 = 0x04;
pub(crate) const DW_TAG_COMPILE_UNIT: u64 = 0x11;
pub(crate) const DW_TAG_STRUCTURE_TYPE: u64 = 0x13;
pub(crate) const DW_TAG_TYPEDEF: u64 = 0x16;
pub(crate) const DW_TAG_UNION_TYPE: u64 = 0x17;
pub(crate) const DW_TAG_ENUMERATOR: u64 = 0x28;
pub(crate) const DW_TAG_BASE_TYPE: u64 = 0x24;
pub(crate) const DW_TAG_VARIABLE: u64 = 0x34;

/// Tags whose DIEs are indexed by name, excluding `compile_unit` (which is
/// indexed only for its `DW_AT_stmt_list`, never by name).
pub(crate) const INDEXED_TAGS: &[u64] = &[
    DW_TAG_BASE_TYPE,
    DW_TAG_CLASS_TYPE,
    DW_TAG_ENUMERATION_TYPE,
    DW_TAG_ENUMERATOR,
    DW_TAG_STRUCTURE_TYPE,
    DW_TAG_TYPEDEF,
    DW_TAG_UNION_TYPE,
    DW_TAG_VARIABLE,
];

pub(crate) fn is_indexed_tag(tag: u64) -> bool {
    INDEXED_TAGS.contains(&tag)
}

// DW_AT_*
pub(crate) const DW_AT_SIBLING: u64 = 0x01;
pub(crate) const DW_AT_NAME: u64 = 0x03;
pub(crate) const DW_AT_STMT_LIST: u64 = 0x10;
pub(crate) const DW_AT_DECL_FILE: u64 = 0x3a;
pub(crate) const DW_AT_DECLARATION: u64 = 0x3c;
pub(crate) const DW_AT_SPECIFICATION: u64 = 0x47;

// DW_FORM_*
pub(crate) const DW_FORM_ADDR: u64 = 0x01;
pub(crate) const DW_FORM_BLOCK2: u64 = 0x03;
pub(crate) const DW_FORM_BLOCK4: u64 = 0x04;
pub(crate) const DW_FORM_DATA2: u64 = 0x05;
pub(crate) const DW_FORM_DATA4: u64 = 0x06;
pub(crate) const DW_FORM_DATA8: u64 = 0x07;
pub(crate) const DW_FORM_STRING: u64 = 0x08;
pub(crate) const DW_FORM_BLOCK: u64 = 0x09;
pub(crate) const DW_FORM_BLOCK1: u64 = 0x0a;
pub(crate) const DW_FORM_DATA1: u64 = 0x0b;
pub(crate) const DW_FORM_FLAG: u64 = 0x0c;
pub(crate) const DW_FORM_SDATA: u64 = 0x0d;
pub(crate) const DW_FORM_STRP: u64 = 0x0e;
pub(crate) const DW_FORM_UDATA: u64 = 0x0f;
pub(crate) const DW_FORM_REF_ADDR: u64 = 0x10;
pub(crate) const DW_FORM_REF1: u64 = 0x11;
pub(crate) const DW_FORM_REF2: u64 = 0x12;
pub(crate) const DW_FORM_REF4: u64 = 0x13;
pub(crate) const DW_FORM_REF8: u64 = 0x14;
pub(crate) const DW_FORM_REF_UDATA: u64 = 0x15;
pub(crate) const DW_FORM_INDIRECT: u64 = 0x16;
pub(crate) const DW_FORM_SEC_OFFSET: u64 = 0x17;
pub(crate) const DW_FORM_EXPRLOC: u64 = 0x18;
pub(crate) const DW_FORM_FLAG_PRESENT: u64 = 0x19;
pub(crate) const DW_FORM_REF_SIG8: u64 = 0x20;

// ELF
pub(crate) const ELFMAG: &[u8; 4] = b"\x7fELF";
pub(crate) const ELFCLASS64: u8 = 2;
pub(crate) const ELFDATA2LSB: u8 = 1;
pub(crate) const EV_CURRENT: u8 = 1;

pub(crate) const SHT_PROGBITS: u32 = 1;
pub(crate) const SHT_SYMTAB: u32 = 2;
pub(crate) const SHT_RELA: u32 = 4;
pub(crate) const SHN_UNDEF: u16 = 0;
pub(crate) const SHN_XINDEX: u16 = 0xffff;

pub(crate) const R_X86_64_NONE: u32 = 0;
pub(crate) const R_X86_64_64: u32 = 1;
pub(crate) const R_X86_64_32: u32 = 10;
