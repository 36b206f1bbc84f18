//! ELF64 little-endian section discovery and `.rela` relocation application.
//!
//! Only the handful of sections the indexer actually reads are located:
//! `.debug_info`, `.debug_abbrev`, `.debug_line`, `.debug_str`, and any
//! `.rela.debug_*` section pointing at one of them. Everything else in the
//! section header table is skipped without interpretation.
//!
//! Discovery ([`discover`]) is pure and read-only; applying relocations
//! ([`apply_one_relocation`]) is split out so callers can flatten every
//! relocation entry across every file into one global work list and hand
//! it to a work-stealing pool, rather than parallelizing only across files
//! (see spec's design note on relocation flattening: a single file with an
//! outsized `.rela.debug_info` would otherwise dominate wall-clock time).

use tracing::debug;

use crate::consts::*;
use crate::error::IndexError;
use crate::reader::Cursor;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DebugSections {
    pub(crate) info: Option<(usize, usize)>,
    pub(crate) abbrev: Option<(usize, usize)>,
    pub(crate) line: Option<(usize, usize)>,
    pub(crate) str_: Option<(usize, usize)>,
}

/// One `.rela` section paired with the debug section it relocates and the
/// symbol table its entries' `r_sym` fields index into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RelaSection {
    pub(crate) offset: usize,
    pub(crate) count: usize,
    pub(crate) entsize: usize,
    pub(crate) target_base: usize,
    pub(crate) target_len: usize,
    symtab_offset: usize,
    symtab_entsize: usize,
    num_syms: usize,
}

pub(crate) struct Discovered {
    pub(crate) sections: DebugSections,
    pub(crate) relas: Vec<RelaSection>,
}

struct SectionHeader {
    name_off: u32,
    sh_type: u32,
    offset: usize,
    size: usize,
    link: u32,
    info: u32,
    entsize: usize,
}

fn validate_ident(data: &[u8]) -> Result<(), IndexError> {
    if data.len() < 16 {
        return Err(IndexError::elf("file too short for an ELF identification block"));
    }
    if &data[0..4] != ELFMAG {
        return Err(IndexError::elf("missing ELF magic"));
    }
    if data[4] != ELFCLASS64 {
        return Err(IndexError::unsupported("only 64-bit ELF is supported"));
    }
    if data[5] != ELFDATA2LSB {
        return Err(IndexError::unsupported("only little-endian ELF is supported"));
    }
    if data[6] != EV_CURRENT {
        return Err(IndexError::elf("unrecognized ELF identification version"));
    }
    Ok(())
}

fn parse_section_headers(data: &[u8]) -> Result<Vec<SectionHeader>, IndexError> {
    validate_ident(data)?;
    let mut cursor = Cursor::at(data, 16);

    let _e_type = cursor.read_u16()?;
    let _e_machine = cursor.read_u16()?;
    let _e_version = cursor.read_u32()?;
    let _e_entry = cursor.read_u64()?;
    let _e_phoff = cursor.read_u64()?;
    let e_shoff = cursor.read_u64()? as usize;
    let _e_flags = cursor.read_u32()?;
    let _e_ehsize = cursor.read_u16()?;
    let _e_phentsize = cursor.read_u16()?;
    let _e_phnum = cursor.read_u16()?;
    let e_shentsize = cursor.read_u16()? as usize;
    let mut e_shnum = cursor.read_u16()? as usize;
    let _e_shstrndx = cursor.read_u16()? as usize;

    if e_shoff == 0 {
        return Ok(Vec::new());
    }

    let read_raw = |idx: usize| -> Result<SectionHeader, IndexError> {
        let base = e_shoff + idx * e_shentsize;
        let mut c = Cursor::at(data, base);
        let name_off = c.read_u32()?;
        let sh_type = c.read_u32()?;
        let _flags = c.read_u64()?;
        let _addr = c.read_u64()?;
        let offset = c.read_u64()? as usize;
        let size = c.read_u64()? as usize;
        let link = c.read_u32()?;
        let info = c.read_u32()?;
        let _addralign = c.read_u64()?;
        let entsize = c.read_u64()? as usize;
        Ok(SectionHeader {
            name_off,
            sh_type,
            offset,
            size,
            link,
            info,
            entsize,
        })
    };

    if e_shnum == 0 {
        // SHN_XINDEX convention: real count lives in section[0].size.
        let sh0 = read_raw(0)?;
        e_shnum = sh0.size;
    }

    let mut headers = Vec::with_capacity(e_shnum);
    for i in 0..e_shnum {
        headers.push(read_raw(i)?);
    }
    Ok(headers)
}

fn section_name<'d>(data: &'d [u8], shstrtab: &SectionHeader, name_off: u32) -> &'d [u8] {
    let start = shstrtab.offset + name_off as usize;
    if start >= data.len() {
        return b"";
    }
    let rest = &data[start..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    &rest[..end]
}

const ELF64_RELA_ENTSIZE: usize = 24; // r_offset(8) + r_info(8) + r_addend(8)
const ELF64_SYM_ENTSIZE: usize = 24; // name(4) + info(1) + other(1) + shndx(2) + value(8) + size(8)
const ELF64_SYM_VALUE_OFFSET: usize = 8;

/// Locates the four debug sections and every `.rela` section that targets
/// one of them and links to the file's `.symtab`. Performs no writes.
/// Returns `Ok(None)` (not an error) when the file carries no
/// `.debug_info` section at all — such files are excluded from the index.
pub(crate) fn discover(data: &[u8]) -> Result<Option<Discovered>, IndexError> {
    let headers = parse_section_headers(data)?;
    if headers.is_empty() {
        return Ok(None);
    }

    let mut c = Cursor::at(data, 58); // offset of e_shstrndx in the Ehdr.
    let mut shstrndx = c.read_u16()? as usize;
    if shstrndx == SHN_XINDEX as usize {
        // Extended numbering: the real index lives in section[0]'s sh_link,
        // the same convention already used for e_shnum above.
        shstrndx = headers[0].link as usize;
    }

    let shstrtab = headers
        .get(shstrndx)
        .ok_or_else(|| IndexError::elf("section header string table index out of range"))?;

    let mut sections = DebugSections::default();
    let mut symtab_idx: Option<usize> = None;
    let mut debug_section_idx = [None; 4]; // info, abbrev, line, str_

    for (idx, sh) in headers.iter().enumerate() {
        let name = section_name(data, shstrtab, sh.name_off);
        match name {
            b".debug_info" => {
                sections.info = Some((sh.offset, sh.size));
                debug_section_idx[0] = Some(idx);
            }
            b".debug_abbrev" => {
                sections.abbrev = Some((sh.offset, sh.size));
                debug_section_idx[1] = Some(idx);
            }
            b".debug_line" => {
                sections.line = Some((sh.offset, sh.size));
                debug_section_idx[2] = Some(idx);
            }
            b".debug_str" => {
                sections.str_ = Some((sh.offset, sh.size));
                debug_section_idx[3] = Some(idx);
            }
            b".symtab" if sh.sh_type == SHT_SYMTAB => symtab_idx = Some(idx),
            _ => {}
        }
    }

    debug!(
        has_debug_info = sections.info.is_some(),
        has_debug_abbrev = sections.abbrev.is_some(),
        has_debug_line = sections.line.is_some(),
        has_debug_str = sections.str_.is_some(),
        has_symtab = symtab_idx.is_some(),
        "discovered debug sections"
    );

    if sections.info.is_none() {
        return Ok(None);
    }

    let mut relas = Vec::new();
    if let Some(symtab_idx) = symtab_idx {
        let symtab = &headers[symtab_idx];
        let symtab_entsize = if symtab.entsize == 0 { ELF64_SYM_ENTSIZE } else { symtab.entsize };
        let num_syms = symtab.size / symtab_entsize;

        for sh in headers.iter() {
            if sh.sh_type != SHT_RELA || sh.link as usize != symtab_idx {
                continue;
            }
            let Some(target_idx) = debug_section_idx.iter().position(|i| *i == Some(sh.info as usize))
            else {
                continue;
            };
            let target = &headers[debug_section_idx[target_idx].unwrap()];
            let entsize = if sh.entsize == 0 { ELF64_RELA_ENTSIZE } else { sh.entsize };
            relas.push(RelaSection {
                offset: sh.offset,
                count: sh.size / entsize,
                entsize,
                target_base: target.offset,
                target_len: target.size,
                symtab_offset: symtab.offset,
                symtab_entsize,
                num_syms,
            });
        }
    }

    Ok(Some(Discovered { sections, relas }))
}

/// Applies the `idx`-th entry of `rela` in-place, writing through `shared`.
/// `total_len` bounds every write against the buffer's actual size.
pub(crate) fn apply_one_relocation(
    shared: &SharedMut,
    total_len: usize,
    rela: &RelaSection,
    idx: usize,
) -> Result<(), IndexError> {
    let entry_base = rela.offset + idx * rela.entsize;
    if entry_base.checked_add(ELF64_RELA_ENTSIZE).map_or(true, |end| end > total_len) {
        return Err(IndexError::Eof {
            offset: entry_base,
            needed: ELF64_RELA_ENTSIZE,
            available: total_len.saturating_sub(entry_base),
        });
    }
    // SAFETY: bounds just checked above; each relocation entry occupies a
    // distinct byte range within its own `.rela` section, which is itself
    // disjoint from every debug section it targets, so no two entries ever
    // alias the same bytes.
    let entry = unsafe { shared.slice(entry_base, ELF64_RELA_ENTSIZE) };
    let mut c = Cursor::new(entry);
    let r_offset = c.read_u64()? as usize;
    let r_info = c.read_u64()?;
    let r_addend = c.read_u64()? as i64;

    let r_type = (r_info & 0xffff_ffff) as u32;
    let r_sym = (r_info >> 32) as usize;

    if r_type == R_X86_64_NONE {
        return Ok(());
    }
    if r_sym >= rela.num_syms {
        return Err(IndexError::dwarf(format!(
            "relocation at offset {entry_base:#x} references symbol {r_sym}, but the symbol table has only {} entries",
            rela.num_syms
        )));
    }

    let sym_value_off = rela.symtab_offset + r_sym * rela.symtab_entsize + ELF64_SYM_VALUE_OFFSET;
    if sym_value_off.checked_add(8).map_or(true, |end| end > total_len) {
        return Err(IndexError::Eof {
            offset: sym_value_off,
            needed: 8,
            available: total_len.saturating_sub(sym_value_off),
        });
    }
    // SAFETY: bounds just checked above.
    let sym_bytes = unsafe { shared.slice(sym_value_off, 8) };
    let st_value = Cursor::new(sym_bytes).read_u64()?;

    let value = st_value.wrapping_add(r_addend as u64);
    let write_at = rela
        .target_base
        .checked_add(r_offset)
        .ok_or(IndexError::Overflow { offset: entry_base })?;
    let section_end = rela.target_base + rela.target_len;

    match r_type {
        R_X86_64_64 => write_checked(shared, section_end.min(total_len), write_at, &value.to_le_bytes()),
        R_X86_64_32 => write_checked(shared, section_end.min(total_len), write_at, &(value as u32).to_le_bytes()),
        other => Err(IndexError::unsupported(format!(
            "relocation type {other} is not supported (only NONE/32/64)"
        ))),
    }
}

fn write_checked(shared: &SharedMut, total_len: usize, at: usize, bytes: &[u8]) -> Result<(), IndexError> {
    let end = at
        .checked_add(bytes.len())
        .ok_or(IndexError::Overflow { offset: at })?;
    if end > total_len {
        return Err(IndexError::Eof {
            offset: at,
            needed: bytes.len(),
            available: total_len.saturating_sub(at),
        });
    }
    // SAFETY: bounds were just checked against `total_len`, which matches
    // the live extent of the buffer `shared` was constructed from; this
    // range is disjoint from every other relocation's target range (see
    // `apply_one_relocation`'s safety comment).
    unsafe { shared.slice(at, bytes.len()) }.copy_from_slice(bytes);
    Ok(())
}

/// A raw pointer view over a mutable mmap buffer that lets disjoint
/// relocation entries be applied from different `rayon` worker threads at
/// once. Soundness rests entirely on the caller: every region handed out
/// via [`SharedMut::slice`] must be disjoint from every other live region,
/// which holds here because each relocation's target byte range is
/// determined by the immutable section header table computed before any
/// writes begin, and distinct relocation entries target distinct
/// `r_offset`s within their section.
pub(crate) struct SharedMut {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: see struct docs — callers are responsible for only requesting
// disjoint slices across threads.
unsafe impl Sync for SharedMut {}
unsafe impl Send for SharedMut {}

impl SharedMut {
    pub(crate) fn new(data: &mut [u8]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// `start..start+len` must be disjoint from any other range accessed
    /// concurrently through this or any other handle derived from the same
    /// buffer.
    pub(crate) unsafe fn slice(&self, start: usize, len: usize) -> &mut [u8] {
        debug_assert!(start + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(start), len)
    }
}
