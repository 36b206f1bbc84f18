//! Line-number program file table parsing and directory/file fingerprinting.
//!
//! DWARF4 line program headers list include directories and file entries
//! separately, with each file entry referencing a directory by index (0
//! meaning "the compilation directory"). `hash_directory` canonicalizes a
//! directory path into an equivalence class before hashing it, so that
//! `foo/bar`, `foo//bar`, `foo/./bar` and `foo/x/../bar` all fingerprint
//! identically, and a relative path is never confused with an absolute one
//! that happens to share a suffix.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::error::IndexError;
use crate::reader::Cursor;

/// Fixed key used for every directory/file hash in this crate. Not a
/// secret; chosen once so fingerprints are reproducible across runs and
/// across processes indexing the same binary.
const HASH_KEY: (u64, u64) = (0x646e_6f72_6f66_6975, 0x7869_5f66_6172_6864);

/// Canonicalizes `path` into a component stack and returns its SipHash-1-3
/// fingerprint. `path` may be relative or absolute; the two are never
/// confused because leading-root-ness is folded into the hash via a marker
/// pushed before any components.
pub(crate) fn hash_directory(path: &[u8]) -> u64 {
    let is_absolute = path.first() == Some(&b'/');
    let mut stack: Vec<&[u8]> = Vec::new();

    for component in path.split(|&b| b == b'/') {
        match component {
            b"" | b"." => continue,
            b".." => {
                if stack.last().map(|c| *c != b"..").unwrap_or(false) {
                    stack.pop();
                } else if !is_absolute {
                    stack.push(b"..");
                }
                // For an absolute path, ".." past the root is a no-op.
            }
            other => stack.push(other),
        }
    }

    let mut hasher = SipHasher13::new_with_keys(HASH_KEY.0, HASH_KEY.1);
    hasher.write_u8(is_absolute as u8);
    for component in &stack {
        hasher.write(component);
        hasher.write_u8(0);
    }
    hasher.finish()
}

/// Combines a directory fingerprint with a file's own name and the
/// `DW_LNE_define_file` modification-time/length fields (when present,
/// else 0) into a single per-file fingerprint.
pub(crate) fn file_fingerprint(dir_hash: u64, name: &[u8], mtime: u64, length: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEY.0, HASH_KEY.1);
    hasher.write_u64(dir_hash);
    hasher.write(name);
    hasher.write_u8(0);
    hasher.write_u64(mtime);
    hasher.write_u64(length);
    hasher.finish()
}

/// One entry of a parsed line-program file table: its fingerprint, ready to
/// be matched against a DIE's `DW_AT_decl_file` index.
#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub(crate) fingerprint: u64,
}

/// A parsed line-program header's file table, 1-indexed per DWARF4
/// convention (index 0 is reserved and maps to the CU's primary source
/// file via `DW_AT_name`, not an entry in this table).
#[derive(Debug, Default)]
pub(crate) struct FileTable {
    entries: Vec<FileEntry>,
}

impl FileTable {
    pub(crate) fn get(&self, index: u64) -> Option<&FileEntry> {
        if index == 0 {
            None
        } else {
            self.entries.get(index as usize - 1)
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Parses the directory and file tables out of a `.debug_line` program
/// header located at `offset`. Only the portion needed to build file
/// fingerprints is read; the line number program itself is never executed.
pub(crate) fn parse(debug_line: &[u8], offset: usize) -> Result<FileTable, IndexError> {
    let mut cursor = Cursor::at(debug_line, offset);

    let first_len = cursor.read_u32()?;
    let offset_size: u32 = if first_len == 0xffff_ffff {
        cursor.read_u64()?;
        8
    } else {
        4
    };

    let _version = cursor.read_u16()?;
    let _header_length = if offset_size == 8 {
        cursor.read_u64()?
    } else {
        cursor.read_u32()? as u64
    };
    let _minimum_instruction_length = cursor.read_u8()?;
    let _maximum_operations_per_instruction_unused = 0u8; // DWARF4: not present before VLIW variants.
    let _default_is_stmt = cursor.read_u8()?;
    let _line_base = cursor.read_u8()? as i8;
    let _line_range = cursor.read_u8()?;
    let _opcode_base = cursor.read_u8()?;
    let standard_opcode_count = (_opcode_base as usize).saturating_sub(1);
    for _ in 0..standard_opcode_count {
        cursor.read_u8()?;
    }

    let mut dir_hashes = vec![0u64]; // index 0 reserved for compilation directory.
    loop {
        let dir = cursor.read_cstr()?;
        if dir.is_empty() {
            break;
        }
        dir_hashes.push(hash_directory(dir));
    }
    let num_directories = dir_hashes.len() - 1;

    let mut entries = Vec::new();
    loop {
        let name = cursor.read_cstr()?;
        if name.is_empty() {
            break;
        }
        let dir_index = cursor.read_uleb128()?;
        let mtime = cursor.read_uleb128()?;
        let length = cursor.read_uleb128()?;
        if dir_index as usize > num_directories {
            return Err(IndexError::dwarf(format!(
                "file table entry references directory {dir_index}, but only {num_directories} are declared"
            )));
        }
        let dir_hash = dir_hashes[dir_index as usize];
        entries.push(FileEntry {
            fingerprint: file_fingerprint(dir_hash, name, mtime, length),
        });
    }

    Ok(FileTable { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_double_slashes() {
        assert_eq!(hash_directory(b"foo/bar"), hash_directory(b"foo//bar"));
    }

    #[test]
    fn collapses_dot_components() {
        assert_eq!(hash_directory(b"foo/bar"), hash_directory(b"foo/./bar"));
    }

    #[test]
    fn resolves_dot_dot() {
        assert_eq!(hash_directory(b"foo/bar"), hash_directory(b"foo/x/../bar"));
    }

    #[test]
    fn relative_and_absolute_never_collide() {
        assert_ne!(hash_directory(b"foo/bar"), hash_directory(b"/foo/bar"));
    }

    #[test]
    fn leading_dot_dot_kept_for_relative() {
        assert_eq!(hash_directory(b"../foo"), hash_directory(b"../foo"));
        assert_ne!(hash_directory(b"../foo"), hash_directory(b"foo"));
    }

    #[test]
    fn absolute_dot_dot_past_root_is_noop() {
        assert_eq!(hash_directory(b"/../foo"), hash_directory(b"/foo"));
    }

    #[test]
    fn trailing_slash_insignificant() {
        assert_eq!(hash_directory(b"foo/bar"), hash_directory(b"foo/bar/"));
    }
}
