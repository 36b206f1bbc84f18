//! The pluggable boundary between the index core and the objects it
//! indexes (files, opened mappings, DIE/CU views returned from `find`).
//!
//! spec.md scopes the index core to never own the choice of how a file is
//! opened or how a located DIE is materialized back into something a
//! caller can read attributes from — that choice belongs to an "external
//! collaborator". [`ObjectModel`] is that seam: the index core is generic
//! over it, and [`DefaultCollaborator`] is the batteries-included
//! implementation used when a caller doesn't need anything fancier than
//! "open the file, mmap it, hand back an offset".

use std::fs::File as StdFile;
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::IndexError;

/// A resolved DIE, as handed back by [`crate::Index::find`] through the
/// collaborator's [`ObjectModel::Die`] associated type.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDie {
    /// Offset of the owning compilation unit within `.debug_info`.
    pub cu_offset: usize,
    /// Byte offset of the DIE itself within `.debug_info`.
    pub die_offset: usize,
    /// The DIE's DWARF tag.
    pub tag: u64,
}

/// Decouples the index core from how object files are opened, mapped and
/// turned into addressable bytes. A type implementing this trait is the
/// "external collaborator" spec.md assumes surrounds the core.
pub trait ObjectModel {
    /// A caller-chosen handle identifying one indexed file (a path, an
    /// interned ID, whatever the embedding application already uses).
    type FileHandle: Clone;
    /// What [`crate::Index::find`] returns per match: usually a thin
    /// wrapper around [`ResolvedDie`] plus whatever the collaborator wants
    /// to attach (a borrowed mmap, a reader positioned at the DIE, etc).
    type Die;

    /// Opens and memory-maps the file identified by `handle`, returning the
    /// bytes to index.
    fn open(&self, handle: &Self::FileHandle) -> Result<Mmap, IndexError>;

    /// Opens the file for in-place relocation through a private,
    /// copy-on-write mapping: writes are visible to this process only and
    /// are never carried through to the backing file on disk (spec.md §3's
    /// "mapping region is mutable (PRIVATE)"). The same mapping returned
    /// here is the one later read back for indexing, so relocated bytes are
    /// never lost to a second, independent mapping of the same file.
    fn open_mut(&self, handle: &Self::FileHandle) -> Result<MmapMut, IndexError>;

    /// Materializes a located DIE into `Self::Die` for the caller.
    fn resolve(&self, handle: &Self::FileHandle, die: ResolvedDie) -> Self::Die;
}

/// The default [`ObjectModel`]: file handles are plain paths, files are
/// mmap'd directly, and resolved DIEs are handed back as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCollaborator;

impl ObjectModel for DefaultCollaborator {
    type FileHandle = std::path::PathBuf;
    type Die = ResolvedDie;

    fn open(&self, handle: &Self::FileHandle) -> Result<Mmap, IndexError> {
        let file = open_file(handle)?;
        // SAFETY: the mapping is only ever read through this process; the
        // caller is responsible for not mutating the backing file
        // concurrently, per `memmap2`'s own safety contract.
        unsafe { Mmap::map(&file) }.map_err(|e| IndexError::os(handle, e))
    }

    fn open_mut(&self, handle: &Self::FileHandle) -> Result<MmapMut, IndexError> {
        let file = open_file(handle)?;
        // SAFETY: see `open`. `map_copy` additionally guarantees the
        // mapping is MAP_PRIVATE: relocation writes only ever touch this
        // process's copy-on-write pages, never the backing file.
        unsafe { MmapOptions::new().map_copy(&file) }.map_err(|e| IndexError::os(handle, e))
    }

    fn resolve(&self, _handle: &Self::FileHandle, die: ResolvedDie) -> Self::Die {
        die
    }
}

fn open_file(path: &Path) -> Result<StdFile, IndexError> {
    StdFile::open(path).map_err(|e| IndexError::os(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn default_collaborator_opens_mmap() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let path = tmp.path().to_path_buf();

        let collab = DefaultCollaborator;
        let mapping = collab.open(&path).unwrap();
        assert_eq!(&mapping[..], b"hello world");
    }

    #[test]
    fn default_collaborator_resolves_identity() {
        let collab = DefaultCollaborator;
        let die = ResolvedDie {
            cu_offset: 4,
            die_offset: 20,
            tag: 0x13,
        };
        let resolved = collab.resolve(&std::path::PathBuf::from("x"), die);
        assert_eq!(resolved.die_offset, 20);
    }
}
