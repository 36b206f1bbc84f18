//! Error kinds produced while building or querying a [`crate::Index`].

use std::path::PathBuf;

/// Every failure surface the indexer can raise.
///
/// Propagation follows the "first error wins" rule: during a parallel phase
/// of [`crate::Index::add`], the first worker to observe an error captures
/// it and all others abandon their remaining work; `add` then returns that
/// one error. The single recoverable case — a file with no debug
/// sections at all — is not represented here, because it is never raised;
/// such files are silently dropped from the index (see `elf::discover`).
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Truncated input: fewer bytes remained than the read required.
    #[error("unexpected end of input at offset {offset:#x}: needed {needed} bytes, {available} available")]
    Eof {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A DWARF semantic invariant was violated (bad file index, bad
    /// reference, non-homogeneous address size where that matters, etc).
    #[error("malformed DWARF data: {0}")]
    DwarfFormat(String),

    /// The ELF container itself is malformed.
    #[error("malformed ELF data: {0}")]
    ElfFormat(String),

    /// Valid but unimplemented input: 32-bit ELF, big-endian, a relocation
    /// type other than NONE/32/64, `DW_FORM_indirect`, or a non-sequential
    /// abbreviation code table.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A ULEB128 value did not fit in 64 bits.
    #[error("LEB128 value at offset {offset:#x} exceeds 64 bits")]
    Overflow { offset: usize },

    /// `open`/`fstat`/`mmap` failed for a path.
    #[error("I/O error on {path}: {source}", path = path.display())]
    Os {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The name hash is at capacity; no more distinct names can be
    /// inserted into this index instance.
    #[error("name hash exhausted: all {capacity} slots are occupied")]
    Oom { capacity: usize },

    /// `find` matched no entries.
    #[error("no definitions found for {0:?}")]
    NotFound(String),

    /// Building the dedicated `rayon` thread pool from `IndexConfig::threads`
    /// failed (e.g. the OS refused to spawn a worker thread).
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

impl IndexError {
    pub(crate) fn dwarf(msg: impl Into<String>) -> Self {
        Self::DwarfFormat(msg.into())
    }

    pub(crate) fn elf(msg: impl Into<String>) -> Self {
        Self::ElfFormat(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn os(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Os {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn thread_pool(msg: impl Into<String>) -> Self {
        Self::ThreadPool(msg.into())
    }
}
