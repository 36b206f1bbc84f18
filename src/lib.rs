//! A lock-free, parallel name index over DWARF debugging information
//! embedded in ELF object files.
//!
//! This crate answers one query efficiently: given a symbol name (and
//! optionally a DWARF tag), return every debugging-information entry (DIE)
//! that defines it. It is built to back an interactive debugger that
//! repeatedly resolves type/variable names across a very large corpus of
//! debug data — a monolithic kernel or program with hundreds of object
//! files and tens of thousands of compilation units.
//!
//! The indexer runs in two stages per compilation unit: [`abbrev`] compiles
//! a CU's abbreviation table into a compact byte-code program specialized
//! for the attributes the index cares about, and [`die`] walks the CU's DIE
//! tree using that program, inserting names into a fixed-capacity,
//! lock-free [`namehash::NameHash`] shared across worker threads.
//!
//! # Key types
//!
//!  - [`Index`]: the top-level entry point — `add` to index files, `find`
//!    to query them.
//!  - [`IndexConfig`]: tuning knobs, chiefly the name hash's fixed capacity.
//!  - [`IndexError`]: every failure surface the indexer can raise.
//!  - [`ObjectModel`]: the pluggable seam that decouples the index core
//!    from how files are opened and how matched DIEs are materialized back
//!    to a caller; [`DefaultCollaborator`] is the batteries-included
//!    implementation.
//!
//! # Scope
//!
//! DWARF 2/3/4, ELF64 little-endian, x86-64 relocations only. No DWARF
//! generation or rewriting, no DWARF 5, no cross-endianness or 32-bit
//! address size support, and no mutation of an [`Index`] after `add` has
//! finished running (build-once, query-many).

#![warn(missing_docs)]

mod abbrev;
mod collab;
mod consts;
mod cu;
mod die;
mod elf;
mod error;
mod filetable;
mod index;
mod namehash;
mod reader;

pub use crate::collab::{DefaultCollaborator, ObjectModel, ResolvedDie};
pub use crate::error::IndexError;
pub use crate::index::{Index, IndexConfig};
pub use crate::namehash::DieLocation;
