//! Top-level index: configuration, the file/CU registries, and the
//! parallel `add`/single-threaded `find` orchestration.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{info, instrument};

use crate::abbrev::AbbrevTable;
use crate::collab::{DefaultCollaborator, ObjectModel, ResolvedDie};
use crate::cu::CuHeader;
use crate::elf::{self, DebugSections, SharedMut};
use crate::error::IndexError;
use crate::filetable::FileTable;
use crate::namehash::NameHash;

/// Tuning knobs for an [`Index`]. There is no online resizing (see
/// [`crate::namehash`]), so `hash_capacity_log2` must be sized up front for
/// the total distinct-name volume the index will ever hold.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// `log2` of the name hash's slot count, e.g. `17` for `2^17 = 131072`
    /// slots. Rounded up to at least `1` slot internally.
    pub hash_capacity_log2: u32,
    /// Size of the `rayon` thread pool used for relocation and per-CU
    /// indexing. `None` lets `rayon` pick (one worker per logical core), so
    /// a dedicated pool doesn't contend with any global pool the embedding
    /// process may already be running.
    pub threads: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            // The fixed-size name hash defaults to `2^17` slots; exposed as
            // a knob rather than hardcoded so tests can use a much smaller
            // table, but production callers should leave this alone.
            hash_capacity_log2: 17,
            threads: None,
        }
    }
}

struct CuRecord {
    file_index: u32,
    header: CuHeader,
    abbrev: AbbrevTable,
}

struct IndexedFile<C: ObjectModel> {
    handle: C::FileHandle,
    /// The same private, copy-on-write mapping relocations were applied to
    /// (see `ObjectModel::open_mut`); indexing reads through it directly so
    /// relocated bytes are never lost to a second, independent mapping of
    /// the same file.
    mmap: memmap2::MmapMut,
    sections: DebugSections,
    /// Per-file cache of the most recently resolved file table, keyed by the
    /// `.debug_line` offset it was parsed from. `find` is documented as
    /// single-threaded (see module docs), so a plain `RefCell` suffices —
    /// no synchronization is needed between distinct `find` calls.
    file_table_cache: RefCell<Option<(usize, FileTable)>>,
}

/// A lock-free, parallel name index over the DWARF debugging information of
/// a set of ELF object files.
///
/// `C` is the [`ObjectModel`] used to open files and materialize matched
/// DIEs; most callers can use the default, [`DefaultCollaborator`].
pub struct Index<C: ObjectModel = DefaultCollaborator> {
    config: IndexConfig,
    collaborator: C,
    names: NameHash,
    files: Vec<IndexedFile<C>>,
    cus: Vec<CuRecord>,
    last_address_size: AtomicU8,
    pool: Option<rayon::ThreadPool>,
}

impl Index<DefaultCollaborator> {
    /// Creates an empty index using [`DefaultCollaborator`] to open files
    /// and materialize matched DIEs.
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        Self::with_collaborator(config, DefaultCollaborator)
    }
}

impl<C: ObjectModel> Index<C> {
    /// Creates an empty index using a caller-supplied [`ObjectModel`].
    ///
    /// Builds a dedicated `rayon` thread pool only when
    /// [`IndexConfig::threads`] is `Some`; otherwise `add`/`add_all` run
    /// their parallel phases on whatever global `rayon` pool the host
    /// process already has, rather than contending with it.
    pub fn with_collaborator(config: IndexConfig, collaborator: C) -> Result<Self, IndexError> {
        let names = NameHash::with_capacity(1usize << config.hash_capacity_log2);
        let pool = match config.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| IndexError::thread_pool(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            collaborator,
            names,
            files: Vec::new(),
            cus: Vec::new(),
            last_address_size: AtomicU8::new(0),
            pool,
        })
    }

    /// Runs `f` on the index's dedicated thread pool if one was configured
    /// via [`IndexConfig::threads`], else runs it directly on whichever
    /// pool `rayon`'s `par_iter` calls inside `f` resolve to (the global
    /// pool, or an enclosing `ThreadPool::install` scope).
    fn on_pool<R>(&self, f: impl FnOnce() -> R + Send) -> R
    where
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Returns the address size of the most recently indexed CU, or 0 if
    /// none has been indexed yet. Unvalidated across CUs (see DESIGN.md).
    pub fn address_size(&self) -> u8 {
        self.last_address_size.load(Ordering::Relaxed)
    }

    /// Opens, relocates and indexes one file's worth of DWARF debugging
    /// information. `add` is not reentrant-safe with respect to itself —
    /// callers index one file (or a pre-gathered batch via
    /// [`Index::add_all`]) at a time — but the per-file CU indexing phase
    /// it runs internally is fully parallel.
    #[instrument(skip(self, handle), fields(handle = ?handle_debug(&handle)))]
    pub fn add(&mut self, handle: C::FileHandle) -> Result<(), IndexError> {
        self.add_all(std::iter::once(handle))
    }

    /// Opens, relocates and indexes many files. Relocation and per-CU
    /// indexing are both parallelized with `rayon` across the whole batch,
    /// not just within one file, which amortizes thread pool handoff over
    /// more work than calling `add` once per file would.
    pub fn add_all(
        &mut self,
        handles: impl IntoIterator<Item = C::FileHandle>,
    ) -> Result<(), IndexError> {
        let handles: Vec<_> = handles.into_iter().collect();
        if handles.is_empty() {
            return Ok(());
        }

        let base_file_index = self.files.len() as u32;

        let mut opened: Vec<(C::FileHandle, memmap2::MmapMut)> = Vec::with_capacity(handles.len());
        for handle in handles {
            opened.push((handle.clone(), self.collaborator.open_mut(&handle)?));
        }

        // Discovery (section headers, rela pairing) is a pure read and is
        // cheap enough to parallelize per file. Applying the relocations
        // themselves is not: a single file with an outsized
        // `.rela.debug_info` would otherwise dominate wall-clock time, so
        // that work is flattened below into one global linear index over
        // every `(file, rela section, entry)` triple across the whole
        // batch and scheduled as a single `rayon` job list.
        let discovered: Vec<Option<elf::Discovered>> = opened
            .par_iter()
            .map(|(_, mmap)| elf::discover(mmap))
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs: Vec<(usize, usize, usize)> = Vec::new();
        for (file_idx, d) in discovered.iter().enumerate() {
            if let Some(d) = d {
                for (rela_idx, rela) in d.relas.iter().enumerate() {
                    for entry_idx in 0..rela.count {
                        jobs.push((file_idx, rela_idx, entry_idx));
                    }
                }
            }
        }

        {
            let shared: Vec<SharedMut> = opened
                .iter_mut()
                .map(|(_, mmap)| SharedMut::new(&mut mmap[..]))
                .collect();

            jobs.par_iter()
                .try_for_each(|&(file_idx, rela_idx, entry_idx)| -> Result<(), IndexError> {
                    let rela = &discovered[file_idx]
                        .as_ref()
                        .expect("a job only exists for a file with discovered relas")
                        .relas[rela_idx];
                    elf::apply_one_relocation(&shared[file_idx], shared[file_idx].len(), rela, entry_idx)
                })?;
        }

        // The same private mapping relocations were just applied to is kept
        // and indexed directly below; re-opening a fresh mapping here would
        // read back the unrelocated file contents.
        let mut new_files = Vec::with_capacity(opened.len());
        for ((handle, mmap), discovered) in opened.into_iter().zip(discovered) {
            match discovered {
                Some(d) => new_files.push(IndexedFile {
                    handle,
                    mmap,
                    sections: d.sections,
                    file_table_cache: RefCell::new(None),
                }),
                None => {
                    info!("skipping file with no .debug_info section");
                }
            }
        }

        let base_cu_index = self.cus.len() as u32;
        let first_error: Mutex<Option<IndexError>> = Mutex::new(None);

        struct FileCus {
            file_index: u32,
            cus: Vec<(CuHeader, AbbrevTable)>,
        }

        let per_file_cus: Vec<FileCus> = new_files
            .par_iter()
            .enumerate()
            .map(|(i, file)| {
                let file_index = base_file_index + i as u32;
                let (info_off, info_len) = match file.sections.info {
                    Some(s) => s,
                    None => return FileCus { file_index, cus: Vec::new() },
                };
                let debug_info = &file.mmap[info_off..info_off + info_len];

                let headers = match crate::cu::parse_all(debug_info) {
                    Ok(h) => h,
                    Err(e) => {
                        first_error.lock().unwrap().get_or_insert(e);
                        return FileCus { file_index, cus: Vec::new() };
                    }
                };

                let mut cus = Vec::with_capacity(headers.len());
                for header in headers {
                    let abbrev_data = match file.sections.abbrev {
                        Some((off, len)) => &file.mmap[off..off + len],
                        None => {
                            first_error.lock().unwrap().get_or_insert(IndexError::dwarf(
                                "CU references .debug_abbrev but the file has none",
                            ));
                            continue;
                        }
                    };
                    match crate::abbrev::compile(abbrev_data, header.abbrev_offset, header.offset_size) {
                        Ok(table) => cus.push((header, table)),
                        Err(e) => {
                            first_error.lock().unwrap().get_or_insert(e);
                        }
                    }
                }
                FileCus { file_index, cus }
            })
            .collect();

        if let Some(err) = first_error.lock().unwrap().take() {
            return Err(err);
        }

        let mut flat_cus: Vec<(u32, CuHeader, AbbrevTable)> = Vec::new();
        for fc in per_file_cus {
            for (header, table) in fc.cus {
                flat_cus.push((fc.file_index, header, table));
            }
        }

        let names = &self.names;
        let files_ref = &new_files;
        let last_address_size = &self.last_address_size;

        flat_cus
            .par_iter()
            .enumerate()
            .try_for_each(|(i, (file_index, header, table))| -> Result<(), IndexError> {
                let local_file_index = *file_index - base_file_index;
                let file = &files_ref[local_file_index as usize];
                let (info_off, info_len) = file.sections.info.unwrap();
                let debug_info = &file.mmap[info_off..info_off + info_len];
                let debug_str = file
                    .sections
                    .str_
                    .map(|(o, l)| &file.mmap[o..o + l])
                    .unwrap_or(&[]);
                let debug_line = file
                    .sections
                    .line
                    .map(|(o, l)| &file.mmap[o..o + l])
                    .unwrap_or(&[]);

                let cu_index = base_cu_index + i as u32;
                crate::die::walk(
                    debug_info,
                    debug_str,
                    debug_line,
                    header,
                    table,
                    names,
                    *file_index,
                    cu_index,
                )?;
                last_address_size.store(header.address_size, Ordering::Relaxed);
                Ok(())
            })?;

        self.files.extend(new_files);
        for (file_index, header, table) in flat_cus {
            self.cus.push(CuRecord {
                file_index,
                header,
                abbrev: table,
            });
        }

        Ok(())
    }

    /// Looks up every indexed DIE named `name`, optionally filtered to a
    /// specific DWARF tag. Intended to be called only once `add`/`add_all`
    /// has finished: concurrent `find`s are safe with each other, but not
    /// with an in-flight `add`.
    pub fn find(&self, name: &[u8], tag: Option<u64>) -> Result<Vec<C::Die>, IndexError> {
        let tag_u8 = tag.map(|t| t as u8);
        let locations = self.names.find(name, tag_u8);

        let mut out = Vec::new();
        for loc in locations {
            let cu = &self.cus[loc.cu_index as usize];
            let file = &self.files[loc.file_index as usize];
            let resolved = ResolvedDie {
                cu_offset: cu.header.offset,
                die_offset: loc.die_offset as usize,
                tag: loc.tag as u64,
            };
            out.push(self.collaborator.resolve(&file.handle, resolved));
        }

        if out.is_empty() {
            return Err(IndexError::NotFound(String::from_utf8_lossy(name).into_owned()));
        }
        Ok(out)
    }

    /// Number of files successfully indexed so far (excluding those with no
    /// debug info, which are silently dropped).
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// The handles of every file successfully indexed so far, in the order
    /// they were added. Files passed to `add`/`add_all` that carried no
    /// `.debug_info` section are excluded — they were never appended to the
    /// file registry in the first place (see `add_all`).
    pub fn files(&self) -> impl Iterator<Item = &C::FileHandle> {
        self.files.iter().map(|f| &f.handle)
    }

    /// Total number of compilation units indexed so far, across every
    /// indexed file.
    pub fn cu_count(&self) -> usize {
        self.cus.len()
    }
}

fn handle_debug<H>(_h: &H) -> &'static str {
    "<handle>"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_minimal_object(path: &std::path::Path) {
        // A CU with a single indexable structure_type DIE, no relocations.
        let mut abbrev = Vec::new();
        fn uleb(v: u64, out: &mut Vec<u8>) {
            let mut v = v;
            loop {
                let byte = (v & 0x7f) as u8;
                v >>= 7;
                if v == 0 {
                    out.push(byte);
                    break;
                } else {
                    out.push(byte | 0x80);
                }
            }
        }
        uleb(1, &mut abbrev);
        uleb(crate::consts::DW_TAG_COMPILE_UNIT, &mut abbrev);
        abbrev.push(1);
        uleb(0, &mut abbrev);
        uleb(0, &mut abbrev);
        uleb(2, &mut abbrev);
        uleb(crate::consts::DW_TAG_STRUCTURE_TYPE, &mut abbrev);
        abbrev.push(0);
        uleb(crate::consts::DW_AT_NAME, &mut abbrev);
        uleb(crate::consts::DW_FORM_STRING, &mut abbrev);
        uleb(0, &mut abbrev);
        uleb(0, &mut abbrev);
        uleb(0, &mut abbrev);

        let mut die_bytes = Vec::new();
        uleb(1, &mut die_bytes);
        uleb(2, &mut die_bytes);
        die_bytes.extend_from_slice(b"Widget\0");
        uleb(0, &mut die_bytes);

        let mut debug_info = vec![0u8; 4 + 2 + 4 + 1];
        debug_info[4..6].copy_from_slice(&4u16.to_le_bytes());
        debug_info[8] = 8;
        debug_info.extend_from_slice(&die_bytes);
        let total_len = (debug_info.len() - 4) as u32;
        debug_info[0..4].copy_from_slice(&total_len.to_le_bytes());

        let sections: &[(&str, u32, &[u8])] = &[
            (".debug_info", crate::consts::SHT_PROGBITS, &debug_info),
            (".debug_abbrev", crate::consts::SHT_PROGBITS, &abbrev),
        ];

        let elf_bytes = build_test_elf(sections);
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(&elf_bytes).unwrap();
    }

    fn build_test_elf(sections: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let mut shstrtab_bytes = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _, _) in sections {
            name_offsets.push(shstrtab_bytes.len() as u32);
            shstrtab_bytes.extend_from_slice(name.as_bytes());
            shstrtab_bytes.push(0);
        }

        let ehdr_size = 64usize;
        let shentsize = 64usize;
        let nsections = sections.len() + 2;
        let mut body_offset = ehdr_size + nsections * shentsize;

        let shstrtab_offset = body_offset;
        body_offset += shstrtab_bytes.len();
        let mut section_offsets = Vec::new();
        for (_, _, bytes) in sections {
            section_offsets.push(body_offset);
            body_offset += bytes.len();
        }

        let mut out = vec![0u8; body_offset];
        out[0..4].copy_from_slice(crate::consts::ELFMAG);
        out[4] = crate::consts::ELFCLASS64;
        out[5] = crate::consts::ELFDATA2LSB;
        out[6] = crate::consts::EV_CURRENT;
        out[16..18].copy_from_slice(&1u16.to_le_bytes());
        out[18..20].copy_from_slice(&0x3eu16.to_le_bytes());
        out[40..48].copy_from_slice(&(ehdr_size as u64).to_le_bytes());
        out[58..60].copy_from_slice(&(shentsize as u16).to_le_bytes());
        out[60..62].copy_from_slice(&(nsections as u16).to_le_bytes());
        out[62..64].copy_from_slice(&1u16.to_le_bytes());

        let write_sh = |out: &mut [u8], idx: usize, name_off: u32, sh_type: u32, offset: usize, size: usize| {
            let base = ehdr_size + idx * shentsize;
            out[base..base + 4].copy_from_slice(&name_off.to_le_bytes());
            out[base + 4..base + 8].copy_from_slice(&sh_type.to_le_bytes());
            out[base + 24..base + 32].copy_from_slice(&(offset as u64).to_le_bytes());
            out[base + 32..base + 40].copy_from_slice(&(size as u64).to_le_bytes());
        };

        write_sh(&mut out, 0, 0, 0, 0, 0);
        write_sh(&mut out, 1, 0, crate::consts::SHT_PROGBITS, shstrtab_offset, shstrtab_bytes.len());
        out[shstrtab_offset..shstrtab_offset + shstrtab_bytes.len()].copy_from_slice(&shstrtab_bytes);

        for (i, (_, sh_type, bytes)) in sections.iter().enumerate() {
            let offset = section_offsets[i];
            write_sh(&mut out, i + 2, name_offsets[i], *sh_type, offset, bytes.len());
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        out
    }

    #[test]
    fn indexes_and_finds_a_struct_across_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.o");
        write_minimal_object(&path);

        let mut index = Index::new(IndexConfig {
            hash_capacity_log2: 6,
            ..Default::default()
        })
        .unwrap();
        index.add(path).unwrap();

        let found = index.find(b"Widget", Some(crate::consts::DW_TAG_STRUCTURE_TYPE)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(index.file_count(), 1);
        assert_eq!(index.cu_count(), 1);
    }

    #[test]
    fn find_missing_name_errors_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.o");
        write_minimal_object(&path);

        let mut index = Index::new(IndexConfig::default()).unwrap();
        index.add(path).unwrap();

        assert!(matches!(index.find(b"NoSuchName", None), Err(IndexError::NotFound(_))));
    }
}
