//! A fixed-capacity, open-addressed, lock-free hash table from symbol name
//! (plus DWARF tag and source-file fingerprint) to the DIE that defines it.
//!
//! Each slot holds exactly one entry: an interned name pointer, the tag and
//! file fingerprint that (together with the name) uniquely identify it, and
//! the `(file, cu, die)` triple needed to resolve it back to a DIE.
//! Insertion is the only mutating operation and is safe to call
//! concurrently from many threads with no external locking: a slot is
//! claimed with a single `compare_exchange` on an `AtomicPtr` carrying the
//! interned name pointer, and the remainder of the entry is published by a
//! `Release` store to the slot's tag byte. Readers load the name pointer,
//! then `Acquire`-load the tag and spin until it is non-zero before reading
//! the rest of the slot, which makes the publish visible without ever
//! taking a lock.
//!
//! Capacity is fixed at construction time; once a probe sequence visits
//! every slot without finding a home, the table reports [`IndexError::Oom`]
//! rather than growing, since growing would require either a lock or a much
//! more elaborate lock-free resize protocol that this design intentionally
//! avoids (see spec's design notes on the fixed-slot cap).

use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::error::IndexError;

/// Tag value meaning "slot not yet published"; never produced by a real
/// DWARF tag in `crate::consts::INDEXED_TAGS`, all of which are non-zero.
const TAG_EMPTY: u8 = 0;

/// One matched DIE: which file/CU it came from, its byte offset within that
/// CU's `.debug_info` range, the DWARF tag, and the source-file fingerprint
/// used to disambiguate same-named DIEs across translation units.
#[derive(Debug, Clone, Copy)]
pub struct DieLocation {
    /// Index into `Index`'s file registry.
    pub file_index: u32,
    /// Index into `Index`'s global CU registry.
    pub cu_index: u32,
    /// Byte offset of the DIE within its CU's `.debug_info` range.
    pub die_offset: u32,
    /// The DWARF tag of the DIE this entry resolves to.
    pub tag: u8,
    /// Fingerprint of the `(directory, file)` pair this DIE was declared
    /// in, or 0 if unknown/not applicable.
    pub file_fp: u64,
}

struct Slot {
    /// Pointer into an interned name arena. Null means empty. The
    /// compare-exchange that transitions this from null is the sole
    /// linearization point of an insert for this slot.
    name_ptr: AtomicPtr<u8>,
    name_len: AtomicU32,
    file_fp: AtomicU64,
    cu_index: AtomicU32,
    file_index: AtomicU32,
    die_offset: AtomicU32,
    /// Doubles as the publish signal: `TAG_EMPTY` until the winning
    /// inserter's `Release` store makes the rest of the slot visible.
    tag: AtomicU8,
}

impl Slot {
    fn empty() -> Self {
        Self {
            name_ptr: AtomicPtr::new(std::ptr::null_mut()),
            name_len: AtomicU32::new(0),
            file_fp: AtomicU64::new(0),
            cu_index: AtomicU32::new(0),
            file_index: AtomicU32::new(0),
            die_offset: AtomicU32::new(0),
            tag: AtomicU8::new(TAG_EMPTY),
        }
    }
}

/// djbx33a, the hash function spec.md specifies for probing: simple, branch
/// free, and fast enough that its distribution quality matters less than
/// its lack of per-process randomization (fingerprints must be stable
/// across runs of the indexer).
fn djbx33a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// Owns the interned bytes behind every published `name_ptr`. Names are
/// never freed before the table itself, so pointers derived from this arena
/// stay valid for the table's whole lifetime.
struct Arena {
    chunks: std::sync::Mutex<Vec<Box<[u8]>>>,
}

impl Arena {
    fn new() -> Self {
        Self {
            chunks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Interns `bytes`, returning a pointer valid for the arena's lifetime.
    /// The lock here guards only the arena's own bookkeeping vector, never
    /// the hash table's slots; contention is limited to the (rare, relative
    /// to insert volume) case of a brand-new distinct name.
    fn intern(&self, bytes: &[u8]) -> *mut u8 {
        let boxed: Box<[u8]> = bytes.into();
        let ptr = boxed.as_ptr() as *mut u8;
        self.chunks.lock().unwrap().push(boxed);
        ptr
    }
}

/// The lock-free concurrent name index itself: a fixed `2^n`-slot
/// open-addressed table with linear probing.
pub(crate) struct NameHash {
    slots: Vec<Slot>,
    mask: usize,
    arena: Arena,
}

impl NameHash {
    /// `capacity` is rounded up to the next power of two so probing can use
    /// a bitmask instead of a modulo. Production use defaults to `2^17`
    /// slots (see `IndexConfig::default`); smaller capacities are useful in
    /// tests.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);
        Self {
            slots,
            mask: capacity - 1,
            arena: Arena::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts one `(name, tag, file_fp)` entry, concurrency-safe. A slot
    /// whose name, tag and file fingerprint all match an existing entry is
    /// a duplicate and is merged into that first slot (the new location is
    /// dropped, per spec: every DIE redefinition of the same name collapses
    /// to one entry).
    pub(crate) fn insert(&self, name: &[u8], loc: DieLocation) -> Result<(), IndexError> {
        debug_assert_ne!(loc.tag, TAG_EMPTY, "TAG_EMPTY is reserved for unpublished slots");

        let hash = djbx33a(name);
        let mut idx = hash as usize & self.mask;

        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let existing = slot.name_ptr.load(Ordering::Relaxed);

            if existing.is_null() {
                let interned = self.arena.intern(name);
                match slot.name_ptr.compare_exchange(
                    std::ptr::null_mut(),
                    interned,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // We alone won this slot: write every other field
                        // before publishing `tag`, so any reader that
                        // observes a non-zero tag sees a fully-initialized
                        // entry.
                        slot.name_len.store(name.len() as u32, Ordering::Relaxed);
                        slot.file_fp.store(loc.file_fp, Ordering::Relaxed);
                        slot.cu_index.store(loc.cu_index, Ordering::Relaxed);
                        slot.file_index.store(loc.file_index, Ordering::Relaxed);
                        slot.die_offset.store(loc.die_offset, Ordering::Relaxed);
                        slot.tag.store(loc.tag, Ordering::Release);
                        return Ok(());
                    }
                    Err(_) => {
                        // Lost the race; another thread just claimed this
                        // slot. Fall through and treat it as occupied
                        // without advancing the probe index.
                    }
                }
            }

            if let Some(published) = Self::wait_published(slot) {
                if published.tag == loc.tag
                    && published.file_fp == loc.file_fp
                    && Self::slot_name_matches(slot, name)
                {
                    return Ok(());
                }
            }

            idx = (idx + 1) & self.mask;
        }

        Err(IndexError::Oom {
            capacity: self.slots.len(),
        })
    }

    /// Spins until a non-null slot's `tag` is published (non-zero),
    /// returning the fully-initialized entry. Returns `None` if the slot
    /// turned out to be empty after all (lost-race retry case).
    fn wait_published(slot: &Slot) -> Option<DieLocation> {
        if slot.name_ptr.load(Ordering::Acquire).is_null() {
            return None;
        }
        let tag = loop {
            let tag = slot.tag.load(Ordering::Acquire);
            if tag != TAG_EMPTY {
                break tag;
            }
            std::hint::spin_loop();
        };
        Some(DieLocation {
            file_index: slot.file_index.load(Ordering::Relaxed),
            cu_index: slot.cu_index.load(Ordering::Relaxed),
            die_offset: slot.die_offset.load(Ordering::Relaxed),
            tag,
            file_fp: slot.file_fp.load(Ordering::Relaxed),
        })
    }

    fn slot_name_matches(slot: &Slot, name: &[u8]) -> bool {
        let ptr = slot.name_ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            return false;
        }
        let len = slot.name_len.load(Ordering::Relaxed) as usize;
        // SAFETY: ptr was published by a successful compare_exchange and
        // points into an Arena allocation that outlives the table; `len`
        // was written before `tag` and we only reach here after observing
        // `tag != TAG_EMPTY`, which happens-after that write.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        bytes == name
    }

    /// Looks up `name`, optionally filtered to a specific tag, returning
    /// every matching entry. Probing stops at the first empty slot or a
    /// full wrap-around of the table. Safe to call concurrently with other
    /// `find`s, but spec.md reserves `find` for use after `add` has
    /// returned (see `crate::Index::find`), so no concurrent insert is ever
    /// in flight here.
    pub(crate) fn find(&self, name: &[u8], tag: Option<u8>) -> Vec<DieLocation> {
        let hash = djbx33a(name);
        let start = hash as usize & self.mask;
        let mut idx = start;
        let mut out = Vec::new();

        for step in 0..self.slots.len() {
            if step > 0 && idx == start {
                break;
            }
            let slot = &self.slots[idx];
            if slot.name_ptr.load(Ordering::Acquire).is_null() {
                break;
            }
            if Self::slot_name_matches(slot, name) {
                if let Some(entry) = Self::wait_published(slot) {
                    if tag.is_none() || tag == Some(entry.tag) {
                        out.push(entry);
                    }
                }
            }
            idx = (idx + 1) & self.mask;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(n: u32) -> DieLocation {
        DieLocation {
            file_index: 0,
            cu_index: 0,
            die_offset: n,
            tag: 1,
            file_fp: 0,
        }
    }

    #[test]
    fn insert_then_find_round_trips() {
        let table = NameHash::with_capacity(16);
        table.insert(b"foo", loc(1)).unwrap();
        let found = table.find(b"foo", None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].die_offset, 1);
    }

    #[test]
    fn find_missing_returns_empty() {
        let table = NameHash::with_capacity(16);
        table.insert(b"foo", loc(1)).unwrap();
        assert!(table.find(b"bar", None).is_empty());
    }

    #[test]
    fn distinct_tags_of_same_name_both_survive() {
        let table = NameHash::with_capacity(16);
        table.insert(b"foo", DieLocation { tag: 1, ..loc(1) }).unwrap();
        table.insert(b"foo", DieLocation { tag: 2, ..loc(2) }).unwrap();
        assert_eq!(table.find(b"foo", None).len(), 2);
        assert_eq!(table.find(b"foo", Some(1)).len(), 1);
        assert_eq!(table.find(b"foo", Some(2))[0].die_offset, 2);
    }

    #[test]
    fn distinct_file_fps_of_same_name_and_tag_both_survive() {
        let table = NameHash::with_capacity(16);
        table
            .insert(b"S", DieLocation { file_fp: 0x1, ..loc(1) })
            .unwrap();
        table
            .insert(b"S", DieLocation { file_fp: 0x2, ..loc(2) })
            .unwrap();
        assert_eq!(table.find(b"S", None).len(), 2);
    }

    #[test]
    fn exact_duplicate_merges_into_first_slot() {
        let table = NameHash::with_capacity(16);
        table.insert(b"foo", loc(1)).unwrap();
        table.insert(b"foo", loc(1)).unwrap();
        assert_eq!(table.find(b"foo", None).len(), 1);
    }

    #[test]
    fn concurrent_inserts_are_all_visible() {
        use std::sync::Arc;
        let table = Arc::new(NameHash::with_capacity(1024));
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u32 {
                    let n = (t * 50 + i) % 40;
                    let name = format!("sym{n}");
                    table.insert(name.as_bytes(), loc(t * 50 + i)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut total = 0;
        for i in 0..40 {
            let name = format!("sym{i}");
            total += table.find(name.as_bytes(), None).len();
        }
        // 8 threads * 50 iterations each hit one of 40 distinct names, all
        // sharing tag=1/file_fp=0, so every (t, i) pair with the same `n`
        // collapses into a single entry: exactly 40 distinct entries.
        assert_eq!(total, 40);
    }

    #[test]
    fn exhausted_capacity_reports_oom() {
        let table = NameHash::with_capacity(2);
        table.insert(b"a", loc(1)).unwrap();
        table.insert(b"b", loc(2)).unwrap();
        assert!(table.insert(b"c", loc(3)).is_err());
    }
}
