//! Free-page accounting for the copy-on-write page file.
//!
//! Every writer transaction allocates pages for the tree nodes it
//! rewrites and releases the pages the new tree no longer references.
//! Released pages cannot be reused while an older read-only transaction
//! may still reach them, so they sit in a per-writer pending table until
//! `release` proves no open reader falls inside their visibility window.
//! Reusable pages live in a span index that hands out contiguous runs.
//!
//! A page id moves through the manager as
//! `allocated -> pending -> free span -> allocated`.

mod spans;

pub use spans::{Span, SpanAllocator, SpanIndex};

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{Result, TenebraError};
use crate::page::{Page, FREELIST_PAGE_FLAG, PAGE_HDR_LEN};
use crate::types::{merge_pgids, Pgid, Txid};

const PGID_LEN: usize = 8;

/// Count values at or above this do not fit the 16-bit header field; the
/// real length is stored in the first array slot instead.
const COUNT_SENTINEL: u64 = 0xFFFF;

/// A page released by a writer, remembered with the transaction that
/// originally allocated it. `Txid(0)` means the allocator is unknown,
/// which is the case for pages reconstructed from the on-disk freelist.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PendingEntry {
    pub id: Pgid,
    pub allocated_by: Txid,
}

/// Tracks every page available for allocation plus the pages freed by
/// writer transactions that open readers may still reference.
pub struct Freelist<A: SpanAllocator = SpanIndex> {
    index: A,
    /// Soon-to-be free page ids, keyed by the writer that released them.
    pending: HashMap<Txid, Vec<PendingEntry>>,
    /// Which transaction allocated a currently-live page id.
    allocs: HashMap<Pgid, Txid>,
    /// Fast membership over all free and pending ids.
    cache: HashSet<Pgid>,
}

impl Freelist<SpanIndex> {
    pub fn new() -> Self {
        Self::with_allocator(SpanIndex::new())
    }
}

impl Default for Freelist<SpanIndex> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: SpanAllocator> Freelist<A> {
    pub fn with_allocator(index: A) -> Self {
        Self {
            index,
            pending: HashMap::new(),
            allocs: HashMap::new(),
            cache: HashSet::new(),
        }
    }

    /// Reserves `n` contiguous pages for `txid` and returns the start id.
    /// `None` means no span fits; the engine grows the file instead.
    pub fn allocate(&mut self, txid: Txid, n: u64) -> Option<Pgid> {
        let start = self.index.allocate(n)?;
        for off in 0..n {
            self.cache.remove(&Pgid(start.0 + off));
        }
        self.allocs.insert(start, txid);
        Some(start)
    }

    /// Releases a page and its overflow run under writer `txid`. The run
    /// stays pending until `release` proves no open reader can see it.
    ///
    /// Panics when asked to free a meta page or a page that is already
    /// free or pending; both indicate a corrupted caller.
    pub fn free(&mut self, txid: Txid, page: &Page) {
        let pgid = page.id();
        if pgid.0 <= 1 {
            panic!("cannot free reserved page {pgid}");
        }

        let allocated_by = self.allocs.remove(&pgid).unwrap_or(Txid(0));
        debug_assert!(
            allocated_by != txid,
            "freed page {pgid} was allocated by the same transaction {txid}"
        );

        let entries = self.pending.entry(txid).or_default();
        for off in 0..=u64::from(page.overflow()) {
            let id = Pgid(pgid.0 + off);
            // A rolled-back free restores per-id alloc entries for the
            // whole run; clear them so the id lives in one table only.
            self.allocs.remove(&id);
            if !self.cache.insert(id) {
                panic!("page {id} already freed");
            }
            // Each id of the run remembers the original allocator, the
            // unknown sentinel included; rollback relies on it.
            entries.push(PendingEntry { id, allocated_by });
        }
    }

    /// Undoes a writer's releases: its pending ids leave the manager and
    /// pages with a known foreign allocator return to the alloc table.
    pub fn rollback(&mut self, txid: Txid) {
        let Some(entries) = self.pending.remove(&txid) else {
            return;
        };
        for entry in &entries {
            self.cache.remove(&entry.id);
            match entry.allocated_by {
                Txid(0) => {}
                owner if owner == txid => panic!(
                    "rollback: freed page {} was allocated by the same transaction {}",
                    entry.id, txid
                ),
                owner => {
                    self.allocs.insert(entry.id, owner);
                }
            }
        }
        warn!(txid = txid.0, pages = entries.len(), "pending frees rolled back");
    }

    /// Promotes pending pages into reusable spans. An entry freed by
    /// writer `f` with allocator `a` stays pending while any open reader
    /// `r` satisfies `a <= r < f`; such a reader still sees the page.
    pub fn release(&mut self, open_readers: &[Txid]) {
        let mut promoted = Vec::new();
        self.pending.retain(|&freed_by, entries| {
            entries.retain(|entry| {
                let visible = open_readers
                    .iter()
                    .any(|&r| entry.allocated_by <= r && r < freed_by);
                if !visible {
                    promoted.push(entry.id);
                }
                visible
            });
            !entries.is_empty()
        });
        if promoted.is_empty() {
            return;
        }
        promoted.sort_unstable();
        debug!(pages = promoted.len(), "pending pages promoted to free spans");
        self.merge_ids(&promoted);
    }

    /// Folds already-tracked or newly reclaimed ids into the span index.
    pub fn merge_ids(&mut self, ids: &[Pgid]) {
        self.index.merge_spans(ids);
        for &id in ids {
            self.cache.insert(id);
        }
    }

    /// Whether `pgid` is currently free or pending.
    pub fn freed(&self, pgid: Pgid) -> bool {
        self.cache.contains(&pgid)
    }

    /// Number of pages in reusable spans.
    pub fn free_count(&self) -> u64 {
        self.index.free_count()
    }

    /// Number of pages waiting on open readers.
    pub fn pending_count(&self) -> u64 {
        self.pending.values().map(|entries| entries.len() as u64).sum()
    }

    /// Total pages tracked by the manager.
    pub fn count(&self) -> u64 {
        self.free_count() + self.pending_count()
    }

    /// Every id covered by some span, ascending.
    pub fn free_page_ids(&self) -> Vec<Pgid> {
        self.index.free_page_ids()
    }

    /// Current spans, ordered by start id.
    pub fn spans(&self) -> Vec<Span> {
        self.index.spans()
    }

    /// Writes the sorted union of free and pending ids into `dst`, which
    /// must hold at least `count()` slots.
    pub fn copy_all(&self, dst: &mut [Pgid]) {
        let mut pending_ids: Vec<Pgid> = self
            .pending
            .values()
            .flatten()
            .map(|entry| entry.id)
            .collect();
        pending_ids.sort_unstable();
        merge_pgids(dst, &self.index.free_page_ids(), &pending_ids);
    }

    /// Size of the serialized freelist record, header included.
    pub fn size(&self) -> usize {
        let mut n = self.count();
        if n >= COUNT_SENTINEL {
            // The first array slot stores the length; see `write`.
            n += 1;
        }
        PAGE_HDR_LEN + PGID_LEN * n as usize
    }

    /// Serializes the manager into `page`. Pending ids are stored along
    /// with the free ids: a crashed writer never commits its tree, so on
    /// recovery its releases must come back as free pages.
    pub fn write(&self, page: &mut Page) -> Result<()> {
        page.set_flags(FREELIST_PAGE_FLAG);

        let count = self.count();
        if count == 0 {
            page.set_count(0);
            return Ok(());
        }

        let mut ids = vec![Pgid(0); count as usize];
        self.copy_all(&mut ids);

        let (header_count, lead) = if count < COUNT_SENTINEL {
            (count as u16, None)
        } else {
            (COUNT_SENTINEL as u16, Some(count))
        };
        let slots = ids.len() + usize::from(lead.is_some());
        let body = page.body_mut();
        if body.len() < slots * PGID_LEN {
            return Err(TenebraError::Invalid("freelist does not fit in page"));
        }

        let mut offset = 0;
        if let Some(length) = lead {
            body[..PGID_LEN].copy_from_slice(&length.to_le_bytes());
            offset = PGID_LEN;
        }
        for id in &ids {
            body[offset..offset + PGID_LEN].copy_from_slice(&id.0.to_le_bytes());
            offset += PGID_LEN;
        }
        page.set_count(header_count);
        Ok(())
    }

    /// Reinitializes the manager from a freelist page, replacing the free
    /// set and rebuilding the membership cache.
    pub fn read(&mut self, page: &Page) -> Result<()> {
        let mut ids = decode_freelist_page(page)?;
        ids.sort_unstable();
        self.index.read_ids(&ids);
        self.reindex();
        debug!(pages = ids.len(), pgid = page.id().0, "freelist loaded");
        Ok(())
    }

    /// Like `read`, but outstanding pending entries survive: decoded ids
    /// that are still pending are kept out of the free set.
    pub fn reload(&mut self, page: &Page) -> Result<()> {
        let ids = decode_freelist_page(page)?;
        self.install_excluding_pending(ids);
        Ok(())
    }

    /// `reload` from a pre-decoded id list instead of a page.
    pub fn no_sync_reload(&mut self, ids: &[Pgid]) {
        self.install_excluding_pending(ids.to_vec());
    }

    /// Recomputes the membership cache as spans union pending.
    pub fn reindex(&mut self) {
        let ids = self.index.free_page_ids();
        let mut cache = HashSet::with_capacity(ids.len() + self.pending_count() as usize);
        cache.extend(ids);
        for entries in self.pending.values() {
            cache.extend(entries.iter().map(|entry| entry.id));
        }
        self.cache = cache;
    }

    fn install_excluding_pending(&mut self, mut ids: Vec<Pgid>) {
        let pending_ids: HashSet<Pgid> = self
            .pending
            .values()
            .flatten()
            .map(|entry| entry.id)
            .collect();
        ids.retain(|id| !pending_ids.contains(id));
        ids.sort_unstable();
        self.index.read_ids(&ids);
        self.reindex();
    }
}

/// Decodes the id array of a freelist page by the 16-bit count
/// convention: a count of 0xFFFF means the first slot holds the length.
fn decode_freelist_page(page: &Page) -> Result<Vec<Pgid>> {
    if page.flags() & FREELIST_PAGE_FLAG == 0 {
        return Err(TenebraError::Corruption("page is not a freelist page"));
    }

    let body = page.body();
    let (count, lead_slots) = if u64::from(page.count()) == COUNT_SENTINEL {
        if body.len() < PGID_LEN {
            return Err(TenebraError::Corruption("freelist page truncated"));
        }
        let count = u64::from_le_bytes(body[..PGID_LEN].try_into().unwrap());
        (count as usize, 1)
    } else {
        (usize::from(page.count()), 0)
    };

    if body.len() < (lead_slots + count) * PGID_LEN {
        return Err(TenebraError::Corruption("freelist page truncated"));
    }

    let mut ids = Vec::with_capacity(count);
    for slot in 0..count {
        let at = (lead_slots + slot) * PGID_LEN;
        ids.push(Pgid(u64::from_le_bytes(
            body[at..at + PGID_LEN].try_into().unwrap(),
        )));
    }
    Ok(ids)
}

#[cfg(test)]
impl<A: SpanAllocator> Freelist<A> {
    /// Structural invariants that must hold after every public call.
    fn assert_invariants(&self) {
        let span_ids: HashSet<Pgid> = self.index.free_page_ids().into_iter().collect();
        let mut pending_ids = HashSet::new();
        for entries in self.pending.values() {
            for entry in entries {
                assert!(
                    pending_ids.insert(entry.id),
                    "page {} pending under two transactions",
                    entry.id
                );
                assert!(
                    !span_ids.contains(&entry.id),
                    "page {} both pending and in a span",
                    entry.id
                );
                assert!(
                    !self.allocs.contains_key(&entry.id),
                    "page {} both pending and allocated",
                    entry.id
                );
            }
        }

        let expected: HashSet<Pgid> = span_ids.union(&pending_ids).copied().collect();
        assert_eq!(self.cache, expected, "cache out of sync with spans/pending");
        assert!(!self.cache.contains(&Pgid(0)), "reserved page 0 tracked");
        assert!(!self.cache.contains(&Pgid(1)), "reserved page 1 tracked");
        assert_eq!(self.index.free_count(), span_ids.len() as u64);
    }

    fn pending_for(&self, txid: Txid) -> &[PendingEntry] {
        self.pending.get(&txid).map_or(&[], Vec::as_slice)
    }

    fn alloc_of(&self, pgid: Pgid) -> Option<Txid> {
        self.allocs.get(&pgid).copied()
    }
}
