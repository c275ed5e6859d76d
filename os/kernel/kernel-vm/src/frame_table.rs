//! # Frame Table and Eviction
//!
//! Kernel-wide registry of every frame that currently holds a user page.
//! Each slot links a physical frame to the page living in it (its shared
//! state, its virtual address, and the page table of the owning process), so
//! a fault in one process can reclaim a frame from another.
//!
//! ## Victim selection
//!
//! When the [`FrameAlloc`] pool runs dry, a clock hand sweeps the slots:
//!
//! - pinned slots (population or copy in flight) are skipped;
//! - a slot whose page was accessed since the last sweep gets its accessed
//!   bit cleared and a second chance;
//! - the first slot found unaccessed is evicted.
//!
//! Two full turns of the hand are enough: the first clears every accessed
//! bit, the second is guaranteed to stop at the least recently scanned
//! unpinned slot.
//!
//! ## Locking
//!
//! One lock covers the slots and the frame pool. While it is held the evictor
//! takes the victim's page-state lock and then its page-table lock; no other
//! path takes those in the reverse order.

use crate::addresses::{PhysicalPage, VirtualPage};
use crate::error::FaultError;
use crate::frame_alloc::FrameAlloc;
use crate::page::{Backing, SharedPageState};
use crate::page_table::PageTable;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, error, info};
use spin::Mutex;

/// Page table of one address space, shared with the frame table.
pub type SharedPageTable = Arc<Mutex<Box<dyn PageTable>>>;

/// A page's link into the frame table: the slot index plus the frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHandle {
    slot: usize,
    frame: PhysicalPage,
}

impl FrameHandle {
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        self.frame
    }
}

/// Identity of the page a frame is being acquired for.
pub(crate) struct FrameOwner {
    pub page: SharedPageState,
    pub va: VirtualPage,
    pub page_table: SharedPageTable,
}

struct FrameEntry {
    frame: PhysicalPage,
    owner: FrameOwner,
    pinned: bool,
}

struct Slots {
    alloc: Box<dyn FrameAlloc>,
    entries: Vec<Option<FrameEntry>>,
    free: Vec<usize>,
    hand: usize,
    resident: usize,
    evictions: u64,
}

pub struct FrameTable {
    slots: Mutex<Slots>,
}

impl FrameTable {
    pub(crate) fn new(alloc: Box<dyn FrameAlloc>) -> Self {
        Self {
            slots: Mutex::new(Slots {
                alloc,
                entries: Vec::new(),
                free: Vec::new(),
                hand: 0,
                resident: 0,
                evictions: 0,
            }),
        }
    }

    /// Get a frame for `owner`, evicting if the pool is exhausted.
    ///
    /// The returned frame is registered and **pinned**; the caller unpins it
    /// once the page contents are in place.
    ///
    /// # Errors
    /// [`FaultError::OutOfMemory`] if the pool is empty and every resident
    /// frame is pinned or fails writeback.
    pub(crate) fn acquire(
        &self,
        owner: FrameOwner,
        backing: Backing<'_>,
    ) -> Result<FrameHandle, FaultError> {
        let mut slots = self.slots.lock();
        let (slot, frame) = match slots.alloc.alloc_4k() {
            Some(frame) => (slots.next_free_slot(), frame),
            None => match slots.evict(backing) {
                Some(reclaimed) => reclaimed,
                None => {
                    error!(
                        "no frame for {}: pool exhausted and nothing evictable ({} resident)",
                        owner.va, slots.resident
                    );
                    return Err(FaultError::OutOfMemory);
                }
            },
        };

        slots.entries[slot] = Some(FrameEntry {
            frame,
            owner,
            pinned: true,
        });
        slots.resident += 1;
        Ok(FrameHandle { slot, frame })
    }

    /// Make `handle` eligible for eviction again.
    pub(crate) fn unpin(&self, handle: FrameHandle) {
        if let Some(entry) = self.slots.lock().entry_mut(handle) {
            entry.pinned = false;
        }
    }

    /// Pin `handle` if it still holds `page`. Returns `false` if the page was
    /// evicted in the meantime.
    pub(crate) fn pin(&self, handle: FrameHandle, page: &SharedPageState) -> bool {
        match self.slots.lock().entry_mut(handle) {
            Some(entry) if Arc::ptr_eq(&entry.owner.page, page) => {
                entry.pinned = true;
                true
            }
            _ => false,
        }
    }

    /// Unregister `handle` and give the frame back to the pool.
    pub(crate) fn release(&self, handle: FrameHandle) {
        let mut slots = self.slots.lock();
        if slots.entry_mut(handle).is_none() {
            return;
        }
        slots.entries[handle.slot] = None;
        slots.free.push(handle.slot);
        slots.resident -= 1;
        slots.alloc.free_4k(handle.frame);
    }

    /// `true` if `handle` is registered to `page` at `va`.
    pub(crate) fn is_bound(&self, handle: FrameHandle, va: VirtualPage, page: &SharedPageState) -> bool {
        self.slots
            .lock()
            .entry_mut(handle)
            .is_some_and(|e| e.owner.va == va && Arc::ptr_eq(&e.owner.page, page))
    }

    /// Frames currently holding a user page.
    #[must_use]
    pub fn resident(&self) -> usize {
        self.slots.lock().resident
    }

    /// Total evictions since boot.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.slots.lock().evictions
    }
}

impl Slots {
    fn entry_mut(&mut self, handle: FrameHandle) -> Option<&mut FrameEntry> {
        self.entries
            .get_mut(handle.slot)
            .and_then(Option::as_mut)
            .filter(|e| e.frame == handle.frame)
    }

    fn next_free_slot(&mut self) -> usize {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.entries.push(None);
        self.entries.len() - 1
    }

    /// Run the clock until one frame is reclaimed. Returns the emptied slot
    /// and its frame.
    fn evict(&mut self, backing: Backing<'_>) -> Option<(usize, PhysicalPage)> {
        let len = self.entries.len();
        for _ in 0..2 * len {
            let slot = self.hand;
            self.hand = (self.hand + 1) % len;

            let Some(entry) = &self.entries[slot] else {
                continue;
            };
            if entry.pinned {
                continue;
            }

            let handle = FrameHandle {
                slot,
                frame: entry.frame,
            };
            let va = entry.owner.va;
            let mut state = entry.owner.page.lock();
            if state.frame != Some(handle) {
                // Page is being torn down; its owner releases the slot.
                continue;
            }

            let mut pt = entry.owner.page_table.lock();
            if pt.is_accessed(va) {
                pt.set_accessed(va, false);
                continue;
            }

            let dirty = pt.is_dirty(va);
            let writable = pt.translate(va).is_some_and(|t| t.writable);
            pt.clear(va);
            drop(pt);

            if let Err(e) = state.evict(entry.frame, dirty, backing) {
                error!("cannot evict {va} from {}: {e}", entry.frame);
                let mut pt = entry.owner.page_table.lock();
                if pt.install(va, entry.frame, writable).is_ok() {
                    pt.set_dirty(va, dirty);
                }
                continue;
            }
            state.frame = None;
            drop(state);

            info!("evicted {va} from {} (dirty: {dirty})", entry.frame);
            let frame = entry.frame;
            self.entries[slot] = None;
            self.resident -= 1;
            self.evictions += 1;
            return Some((slot, frame));
        }

        debug!("clock found no victim among {len} slots");
        None
    }
}
