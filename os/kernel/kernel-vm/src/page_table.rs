//! # Page-Table Primitive
//!
//! The demand pager never walks hardware tables itself. It talks to a
//! per-process [`PageTable`] that can install and clear a single 4 KiB leaf
//! and expose the CPU-maintained accessed/dirty bits of that leaf.
//!
//! [`SoftPageTable`] is a flat, software-only implementation keyed by virtual
//! page. It encodes each leaf in the x86-64 PTE bit layout so accessed and
//! dirty tracking behave like the real thing.

use crate::addresses::{PhysicalAddress, PhysicalPage, VirtualPage};
use crate::layout::PAGE_SIZE;
use alloc::collections::BTreeMap;
use bitfield_struct::bitfield;

/// An installed leaf translation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Translation {
    pub frame: PhysicalPage,
    pub writable: bool,
}

/// Single-leaf operations on one process's translation structure.
pub trait PageTable: Send {
    /// Install `page → frame`.
    ///
    /// # Errors
    /// Fails if intermediate tables cannot be allocated or the page is
    /// already mapped.
    fn install(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        writable: bool,
    ) -> Result<(), MapError>;

    /// Remove the translation for `page`, if any. Implementations flush the
    /// TLB entry.
    fn clear(&mut self, page: VirtualPage);

    fn translate(&self, page: VirtualPage) -> Option<Translation>;

    fn is_dirty(&self, page: VirtualPage) -> bool;
    fn set_dirty(&mut self, page: VirtualPage, dirty: bool);

    fn is_accessed(&self, page: VirtualPage) -> bool;
    fn set_accessed(&mut self, page: VirtualPage, accessed: bool);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory for page-table frames")]
    OutOfMemory,
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualPage),
}

/// Leaf entry in x86-64 layout (subset).
#[bitfield(u64)]
pub struct LeafEntry {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1).
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user_access: bool,
    #[bits(2)]
    __: u8,
    /// Accessed (A, bit 5). Set on any access.
    pub accessed: bool,
    /// Dirty (D, bit 6). Set on the first write.
    pub dirty: bool,
    #[bits(5)]
    __: u8,
    /// Physical frame number, bits 12..52.
    #[bits(40)]
    pub frame_number: u64,
    #[bits(12)]
    __: u16,
}

impl LeafEntry {
    #[must_use]
    pub fn user_leaf(frame: PhysicalPage, writable: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user_access(true)
            .with_frame_number(frame.base().as_u64() >> PAGE_SIZE.trailing_zeros())
    }

    #[must_use]
    pub fn frame(self) -> PhysicalPage {
        PhysicalAddress::new(self.frame_number() << PAGE_SIZE.trailing_zeros()).page()
    }
}

/// Software translation table; one per address space.
#[derive(Debug, Default)]
pub struct SoftPageTable {
    leaves: BTreeMap<VirtualPage, LeafEntry>,
}

impl SoftPageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            leaves: BTreeMap::new(),
        }
    }

    /// Number of installed leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

impl PageTable for SoftPageTable {
    fn install(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        writable: bool,
    ) -> Result<(), MapError> {
        if self.leaves.contains_key(&page) {
            return Err(MapError::AlreadyMapped(page));
        }
        self.leaves.insert(page, LeafEntry::user_leaf(frame, writable));
        Ok(())
    }

    fn clear(&mut self, page: VirtualPage) {
        self.leaves.remove(&page);
    }

    fn translate(&self, page: VirtualPage) -> Option<Translation> {
        self.leaves.get(&page).map(|e| Translation {
            frame: e.frame(),
            writable: e.writable(),
        })
    }

    fn is_dirty(&self, page: VirtualPage) -> bool {
        self.leaves.get(&page).is_some_and(|e| e.dirty())
    }

    fn set_dirty(&mut self, page: VirtualPage, dirty: bool) {
        if let Some(e) = self.leaves.get_mut(&page) {
            e.set_dirty(dirty);
        }
    }

    fn is_accessed(&self, page: VirtualPage) -> bool {
        self.leaves.get(&page).is_some_and(|e| e.accessed())
    }

    fn set_accessed(&mut self, page: VirtualPage, accessed: bool) {
        if let Some(e) = self.leaves.get_mut(&page) {
            e.set_accessed(accessed);
        }
    }
}
