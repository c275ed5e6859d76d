//! Supplemental page table: per-process map from page to [`Page`].

use crate::addresses::{VirtualAddress, VirtualPage};
use crate::error::VmError;
use crate::page::Page;
use alloc::collections::BTreeMap;
use alloc::collections::btree_map::Values;
use alloc::vec::Vec;

/// What each user page of one process should contain.
///
/// Every installed translation of the process has an entry here; entries
/// without a translation are either not yet populated or evicted.
#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<VirtualPage, Page>,
}

impl SupplementalPageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// The page containing `va`, if one is reserved. Pure lookup.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<&Page> {
        self.pages.get(&va.page())
    }

    /// Take ownership of `page`.
    ///
    /// # Errors
    /// [`VmError::AlreadyReserved`] if its address is taken; `page` is dropped.
    pub fn insert(&mut self, page: Page) -> Result<(), VmError> {
        let va = page.va();
        if self.pages.contains_key(&va) {
            return Err(VmError::AlreadyReserved(va));
        }
        self.pages.insert(va, page);
        Ok(())
    }

    /// Unlink the page at `va` without destroying it.
    pub(crate) fn take(&mut self, va: VirtualPage) -> Option<Page> {
        self.pages.remove(&va)
    }

    /// Unlink every page, in address order.
    pub(crate) fn drain(&mut self) -> Vec<Page> {
        core::mem::take(&mut self.pages).into_values().collect()
    }

    /// `true` if none of the `count` pages starting at `base` is reserved.
    #[must_use]
    pub fn is_free(&self, base: VirtualPage, count: u64) -> bool {
        let end = base.offset_by(count);
        self.pages.range(base..end).next().is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> Values<'_, VirtualPage, Page> {
        self.pages.values()
    }
}
