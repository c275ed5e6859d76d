//! # Memory-Mapped Files
//!
//! `map` lays a file over a run of pages without reading anything; each page
//! carries its own window into the file and loads it on first touch.
//!
//! ```text
//!  file:  |<-------- file_len - offset -------->|
//!  map:   |  page 0  |  page 1  | page 2 ..000 | page 3 (all zero) |
//!         ^ base                              ^ read_bytes ends
//! ```
//!
//! Every region holds its own reopened handle, shared by its pages, so the
//! caller may close its descriptor right after mapping. `unmap` writes dirty
//! pages back and drops the pages; the handle closes with the last of them.

use crate::address_space::AddressSpace;
use crate::addresses::{VirtualAddress, VirtualPage, page_count};
use crate::error::VmError;
use crate::file::VmFile;
use crate::layout::{PAGE_SIZE, USERSPACE_END};
use crate::page::{FileRange, Initializer, PageType};
use alloc::sync::Arc;
use core::fmt;
use log::{debug, warn};

/// Identifies the region a file-backed page was mapped by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingId(u64);

impl MappingId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// One live `map` call.
#[derive(Clone)]
pub struct MmapRegion {
    id: MappingId,
    base: VirtualPage,
    pages: u64,
    file: Arc<dyn VmFile>,
}

impl MmapRegion {
    #[must_use]
    pub const fn id(&self) -> MappingId {
        self.id
    }

    #[must_use]
    pub const fn base(&self) -> VirtualPage {
        self.base
    }

    /// Number of pages in the region.
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.pages
    }

    /// The region's own file handle.
    #[must_use]
    pub fn file(&self) -> &Arc<dyn VmFile> {
        &self.file
    }
}

impl fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapRegion")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

impl AddressSpace {
    /// Map `length` bytes of `file`, starting at `offset`, at `addr`.
    ///
    /// Bytes past the end of the file read as zero and are never written
    /// back. Returns `addr`.
    ///
    /// # Errors
    /// Nothing is reserved if the range is not a valid, free, page-aligned
    /// user range or the file cannot be reopened.
    pub fn map(
        &mut self,
        addr: VirtualAddress,
        length: usize,
        writable: bool,
        file: &dyn VmFile,
        offset: u64,
    ) -> Result<VirtualAddress, VmError> {
        if addr.is_null() || addr.is_kernel() {
            return Err(VmError::InvalidAddress(addr));
        }
        if !addr.is_page_aligned() {
            return Err(VmError::Misaligned(addr));
        }
        if length == 0 {
            return Err(VmError::ZeroLength);
        }
        let pages = page_count(length as u64);
        if pages
            .checked_mul(PAGE_SIZE as u64)
            .and_then(|span| addr.checked_add(span))
            .is_none_or(|end| end.as_u64() > USERSPACE_END)
        {
            return Err(VmError::OutOfRange(addr));
        }
        let base = addr.page();
        if !self.spt.is_free(base, pages) {
            warn!("mmap at {addr} overlaps existing pages");
            return Err(VmError::Overlap(addr));
        }
        let file = file.reopen().ok_or(VmError::Reopen)?;

        let id = self.allocate_mapping_id();
        let mut remaining = usize::try_from(file.len().saturating_sub(offset))
            .map_or(length, |available| available.min(length));
        let mut file_offset = offset;
        let mut page = base;
        for _ in 0..pages {
            let page_read = remaining.min(PAGE_SIZE);
            let range = FileRange::new(file.clone(), file_offset, page_read)?;
            self.reserve_in(
                PageType::FileBacked,
                page.base(),
                writable,
                Initializer::Load(range),
                Some(id),
            )?;
            remaining -= page_read;
            file_offset += page_read as u64;
            page = page.next();
        }

        debug!("mapped {pages} pages at {addr} from offset {offset} ({id:?})");
        self.regions.insert(
            base,
            MmapRegion {
                id,
                base,
                pages,
                file,
            },
        );
        Ok(addr)
    }

    /// Remove the mapping starting at `addr`, writing dirty pages back.
    ///
    /// # Errors
    /// [`VmError::NotMappingBase`] unless `addr` is the address a live `map`
    /// call returned; nothing is changed in that case.
    pub fn unmap(&mut self, addr: VirtualAddress) -> Result<(), VmError> {
        if !addr.is_page_aligned() {
            return Err(VmError::NotMappingBase(addr));
        }
        let Some(region) = self.regions.remove(&addr.page()) else {
            warn!("munmap at {addr}: not a mapping base");
            return Err(VmError::NotMappingBase(addr));
        };

        let mut va = region.base;
        for _ in 0..region.pages {
            let belongs = self.spt.find(va.base()).is_some_and(|page| {
                page.mapping() == Some(region.id) && page.page_type() == PageType::FileBacked
            });
            if !belongs {
                break;
            }
            self.discard(va);
            va = va.next();
        }
        debug!("unmapped {} pages at {addr} ({:?})", region.pages, region.id);
        Ok(())
    }

    /// Live mappings, by base address.
    pub fn mappings(&self) -> impl Iterator<Item = &MmapRegion> {
        self.regions.values()
    }
}
