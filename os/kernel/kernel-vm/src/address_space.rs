//! # Per-Process Address Space
//!
//! [`AddressSpace`] is what the process layer holds on to. It owns the
//! supplemental page table, the page table handle and the live mmap regions,
//! and routes every population through the shared [`Vm`].
//!
//! ## Claim
//!
//! ```text
//!  acquire frame (pinned) ─► install translation ─► populate ─► unpin
//!        │                        │ fails               │ fails
//!        ▼                        ▼                     ▼
//!   OutOfMemory            release frame      clear + release frame
//! ```
//!
//! The frame stays pinned until the page is populated, and the page-state
//! lock is held from installation until the frame is linked to the page.

use crate::addresses::{VirtualAddress, VirtualPage};
use crate::error::{FaultError, VmError};
use crate::fault::PageFault;
use crate::file::VmFile;
use crate::frame_alloc::{FrameBytes, read_frame, write_frame};
use crate::frame_table::{FrameHandle, FrameOwner, SharedPageTable};
use crate::layout::{PAGE_SIZE, USER_STACK_TOP, USERSPACE_END};
use crate::mmap::{MappingId, MmapRegion};
use crate::page::{AnonPage, FileRange, Initializer, Page, PageKind, PageType};
use crate::page_table::{PageTable, Translation};
use crate::spt::SupplementalPageTable;
use crate::vm::Vm;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, info, warn};
use spin::Mutex;

/// Virtual memory of one process.
pub struct AddressSpace {
    vm: Arc<Vm>,
    page_table: SharedPageTable,
    pub(crate) spt: SupplementalPageTable,
    /// User `rsp` as of the last user-mode fault.
    pub(crate) stack_pointer: Option<VirtualAddress>,
    pub(crate) regions: BTreeMap<VirtualPage, MmapRegion>,
    next_mapping: u64,
}

impl AddressSpace {
    /// An empty address space translating through `page_table`.
    #[must_use]
    pub fn new(vm: Arc<Vm>, page_table: Box<dyn PageTable>) -> Self {
        Self {
            vm,
            page_table: Arc::new(Mutex::new(page_table)),
            spt: SupplementalPageTable::new(),
            stack_pointer: None,
            regions: BTreeMap::new(),
            next_mapping: 0,
        }
    }

    #[must_use]
    pub const fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    #[must_use]
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    #[must_use]
    pub const fn stack_pointer(&self) -> Option<VirtualAddress> {
        self.stack_pointer
    }

    /// Installed translation for the page containing `va`.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<Translation> {
        self.page_table.lock().translate(va.page())
    }

    /// Hardware dirty bit of the page containing `va`.
    #[must_use]
    pub fn is_dirty(&self, va: VirtualAddress) -> bool {
        self.page_table.lock().is_dirty(va.page())
    }

    /// Register an `Uninit` page at `va` that becomes `page_type` on first
    /// touch.
    ///
    /// # Errors
    /// Rejects non-user and misaligned addresses, a file-backed page without
    /// a file initializer, and an address that is already reserved.
    pub fn reserve(
        &mut self,
        page_type: PageType,
        va: VirtualAddress,
        writable: bool,
        init: Initializer,
    ) -> Result<(), VmError> {
        self.reserve_in(page_type, va, writable, init, None)
    }

    pub(crate) fn reserve_in(
        &mut self,
        page_type: PageType,
        va: VirtualAddress,
        writable: bool,
        init: Initializer,
        mapping: Option<MappingId>,
    ) -> Result<(), VmError> {
        if va.is_null() || va.is_kernel() {
            return Err(VmError::InvalidAddress(va));
        }
        let page = VirtualPage::try_from(va).map_err(|()| VmError::Misaligned(va))?;
        if page_type == PageType::FileBacked && matches!(init, Initializer::Zero) {
            return Err(VmError::MissingFile(va));
        }
        debug!("reserving {page} as {page_type:?} (writable: {writable})");
        self.spt
            .insert(Page::uninit(page, writable, mapping, init, page_type))
    }

    /// Lazily map an executable segment: `read_bytes` from `file` at
    /// `offset`, then `zero_bytes` of zero fill, starting at `upage`.
    ///
    /// The pages are anonymous once loaded; they never write back to the
    /// executable.
    ///
    /// # Errors
    /// Nothing is reserved if `upage` is misaligned, the segment is not made
    /// of whole pages, or any of its pages is taken.
    pub fn load_segment(
        &mut self,
        file: &Arc<dyn VmFile>,
        offset: u64,
        upage: VirtualAddress,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        let total = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::OutOfRange(upage))?;
        if !total.is_multiple_of(PAGE_SIZE) {
            return Err(VmError::PartialPage(total));
        }
        if !upage.is_page_aligned() {
            return Err(VmError::Misaligned(upage));
        }
        let count = (total / PAGE_SIZE) as u64;
        if upage
            .checked_add(total as u64)
            .is_none_or(|end| end.as_u64() > USERSPACE_END)
        {
            return Err(VmError::OutOfRange(upage));
        }
        if !self.spt.is_free(upage.page(), count) {
            return Err(VmError::Overlap(upage));
        }

        let mut va = upage;
        let mut offset = offset;
        let mut remaining = read_bytes;
        for _ in 0..count {
            let page_read = remaining.min(PAGE_SIZE);
            let range = FileRange::new(file.clone(), offset, page_read)?;
            self.reserve(PageType::Anonymous, va, writable, Initializer::Load(range))?;
            offset += page_read as u64;
            remaining -= page_read;
            va = va + PAGE_SIZE as u64;
        }
        Ok(())
    }

    /// Reserve and populate the first stack page directly below
    /// [`USER_STACK_TOP`]. Returns the initial stack pointer.
    ///
    /// # Errors
    /// The page is dropped again if it cannot be claimed.
    pub fn setup_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let top = VirtualAddress::new(USER_STACK_TOP);
        let va = top - PAGE_SIZE as u64;
        self.reserve(PageType::Anonymous, va, true, Initializer::Zero)?;
        if let Err(e) = self.claim(va) {
            self.discard(va.page());
            return Err(e.into());
        }
        self.stack_pointer = Some(top);
        Ok(top)
    }

    /// Populate the page containing `va` now instead of on first touch.
    ///
    /// # Errors
    /// [`FaultError::NotMapped`] if nothing is reserved there, otherwise
    /// whatever the claim reports.
    pub fn claim(&self, va: VirtualAddress) -> Result<(), FaultError> {
        let page = self.spt.find(va).ok_or(FaultError::NotMapped(va))?;
        self.claim_page(page, false).map(|_| ())
    }

    fn owner(&self, page: &Page) -> FrameOwner {
        FrameOwner {
            page: page.state.clone(),
            va: page.va(),
            page_table: self.page_table.clone(),
        }
    }

    /// Bind `page` to a frame and make it accessible. A resident page is
    /// left as is.
    ///
    /// With `keep_pinned` the frame stays excluded from eviction until the
    /// caller unpins the returned handle.
    pub(crate) fn claim_page(&self, page: &Page, keep_pinned: bool) -> Result<FrameHandle, FaultError> {
        loop {
            let resident = page.state.lock().frame;
            let Some(handle) = resident else {
                break;
            };
            if !keep_pinned || self.vm.frames.pin(handle, &page.state) {
                return Ok(handle);
            }
        }

        let va = page.va();
        let backing = self.vm.backing();
        let handle = self.vm.frames.acquire(self.owner(page), backing)?;
        let frame = handle.frame();

        let mut state = page.state.lock();
        let installed = self.page_table.lock().install(va, frame, page.writable());
        if let Err(e) = installed {
            drop(state);
            self.vm.frames.release(handle);
            warn!("cannot map {va} to {frame}: {e}");
            return Err(e.into());
        }
        if let Err(e) = state.populate(frame, backing) {
            self.page_table.lock().clear(va);
            drop(state);
            self.vm.frames.release(handle);
            warn!("cannot populate {va}: {e}");
            return Err(e.into());
        }
        state.frame = Some(handle);
        drop(state);

        debug!("claimed {va} into {frame}");
        if !keep_pinned {
            self.vm.frames.unpin(handle);
        }
        Ok(handle)
    }

    /// Write back, unmap and free `page`.
    pub(crate) fn destroy_page(&self, page: Page) {
        let va = page.va();
        let mut state = page.state.lock();
        let handle = state.frame.take();
        let resident = handle.map(|h| {
            let mut pt = self.page_table.lock();
            let dirty = pt.is_dirty(va);
            pt.clear(va);
            (h.frame(), dirty)
        });
        state.destroy(resident, self.vm.backing());
        drop(state);

        if let Some(handle) = handle {
            self.vm.frames.release(handle);
        }
    }

    pub(crate) fn discard(&mut self, va: VirtualPage) {
        if let Some(page) = self.spt.take(va) {
            self.destroy_page(page);
        }
    }

    /// Destroy the page containing `va`. Returns `false` if none is reserved.
    pub fn remove_page(&mut self, va: VirtualAddress) -> bool {
        let Some(page) = self.spt.take(va.page()) else {
            return false;
        };
        self.destroy_page(page);
        true
    }

    pub(crate) fn allocate_mapping_id(&mut self) -> MappingId {
        let id = MappingId::new(self.next_mapping);
        self.next_mapping += 1;
        id
    }

    /// Duplicate `src` into this (empty) address space, as on `fork`.
    ///
    /// Pages that were never touched are registered again with the same
    /// initializer; populated pages, resident or swapped out, get a fresh
    /// frame with a copy of their bytes.
    ///
    /// # Errors
    /// On failure the pages copied so far remain; destroy the address space.
    pub fn copy_from(&mut self, src: &Self) -> Result<(), VmError> {
        for page in src.spt.iter() {
            let kind = page.state.lock().kind.clone();
            let kind = match kind {
                uninit @ PageKind::Uninit { .. } => {
                    self.spt.insert(Page::new(
                        page.va(),
                        page.writable(),
                        page.mapping(),
                        uninit,
                    ))?;
                    continue;
                }
                PageKind::Anonymous(_) => PageKind::Anonymous(AnonPage::default()),
                file @ PageKind::FileBacked(_) => file,
            };

            let src_handle = src.claim_page(page, true)?;
            let dirty = src.page_table.lock().is_dirty(page.va());
            let mut data: Box<FrameBytes> = Box::new([0; PAGE_SIZE]);
            read_frame(src.vm.mapper(), src_handle.frame(), &mut data);
            src.vm.frames.unpin(src_handle);

            self.spt.insert(Page::new(
                page.va(),
                page.writable(),
                page.mapping(),
                kind,
            ))?;
            if let Some(copy) = self.spt.find(page.va().base()) {
                self.install_copy(copy, &data, dirty)?;
            }
        }
        self.regions.clone_from(&src.regions);
        self.next_mapping = src.next_mapping;
        self.stack_pointer = src.stack_pointer;
        debug!("copied {} pages", self.spt.len());
        Ok(())
    }

    fn install_copy(&self, page: &Page, data: &FrameBytes, dirty: bool) -> Result<(), FaultError> {
        let va = page.va();
        let handle = self.vm.frames.acquire(self.owner(page), self.vm.backing())?;
        write_frame(self.vm.mapper(), handle.frame(), data);

        let mut state = page.state.lock();
        let mut pt = self.page_table.lock();
        if let Err(e) = pt.install(va, handle.frame(), page.writable()) {
            drop(pt);
            drop(state);
            self.vm.frames.release(handle);
            return Err(e.into());
        }
        pt.set_dirty(va, dirty);
        drop(pt);
        state.frame = Some(handle);
        drop(state);

        self.vm.frames.unpin(handle);
        Ok(())
    }

    /// Frame holding `va`, faulted in if needed and pinned.
    fn pin_user(&mut self, va: VirtualAddress, write: bool) -> Result<FrameHandle, FaultError> {
        if va.is_null() || va.is_kernel() {
            return Err(FaultError::InvalidAddress(va));
        }
        let mapped = self.translate(va);
        match mapped {
            Some(t) if write && !t.writable => return Err(FaultError::WriteProtected(va)),
            Some(_) => {}
            None => self.handle_fault(PageFault::kernel_missing(va, write))?,
        }
        let page = self.spt.find(va).ok_or(FaultError::NotMapped(va))?;
        self.claim_page(page, true)
    }

    /// Copy `data` into user memory at `dst`, faulting pages in as the MMU
    /// would. Touched pages are marked accessed and dirty.
    ///
    /// # Errors
    /// The first fault that cannot be resolved; earlier pages keep the bytes
    /// already written.
    pub fn copy_to_user(&mut self, dst: VirtualAddress, data: &[u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < data.len() {
            let va = dst
                .checked_add(done as u64)
                .ok_or(FaultError::InvalidAddress(dst))?;
            let offset = va.page_offset();
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let handle = self.pin_user(va, true)?;
            let src = &data[done..done + chunk];
            self.vm.mapper().with_frame(handle.frame(), &mut |bytes| {
                bytes[offset..offset + chunk].copy_from_slice(src);
            });
            {
                let mut pt = self.page_table.lock();
                pt.set_accessed(va.page(), true);
                pt.set_dirty(va.page(), true);
            }
            self.vm.frames.unpin(handle);
            done += chunk;
        }
        Ok(())
    }

    /// Copy user memory at `src` into `buf`. Touched pages are marked
    /// accessed.
    ///
    /// # Errors
    /// The first fault that cannot be resolved.
    pub fn copy_from_user(&mut self, src: VirtualAddress, buf: &mut [u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < buf.len() {
            let va = src
                .checked_add(done as u64)
                .ok_or(FaultError::InvalidAddress(src))?;
            let offset = va.page_offset();
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            let handle = self.pin_user(va, false)?;
            let out = &mut buf[done..done + chunk];
            self.vm.mapper().with_frame(handle.frame(), &mut |bytes| {
                out.copy_from_slice(&bytes[offset..offset + chunk]);
            });
            self.page_table.lock().set_accessed(va.page(), true);
            self.vm.frames.unpin(handle);
            done += chunk;
        }
        Ok(())
    }

    /// Cross-check SPT, page table and frame table.
    ///
    /// Every resident page must be translated to its own frame and that frame
    /// must be registered to it; every other page must have no translation.
    /// Only meaningful while no other address space is faulting.
    ///
    /// # Errors
    /// The first page that breaks the invariant.
    pub fn check_residency(&self) -> Result<(), VirtualPage> {
        for page in self.spt.iter() {
            let va = page.va();
            let handle = page.state.lock().frame;
            let translated = self.page_table.lock().translate(va).map(|t| t.frame);
            let consistent = match handle {
                Some(h) => {
                    translated == Some(h.frame()) && self.vm.frames.is_bound(h, va, &page.state)
                }
                None => translated.is_none(),
            };
            if !consistent {
                return Err(va);
            }
        }
        Ok(())
    }

    /// Tear everything down: write back dirty file-backed pages, free every
    /// frame and swap slot and close every mapped file.
    pub fn destroy(&mut self) {
        if self.spt.is_empty() && self.regions.is_empty() {
            return;
        }
        info!(
            "tearing down address space ({} pages, {} mappings)",
            self.spt.len(),
            self.regions.len()
        );
        for page in self.spt.drain() {
            self.destroy_page(page);
        }
        self.regions.clear();
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}
