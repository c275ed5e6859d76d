//! Physical frame pool and frame contents access.

use crate::addresses::{PhysicalAddress, PhysicalPage};
use crate::layout::PAGE_SIZE;
use alloc::vec::Vec;

/// Contents of one physical frame.
pub type FrameBytes = [u8; PAGE_SIZE];

/// Source of **physical** 4 KiB frames for user pages.
///
/// Returns `None` when the pool is exhausted; the frame table reacts by
/// evicting.
pub trait FrameAlloc: Send {
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;
    fn free_4k(&mut self, frame: PhysicalPage);
}

/// Gives the kernel temporary access to the bytes of a physical frame
/// (identity map, HHDM, or a simulated memory).
pub trait PhysMapper: Send + Sync {
    /// Run `f` with exclusive access to the contents of `frame`.
    fn with_frame(&self, frame: PhysicalPage, f: &mut dyn FnMut(&mut FrameBytes));
}

/// Fill `frame[from..]` with zeroes.
pub fn zero_tail(mapper: &dyn PhysMapper, frame: PhysicalPage, from: usize) {
    mapper.with_frame(frame, &mut |bytes| bytes[from..].fill(0));
}

/// Copy the whole frame into `out`.
pub fn read_frame(mapper: &dyn PhysMapper, frame: PhysicalPage, out: &mut FrameBytes) {
    mapper.with_frame(frame, &mut |bytes| out.copy_from_slice(bytes));
}

/// Overwrite the whole frame with `data`.
pub fn write_frame(mapper: &dyn PhysMapper, frame: PhysicalPage, data: &FrameBytes) {
    mapper.with_frame(frame, &mut |bytes| bytes.copy_from_slice(data));
}

/// Frame pool over one contiguous physical region.
///
/// Hands out frames bottom-up and recycles freed frames first.
pub struct RegionFrameAlloc {
    next: u64,
    end: u64,
    recycled: Vec<PhysicalPage>,
}

impl RegionFrameAlloc {
    /// Pool of `frames` frames starting at the page-aligned `start`.
    ///
    /// A region reaching past the top of the physical address space is cut
    /// short there.
    #[must_use]
    pub fn new(start: PhysicalAddress, frames: usize) -> Self {
        let start = start.page().base().as_u64();
        let end = u64::try_from(frames)
            .ok()
            .and_then(|n| n.checked_mul(PAGE_SIZE as u64))
            .and_then(|len| start.checked_add(len))
            .unwrap_or(u64::MAX);
        Self {
            next: start,
            end,
            recycled: Vec::new(),
        }
    }

    /// Frames still available without eviction.
    #[must_use]
    pub fn available(&self) -> usize {
        self.recycled.len() + ((self.end - self.next) / PAGE_SIZE as u64) as usize
    }
}

impl FrameAlloc for RegionFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        if let Some(frame) = self.recycled.pop() {
            return Some(frame);
        }
        if self
            .next
            .checked_add(PAGE_SIZE as u64)
            .is_none_or(|next| next > self.end)
        {
            return None;
        }
        let pa = self.next;
        self.next += PAGE_SIZE as u64;
        Some(PhysicalAddress::new(pa).page())
    }

    fn free_4k(&mut self, frame: PhysicalPage) {
        debug_assert!(frame.base().as_u64() < self.next, "freeing a frame never handed out");
        self.recycled.push(frame);
    }
}
