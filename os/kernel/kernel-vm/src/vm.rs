//! Kernel-wide paging state.

use crate::frame_alloc::{FrameAlloc, PhysMapper};
use crate::frame_table::FrameTable;
use crate::page::Backing;
use crate::swap::SwapDevice;
use alloc::boxed::Box;
use alloc::sync::Arc;
use log::info;
use spin::Mutex;

/// State shared by every address space: the frame table over the user frame
/// pool, the swap device and access to physical memory.
///
/// Created once at boot and handed to each [`AddressSpace`](crate::AddressSpace)
/// as an `Arc`.
pub struct Vm {
    pub(crate) frames: FrameTable,
    swap: Mutex<Box<dyn SwapDevice>>,
    mapper: Box<dyn PhysMapper>,
}

impl Vm {
    #[must_use]
    pub fn new(
        alloc: Box<dyn FrameAlloc>,
        mapper: Box<dyn PhysMapper>,
        swap: Box<dyn SwapDevice>,
    ) -> Arc<Self> {
        info!("demand pager online");
        Arc::new(Self {
            frames: FrameTable::new(alloc),
            swap: Mutex::new(swap),
            mapper,
        })
    }

    /// Frames currently holding a user page, across all address spaces.
    #[must_use]
    pub fn resident_frames(&self) -> usize {
        self.frames.resident()
    }

    /// Pages evicted since boot.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.frames.evictions()
    }

    #[must_use]
    pub fn mapper(&self) -> &dyn PhysMapper {
        self.mapper.as_ref()
    }

    pub(crate) fn backing(&self) -> Backing<'_> {
        Backing {
            mapper: self.mapper.as_ref(),
            swap: &self.swap,
        }
    }
}
